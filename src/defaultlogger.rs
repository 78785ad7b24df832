use indicatif::{ProgressBar, ProgressStyle};

use crate::logging::{set_boxed_messenger, Messenger, ProgressBytes, ProgressPercent, TaskSequence};
use crate::pipeline::queue::lock;
use crate::utils::Result;

use std::sync::Mutex;

const BYTES_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:80.cyan/blue}] {bytes} / {total_bytes} ({eta_precise}) {msg}";
const PERCENT_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:80.cyan/blue}] {percent:>4}% ({eta_precise}) {msg}";

/// Percent bars count in tenths of a percent.
const PERCENT_STEPS: u64 = 1000;

/// One indicatif bar, shown either as bytes read or as percent done.
pub struct Bar {
    pb: ProgressBar,
}

impl Bar {
    fn start(template: &str, len: u64, message: &str) -> Bar {
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let pb = ProgressBar::new(len).with_style(style);
        pb.set_message(String::from(message));
        Bar { pb }
    }
}

impl ProgressBytes for Bar {
    fn change_message(&self, new_message: &str) {
        self.pb.set_message(String::from(new_message));
    }

    fn progress_bytes(&self, bytes: u64) {
        self.pb.set_position(bytes);
    }

    fn finish(&self) {
        self.pb.finish();
    }
}

impl ProgressPercent for Bar {
    fn change_message(&self, new_message: &str) {
        self.pb.set_message(String::from(new_message));
    }

    fn progress_percent(&self, percent: f64) {
        let pos = (percent.clamp(0.0, 100.0) * (PERCENT_STEPS as f64) / 100.0) as u64;
        self.pb.set_position(pos);
    }

    fn finish(&self) {
        self.pb.finish();
    }
}

/// Prefixes each task with its position in the sequence, e.g. `[render 2/3]`.
pub struct Steps {
    name: String,
    total: usize,
    current: Mutex<usize>,
}

impl Steps {
    fn label(&self, step: usize) -> String {
        format!("[{} {}/{}]", self.name, step, self.total)
    }
}

impl TaskSequence for Steps {
    fn start_task(&self, msg: &str) {
        let step = {
            let mut c = lock(&self.current);
            *c += 1;
            *c
        };
        print_lines(&format!("{} {}", self.label(step), msg));
    }

    fn finish(&self) {
        let step = *lock(&self.current);
        if step < self.total {
            print_lines(&format!("{} stopped after {} tasks", self.label(step), step));
        }
    }
}

/// Continuation lines are indented to line up with the first.
fn format_lines(ts: &str, message: &str) -> Vec<String> {
    let indent = " ".repeat(ts.len() + 6);
    message
        .lines()
        .enumerate()
        .map(|(i, l)| if i == 0 { format!("MSG {}: {}", ts, l) } else { format!("{}{}", indent, l) })
        .collect()
}

fn print_lines(message: &str) {
    let ts = chrono::Local::now().format("%H:%M:%S").to_string();
    for l in format_lines(&ts, message) {
        println!("{}", l);
    }
}

/// Writes messages to stdout with a timestamp, and shows progress as
/// indicatif bars.
pub struct TerminalMessenger;

impl Messenger for TerminalMessenger {
    fn message(&self, message: &str) {
        print_lines(message);
    }

    fn start_progress_percent(&self, message: &str) -> Box<dyn ProgressPercent> {
        Box::new(Bar::start(PERCENT_TEMPLATE, PERCENT_STEPS, message))
    }

    fn start_progress_bytes(&self, message: &str, total_bytes: u64) -> Box<dyn ProgressBytes> {
        Box::new(Bar::start(BYTES_TEMPLATE, total_bytes, message))
    }

    fn start_task_sequence(&self, message: &str, num_tasks: usize) -> Box<dyn TaskSequence> {
        Box::new(Steps {
            name: String::from(message),
            total: num_tasks,
            current: Mutex::new(0),
        })
    }
}

pub fn register_messenger_default() -> Result<()> {
    set_boxed_messenger(Box::new(TerminalMessenger))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lines() {
        let lines = format_lines("12:00:01", "first\nsecond");
        assert_eq!(lines, vec!["MSG 12:00:01: first", "              second"]);
    }

    #[test]
    fn test_steps_label() {
        let s = Steps {
            name: String::from("render"),
            total: 3,
            current: Mutex::new(0),
        };
        s.start_task("a");
        assert_eq!(*lock(&s.current), 1);
        assert_eq!(s.label(2), "[render 2/3]");
    }
}
