use std::sync::OnceLock;

use crate::utils::{Error, Result};

static MESSENGER: OnceLock<Box<dyn Messenger>> = OnceLock::new();

pub fn set_boxed_messenger(logger: Box<dyn Messenger>) -> Result<()> {
    MESSENGER
        .set(logger)
        .map_err(|_| Error::InvalidInput(String::from("failed to set messenger: already set")))
}

pub fn messenger() -> &'static dyn Messenger {
    match MESSENGER.get() {
        Some(m) => m.as_ref(),
        None => {
            static NOP: NopMessenger = NopMessenger;
            &NOP
        }
    }
}

#[macro_export]
macro_rules! message {
    ($($arg:tt)*) => {
        $crate::logging::messenger().message(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! progress_percent {
    ($msg:expr) => {
        $crate::logging::messenger().start_progress_percent($msg)
    };
}

#[macro_export]
macro_rules! progress_bytes {
    ($msg:expr, $total:expr) => {
        $crate::logging::messenger().start_progress_bytes($msg, $total)
    };
}

#[macro_export]
macro_rules! task_sequence {
    ($msg:expr, $num:expr) => {
        $crate::logging::messenger().start_task_sequence($msg, $num)
    };
}

pub trait ProgressPercent: Send + Sync {
    fn change_message(&self, new_message: &str);
    fn progress_percent(&self, percent: f64);
    fn finish(&self);
}

pub trait ProgressBytes: Send + Sync {
    fn change_message(&self, new_message: &str);
    fn progress_bytes(&self, bytes: u64);
    fn finish(&self);
}

pub trait TaskSequence: Send + Sync {
    fn start_task(&self, msg: &str);
    fn finish(&self);
}

pub trait Messenger: Send + Sync {
    fn message(&self, message: &str);

    fn start_progress_percent(&self, message: &str) -> Box<dyn ProgressPercent>;
    fn start_progress_bytes(&self, message: &str, total_bytes: u64) -> Box<dyn ProgressBytes>;
    fn start_task_sequence(&self, message: &str, num_tasks: usize) -> Box<dyn TaskSequence>;
}

struct NopProgress;
impl ProgressPercent for NopProgress {
    fn change_message(&self, _new_message: &str) {}
    fn progress_percent(&self, _percent: f64) {}
    fn finish(&self) {}
}
impl ProgressBytes for NopProgress {
    fn change_message(&self, _new_message: &str) {}
    fn progress_bytes(&self, _bytes: u64) {}
    fn finish(&self) {}
}
impl TaskSequence for NopProgress {
    fn start_task(&self, _msg: &str) {}
    fn finish(&self) {}
}

struct NopMessenger;
impl Messenger for NopMessenger {
    fn message(&self, _message: &str) {}

    fn start_progress_percent(&self, _message: &str) -> Box<dyn ProgressPercent> {
        Box::new(NopProgress)
    }
    fn start_progress_bytes(&self, _message: &str, _total_bytes: u64) -> Box<dyn ProgressBytes> {
        Box::new(NopProgress)
    }
    fn start_task_sequence(&self, _message: &str, _num_tasks: usize) -> Box<dyn TaskSequence> {
        Box::new(NopProgress)
    }
}
