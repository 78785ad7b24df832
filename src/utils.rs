use std::fmt;

fn as_secs(dur: std::time::Duration) -> f64 {
    (dur.as_secs() as f64) * 1.0 + (dur.subsec_nanos() as f64) * 0.000000001
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidInput(String),
    OutOfOrder(i64, i64),
    AddAfterSort,
    NotSorted,
    TooManyLayers(usize),
    InvalidZOrder(i32),
    InvalidData(String),
    QueueClosed(String),
    Aborted,
    WorkerPanic(String),
    Unsupported(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Timer(std::time::Instant);

impl Timer {
    pub fn new() -> Timer {
        Timer(std::time::Instant::now())
    }

    pub fn since(&self) -> f64 {
        as_secs(self.0.elapsed())
    }

    pub fn reset(&mut self) {
        self.0 = std::time::Instant::now();
    }
}

pub struct LogTimes {
    pub timer: Timer,
    pub msgs: Vec<(String, f64)>,
    pub longest: usize,
}
impl LogTimes {
    pub fn new() -> LogTimes {
        LogTimes {
            timer: Timer::new(),
            msgs: Vec::new(),
            longest: 6,
        }
    }
    pub fn add(&mut self, msg: &str) {
        self.longest = usize::max(self.longest, msg.len());
        self.msgs.push((String::from(msg), self.timer.since()));
        self.timer.reset();
    }
}
impl fmt::Display for LogTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tot = 0.0;
        let mut others = 0.0;
        for (a, b) in &self.msgs {
            if *b > 0.1 {
                write!(
                    f,
                    "{}:{}{:6.2}s\n",
                    a,
                    " ".repeat(self.longest - a.len()),
                    b
                )?;
            } else {
                others += b;
            }
            tot += b;
        }
        if others > 0.0 {
            write!(f, "OTHERS:{}{:6.2}s\n", " ".repeat(self.longest - 6), others)?;
        }
        write!(f, "TOTAL:{}{:6.2}s", " ".repeat(self.longest - 5), tot)
    }
}

/// Cpu time spent by the calling thread.
pub struct ThreadTimer(cpu_time::ThreadTime);

impl ThreadTimer {
    pub fn new() -> ThreadTimer {
        ThreadTimer(cpu_time::ThreadTime::now())
    }

    pub fn since(&self) -> f64 {
        as_secs(self.0.elapsed())
    }
}

/// Cpu time spent by the whole process since the start of the run.
pub fn process_cpu_secs() -> f64 {
    as_secs(cpu_time::ProcessTime::now().as_duration())
}

/// Named timings collected from each stage of a callback chain.
pub struct Timings {
    pub timings: Vec<(String, f64)>,
    pub counts: Vec<(String, u64)>,
}

impl Timings {
    pub fn new() -> Timings {
        Timings {
            timings: Vec::new(),
            counts: Vec::new(),
        }
    }

    pub fn add(&mut self, name: &str, tm: f64) {
        self.timings.push((String::from(name), tm));
    }

    pub fn add_count(&mut self, name: &str, count: u64) {
        self.counts.push((String::from(name), count));
    }

    pub fn combine(&mut self, mut other: Timings) {
        self.timings.extend(std::mem::take(&mut other.timings));
        self.counts.extend(std::mem::take(&mut other.counts));
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts
            .iter()
            .filter(|(a, _)| a == name)
            .map(|(_, b)| *b)
            .sum()
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut longest = 6;
        for (a, _) in &self.timings {
            longest = usize::max(longest, a.len());
        }
        for (a, _) in &self.counts {
            longest = usize::max(longest, a.len());
        }
        for (a, b) in &self.timings {
            write!(f, "{}:{}{:8.1}s\n", a, " ".repeat(longest - a.len()), b)?;
        }
        for (a, b) in &self.counts {
            write!(f, "{}:{}{:10}\n", a, " ".repeat(longest - a.len()), b)?;
        }
        Ok(())
    }
}

/// Converts degrees into the fixed precision (1e-7 degree) integer used for node locations.
pub fn as_int(v: f64) -> i32 {
    if v < 0.0 {
        return ((v * 10000000.0) - 0.5) as i32;
    }

    return ((v * 10000000.0) + 0.5) as i32;
}

pub fn as_float(v: i32) -> f64 {
    (v as f64) * 0.0000001
}
