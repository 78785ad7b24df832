#[derive(Debug)]
#[allow(dead_code)] //suppress incorrect field not read warnings (see https://github.com/rust-lang/rust/issues/123068)
pub enum Error {
    Io(std::io::Error),
    Osmtiles(osmtiles::utils::Error),
    OutputFileExists(std::string::String),
    InvalidInputError(std::string::String),
    ThreadPanic(std::string::String),
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl std::convert::From<osmtiles::utils::Error> for Error {
    fn from(e: osmtiles::utils::Error) -> Self {
        Error::Osmtiles(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
