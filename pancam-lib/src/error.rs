#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A required structural marker in a capture file was missing or
    /// malformed. Aborts processing of that file only.
    #[error("framing error at line {line}: {message}")]
    Framing { line: usize, message: String },
}

impl Error {
    pub(crate) fn framing<S: Into<String>>(line: usize, message: S) -> Self {
        Error::Framing {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
