use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapsuleError {
    #[error("the container signature does not match its contents")]
    Integrity,

    #[error("the path \"{0}\" does not exist")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("transaction error: {0}")]
    Transaction(String),
}

pub type Result<T> = std::result::Result<T, CapsuleError>;
