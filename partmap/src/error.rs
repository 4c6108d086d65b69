use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartMapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed partition map: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, PartMapError>;
