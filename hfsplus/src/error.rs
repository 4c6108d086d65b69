use thiserror::Error;

#[derive(Error, Debug)]
pub enum HfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("invalid HFS+ signature: 0x{0:04X} (expected 0x482B or 0x4858)")]
    InvalidSignature(u16),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("malformed volume: {0}")]
    Malformed(String),

    #[error("stuck traversal: {0}")]
    Stuck(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}

pub type Result<T> = std::result::Result<T, HfsError>;
