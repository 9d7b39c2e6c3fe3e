use thiserror::Error;

/// Errors surfaced by trie updates and image loading.
#[derive(Error, Debug)]
pub enum CedarError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty keys cannot be stored")]
    EmptyKey,
    #[error("key contains a NUL byte at offset {offset}")]
    NulByte { offset: usize },
    #[error("value {0} is outside the range representable by the reduced encoding")]
    ValueOutOfRange(i32),
    #[error("corrupt image: {0}")]
    Corrupt(&'static str),
    #[error("image holds a {found} trie, expected {expected}")]
    EncodingMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}

pub type Result<T> = std::result::Result<T, CedarError>;
