use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("invalid integer at byte {pos}: {reason}")]
    InvalidInteger { pos: usize, reason: &'static str },

    #[error("invalid string length at byte {0}")]
    InvalidStringLength(usize),

    #[error("unexpected character {ch:?} at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("dictionary key is not a byte string at byte {0}")]
    NonStringKey(usize),

    #[error("trailing data after value at byte {0}")]
    TrailingData(usize),

    #[error("nesting too deep")]
    NestingTooDeep,
}
