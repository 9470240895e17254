use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed {kind} record: {reason} (line: {line:?})")]
    MalformedRecord {
        kind: &'static str,
        line: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{encoding} content has odd byte length {len}")]
    OddLength { encoding: &'static str, len: usize },

    #[error("invalid {encoding} content: {reason}")]
    Invalid {
        encoding: &'static str,
        reason: String,
    },
}
