//! Status file format shared by the relay server and its tooling.
//!
//! Trading terminals write one small text file per account containing
//! bracketed records:
//!
//! ```text
//! [TYPE] [MASTER] [MT5] [52381082]
//! [STATUS] [ONLINE] [1756317783]
//! [CONFIG] [MASTER] [ENABLED] [Main account]
//! ```
//!
//! This crate turns raw file bytes into typed records. It performs no I/O.

pub mod decode;
pub mod errors;
pub mod parser;
pub mod types;

pub use decode::{DecoderRegistry, TextEncoding};
pub use errors::{DecodeError, ParseError};
pub use parser::{parse_document, parse_line, tokenize};
pub use types::{
    ConfigRecord, ParsedStatusFile, Platform, ReportedState, Role, StatusLine, StatusRecord,
    TypeRecord,
};
