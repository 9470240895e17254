pub mod account;
pub mod event;
pub mod registry;

pub use account::*;
pub use event::*;
pub use registry::*;

// Record types of the status file format are part of the domain vocabulary
pub use copier_status_file::{
    ConfigRecord, ParsedStatusFile, Platform, ReportedState, Role, StatusRecord, TypeRecord,
};
