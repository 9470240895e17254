pub mod account_monitor;

pub use account_monitor::{AccountMonitor, CycleReport};
