// Location: status-file/src/types.rs
// Purpose: Typed records parsed from a terminal's account status file

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account role as written by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Pending,
    Master,
    Slave,
}

impl Role {
    /// Parse a role token (case-insensitive). Unknown tokens yield None.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Role::Pending),
            "MASTER" => Some(Role::Master),
            "SLAVE" => Some(Role::Slave),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pending => "PENDING",
            Role::Master => "MASTER",
            Role::Slave => "SLAVE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading platform family that produced a status file
///
/// Unknown platforms are kept verbatim (upper-cased) so new terminals
/// can be tracked before they get a dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    MT4,
    MT5,
    CTrader,
    Other(String),
}

impl Platform {
    pub fn from_token(token: &str) -> Self {
        let upper = token.trim().to_ascii_uppercase();
        match upper.as_str() {
            "MT4" => Platform::MT4,
            "MT5" => Platform::MT5,
            "CTRADER" => Platform::CTrader,
            _ => Platform::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::MT4 => "MT4",
            Platform::MT5 => "MT5",
            Platform::CTrader => "CTRADER",
            Platform::Other(name) => name,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        Platform::from_token(&value)
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.as_str().to_string()
    }
}

/// State token of a STATUS line. Diagnostic only: online/offline is
/// derived from the timestamp, never from this token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportedState {
    Online,
    Offline,
    Unknown,
}

impl ReportedState {
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => ReportedState::Online,
            "OFFLINE" => ReportedState::Offline,
            _ => ReportedState::Unknown,
        }
    }
}

/// `[TYPE] [role] [platform] [accountId]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub role: Role,
    pub platform: Platform,
    pub account_id: String,
}

/// `[STATUS] [state] [unixTimestamp]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: ReportedState,
    /// Unix seconds written by the terminal
    pub timestamp: i64,
}

/// `[CONFIG] [role] detail...`
///
/// `details` holds every token after the role, verbatim. Placeholders such
/// as `NULL` or `[]` are kept as-is here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub config_role: Option<Role>,
    pub details: Vec<String>,
}

impl ConfigRecord {
    pub fn detail(&self, index: usize) -> Option<&str> {
        self.details.get(index).map(String::as_str)
    }
}

/// One recognised line of a status file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Type(TypeRecord),
    Status(StatusRecord),
    Config(ConfigRecord),
}

/// Records collected from a whole status file. Later lines of the same
/// kind replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStatusFile {
    pub type_record: Option<TypeRecord>,
    pub status: Option<StatusRecord>,
    pub config: Option<ConfigRecord>,
}

impl ParsedStatusFile {
    /// A file without a TYPE record carries no account data
    pub fn has_account(&self) -> bool {
        self.type_record.is_some()
    }
}
