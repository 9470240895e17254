//! Line parser for the bracketed status record format.
//!
//! Dispatch is on the literal first token. Lines with an unknown first
//! token (blank lines, comments, other tools' output) are skipped.

use crate::errors::ParseError;
use crate::types::{
    ConfigRecord, ParsedStatusFile, Platform, ReportedState, Role, StatusLine, StatusRecord,
    TypeRecord,
};

pub const TAG_TYPE: &str = "TYPE";
pub const TAG_STATUS: &str = "STATUS";
pub const TAG_CONFIG: &str = "CONFIG";

const BOM: char = '\u{feff}';

/// Extract every `[...]` group of a line in order, trimmed.
///
/// Text outside brackets is ignored. An unterminated `[` stops tokenization.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find(']') else {
            break;
        };
        tokens.push(after_open[..close].trim().to_string());
        rest = &after_open[close + 1..];
    }

    tokens
}

/// Parse a single line.
///
/// Returns `Ok(None)` for lines that carry no record, including TYPE lines
/// with fewer than four tokens or an unknown role. Only a STATUS line with a
/// non-numeric timestamp is an error.
pub fn parse_line(line: &str) -> Result<Option<StatusLine>, ParseError> {
    let cleaned: String = line.chars().filter(|c| *c != '\0' && *c != BOM).collect();
    let tokens = tokenize(&cleaned);

    let Some(tag) = tokens.first() else {
        return Ok(None);
    };

    match tag.as_str() {
        TAG_TYPE => Ok(parse_type(&tokens).map(StatusLine::Type)),
        TAG_STATUS => parse_status(&tokens, &cleaned).map(|r| r.map(StatusLine::Status)),
        TAG_CONFIG => Ok(parse_config(&tokens).map(StatusLine::Config)),
        _ => Ok(None),
    }
}

fn parse_type(tokens: &[String]) -> Option<TypeRecord> {
    if tokens.len() < 4 {
        return None;
    }
    let role = Role::from_token(&tokens[1])?;
    let account_id = tokens[3].clone();
    if account_id.is_empty() {
        return None;
    }
    Some(TypeRecord {
        role,
        platform: Platform::from_token(&tokens[2]),
        account_id,
    })
}

fn parse_status(tokens: &[String], line: &str) -> Result<Option<StatusRecord>, ParseError> {
    if tokens.len() < 3 {
        return Ok(None);
    }
    let timestamp = tokens[2]
        .parse::<i64>()
        .map_err(|e| ParseError::MalformedRecord {
            kind: TAG_STATUS,
            line: line.trim().to_string(),
            reason: format!("timestamp {:?} is not an integer: {}", tokens[2], e),
        })?;

    Ok(Some(StatusRecord {
        state: ReportedState::from_token(&tokens[1]),
        timestamp,
    }))
}

fn parse_config(tokens: &[String]) -> Option<ConfigRecord> {
    if tokens.len() < 2 {
        return None;
    }
    Some(ConfigRecord {
        config_role: Role::from_token(&tokens[1]),
        details: tokens[2..].to_vec(),
    })
}

/// Parse a whole decoded status file.
///
/// The last record of each kind wins. A malformed STATUS line fails the
/// document so the caller can keep its previous view of the account.
pub fn parse_document(text: &str) -> Result<ParsedStatusFile, ParseError> {
    let mut parsed = ParsedStatusFile::default();

    for line in text.lines() {
        match parse_line(line)? {
            Some(StatusLine::Type(record)) => parsed.type_record = Some(record),
            Some(StatusLine::Status(record)) => parsed.status = Some(record),
            Some(StatusLine::Config(record)) => parsed.config = Some(record),
            None => {}
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_trims_and_orders() {
        assert_eq!(
            tokenize("[TYPE] [ MASTER ]  [MT5] [52381082]"),
            vec!["TYPE", "MASTER", "MT5", "52381082"]
        );
        assert_eq!(tokenize("[CONFIG] [PENDING] []"), vec!["CONFIG", "PENDING", ""]);
        assert!(tokenize("no brackets here").is_empty());
        assert_eq!(tokenize("[STATUS] [ONLINE] [123"), vec!["STATUS", "ONLINE"]);
    }

    #[test]
    fn test_type_line() {
        let parsed = parse_line("[TYPE] [MASTER] [MT5] [52381082]").unwrap();
        assert_eq!(
            parsed,
            Some(StatusLine::Type(TypeRecord {
                role: Role::Master,
                platform: Platform::MT5,
                account_id: "52381082".to_string(),
            }))
        );
    }

    #[test]
    fn test_type_line_is_idempotent() {
        let line = "[TYPE] [SLAVE] [MT4] [11223344]";
        assert_eq!(parse_line(line).unwrap(), parse_line(line).unwrap());
    }

    #[test]
    fn test_short_type_line_yields_nothing() {
        assert_eq!(parse_line("[TYPE] [MASTER] [MT5]").unwrap(), None);
        assert_eq!(parse_line("[TYPE] [OBSERVER] [MT5] [1]").unwrap(), None);
    }

    #[test]
    fn test_status_line() {
        let parsed = parse_line("[STATUS] [ONLINE] [1756317783]").unwrap();
        assert_eq!(
            parsed,
            Some(StatusLine::Status(StatusRecord {
                state: ReportedState::Online,
                timestamp: 1756317783,
            }))
        );
    }

    #[test]
    fn test_status_with_bad_timestamp_is_error() {
        let err = parse_line("[STATUS] [ONLINE] [soon]").unwrap_err();
        match err {
            ParseError::MalformedRecord { kind, .. } => assert_eq!(kind, TAG_STATUS),
        }
    }

    #[test]
    fn test_short_status_line_yields_nothing() {
        assert_eq!(parse_line("[STATUS] [ONLINE]").unwrap(), None);
    }

    #[test]
    fn test_config_keeps_details_verbatim() {
        let parsed = parse_line("[CONFIG] [SLAVE] [ENABLED] [NULL] [52381082]").unwrap();
        assert_eq!(
            parsed,
            Some(StatusLine::Config(ConfigRecord {
                config_role: Some(Role::Slave),
                details: vec![
                    "ENABLED".to_string(),
                    "NULL".to_string(),
                    "52381082".to_string()
                ],
            }))
        );
    }

    #[test]
    fn test_unknown_lines_are_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("# comment").unwrap(), None);
        assert_eq!(parse_line("[HEARTBEAT] [1]").unwrap(), None);
        assert_eq!(parse_line("[type] [MASTER] [MT5] [1]").unwrap(), None);
    }

    #[test]
    fn test_document_with_crlf_and_bom() {
        let text = "\u{feff}[TYPE] [PENDING] [MT4] [250062001]\r\n\
                    [STATUS] [ONLINE] [1756317783]\r\n\
                    [CONFIG] [PENDING] []\r\n";
        let parsed = parse_document(text).unwrap();

        let type_record = parsed.type_record.unwrap();
        assert_eq!(type_record.role, Role::Pending);
        assert_eq!(type_record.platform, Platform::MT4);
        assert_eq!(type_record.account_id, "250062001");
        assert_eq!(parsed.status.unwrap().timestamp, 1756317783);
        assert_eq!(parsed.config.unwrap().details, vec![String::new()]);
    }

    #[test]
    fn test_document_last_record_wins() {
        let text = "[STATUS] [ONLINE] [100]\n[STATUS] [ONLINE] [200]\n";
        let parsed = parse_document(text).unwrap();
        assert_eq!(parsed.status.unwrap().timestamp, 200);
        assert!(!parsed.has_account());
    }

    #[test]
    fn test_document_fails_on_malformed_status() {
        let text = "[TYPE] [MASTER] [MT5] [1]\n[STATUS] [ONLINE] [x]\n";
        assert!(parse_document(text).is_err());
    }
}
