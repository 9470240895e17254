//! Byte-level decoding of status files.
//!
//! MT5 terminals write status files as UTF-16LE (usually with a BOM),
//! MT4 and most other terminals write single-byte text. Decoding order:
//! byte-order mark, then a NUL-pattern sniff for BOM-less UTF-16, then the
//! encoding registered for the platform hint.

use std::collections::HashMap;

use crate::errors::DecodeError;
use crate::types::Platform;

/// Number of leading bytes inspected when sniffing BOM-less UTF-16
const SNIFF_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8, falling back to Latin-1 for invalid sequences
    Utf8,
    Latin1,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "Latin-1",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, TextEncoding::Utf16Le | TextEncoding::Utf16Be)
    }
}

/// Platform to encoding table
#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    by_platform: HashMap<Platform, TextEncoding>,
    fallback: TextEncoding,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(TextEncoding::Utf8);
        registry.register(Platform::MT5, TextEncoding::Utf16Le);
        registry
    }
}

impl DecoderRegistry {
    pub fn empty(fallback: TextEncoding) -> Self {
        Self {
            by_platform: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, platform: Platform, encoding: TextEncoding) {
        self.by_platform.insert(platform, encoding);
    }

    pub fn encoding_for(&self, hint: Option<&Platform>) -> TextEncoding {
        hint.and_then(|p| self.by_platform.get(p).copied())
            .unwrap_or(self.fallback)
    }

    /// Decode raw file bytes into text.
    pub fn decode(&self, bytes: &[u8], hint: Option<&Platform>) -> Result<String, DecodeError> {
        if let Some((encoding, bom_len)) = detect_bom(bytes) {
            return decode_with(&bytes[bom_len..], encoding);
        }

        if let Some(encoding) = sniff_utf16(bytes) {
            return decode_with(bytes, encoding);
        }

        let encoding = self.encoding_for(hint);
        if encoding.is_wide() && !bytes.is_empty() && !bytes.contains(&0) {
            // Hinted wide but written narrow: ASCII-range UTF-16 always has NULs
            return decode_with(bytes, self.fallback_narrow());
        }
        decode_with(bytes, encoding)
    }

    fn fallback_narrow(&self) -> TextEncoding {
        if self.fallback.is_wide() {
            TextEncoding::Utf8
        } else {
            self.fallback
        }
    }
}

/// Detect a byte-order mark, returning the encoding and the BOM length
pub fn detect_bom(bytes: &[u8]) -> Option<(TextEncoding, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((TextEncoding::Utf8, 3)),
        [0xFF, 0xFE, ..] => Some((TextEncoding::Utf16Le, 2)),
        [0xFE, 0xFF, ..] => Some((TextEncoding::Utf16Be, 2)),
        _ => None,
    }
}

/// Recognise BOM-less UTF-16 by where the NUL bytes fall.
pub fn sniff_utf16(bytes: &[u8]) -> Option<TextEncoding> {
    let window = &bytes[..bytes.len().min(SNIFF_LEN)];
    let pairs = window.len() / 2;
    if pairs == 0 || bytes.len() % 2 != 0 {
        return None;
    }

    let (mut even_nuls, mut odd_nuls) = (0usize, 0usize);
    for pair in window.chunks_exact(2) {
        if pair[0] == 0 {
            even_nuls += 1;
        }
        if pair[1] == 0 {
            odd_nuls += 1;
        }
    }

    if odd_nuls * 2 >= pairs && even_nuls == 0 {
        Some(TextEncoding::Utf16Le)
    } else if even_nuls * 2 >= pairs && odd_nuls == 0 {
        Some(TextEncoding::Utf16Be)
    } else {
        None
    }
}

/// Decode bytes with a fixed encoding (no BOM handling)
pub fn decode_with(bytes: &[u8], encoding: TextEncoding) -> Result<String, DecodeError> {
    match encoding {
        TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Ok(latin1(bytes)),
        },
        TextEncoding::Latin1 => Ok(latin1(bytes)),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::OddLength {
                    encoding: encoding.name(),
                    len: bytes.len(),
                });
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| match encoding {
                    TextEncoding::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
                    _ => u16::from_le_bytes([pair[0], pair[1]]),
                })
                .collect();
            String::from_utf16(&units).map_err(|e| DecodeError::Invalid {
                encoding: encoding.name(),
                reason: e.to_string(),
            })
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut bytes = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_utf16le_with_bom() {
        let registry = DecoderRegistry::default();
        let bytes = utf16le("[TYPE] [MASTER] [MT5] [52381082]", true);
        let text = registry.decode(&bytes, None).unwrap();
        assert_eq!(text, "[TYPE] [MASTER] [MT5] [52381082]");
    }

    #[test]
    fn test_utf16le_without_bom_is_sniffed() {
        let registry = DecoderRegistry::default();
        let bytes = utf16le("[STATUS] [ONLINE] [1]", false);
        let text = registry.decode(&bytes, Some(&Platform::MT4)).unwrap();
        assert_eq!(text, "[STATUS] [ONLINE] [1]");
    }

    #[test]
    fn test_single_byte_for_mt4() {
        let registry = DecoderRegistry::default();
        let text = registry
            .decode(b"[TYPE] [SLAVE] [MT4] [1]", Some(&Platform::MT4))
            .unwrap();
        assert_eq!(text, "[TYPE] [SLAVE] [MT4] [1]");
    }

    #[test]
    fn test_mt5_hint_with_narrow_content_falls_back() {
        let registry = DecoderRegistry::default();
        let text = registry
            .decode(b"[TYPE] [MASTER] [MT5] [7]", Some(&Platform::MT5))
            .unwrap();
        assert_eq!(text, "[TYPE] [MASTER] [MT5] [7]");
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_latin1() {
        let text = decode_with(&[b'[', 0xE9, b']'], TextEncoding::Utf8).unwrap();
        assert_eq!(text, "[\u{e9}]");
    }

    #[test]
    fn test_odd_length_utf16_is_decode_error() {
        let registry = DecoderRegistry::default();
        let mut bytes = utf16le("[TYPE]", true);
        bytes.push(b'x');
        let err = registry.decode(&bytes, None).unwrap_err();
        assert!(matches!(err, DecodeError::OddLength { .. }));
    }

    #[test]
    fn test_unpaired_surrogate_is_decode_error() {
        let bytes = [0xFF, 0xFE, 0x00, 0xD8, b'a', 0x00];
        let err = DecoderRegistry::default().decode(&bytes, None).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { .. }));
    }

    #[test]
    fn test_registered_platform_decoder() {
        let mut registry = DecoderRegistry::default();
        let platform = Platform::Other("NINJA".to_string());
        registry.register(platform.clone(), TextEncoding::Latin1);
        assert_eq!(registry.encoding_for(Some(&platform)), TextEncoding::Latin1);
        assert_eq!(registry.encoding_for(Some(&Platform::MT5)), TextEncoding::Utf16Le);
        assert_eq!(registry.encoding_for(None), TextEncoding::Utf8);
    }

    #[test]
    fn test_empty_file_decodes_to_empty_text() {
        let registry = DecoderRegistry::default();
        assert_eq!(registry.decode(&[], Some(&Platform::MT5)).unwrap(), "");
    }
}
