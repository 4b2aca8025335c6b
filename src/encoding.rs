use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingDecision {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub decision: EncodingDecision,
    /// Encoding the decoder actually used; a BOM wins over the decision.
    pub encoding: &'static Encoding,
    pub had_bom: bool,
}

impl DecodedText {
    /// Encodes `text` the way this file was read, BOM included.
    pub fn encode(&self, text: &str) -> EncodedText {
        let mut bytes = Vec::with_capacity(text.len() + 3);
        if self.had_bom {
            bytes.extend_from_slice(bom_bytes(self.encoding));
        }

        let mut had_errors = false;
        if self.encoding == UTF_16LE {
            bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        } else if self.encoding == UTF_16BE {
            bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
        } else {
            let (encoded, _, errors) = self.encoding.encode(text);
            had_errors = errors;
            bytes.extend_from_slice(&encoded);
        }

        EncodedText { bytes, had_errors }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedText {
    pub bytes: Vec<u8>,
    pub had_errors: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
    override_label: Option<String>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        if let Some(label) = override_label {
            let trimmed = label.trim();
            let encoding = Encoding::for_label(trimmed.as_bytes())
                .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
            Ok(Self {
                override_encoding: Some(encoding),
                override_label: Some(trimmed.to_string()),
            })
        } else {
            Ok(Self::default())
        }
    }

    pub fn describe(&self) -> String {
        if let (Some(label), Some(enc)) = (&self.override_label, self.override_encoding) {
            format!(
                "override '{}' ({}), auto-detect disabled",
                label,
                enc.name()
            )
        } else {
            "auto-detect (BOM → detector → UTF-8)".to_string()
        }
    }

    pub fn decide(&self, bytes: &[u8]) -> EncodingDecision {
        if let Some(encoding) = self.override_encoding {
            return EncodingDecision {
                encoding,
                source: EncodingSource::Override,
            };
        }

        detect_auto(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedText {
        let decision = self.decide(bytes);
        let (cow, encoding_used, had_errors) = decision.encoding.decode(bytes);
        DecodedText {
            text: cow.into_owned(),
            had_errors,
            encoding: encoding_used,
            had_bom: detect_bom(bytes) == Some(encoding_used),
            decision,
        }
    }
}

fn detect_auto(bytes: &[u8]) -> EncodingDecision {
    if let Some(encoding) = detect_bom(bytes) {
        return EncodingDecision {
            encoding,
            source: EncodingSource::Bom,
        };
    }

    if std::str::from_utf8(bytes).is_ok() {
        return EncodingDecision {
            encoding: UTF_8,
            source: EncodingSource::AssumedUtf8,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    EncodingDecision {
        encoding,
        source: EncodingSource::Detector,
    }
}

fn detect_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(UTF_8);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some(UTF_16LE);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(UTF_16BE);
    }

    None
}

fn bom_bytes(encoding: &'static Encoding) -> &'static [u8] {
    if encoding == UTF_8 {
        &[0xEF, 0xBB, 0xBF]
    } else if encoding == UTF_16LE {
        &[0xFF, 0xFE]
    } else if encoding == UTF_16BE {
        &[0xFE, 0xFF]
    } else {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_validation() {
        let strategy = EncodingStrategy::new(Some("utf-16le")).expect("valid encoding");
        assert_eq!(strategy.override_label.as_deref(), Some("utf-16le"));
    }

    #[test]
    fn default_strategy_auto_detects() {
        let strategy = EncodingStrategy::default();
        assert!(strategy.describe().starts_with("auto-detect"));
        let decoded = strategy.decode(b"sprite_index = 1;\n");
        assert_eq!(decoded.decision.source, EncodingSource::AssumedUtf8);
    }

    #[test]
    fn unknown_override_is_rejected() {
        assert!(EncodingStrategy::new(Some("not-a-charset")).is_err());
    }

    #[test]
    fn utf8_detection_without_bom() {
        let data = b"hello world";
        let decision = detect_auto(data);
        assert_eq!(decision.source, EncodingSource::AssumedUtf8);
        assert_eq!(decision.encoding.name(), "UTF-8");
    }

    #[test]
    fn bom_detection_takes_precedence() {
        let data = [0xFF, 0xFE, 0x61, 0x00];
        let decision = detect_auto(&data);
        assert_eq!(decision.source, EncodingSource::Bom);
        assert_eq!(decision.encoding.name(), "UTF-16LE");
    }

    #[test]
    fn utf8_bom_survives_round_trip() {
        let strategy = EncodingStrategy::new(None).expect("strategy");
        let data = b"\xEF\xBB\xBFsprite_index = 1;\n";
        let decoded = strategy.decode(data);
        assert_eq!(decoded.text, "sprite_index = 1;\n");
        assert!(decoded.had_bom);
        assert_eq!(decoded.encode(&decoded.text).bytes, data.to_vec());
    }

    #[test]
    fn utf16le_is_written_back_as_utf16() {
        let strategy = EncodingStrategy::new(None).expect("strategy");
        let mut data = vec![0xFF, 0xFE];
        data.extend("a = 1;".encode_utf16().flat_map(u16::to_le_bytes));
        let decoded = strategy.decode(&data);
        assert_eq!(decoded.text, "a = 1;");
        assert_eq!(decoded.encode(&decoded.text).bytes, data);
    }

    #[test]
    fn plain_utf8_gets_no_bom() {
        let strategy = EncodingStrategy::new(None).expect("strategy");
        let decoded = strategy.decode(b"x");
        assert!(!decoded.had_bom);
        assert_eq!(decoded.encode("y").bytes, b"y".to_vec());
    }
}
