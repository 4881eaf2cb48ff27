//! Cleartext wire format for envelopes
//!
//! One envelope per line: a format tag and `|`-separated fields in a fixed
//! order, followed by one `key=value` field per property. Delimiters and
//! newlines inside field content are backslash-escaped so the decoder can
//! split unambiguously.
//!
//! Layout:
//! `PLV1|command|session|app_id|app_version|error_code|headline|m1|m2|m3|detail|k=v|...`
//!
//! The six error fields are empty for success envelopes. Properties follow
//! in key order, which makes encoding deterministic.

use std::collections::BTreeMap;

use crate::envelope::{Envelope, ErrorInfo, MAX_ERROR_MESSAGES};
use crate::errors::{ParleyError, Result};

/// Format tag for cleartext envelopes
pub const CLEAR_TAG: &str = "PLV1";

/// Number of fixed fields before the property entries
const FIXED_FIELDS: usize = 11;

// ----------------------------------------------------------------------------
// Wire Format Codec
// ----------------------------------------------------------------------------

/// Cleartext encoder/decoder for [`Envelope`]
pub struct WireFormat;

impl WireFormat {
    /// Encode an envelope to its cleartext wire form
    pub fn encode(envelope: &Envelope) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(
            FIXED_FIELDS + envelope.properties().len(),
        );

        fields.push(CLEAR_TAG.to_string());
        fields.push(escape(&envelope.command));
        fields.push(escape(&envelope.session_id));
        fields.push(escape(&envelope.app_id));
        fields.push(escape(&envelope.app_version));

        match envelope.error() {
            Some(error) => {
                fields.push(escape(&error.code));
                fields.push(escape(&error.headline));
                for i in 0..MAX_ERROR_MESSAGES {
                    let part = error.messages.get(i).map(String::as_str).unwrap_or("");
                    fields.push(escape(part));
                }
                fields.push(escape(&error.detail));
            }
            None => {
                for _ in 0..(MAX_ERROR_MESSAGES + 3) {
                    fields.push(String::new());
                }
            }
        }

        for (key, value) in envelope.properties() {
            fields.push(format!("{}={}", escape(key), escape(value)));
        }

        fields.join("|")
    }

    /// Decode an envelope from its cleartext wire form
    pub fn decode(raw: &str) -> Result<Envelope> {
        let fields = split_fields(raw);
        if fields.len() < FIXED_FIELDS {
            return Err(ParleyError::decoding(format!(
                "expected at least {} fields, got {}",
                FIXED_FIELDS,
                fields.len()
            )));
        }
        if fields[0] != CLEAR_TAG {
            return Err(ParleyError::decoding(format!(
                "unexpected format tag {:?}",
                fields[0]
            )));
        }

        let command = unescape(fields[1])?;
        if command.is_empty() {
            return Err(ParleyError::decoding("empty command identifier"));
        }
        let session_id = unescape(fields[2])?;
        let app_id = unescape(fields[3])?;
        let app_version = unescape(fields[4])?;

        let code = unescape(fields[5])?;
        let error = if code.is_empty() {
            None
        } else {
            let headline = unescape(fields[6])?;
            let mut messages = Vec::new();
            for raw_part in &fields[7..7 + MAX_ERROR_MESSAGES] {
                let part = unescape(raw_part)?;
                if !part.is_empty() {
                    messages.push(part);
                }
            }
            let detail = unescape(fields[10])?;
            Some(ErrorInfo {
                code,
                headline,
                messages,
                detail,
            })
        };

        let mut properties = BTreeMap::new();
        for entry in &fields[FIXED_FIELDS..] {
            let (raw_key, raw_value) = split_entry(entry).ok_or_else(|| {
                ParleyError::decoding(format!("property entry without separator: {:?}", entry))
            })?;
            let key = unescape(raw_key)?;
            if key.is_empty() {
                return Err(ParleyError::decoding("empty property key"));
            }
            properties.insert(key, unescape(raw_value)?);
        }

        Ok(Envelope::from_parts(
            command,
            session_id,
            app_id,
            app_version,
            properties,
            error,
        ))
    }
}

// ----------------------------------------------------------------------------
// Escaping
// ----------------------------------------------------------------------------

/// Escape delimiter and line-break characters inside field content
fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]; rejects dangling or unknown escape sequences
fn unescape(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('=') => out.push('='),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(ParleyError::decoding(format!(
                    "unknown escape sequence \\{}",
                    other
                )))
            }
            None => return Err(ParleyError::decoding("dangling escape at end of field")),
        }
    }
    Ok(out)
}

/// Split on unescaped `|`, leaving escape sequences intact in each slice
fn split_fields(input: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '|' {
            fields.push(&input[start..idx]);
            start = idx + 1;
        }
    }
    fields.push(&input[start..]);
    fields
}

/// Split a property entry at the first unescaped `=`
fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, ch) in entry.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '=' {
            return Some((&entry[..idx], &entry[idx + 1..]));
        }
    }
    None
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::props;
    use crate::errors::ErrorCode;
    use crate::types::CommandId;
    use proptest::prelude::*;

    fn sample() -> Envelope {
        let mut env = Envelope::request(CommandId::ConfigValue, "media-library", "2.4.1");
        env.session_id = "s1".to_string();
        env.set_property(props::CONFIG_KEY, "storage.root");
        env.set_property("Nested|Key", "a=b\\c\nnewline");
        env
    }

    #[test]
    fn test_round_trip_success_envelope() {
        let env = sample();
        let decoded = WireFormat::decode(&WireFormat::encode(&env)).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_round_trip_error_envelope() {
        let mut env = sample();
        env.fail(
            ErrorInfo::new(ErrorCode::UnknownSession, "Session not recognized")
                .with_messages(vec!["part one".into(), "part|two".into()])
                .with_detail("line1\nline2"),
        );
        let decoded = WireFormat::decode(&WireFormat::encode(&env)).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.error_code(), Some("UnknownSessionError"));
    }

    #[test]
    fn test_decode_rejects_bad_tag() {
        assert!(WireFormat::decode("XXX1|a|b|c|d||||||").is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        assert!(WireFormat::decode("PLV1|Handshake|s1").is_err());
    }

    #[test]
    fn test_decode_rejects_empty_command() {
        assert!(WireFormat::decode("PLV1||s1|app|1.0||||||").is_err());
    }

    #[test]
    fn test_decode_rejects_property_without_separator() {
        let raw = format!("{}|junk", WireFormat::encode(&Envelope::request(
            CommandId::ServerStatus,
            "app",
            "1.0",
        )));
        assert!(WireFormat::decode(&raw).is_err());
    }

    #[test]
    fn test_decode_rejects_dangling_escape() {
        assert!(WireFormat::decode("PLV1|Handshake\\|s1|app|1.0||||||").is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip_arbitrary_properties(
            session in "[ -~]{0,24}",
            keys in proptest::collection::vec("[a-zA-Z|=\\\\ ]{1,12}", 0..6),
            values in proptest::collection::vec("[ -~]{0,24}", 6),
        ) {
            let mut env = Envelope::request(CommandId::ServerStatus, "app", "1.0");
            env.session_id = session;
            for (key, value) in keys.iter().zip(values.iter()) {
                env.set_property(key.clone(), value.clone());
            }
            let decoded = WireFormat::decode(&WireFormat::encode(&env)).unwrap();
            prop_assert_eq!(decoded, env);
        }
    }
}
