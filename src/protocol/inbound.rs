//! Inbound frame decoding.
//!
//! The vehicle sends plain text over the notify characteristic. Only
//! `TEMP:<float>` carries structured data; anything else is surfaced as
//! [`InboundEvent::Unrecognized`] for the caller to log.

/// Prefix of a temperature report.
pub const TEMP_PREFIX: &str = "TEMP:";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A temperature report in degrees Celsius. Range checks are left to
    /// the telemetry reconciler.
    Temperature(f64),
    /// Any other non-empty text.
    Unrecognized(String),
}

/// Decode a single frame.
///
/// Surrounding whitespace and control characters are ignored. Returns
/// `None` for empty frames and for `TEMP:` frames whose value does not
/// parse as a float.
pub fn decode(bytes: &[u8]) -> Option<InboundEvent> {
    let text = String::from_utf8_lossy(bytes);
    let frame = text.trim_matches(|c: char| c.is_whitespace() || c.is_control());

    if frame.is_empty() {
        return None;
    }

    match frame.strip_prefix(TEMP_PREFIX) {
        Some(value) => match value.trim().parse::<f64>() {
            Ok(value) => Some(InboundEvent::Temperature(value)),
            Err(_) => {
                tracing::trace!("Malformed temperature frame: {:?}", frame);
                None
            }
        },
        None => Some(InboundEvent::Unrecognized(frame.to_string())),
    }
}

/// Decode every line in a notification payload.
///
/// A single notification may carry several newline-separated frames, or a
/// lone frame without a terminator.
pub fn decode_frames(bytes: &[u8]) -> Vec<InboundEvent> {
    bytes
        .split(|b| *b == b'\n' || *b == b'\r')
        .filter_map(decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_temperature() {
        assert_eq!(decode(b"TEMP:27.5\n"), Some(InboundEvent::Temperature(27.5)));
        assert_eq!(decode(b"TEMP:-4"), Some(InboundEvent::Temperature(-4.0)));
        assert_eq!(decode(b"  TEMP: 31.25 \r\n"), Some(InboundEvent::Temperature(31.25)));
    }

    #[test]
    fn test_decode_tolerates_trailing_control_characters() {
        assert_eq!(
            decode(b"TEMP:22.0\0\0"),
            Some(InboundEvent::Temperature(22.0))
        );
        assert_eq!(
            decode(b"TEMP:22.0\x1b\n"),
            Some(InboundEvent::Temperature(22.0))
        );
    }

    #[test]
    fn test_decode_out_of_range_value_still_parses() {
        assert_eq!(decode(b"TEMP:999\n"), Some(InboundEvent::Temperature(999.0)));
    }

    #[test]
    fn test_decode_malformed_float_yields_nothing() {
        assert_eq!(decode(b"TEMP:abc\n"), None);
        assert_eq!(decode(b"TEMP:\n"), None);
        assert_eq!(decode(b"TEMP:27.5.1"), None);
    }

    #[test]
    fn test_decode_empty_yields_nothing() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"\r\n"), None);
        assert_eq!(decode(b"\0"), None);
    }

    #[test]
    fn test_decode_unrecognized() {
        assert_eq!(
            decode(b"OK UP\n"),
            Some(InboundEvent::Unrecognized("OK UP".to_string()))
        );
        assert_eq!(
            decode(b"temp:20"),
            Some(InboundEvent::Unrecognized("temp:20".to_string()))
        );
    }

    #[test]
    fn test_decode_invalid_utf8_is_not_fatal() {
        let event = decode(&[0xFF, 0xFE, b'A']);
        assert!(matches!(event, Some(InboundEvent::Unrecognized(_))));
    }

    #[test]
    fn test_decode_frames_splits_lines() {
        assert_eq!(
            decode_frames(b"TEMP:20.5\nREADY\r\nTEMP:x\n\nTEMP:21"),
            vec![
                InboundEvent::Temperature(20.5),
                InboundEvent::Unrecognized("READY".to_string()),
                InboundEvent::Temperature(21.0),
            ]
        );
        assert!(decode_frames(b"").is_empty());
    }
}
