//! Newline-delimited JSON framing.
//!
//! Every frame is one JSON document on a single line, terminated by `\n`.
//! Compact `serde_json` output escapes newlines inside strings, so a frame
//! never spans lines.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Encodes `value` as a single newline-terminated line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line, ignoring surrounding whitespace and the terminator.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StateBroadcast;
    use crate::state::ServiceState;

    #[test]
    fn test_encode_appends_single_newline() {
        let line = encode_line(&StateBroadcast::new(ServiceState::Stopped)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let line = "{\"state\":\"running\"}\r\n";
        let broadcast: StateBroadcast = decode_line(line).unwrap();
        assert_eq!(broadcast.state, ServiceState::Running);
    }

    #[test]
    fn test_decode_garbage_is_deserialization_error() {
        let err = decode_line::<StateBroadcast>("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_string_with_newline_is_escaped() {
        let line = encode_line(&"two\nlines").unwrap();
        assert_eq!(line, "\"two\\nlines\"\n");
    }
}
