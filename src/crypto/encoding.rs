//! Base64 helpers for byte fields exchanged with the server and the key store.
//!
//! Everything on the wire uses the standard alphabet with padding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::errors::{GhostableError, Result};

/// Encode bytes as standard base64.
pub fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode standard base64, naming the field in the error.
pub fn b64_decode(field: &str, encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| GhostableError::SerializationError(format!("{field}: invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_names_the_field_on_error() {
        let err = b64_decode("edekB64", "not base64!").unwrap_err();
        assert!(err.to_string().contains("edekB64"));
    }

    #[test]
    fn encode_uses_padded_standard_alphabet() {
        assert_eq!(b64_encode(&[0xfb, 0xff]), "+/8=");
        assert_eq!(b64_decode("x", "+/8=").unwrap(), vec![0xfb, 0xff]);
    }
}
