//! Payload framing for text-only transports
//!
//! Some RPC layers cannot carry raw bytes; audio crossing those is base64
//! encoded on the way out and decoded on the way in. Binary-clean
//! transports skip this entirely.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::MediaError;

/// Wrap an audio chunk for a text-only transport
pub fn encode_payload(chunk: &Bytes) -> Bytes {
    Bytes::from(STANDARD.encode(chunk).into_bytes())
}

/// Unwrap an audio chunk from a text-only transport
pub fn decode_payload(payload: &Bytes) -> Result<Bytes, MediaError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| MediaError::Framing(format!("payload not utf-8: {}", e)))?;
    STANDARD
        .decode(text.trim_end())
        .map(Bytes::from)
        .map_err(|e| MediaError::Framing(format!("payload not base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let chunk = Bytes::from_static(&[0u8, 1, 2, 250, 255]);
        let wire = encode_payload(&chunk);
        assert!(std::str::from_utf8(&wire).is_ok());
        let back = decode_payload(&wire).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_rejects_binary_garbage() {
        let payload = Bytes::from_static(&[0xFF, 0xFE, 0x00]);
        assert!(decode_payload(&payload).is_err());
    }
}
