use bitcoin::script::Instruction;
use bitcoin::ScriptBuf;
use serde::Serialize;

use crate::error::PayloadError;

/// Largest payload relayed by default policy in a single OP_RETURN output.
pub const MAX_OP_RETURN_PAYLOAD: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPayload {
    pub text: String,
    pub is_utf8: bool,
}

pub fn encode_text_hex(text: &str) -> String {
    hex::encode(text.as_bytes())
}

/// Hex for the `data` output, refusing payloads nodes will not relay.
pub fn encode_op_return_payload(text: &str) -> Result<String, PayloadError> {
    if text.len() > MAX_OP_RETURN_PAYLOAD {
        return Err(PayloadError::TooLarge {
            len: text.len(),
            max: MAX_OP_RETURN_PAYLOAD,
        });
    }
    Ok(encode_text_hex(text))
}

pub fn decode_bytes(bytes: &[u8]) -> DecodedPayload {
    match std::str::from_utf8(bytes) {
        Ok(text) => DecodedPayload {
            text: text.to_string(),
            is_utf8: true,
        },
        Err(_) => DecodedPayload {
            text: String::from_utf8_lossy(bytes).into_owned(),
            is_utf8: false,
        },
    }
}

/// Hex back to text. Non UTF-8 data is returned lossily with `is_utf8 = false`.
pub fn decode_hex_text(hex_str: &str) -> Result<DecodedPayload, PayloadError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| PayloadError::InvalidHex(e.to_string()))?;
    Ok(decode_bytes(&bytes))
}

/// Pushed bytes of an OP_RETURN script, concatenated. `None` for any other script.
pub fn op_return_data(script_hex: &str) -> Option<Vec<u8>> {
    let script = ScriptBuf::from_hex(script_hex).ok()?;
    if !script.is_op_return() {
        return None;
    }

    let mut data = Vec::new();
    for instruction in script.instructions().skip(1) {
        match instruction {
            Ok(Instruction::PushBytes(bytes)) => data.extend_from_slice(bytes.as_bytes()),
            Ok(Instruction::Op(_)) => {}
            // truncated pushes still carry whatever was readable
            Err(_) => break,
        }
    }
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_multibyte_text() {
        for text in [
            "HELLO ideajoo/go-bitcoin-cli-light",
            "안녕하세요",
            "こんにちは 안녕하세요 สวัสดีค่ะ ",
            "ios/android App📱\nSatoshiPen:WriteOpReturn✏️",
            "",
        ] {
            let decoded = decode_hex_text(&encode_text_hex(text)).unwrap();
            assert_eq!(decoded.text, text);
            assert!(decoded.is_utf8);
        }
    }

    #[test]
    fn test_known_encoding() {
        assert_eq!(encode_text_hex("안녕하세요"), "ec9588eb8595ed9598ec84b8ec9a94");
    }

    #[test]
    fn test_non_utf8_is_flagged() {
        let decoded = decode_hex_text("58325bf65d66c74d").unwrap();
        assert!(!decoded.is_utf8);
        assert!(decoded.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        assert!(matches!(
            decode_hex_text("zz"),
            Err(PayloadError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_payload_size_limit() {
        assert!(encode_op_return_payload(&"a".repeat(MAX_OP_RETURN_PAYLOAD)).is_ok());
        assert_eq!(
            encode_op_return_payload(&"a".repeat(MAX_OP_RETURN_PAYLOAD + 1)),
            Err(PayloadError::TooLarge {
                len: MAX_OP_RETURN_PAYLOAD + 1,
                max: MAX_OP_RETURN_PAYLOAD,
            })
        );
    }

    #[test]
    fn test_op_return_data_extraction() {
        // OP_RETURN OP_PUSHBYTES_5 "hello"
        assert_eq!(op_return_data("6a0568656c6c6f"), Some(b"hello".to_vec()));
        // bare OP_RETURN
        assert_eq!(op_return_data("6a"), Some(Vec::new()));
        // p2wpkh is not data
        assert_eq!(
            op_return_data("00141c4b3dfaa1e3b0bd5e1e24ebb5c1f0f3e0a6b4d2"),
            None
        );
        assert_eq!(op_return_data("not hex"), None);
    }
}
