use darkpool_intent::{Address, IntentPayload, Side};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::InputError;

/// A decrypted intent as ingested by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMessage {
    pub side: Side,
    pub owner: Address,
    pub quantity: u64,
    /// Derived from the raw input bytes so reruns reproduce the same trade.
    pub nonce: u64,
}

/// Reads and validates the protected data file.
pub fn read_intent(path: Option<&Path>) -> Result<IntentMessage, InputError> {
    let path = path.ok_or(InputError::NotConfigured)?;

    let raw = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => InputError::Missing(path.to_path_buf()),
        _ => InputError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    parse_intent(&raw)
}

pub fn parse_intent(raw: &[u8]) -> Result<IntentMessage, InputError> {
    let payload: IntentPayload =
        serde_json::from_slice(raw).map_err(|e| InputError::Malformed(e.to_string()))?;

    if payload.quantity == 0 {
        return Err(InputError::Malformed("quantity must be positive".to_string()));
    }

    Ok(IntentMessage {
        side: payload.side,
        owner: payload.owner.unwrap_or_else(Address::zero),
        quantity: payload.quantity,
        nonce: input_nonce(raw),
    })
}

fn input_nonce(raw: &[u8]) -> u64 {
    let digest = Sha256::digest(raw);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_intent() {
        let message = parse_intent(br#"{"side":"buy"}"#).unwrap();
        assert_eq!(message.side, Side::Buy);
        assert!(message.owner.is_zero());
        assert_eq!(message.quantity, 1);
    }

    #[test]
    fn test_nonce_depends_only_on_input() {
        let a = parse_intent(br#"{"side":"sell"}"#).unwrap();
        let b = parse_intent(br#"{"side":"sell"}"#).unwrap();
        let c = parse_intent(br#"{"side": "sell"}"#).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_ne!(a.nonce, c.nonce);
    }

    #[test]
    fn test_missing_side_is_malformed() {
        assert!(matches!(parse_intent(b"{}"), Err(InputError::Malformed(_))));
        assert!(matches!(parse_intent(b"not json"), Err(InputError::Malformed(_))));
        assert!(matches!(
            parse_intent(br#"{"side":"buy","quantity":0}"#),
            Err(InputError::Malformed(_))
        ));
    }

    #[test]
    fn test_read_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(read_intent(Some(&path)), Err(InputError::Missing(_))));
        assert!(matches!(read_intent(None), Err(InputError::NotConfigured)));
    }

    #[test]
    fn test_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"side":"sell","owner":"0x00000000000000000000000000000000000000aa"}"#)
            .unwrap();

        let message = read_intent(Some(file.path())).unwrap();
        assert_eq!(message.side, Side::Sell);
        assert_eq!(message.owner.as_str(), "0x00000000000000000000000000000000000000aa");
    }
}
