use darkpool_intent::{trade_hash, SettlementArtifact, Trade};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::book::MatchOutcome;
use crate::error::WorkerError;
use crate::input::IntentMessage;

pub const RESULT_FILE: &str = "result.txt";
pub const COMPUTED_FILE: &str = "computed.json";
pub const SETTLEMENT_FILE: &str = "settlement.json";

/// Fixed diagnostic reported when any step of the run faults.
pub const FAILURE_MESSAGE: &str = "Oops something went wrong";

/// The `computed.json` completion descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedDescriptor {
    #[serde(rename = "deterministic-output-path")]
    pub deterministic_output_path: String,
    #[serde(
        rename = "error-message",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

impl ComputedDescriptor {
    pub fn success(result_path: &Path) -> Self {
        Self {
            deterministic_output_path: result_path.display().to_string(),
            error_message: None,
        }
    }

    pub fn failure(output_root: &Path) -> Self {
        Self {
            deterministic_output_path: output_root.display().to_string(),
            error_message: Some(FAILURE_MESSAGE.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }

    pub fn write(&self, output_dir: &Path) -> Result<(), WorkerError> {
        fs::create_dir_all(output_dir).map_err(|e| WorkerError::io(output_dir, e))?;
        let path = output_dir.join(COMPUTED_FILE);
        let json = serde_json::to_string(self)?;
        fs::write(&path, json).map_err(|e| WorkerError::io(&path, e))
    }
}

/// What the finalize phase produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Finalized {
    pub trade: Option<Trade>,
    pub settlement: Option<SettlementArtifact>,
}

/// Human-readable, byte-reproducible rendering of the run outcome.
///
/// Only values derived from the input and the book go in here: no clocks, no
/// randomness, no secrets.
pub fn render_result(
    messages: &[IntentMessage],
    outcome: &MatchOutcome,
    finalized: &Finalized,
) -> String {
    let mut out = String::new();
    let title = "iDarkPool confidential execution";
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(title.len()));
    let _ = writeln!(out, "intents: {}", messages.len());

    for message in messages {
        let _ = writeln!(out, "side: {}", message.side);
        let _ = writeln!(out, "quantity: {}", message.quantity);
        let _ = writeln!(out, "owner: {}", message.owner);
    }

    match outcome {
        MatchOutcome::Matched {
            counterparty,
            price,
        } => {
            let _ = writeln!(out, "outcome: matched");
            let _ = writeln!(out, "price: {price}");
            let _ = writeln!(out, "counterparty: {counterparty}");
        }
        MatchOutcome::NoMatch { reason } => {
            let _ = writeln!(out, "outcome: no-match");
            let _ = writeln!(out, "reason: {reason}");
        }
    }

    if let Some(trade) = &finalized.trade {
        let _ = writeln!(out, "trade-hash: {}", trade_hash(trade));
        let _ = writeln!(out, "maker: {}", trade.maker);
        let _ = writeln!(out, "taker: {}", trade.taker);
        let _ = writeln!(
            out,
            "amounts: {} {} for {} {}",
            trade.base_amount, trade.base_asset, trade.quote_amount, trade.quote_asset
        );
        let _ = writeln!(out, "nonce: {}", trade.nonce);
    }

    match &finalized.settlement {
        Some(settlement) => {
            let _ = writeln!(out, "signature: {}", settlement.signature);
            let _ = writeln!(out, "signer: {}", settlement.signer);
        }
        None if finalized.trade.is_some() => {
            let _ = writeln!(out, "signature: none");
        }
        None => {}
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkpool_intent::{Address, Side};
    use std::path::PathBuf;

    #[test]
    fn test_success_descriptor_has_no_error_field() {
        let descriptor = ComputedDescriptor::success(&PathBuf::from("/out/result.txt"));
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"deterministic-output-path": "/out/result.txt"})
        );
    }

    #[test]
    fn test_failure_descriptor_points_at_root() {
        let descriptor = ComputedDescriptor::failure(&PathBuf::from("/out"));
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "deterministic-output-path": "/out",
                "error-message": FAILURE_MESSAGE,
            })
        );
        assert!(!descriptor.is_success());
    }

    #[test]
    fn test_render_no_match() {
        let messages = vec![IntentMessage {
            side: Side::Buy,
            owner: Address::zero(),
            quantity: 1,
            nonce: 3,
        }];
        let text = render_result(
            &messages,
            &MatchOutcome::NoMatch { reason: "no sell quotes in book".to_string() },
            &Finalized::default(),
        );

        assert!(text.starts_with("iDarkPool confidential execution\n"));
        assert!(text.contains("side: buy\n"));
        assert!(text.contains("outcome: no-match\n"));
        assert!(!text.contains("trade-hash"));
    }
}
