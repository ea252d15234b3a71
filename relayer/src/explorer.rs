use darkpool_intent::Address;
use std::fmt;

const EXPLORER_BASE: &str = "https://explorer.iex.ec";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerKind {
    Address,
    Dataset,
    Apps,
}

impl fmt::Display for ExplorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segment = match self {
            ExplorerKind::Address => "address",
            ExplorerKind::Dataset => "dataset",
            ExplorerKind::Apps => "apps",
        };
        write!(f, "{segment}")
    }
}

/// Explorer slug for a chain id.
pub fn explorer_slug(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        421614 => Some("arbitrum-sepolia-testnet"),
        _ => None,
    }
}

/// Link to the explorer page, or `None` when the chain has no explorer.
pub fn explorer_url(chain_id: u64, kind: ExplorerKind, address: Option<&Address>) -> Option<String> {
    let slug = explorer_slug(chain_id)?;
    Some(match address {
        Some(address) => format!("{EXPLORER_BASE}/{slug}/{kind}/{address}"),
        None => format!("{EXPLORER_BASE}/{slug}/{kind}"),
    })
}
