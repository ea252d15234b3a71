use darkpool_intent::{Address, Side};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::WorkerError;
use crate::input::IntentMessage;

/// Resting quote in the enclave-side order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOrder {
    pub owner: Address,
    /// Quote units per base unit.
    pub price: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub buy: Vec<BookOrder>,
    #[serde(default)]
    pub sell: Vec<BookOrder>,
}

impl OrderBook {
    /// Loads the book; an absent file is an empty book, a corrupt one is a
    /// fault.
    pub fn load(path: Option<&Path>) -> Result<Self, WorkerError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| WorkerError::Book(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(WorkerError::io(path, e)),
        }
    }

    /// Highest bid; the earliest entry wins ties.
    pub fn best_bid(&self) -> Option<&BookOrder> {
        self.buy
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.price.cmp(&b.price).then(ib.cmp(ia)))
            .map(|(_, order)| order)
    }

    /// Lowest ask; the earliest entry wins ties.
    pub fn best_ask(&self) -> Option<&BookOrder> {
        self.sell
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.price.cmp(&b.price).then(ia.cmp(ib)))
            .map(|(_, order)| order)
    }

    pub fn is_empty(&self) -> bool {
        self.buy.is_empty() && self.sell.is_empty()
    }
}

const BPS: u64 = 10_000;

/// Layered maker quotes seeded around a reference price. Level `i` sits
/// `spread_bps + i * step_bps` away from the reference on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketMaker {
    pub owner: Address,
    pub reference_price: u64,
    pub levels: u32,
    pub spread_bps: u64,
    pub step_bps: u64,
    /// Adds one bid 1% above the reference so a sell intent always crosses.
    pub ensure_cross: bool,
}

impl MarketMaker {
    pub const DEFAULT_LEVELS: u32 = 3;
    pub const DEFAULT_SPREAD_BPS: u64 = 50;
    pub const DEFAULT_STEP_BPS: u64 = 25;

    pub fn new(owner: Address, reference_price: u64) -> Self {
        Self {
            owner,
            reference_price,
            levels: Self::DEFAULT_LEVELS,
            spread_bps: Self::DEFAULT_SPREAD_BPS,
            step_bps: Self::DEFAULT_STEP_BPS,
            ensure_cross: true,
        }
    }

    /// The maker's quotes, innermost level first.
    pub fn quotes(&self) -> OrderBook {
        let mut book = OrderBook::default();
        for level in 0..u64::from(self.levels) {
            let spread = self
                .spread_bps
                .saturating_add(level.saturating_mul(self.step_bps))
                .min(BPS);
            book.buy.push(self.quote(BPS - spread));
            book.sell.push(self.quote(BPS + spread));
        }
        if self.ensure_cross {
            book.buy.push(self.quote(BPS + 100));
        }
        book
    }

    /// Appends the maker's quotes behind whatever the book already holds.
    pub fn seed(&self, book: &mut OrderBook) {
        let quotes = self.quotes();
        book.buy.extend(quotes.buy);
        book.sell.extend(quotes.sell);
    }

    fn quote(&self, factor_bps: u64) -> BookOrder {
        let scaled = u128::from(self.reference_price) * u128::from(factor_bps) / u128::from(BPS);
        BookOrder {
            owner: self.owner.clone(),
            price: u64::try_from(scaled).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { counterparty: Address, price: u64 },
    NoMatch { reason: String },
}

/// Matching capability plugged into the worker.
pub trait MatchingEngine: Send + Sync {
    fn match_intent(&self, intent: &IntentMessage, book: &OrderBook) -> MatchOutcome;
}

/// Crosses a one-unit market intent with the best opposite quote.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestPriceMatcher;

impl MatchingEngine for BestPriceMatcher {
    fn match_intent(&self, intent: &IntentMessage, book: &OrderBook) -> MatchOutcome {
        let best = match intent.side {
            Side::Buy => book.best_ask(),
            Side::Sell => book.best_bid(),
        };

        match best {
            Some(order) if order.owner == intent.owner && !order.owner.is_zero() => {
                MatchOutcome::NoMatch {
                    reason: "best quote belongs to the intent owner".to_string(),
                }
            }
            Some(order) => MatchOutcome::Matched {
                counterparty: order.owner.clone(),
                price: order.price,
            },
            None => MatchOutcome::NoMatch {
                reason: format!("no {} quotes in book", intent.side.opposite()),
            },
        }
    }
}
