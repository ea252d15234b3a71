use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, warn};

use darkpool_intent::Address;

use crate::book::MarketMaker;
use crate::secret::RedactedSecret;

pub const DEFAULT_OUTPUT_DIR: &str = "/iexec_out";
pub const DEFAULT_DATASET_FILENAME: &str = "protectedData.json";
pub const DEFAULT_SECRET_SLOTS: [u32; 2] = [1, 42];
pub const BOOK_FILENAME: &str = "orderbook.json";

/// Everything the enclave runtime hands the worker through its environment.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub output_dir: PathBuf,
    pub input_dir: Option<PathBuf>,
    pub dataset_filename: String,
    pub requester_secrets: BTreeMap<u32, Option<RedactedSecret>>,
    pub signing_key: Option<RedactedSecret>,
    pub base_asset: String,
    pub quote_asset: String,
    /// Extra time spent at the end of each phase.
    pub phase_delay: Duration,
    /// Quotes seeded into the book after it is loaded.
    pub market_maker: Option<MarketMaker>,
}

impl WorkerEnv {
    /// Defaults for a run writing into `output_dir` with no input and no
    /// secrets.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            input_dir: None,
            dataset_filename: DEFAULT_DATASET_FILENAME.to_string(),
            requester_secrets: DEFAULT_SECRET_SLOTS.iter().map(|slot| (*slot, None)).collect(),
            signing_key: None,
            base_asset: "IDP".to_string(),
            quote_asset: "PYUSD".to_string(),
            phase_delay: Duration::ZERO,
            market_maker: None,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let output_dir = lookup("IEXEC_OUT").unwrap_or_else(|| {
            error!("IEXEC_OUT is not set, writing results to {DEFAULT_OUTPUT_DIR}");
            DEFAULT_OUTPUT_DIR.to_string()
        });

        let mut env = Self::new(output_dir);
        env.input_dir = lookup("IEXEC_IN").map(PathBuf::from);
        if let Some(name) = lookup("IEXEC_DATASET_FILENAME").filter(|n| !n.trim().is_empty()) {
            env.dataset_filename = name;
        }

        env.requester_secrets = DEFAULT_SECRET_SLOTS
            .iter()
            .map(|slot| {
                let value = lookup(&format!("IEXEC_REQUESTER_SECRET_{slot}"))
                    .filter(|v| !v.is_empty())
                    .map(RedactedSecret::new);
                (*slot, value)
            })
            .collect();

        env.signing_key = lookup("ENCLAVE_SIGNING_KEY")
            .filter(|v| !v.is_empty())
            .map(RedactedSecret::new);

        if let Some(base) = lookup("BASE_TOKEN") {
            env.base_asset = base;
        }
        if let Some(quote) = lookup("QUOTE_TOKEN") {
            env.quote_asset = quote;
        }

        if let Some(raw) = lookup("WORKER_PHASE_DELAY_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => env.phase_delay = Duration::from_millis(ms),
                Err(e) => warn!("ignoring WORKER_PHASE_DELAY_MS={raw}: {e}"),
            }
        }

        env.market_maker = market_maker_from_lookup(&lookup);
        env
    }

    pub fn input_path(&self) -> Option<PathBuf> {
        self.input_dir.as_ref().map(|dir| dir.join(&self.dataset_filename))
    }

    pub fn book_path(&self) -> Option<PathBuf> {
        self.input_dir.as_ref().map(|dir| dir.join(BOOK_FILENAME))
    }
}

/// `MM_REF_PRICE` and `MM_ADDRESS` enable seeding; the rest tune the ladder.
fn market_maker_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Option<MarketMaker> {
    let raw_price = lookup("MM_REF_PRICE")?;
    let reference_price = match raw_price.parse::<u64>() {
        Ok(price) if price > 0 => price,
        _ => {
            warn!("ignoring MM_REF_PRICE={raw_price}: not a positive integer");
            return None;
        }
    };
    let owner = match lookup("MM_ADDRESS").map(|raw| Address::parse(&raw)) {
        Some(Ok(owner)) => owner,
        Some(Err(e)) => {
            warn!("market maker disabled, MM_ADDRESS is invalid: {e}");
            return None;
        }
        None => {
            warn!("market maker disabled, MM_ADDRESS is not set");
            return None;
        }
    };

    let mut maker = MarketMaker::new(owner, reference_price);
    if let Some(levels) = parsed(lookup, "MM_LEVELS") {
        maker.levels = levels;
    }
    if let Some(spread) = parsed(lookup, "MM_SPREAD_BPS") {
        maker.spread_bps = spread;
    }
    if let Some(step) = parsed(lookup, "MM_STEP_BPS") {
        maker.step_bps = step;
    }
    if let Some(cross) = parsed(lookup, "MM_ENSURE_CROSS") {
        maker.ensure_cross = cross;
    }
    Some(maker)
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring {name}={raw}: {e}");
            None
        }
    }
}
