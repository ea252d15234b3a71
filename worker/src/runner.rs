use darkpool_intent::{Side, Trade, TradeSigner};
use futures::FutureExt;
use std::fs;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use crate::artifact::{
    render_result, ComputedDescriptor, Finalized, RESULT_FILE, SETTLEMENT_FILE,
};
use crate::book::{BestPriceMatcher, MatchOutcome, MatchingEngine, OrderBook};
use crate::config::WorkerEnv;
use crate::error::WorkerError;
use crate::input::{read_intent, IntentMessage};
use crate::phases::{Phase, PhaseExecutor};
use crate::secret::describe_secrets;

/// One confidential execution.
pub struct Worker<M = BestPriceMatcher> {
    env: WorkerEnv,
    matcher: M,
}

impl Worker<BestPriceMatcher> {
    pub fn new(env: WorkerEnv) -> Self {
        Self::with_matcher(env, BestPriceMatcher)
    }
}

impl<M: MatchingEngine> Worker<M> {
    pub fn with_matcher(env: WorkerEnv, matcher: M) -> Self {
        Self { env, matcher }
    }

    pub fn env(&self) -> &WorkerEnv {
        &self.env
    }

    /// Runs the whole job and always writes `computed.json`, whether the
    /// job succeeded, returned an error or panicked.
    pub async fn run(&self) -> ComputedDescriptor {
        let output_dir = self.env.output_dir.clone();

        let descriptor = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(Ok(descriptor)) => descriptor,
            Ok(Err(e)) => {
                error!("worker failed: {}", e);
                ComputedDescriptor::failure(&output_dir)
            }
            Err(_) => {
                error!("worker panicked");
                ComputedDescriptor::failure(&output_dir)
            }
        };

        if let Err(e) = descriptor.write(&output_dir) {
            error!("could not write completion descriptor: {}", e);
        }
        descriptor
    }

    async fn execute(&self) -> Result<ComputedDescriptor, WorkerError> {
        let input_path = self.env.input_path();
        let messages = match read_intent(input_path.as_deref()) {
            Ok(message) => vec![message],
            Err(e) => {
                warn!("It seems there is an issue with protected data: {}", e);
                Vec::new()
            }
        };

        for line in describe_secrets(&self.env.requester_secrets) {
            info!("{}", line);
        }

        let mut phases = PhaseExecutor::new(self.env.phase_delay);

        let book_path = self.env.book_path();
        let book = phases
            .run(Phase::Ingest, async {
                let mut book = OrderBook::load(book_path.as_deref())?;
                if let Some(maker) = &self.env.market_maker {
                    maker.seed(&mut book);
                    debug!(maker = %maker.owner, reference = maker.reference_price, "seeded maker quotes");
                }
                Ok::<_, WorkerError>(book)
            })
            .await?;
        info!(
            intents = messages.len(),
            bids = book.buy.len(),
            asks = book.sell.len(),
            "ingested"
        );

        let (intent, outcome) = phases
            .run(Phase::MatchAgainstBook, async {
                let intent = messages.first().ok_or(WorkerError::NoIntent)?;
                let outcome = self.matcher.match_intent(intent, &book);
                Ok::<_, WorkerError>((intent, outcome))
            })
            .await?;

        let finalized = phases
            .run(Phase::Finalize, async { self.finalize(intent, &outcome) })
            .await?;

        let output_dir = &self.env.output_dir;
        fs::create_dir_all(output_dir).map_err(|e| WorkerError::io(output_dir, e))?;

        let result_path = output_dir.join(RESULT_FILE);
        let text = render_result(&messages, &outcome, &finalized);
        fs::write(&result_path, text).map_err(|e| WorkerError::io(&result_path, e))?;

        if let Some(settlement) = &finalized.settlement {
            let path = output_dir.join(SETTLEMENT_FILE);
            let json = serde_json::to_string_pretty(settlement)?;
            fs::write(&path, json).map_err(|e| WorkerError::io(&path, e))?;
            info!(trade_hash = %settlement.trade_hash, "settlement artifact written");
        }

        Ok(ComputedDescriptor::success(&result_path))
    }

    fn finalize(
        &self,
        intent: &IntentMessage,
        outcome: &MatchOutcome,
    ) -> Result<Finalized, WorkerError> {
        let (counterparty, price) = match outcome {
            MatchOutcome::Matched {
                counterparty,
                price,
            } => (counterparty, *price),
            MatchOutcome::NoMatch { reason } => {
                info!("no match: {}", reason);
                return Ok(Finalized::default());
            }
        };

        let quote_amount = price
            .checked_mul(intent.quantity)
            .ok_or(WorkerError::Overflow {
                price,
                quantity: intent.quantity,
            })?;

        // Maker is always the seller, taker the buyer.
        let (maker, taker) = match intent.side {
            Side::Buy => (counterparty.clone(), intent.owner.clone()),
            Side::Sell => (intent.owner.clone(), counterparty.clone()),
        };

        let trade = Trade {
            maker,
            taker,
            base_asset: self.env.base_asset.clone(),
            quote_asset: self.env.quote_asset.clone(),
            base_amount: intent.quantity,
            quote_amount,
            price,
            nonce: intent.nonce,
        };

        let settlement = match &self.env.signing_key {
            Some(key) => Some(TradeSigner::from_seed_hex(key.expose())?.attest(&trade)),
            None => {
                warn!("no enclave signing key configured, trade left unsigned");
                None
            }
        };

        Ok(Finalized {
            trade: Some(trade),
            settlement,
        })
    }
}
