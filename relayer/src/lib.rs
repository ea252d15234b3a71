//! Darkpool relayer
//!
//! Client side of the darkpool pipeline: protects a trade intent, grants the
//! confidential matching app access to it, dispatches the processing request
//! and finally settles the signed trade the enclave produced.
//!
//! # Example
//!
//! ```no_run
//! use darkpool_intent::{Address, Side, TradeIntent};
//! use darkpool_relayer::{
//!     CancelToken, LocalProtocol, PipelineOrchestrator, PipelineSettings, Session,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let owner = Address::parse("0x00000000000000000000000000000000000000aa")?;
//! let app = Address::parse("0x9b0a0fc519e7de7e310e51c8b8583af827fda720")?;
//! let pool = Address::parse("0x00000000000000000000000000000000000000f1")?;
//!
//! let protocol = LocalProtocol::new()
//!     .with_app(app.clone(), 1_000_000_000)
//!     .with_workerpool(pool, 1_000_000_000);
//! let session = Session::connect(owner.clone(), 421614, Arc::new(protocol));
//!
//! let orchestrator = PipelineOrchestrator::new(PipelineSettings {
//!     app,
//!     price_per_access: 2_000_000_000,
//!     number_of_access: 500,
//!     app_max_price: 3_000_000_000,
//!     workerpool: None,
//!     call_timeout: Duration::from_secs(30),
//!     grant_failure: Default::default(),
//! });
//!
//! let outcome = orchestrator
//!     .submit(&session, TradeIntent::new(Side::Buy, owner), &CancelToken::new())
//!     .await?;
//! assert!(outcome.is_dispatched());
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod chains;
pub mod config;
pub mod dispatch;
pub mod explorer;
pub mod grants;
pub mod logging;
pub mod orchestrator;
pub mod protection;
pub mod protocol;
pub mod session;
pub mod settlement;
pub mod types;

pub use cancel::CancelToken;
pub use chains::{InMemoryLedger, RpcSettlementLedger, SettlementLedger};
pub use config::{create_sample_config, CliOverrides, ConfigBuilder};
pub use dispatch::ExecutionDispatcher;
pub use explorer::{explorer_url, ExplorerKind};
pub use grants::{select_grant, AccessGrantManager};
pub use orchestrator::{
    PipelineOrchestrator, PipelineOutcome, PipelineSettings, PipelineStatus, Stage, Terminal,
};
pub use protection::ProtectionClient;
pub use protocol::{LocalProtocol, Operation, ProtocolBackend};
pub use session::Session;
pub use settlement::{SettlementSigner, SettlementSubmitter};
pub use types::{
    AccessGrant, DispatchError, GrantError, GrantFailurePolicy, GrantRequest, PipelineError,
    ProtectedAsset, ProtectionError, RelayerConfig, SettlementError, SettlementReceipt,
};
