use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use darkpool_intent::{Address, SettlementArtifact, Side, TradeIntent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use darkpool_relayer::config::{create_sample_config, CliOverrides, ConfigBuilder};
use darkpool_relayer::explorer::{explorer_url, ExplorerKind};
use darkpool_relayer::logging::init_logging;
use darkpool_relayer::orchestrator::{PipelineOrchestrator, PipelineSettings};
use darkpool_relayer::types::{GrantFailurePolicy, RelayerConfig};
use darkpool_relayer::{
    CancelToken, LocalProtocol, RpcSettlementLedger, Session, SettlementSigner,
    SettlementSubmitter,
};

/// Demo prices for the in-process protocol, in the smallest currency unit.
const DEMO_APP_PRICE: u64 = 1_000_000_000;
const DEMO_WORKERPOOL_PRICE: u64 = 1_000_000_000;
const DEMO_WORKERPOOL: &str = "0x000000000000000000000000000000000000f001";

#[derive(Parser)]
#[command(name = "darkpool-relayer")]
#[command(about = "Protects trade intents, dispatches confidential matching and settles trades")]
struct Cli {
    /// Path to relayer configuration file
    #[arg(short, long, global = true, env = "DARKPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Identity that owns the protected intents
    #[arg(long, global = true)]
    owner: Option<String>,

    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Confidential matching app address
    #[arg(long, global = true)]
    app: Option<String>,

    #[arg(long, global = true)]
    workerpool: Option<String>,

    /// proceed or abort when granting access fails
    #[arg(long, global = true)]
    grant_failure_policy: Option<GrantFailurePolicy>,

    /// Settlement JSON-RPC endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Protect an intent, grant the app access and dispatch matching
    Submit {
        /// buy or sell
        #[arg(long)]
        side: Side,
    },
    /// Submit a signed settlement artifact produced by the worker
    Settle {
        /// Path to settlement.json
        #[arg(long)]
        artifact: PathBuf,
    },
    /// Print a sample configuration file
    SampleConfig,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_file: self.config.clone(),
            owner: self.owner.clone(),
            chain_id: self.chain_id,
            app: self.app.clone(),
            workerpool: self.workerpool.clone(),
            grant_failure_policy: self.grant_failure_policy,
            rpc_url: self.rpc_url.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig = cli.command {
        println!("{}", create_sample_config());
        return Ok(());
    }

    let logging = init_logging(cli.log_level.as_deref().unwrap_or("info"));
    let config = ConfigBuilder::load(&cli.overrides()).context("Failed to load configuration")?;
    logging.set_level(&config.logging.level);

    match &cli.command {
        Commands::Submit { side } => submit(&config, *side).await,
        Commands::Settle { artifact } => settle(&config, artifact).await,
        Commands::SampleConfig => Ok(()),
    }
}

async fn submit(config: &RelayerConfig, side: Side) -> Result<()> {
    let owner = Address::parse(&config.wallet.owner).context("Invalid wallet owner")?;
    let settings = PipelineSettings::from_config(&config.protocol)?;

    let workerpool = match &settings.workerpool {
        Some(pool) => pool.clone(),
        None => Address::parse(DEMO_WORKERPOOL)?,
    };
    let protocol = LocalProtocol::new()
        .with_app(settings.app.clone(), DEMO_APP_PRICE)
        .with_workerpool(workerpool, DEMO_WORKERPOOL_PRICE);

    let session = Session::connect(owner.clone(), config.chain.chain_id, Arc::new(protocol));
    let orchestrator = PipelineOrchestrator::new(settings);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the run");
            on_interrupt.cancel();
        }
    });

    info!("Submitting {} intent for {}", side, owner);
    let outcome = orchestrator
        .submit(&session, TradeIntent::new(side, owner.clone()), &cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome.summary())?);

    let chain_id = config.chain.chain_id;
    if let Some(url) = explorer_url(chain_id, ExplorerKind::Address, Some(&owner)) {
        println!("Owner:   {url}");
    }
    if let Some(asset) = &outcome.asset {
        if let Some(url) = explorer_url(chain_id, ExplorerKind::Dataset, Some(&asset.address)) {
            println!("Dataset: {url}");
        }
    }
    if let Some(url) = explorer_url(chain_id, ExplorerKind::Apps, None) {
        println!("Apps:    {url}");
    }

    match outcome.error() {
        None => Ok(()),
        Some(error) => Err(anyhow::anyhow!("pipeline failed: {error}")),
    }
}

async fn settle(config: &RelayerConfig, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let artifact: SettlementArtifact =
        serde_json::from_str(&raw).context("Settlement artifact is not valid JSON")?;

    let ledger = Arc::new(RpcSettlementLedger::new(&config.settlement)?);
    let mut submitter = SettlementSubmitter::new(ledger, config.settlement.retry_policy());

    let key_env = &config.settlement.signing_key_env;
    if std::env::var_os(key_env).is_some() {
        let signer = SettlementSigner::from_env(key_env)?;
        info!("Accepting artifacts signed by {}", signer.public_key_hex());
        submitter = submitter.with_trusted_signer(signer.public_key_hex());
    } else {
        warn!("{} is not set, accepting any validly signed artifact", key_env);
    }

    let receipt = submitter.settle(&artifact).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}
