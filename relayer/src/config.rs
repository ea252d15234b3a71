use crate::types::{GrantFailurePolicy, PipelineError, RelayerConfig};
use config::{Config, Environment, File, FileFormat};
use darkpool_intent::Address;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULTS: &str = r#"
[wallet]
owner = ""

[chain]
chain_id = 421614

[protocol]
app = "0x9B0A0Fc519e7DE7E310e51C8b8583AF827fDa720"
price_per_access = 2000000000
number_of_access = 500
app_max_price = 3000000000
call_timeout_secs = 120
grant_failure_policy = "proceed"

[settlement]
rpc_url = "http://127.0.0.1:8545"
contract_address = ""
signing_key_env = "DARKPOOL_SIGNING_KEY"
retry_attempts = 5
initial_retry_delay_ms = 500
max_retry_delay_ms = 8000
timeout_secs = 120

[logging]
level = "info"
"#;

const DEFAULT_PATHS: [&str; 2] = ["./darkpool.toml", "./relayer.toml"];

/// Values given on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub owner: Option<String>,
    pub chain_id: Option<u64>,
    pub app: Option<String>,
    pub workerpool: Option<String>,
    pub grant_failure_policy: Option<GrantFailurePolicy>,
    pub rpc_url: Option<String>,
    pub log_level: Option<String>,
}

/// Configuration builder for the relayer
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn config_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Config(format!("{context}: {e}"))
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Load configuration from multiple sources
    pub fn load(cli: &CliOverrides) -> Result<RelayerConfig, PipelineError> {
        let mut builder = ConfigBuilder::new();

        // Order of precedence, lowest first: defaults, file, environment, CLI.
        builder.load_defaults()?;
        match &cli.config_file {
            Some(path) => builder.load_file(path)?,
            None => builder.try_load_default_files()?,
        }
        builder.load_environment()?;
        builder.apply_cli_overrides(cli)?;

        let config = builder.build()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn build(&self) -> Result<RelayerConfig, PipelineError> {
        let config: RelayerConfig = self
            .config
            .clone()
            .try_deserialize()
            .map_err(|e| config_error("Configuration parsing error", e))?;
        validate_config(&config)?;
        Ok(config)
    }

    fn load_defaults(&mut self) -> Result<(), PipelineError> {
        self.config = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()
            .map_err(|e| config_error("Default config error", e))?;
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<(), PipelineError> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        info!("Loading configuration from: {}", path.display());

        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(File::from(path))
            .build()
            .map_err(|e| config_error("Config file error", e))?;
        Ok(())
    }

    fn try_load_default_files(&mut self) -> Result<(), PipelineError> {
        for path in DEFAULT_PATHS {
            let path = Path::new(path);
            if path.exists() {
                info!("Found default config file: {}", path.display());
                return self.load_file(path);
            }
        }
        warn!("No default config file found, using defaults and environment variables");
        Ok(())
    }

    /// `DARKPOOL_PROTOCOL__APP=0x...` sets `protocol.app`.
    fn load_environment(&mut self) -> Result<(), PipelineError> {
        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(
                Environment::with_prefix("DARKPOOL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| config_error("Environment config error", e))?;
        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) -> Result<(), PipelineError> {
        let override_error = |e: config::ConfigError| config_error("CLI override error", e);
        let mut builder = Config::builder().add_source(self.config.clone());

        if let Some(owner) = &cli.owner {
            builder = builder.set_override("wallet.owner", owner.as_str()).map_err(override_error)?;
        }
        if let Some(chain_id) = cli.chain_id {
            builder = builder.set_override("chain.chain_id", chain_id as i64).map_err(override_error)?;
        }
        if let Some(app) = &cli.app {
            builder = builder.set_override("protocol.app", app.as_str()).map_err(override_error)?;
        }
        if let Some(pool) = &cli.workerpool {
            builder = builder.set_override("protocol.workerpool", pool.as_str()).map_err(override_error)?;
        }
        if let Some(policy) = cli.grant_failure_policy {
            builder = builder
                .set_override("protocol.grant_failure_policy", policy.to_string())
                .map_err(override_error)?;
        }
        if let Some(url) = &cli.rpc_url {
            builder = builder.set_override("settlement.rpc_url", url.as_str()).map_err(override_error)?;
        }
        if let Some(level) = &cli.log_level {
            builder = builder.set_override("logging.level", level.as_str()).map_err(override_error)?;
        }

        self.config = builder
            .build()
            .map_err(|e| config_error("CLI config build error", e))?;
        Ok(())
    }
}

/// Validate configuration
pub fn validate_config(config: &RelayerConfig) -> Result<(), PipelineError> {
    if config.wallet.owner.trim().is_empty() {
        return Err(PipelineError::Config("Wallet owner is required".to_string()));
    }
    let owner = Address::parse(&config.wallet.owner)
        .map_err(|e| config_error("Invalid wallet owner", e))?;
    if owner.is_zero() {
        return Err(PipelineError::Config("Wallet owner must not be the zero address".to_string()));
    }

    Address::parse(&config.protocol.app).map_err(|e| config_error("Invalid protocol app", e))?;
    if let Some(pool) = config.protocol.workerpool.as_deref().filter(|p| !p.trim().is_empty()) {
        Address::parse(pool).map_err(|e| config_error("Invalid workerpool", e))?;
    }
    if config.protocol.number_of_access == 0 {
        return Err(PipelineError::Config(
            "Number of access must be greater than 0".to_string(),
        ));
    }
    if config.protocol.call_timeout_secs == 0 {
        return Err(PipelineError::Config(
            "Call timeout must be greater than 0".to_string(),
        ));
    }

    if config.settlement.retry_attempts == 0 {
        return Err(PipelineError::Config(
            "Retry attempts must be greater than 0".to_string(),
        ));
    }
    if config.settlement.initial_retry_delay_ms > config.settlement.max_retry_delay_ms {
        return Err(PipelineError::Config(
            "Initial retry delay must not exceed the max retry delay".to_string(),
        ));
    }
    if config.settlement.signing_key_env.trim().is_empty() {
        return Err(PipelineError::Config(
            "Signing key variable name is required".to_string(),
        ));
    }

    info!("Configuration validation passed");
    Ok(())
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    r#"# Darkpool relayer configuration
# Copy this file to darkpool.toml and update the values

[wallet]
# Identity that owns protected intents and pays for execution
owner = "0xYOUR_WALLET_ADDRESS_HERE"

[chain]
# 421614 is Arbitrum Sepolia; other chains get no explorer links
chain_id = 421614

[protocol]
# Confidential matching app allowed to read protected intents
app = "0x9B0A0Fc519e7DE7E310e51C8b8583AF827fDa720"
# Price per access in the smallest currency unit
price_per_access = 2000000000
# Number of times the app may read a protected intent
number_of_access = 500
# Ceiling on app plus workerpool price per execution
app_max_price = 3000000000
# Optional workerpool to run on
# workerpool = "0x..."
# Per-call timeout in seconds
call_timeout_secs = 120
# What to do when granting access fails: proceed or abort
grant_failure_policy = "proceed"

[settlement]
# JSON-RPC endpoint of the settlement node
rpc_url = "http://127.0.0.1:8545"
# Deployed settlement contract
contract_address = "0xYOUR_CONTRACT_ADDRESS_HERE"
# Environment variable holding the hex ed25519 signing seed
signing_key_env = "DARKPOOL_SIGNING_KEY"
# Submission attempts before giving up
retry_attempts = 5
# Backoff bounds in milliseconds
initial_retry_delay_ms = 500
max_retry_delay_ms = 8000
# Overall settlement timeout in seconds
timeout_secs = 120

[logging]
# Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
level = "info"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    fn toml_file() -> NamedTempFile {
        tempfile::Builder::new().suffix(".toml").tempfile().unwrap()
    }

    const OWNER: &str = "0x00000000000000000000000000000000000000aa";

    fn loaded(extra: &str) -> Result<RelayerConfig, PipelineError> {
        let file = toml_file();
        fs::write(file.path(), extra).unwrap();

        let mut builder = ConfigBuilder::new();
        builder.load_defaults()?;
        builder.load_file(file.path())?;
        builder.build()
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = create_sample_config();
        assert!(sample.contains("[wallet]"));
        assert!(sample.contains("[protocol]"));
        assert!(sample.contains("[settlement]"));

        let parsed: Result<RelayerConfig, _> = Config::builder()
            .add_source(File::from_str(&sample, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize());
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_defaults_need_an_owner() {
        assert!(matches!(loaded(""), Err(PipelineError::Config(_))));

        let config = loaded(&format!("[wallet]\nowner = \"{OWNER}\"\n")).unwrap();
        assert_eq!(config.protocol.price_per_access, 2_000_000_000);
        assert_eq!(config.protocol.number_of_access, 500);
        assert_eq!(config.protocol.grant_failure_policy, GrantFailurePolicy::Proceed);
        assert!(config.protocol.workerpool.is_none());
    }

    #[test]
    fn test_file_values_and_cli_overrides() {
        let file = toml_file();
        fs::write(
            file.path(),
            format!(
                "[wallet]\nowner = \"{OWNER}\"\n[protocol]\ngrant_failure_policy = \"abort\"\napp_max_price = 10\n"
            ),
        )
        .unwrap();

        let cli = CliOverrides {
            config_file: Some(file.path().to_path_buf()),
            chain_id: Some(1),
            grant_failure_policy: Some(GrantFailurePolicy::Proceed),
            ..Default::default()
        };
        let config = ConfigBuilder::load(&cli).unwrap();

        assert_eq!(config.protocol.app_max_price, 10);
        assert_eq!(config.chain.chain_id, 1);
        assert_eq!(config.protocol.grant_failure_policy, GrantFailurePolicy::Proceed);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = format!("[wallet]\nowner = \"{OWNER}\"\n");
        assert!(loaded(&format!("{base}[protocol]\nnumber_of_access = 0\n")).is_err());
        assert!(loaded(&format!("{base}[protocol]\napp = \"0x12\"\n")).is_err());
        assert!(loaded(&format!("{base}[settlement]\nretry_attempts = 0\n")).is_err());
        assert!(loaded("[wallet]\nowner = \"0x0000000000000000000000000000000000000000\"\n").is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut builder = ConfigBuilder::new();
        builder.load_defaults().unwrap();
        assert!(builder.load_file(Path::new("/definitely/not/here.toml")).is_err());
    }
}
