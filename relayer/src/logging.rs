use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Adjusts the level of the installed subscriber once configuration is known.
pub struct LogHandle {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    from_env: bool,
}

impl LogHandle {
    /// Whether this call installed the global subscriber.
    pub fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Switches to `level`. `RUST_LOG` still wins when it is set.
    pub fn set_level(&self, level: &str) {
        let Some(handle) = &self.handle else {
            return;
        };
        if self.from_env {
            return;
        }
        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if let Err(e) = handle.reload(filter) {
                    warn!("Could not change the log level to {}: {}", level, e);
                }
            }
            Err(e) => warn!("Ignoring invalid log level {:?}: {}", level, e),
        }
    }
}

/// Installs the global subscriber with a bootstrap level so that messages
/// logged while loading configuration are kept. `RUST_LOG` wins over
/// `bootstrap_level`.
pub fn init_logging(bootstrap_level: &str) -> LogHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (
            EnvFilter::try_new(bootstrap_level).unwrap_or_else(|_| EnvFilter::new("info")),
            false,
        ),
    };
    let (filter, handle) = reload::Layer::new(filter);

    // A second initialisation (tests, embedding) keeps the first subscriber.
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok();

    LogHandle {
        handle: installed.then_some(handle),
        from_env,
    }
}
