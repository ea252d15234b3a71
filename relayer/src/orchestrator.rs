use darkpool_intent::{Address, TradeIntent};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::dispatch::ExecutionDispatcher;
use crate::grants::AccessGrantManager;
use crate::protection::ProtectionClient;
use crate::protocol::ProtocolBackend;
use crate::session::Session;
use crate::types::{
    AccessGrant, AppId, DispatchReceipt, GrantFailurePolicy, GrantRequest, PipelineError, PoolId,
    ProcessingRequest, ProtectedAsset, ProtocolConfig,
};

/// Where a pipeline run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idle,
    Protecting,
    Protected,
    GrantingAccess,
    Granted,
    GrantFailed,
    Dispatching,
    Accepted,
    DispatchFailed,
    Terminal,
}

impl Stage {
    /// The transition table. Any in-progress stage may also jump straight to
    /// `Terminal` when a fatal error ends the run.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        let forward = matches!(
            (self, next),
            (Idle, Protecting)
                | (Protecting, Protected)
                | (Protected, GrantingAccess)
                | (GrantingAccess, Granted)
                | (GrantingAccess, GrantFailed)
                | (Granted, Dispatching)
                | (GrantFailed, Dispatching)
                | (Dispatching, Accepted)
                | (Dispatching, DispatchFailed)
                | (Accepted, Terminal)
                | (DispatchFailed, Terminal)
        );
        forward || (next == Terminal && !matches!(self, Idle | Terminal))
    }

    pub fn is_pending(self) -> bool {
        !matches!(self, Stage::Idle | Stage::Terminal)
    }
}

/// Snapshot published to observers of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub stage: Stage,
    pub pending: bool,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            pending: false,
        }
    }
}

/// The pipeline steps that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Protect,
    Grant,
    QueryGrant,
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ends the run as failed.
    Fatal,
    /// Recorded on the outcome, the run carries on.
    Advisory,
}

/// Declares per step whether an error ends the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub grant_failure: GrantFailurePolicy,
}

impl TransitionPolicy {
    pub fn disposition(&self, step: Step, error: &PipelineError) -> Disposition {
        if matches!(
            error,
            PipelineError::Cancelled { .. } | PipelineError::SessionInvalid
        ) {
            return Disposition::Fatal;
        }
        match step {
            Step::Protect | Step::Dispatch => Disposition::Fatal,
            Step::Grant => match self.grant_failure {
                GrantFailurePolicy::Proceed => Disposition::Advisory,
                GrantFailurePolicy::Abort => Disposition::Fatal,
            },
            Step::QueryGrant => Disposition::Advisory,
        }
    }
}

/// Parameters applied to every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub app: AppId,
    pub price_per_access: u64,
    pub number_of_access: u64,
    pub app_max_price: u64,
    pub workerpool: Option<PoolId>,
    pub call_timeout: Duration,
    pub grant_failure: GrantFailurePolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, PipelineError> {
        let app = Address::parse(&config.app)
            .map_err(|e| PipelineError::Config(format!("protocol.app: {e}")))?;
        let workerpool = config
            .workerpool
            .as_deref()
            .filter(|pool| !pool.trim().is_empty())
            .map(Address::parse)
            .transpose()
            .map_err(|e| PipelineError::Config(format!("protocol.workerpool: {e}")))?;

        Ok(Self {
            app,
            price_per_access: config.price_per_access,
            number_of_access: config.number_of_access,
            app_max_price: config.app_max_price,
            workerpool,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            grant_failure: config.grant_failure_policy,
        })
    }
}

#[derive(Debug)]
pub enum Terminal {
    Dispatched,
    Failed { stage: Stage, error: PipelineError },
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub asset: Option<ProtectedAsset>,
    pub grant: Option<AccessGrant>,
    pub receipt: Option<DispatchReceipt>,
    pub terminal: Terminal,
    /// Non-fatal failures, in the order they happened.
    pub advisories: Vec<String>,
    pub history: Vec<Stage>,
}

impl PipelineOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self.terminal, Terminal::Dispatched)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.terminal {
            Terminal::Dispatched => None,
            Terminal::Failed { error, .. } => Some(error),
        }
    }

    pub fn summary(&self) -> serde_json::Value {
        let (status, failed_at, error) = match &self.terminal {
            Terminal::Dispatched => ("dispatched", None, None),
            Terminal::Failed { stage, error } => ("failed", Some(*stage), Some(error.to_string())),
        };
        json!({
            "run_id": self.run_id,
            "status": status,
            "failed_at": failed_at,
            "error": error,
            "asset": self.asset,
            "grant": self.grant,
            "receipt": self.receipt,
            "advisories": self.advisories,
            "history": self.history,
        })
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bookkeeping for one run.
struct Run<'a> {
    run_id: Uuid,
    status: &'a watch::Sender<PipelineStatus>,
    stage: Stage,
    history: Vec<Stage>,
    asset: Option<ProtectedAsset>,
    grant: Option<AccessGrant>,
    receipt: Option<DispatchReceipt>,
    advisories: Vec<String>,
}

impl<'a> Run<'a> {
    fn begin(run_id: Uuid, status: &'a watch::Sender<PipelineStatus>) -> Self {
        status.send_replace(PipelineStatus::default());
        Self {
            run_id,
            status,
            stage: Stage::Idle,
            history: vec![Stage::Idle],
            asset: None,
            grant: None,
            receipt: None,
            advisories: Vec::new(),
        }
    }

    fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        if !self.stage.can_advance_to(next) {
            return Err(PipelineError::Config(format!(
                "illegal pipeline transition {:?} -> {:?}",
                self.stage, next
            )));
        }
        self.stage = next;
        self.history.push(next);
        self.status.send_replace(PipelineStatus {
            stage: next,
            pending: next.is_pending(),
        });
        Ok(())
    }

    fn advise(&mut self, message: String) {
        warn!("{}", message);
        self.advisories.push(message);
    }

    fn fail(mut self, error: PipelineError) -> Result<PipelineOutcome, PipelineError> {
        let stage = self.stage;
        error!("Pipeline failed at {:?}: {}", stage, error);
        self.advance(Stage::Terminal)?;
        Ok(self.into_outcome(Terminal::Failed { stage, error }))
    }

    fn finish(mut self) -> Result<PipelineOutcome, PipelineError> {
        self.advance(Stage::Terminal)?;
        info!("Pipeline run {} dispatched", self.run_id);
        Ok(self.into_outcome(Terminal::Dispatched))
    }

    fn into_outcome(self, terminal: Terminal) -> PipelineOutcome {
        PipelineOutcome {
            run_id: self.run_id,
            asset: self.asset,
            grant: self.grant,
            receipt: self.receipt,
            terminal,
            advisories: self.advisories,
            history: self.history,
        }
    }
}

/// Sequences protect, grant and dispatch for one caller session.
pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    policy: TransitionPolicy,
    status: watch::Sender<PipelineStatus>,
    in_flight: AtomicBool,
}

impl PipelineOrchestrator {
    pub fn new(settings: PipelineSettings) -> Self {
        let policy = TransitionPolicy {
            grant_failure: settings.grant_failure,
        };
        let (status, _) = watch::channel(PipelineStatus::default());
        Self {
            settings,
            policy,
            status,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    /// Runs one trade intent through the pipeline.
    ///
    /// Returns `Err` only when the run is refused before it starts: another
    /// submission is in flight or the session is stale. Every started run
    /// ends in a terminal outcome.
    pub async fn submit(
        &self,
        session: &Session,
        intent: TradeIntent,
        cancel: &CancelToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let _flight = InFlight::acquire(&self.in_flight).ok_or(PipelineError::SubmissionInFlight)?;
        let backend = session.backend()?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id, side = %intent.side());
        self.drive(session, backend, intent, cancel, run_id)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        session: &Session,
        backend: Arc<dyn ProtocolBackend>,
        intent: TradeIntent,
        cancel: &CancelToken,
        run_id: Uuid,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut run = Run::begin(run_id, &self.status);
        info!("Pipeline run started for {}", session.identity());

        run.advance(Stage::Protecting)?;
        let protection = ProtectionClient::new(Arc::clone(&backend));
        let asset = match self
            .guarded_call("protect", session, cancel, protection.protect(&intent))
            .await
        {
            Ok(asset) => asset,
            Err(e) => return run.fail(e),
        };
        run.asset = Some(asset.clone());
        run.advance(Stage::Protected)?;

        run.advance(Stage::GrantingAccess)?;
        let grants = AccessGrantManager::new(Arc::clone(&backend));
        let request = GrantRequest::new(
            asset.address.clone(),
            self.settings.app.clone(),
            asset.owner.clone(),
            self.settings.price_per_access,
            self.settings.number_of_access,
        );
        match self
            .guarded_call("grant", session, cancel, grants.grant(session.identity(), &request))
            .await
        {
            Ok(grant) => {
                run.grant = Some(grant);
                run.advance(Stage::Granted)?;

                // Confirm the grant is visible before relying on it.
                let query = async {
                    grants
                        .query(&asset.address, &self.settings.app, &asset.owner)
                        .await
                        .map_err(PipelineError::GrantQuery)
                };
                match self.guarded_call("query grant", session, cancel, query).await {
                    Ok(Some(confirmed)) => run.grant = Some(confirmed),
                    Ok(None) => run.advise(format!(
                        "grant on {} not yet visible to queries",
                        asset.address
                    )),
                    Err(e) => match self.policy.disposition(Step::QueryGrant, &e) {
                        Disposition::Advisory => run.advise(e.to_string()),
                        Disposition::Fatal => return run.fail(e),
                    },
                }
            }
            Err(e) => {
                run.advance(Stage::GrantFailed)?;
                match self.policy.disposition(Step::Grant, &e) {
                    Disposition::Advisory => {
                        run.advise(format!("{e}; dispatching anyway"));
                    }
                    Disposition::Fatal => return run.fail(e),
                }
            }
        }

        run.advance(Stage::Dispatching)?;
        let dispatcher = ExecutionDispatcher::new(backend);
        let processing = ProcessingRequest {
            protected_asset: asset.address.clone(),
            app: self.settings.app.clone(),
            app_max_price: self.settings.app_max_price,
            workerpool: self.settings.workerpool.clone(),
        };
        match self
            .guarded_call(
                "dispatch",
                session,
                cancel,
                dispatcher.dispatch(session.identity(), &processing),
            )
            .await
        {
            Ok(receipt) => {
                run.receipt = Some(receipt);
                run.advance(Stage::Accepted)?;
                run.finish()
            }
            Err(e) => {
                run.advance(Stage::DispatchFailed)?;
                run.fail(e)
            }
        }
    }

    /// Awaits one external call under the session check, the per-call
    /// timeout and the cancel token.
    ///
    /// A token cancelled before the call starts means the call never runs.
    /// Cancelling while it runs stops waiting for it; whatever the protocol
    /// already committed stays committed.
    async fn guarded_call<T, E, F>(
        &self,
        operation: &'static str,
        session: &Session,
        cancel: &CancelToken,
        call: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PipelineError>,
    {
        session.ensure_valid()?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                operation,
                in_flight: false,
            });
        }

        let after = self.settings.call_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("{} cancelled while in flight", operation);
                Err(PipelineError::Cancelled { operation, in_flight: true })
            }
            result = timeout(after, call) => match result {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(PipelineError::Timeout { operation, after }),
            },
        }
    }
}
