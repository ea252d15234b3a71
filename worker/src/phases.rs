use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::WorkerError;

/// The three matching phases, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ingest,
    MatchAgainstBook,
    Finalize,
}

impl Phase {
    pub const ORDER: [Phase; 3] = [Phase::Ingest, Phase::MatchAgainstBook, Phase::Finalize];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Ingest => "ingest",
            Phase::MatchAgainstBook => "match-against-book",
            Phase::Finalize => "finalize",
        }
    }

    fn banner(self) -> &'static str {
        match self {
            Phase::Ingest => "Starting execution, reading new order",
            Phase::MatchAgainstBook => "Order valid, matching with order book",
            Phase::Finalize => "Finalizing matched trade",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub started: Duration,
    pub finished: Duration,
}

/// Runs phases strictly one after another.
///
/// A phase starts only when the previous one has completed, so the recorded
/// start and finish offsets increase monotonically. A failed phase is not
/// recorded and nothing after it can run.
pub struct PhaseExecutor {
    clock: Instant,
    pacing: Duration,
    records: Vec<PhaseRecord>,
}

impl PhaseExecutor {
    pub fn new(pacing: Duration) -> Self {
        Self {
            clock: Instant::now(),
            pacing,
            records: Vec::with_capacity(Phase::ORDER.len()),
        }
    }

    pub async fn run<T, Fut>(&mut self, phase: Phase, work: Fut) -> Result<T, WorkerError>
    where
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        let expected = Phase::ORDER.get(self.records.len()).copied();
        if expected != Some(phase) {
            return Err(WorkerError::PhaseOrder {
                expected: expected.map(Phase::name).unwrap_or("none"),
                got: phase.name(),
            });
        }

        let started = self.clock.elapsed();
        info!("{}", phase.banner());

        let output = work.await?;
        if !self.pacing.is_zero() {
            sleep(self.pacing).await;
        }

        let finished = self.clock.elapsed();
        debug!(phase = phase.name(), ?started, ?finished, "phase complete");
        self.records.push(PhaseRecord {
            phase,
            started,
            finished,
        });
        Ok(output)
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }
}
