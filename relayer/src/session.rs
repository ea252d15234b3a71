use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::protocol::ProtocolBackend;
use crate::types::{Identity, PipelineError};

struct Connection {
    identity: Identity,
    backend: Arc<dyn ProtocolBackend>,
    generation: AtomicU64,
    connected: AtomicBool,
}

/// Wallet-scoped context every pipeline call runs under.
///
/// Created on connect. Disconnecting or switching chain invalidates every
/// handle issued before, so a stale handle can never reach the backend.
#[derive(Clone)]
pub struct Session {
    connection: Arc<Connection>,
    chain_id: u64,
    generation: u64,
}

impl Session {
    pub fn connect(identity: Identity, chain_id: u64, backend: Arc<dyn ProtocolBackend>) -> Self {
        info!("Session connected: {} on chain {}", identity, chain_id);
        Self {
            connection: Arc::new(Connection {
                identity,
                backend,
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(true),
            }),
            chain_id,
            generation: 0,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.connection.identity
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn is_valid(&self) -> bool {
        self.connection.connected.load(Ordering::SeqCst)
            && self.connection.generation.load(Ordering::SeqCst) == self.generation
    }

    pub fn ensure_valid(&self) -> Result<(), PipelineError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PipelineError::SessionInvalid)
        }
    }

    /// The protocol handle, only while this session is still current.
    pub fn backend(&self) -> Result<Arc<dyn ProtocolBackend>, PipelineError> {
        self.ensure_valid()?;
        Ok(Arc::clone(&self.connection.backend))
    }

    pub fn disconnect(&self) {
        self.connection.connected.store(false, Ordering::SeqCst);
        self.connection.generation.fetch_add(1, Ordering::SeqCst);
        info!("Session disconnected: {}", self.connection.identity);
    }

    /// Moves the wallet to another chain and returns the session for it.
    pub fn switch_chain(&self, chain_id: u64) -> Result<Session, PipelineError> {
        self.ensure_valid()?;
        let generation = self.connection.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Session switched from chain {} to {}", self.chain_id, chain_id);
        Ok(Session {
            connection: Arc::clone(&self.connection),
            chain_id,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LocalProtocol;
    use darkpool_intent::Address;

    fn session() -> Session {
        let owner = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        Session::connect(owner, 421614, Arc::new(LocalProtocol::new()))
    }

    #[test]
    fn test_disconnect_invalidates_all_handles() {
        let session = session();
        let copy = session.clone();
        assert!(copy.backend().is_ok());

        session.disconnect();
        assert!(!copy.is_valid());
        assert!(matches!(copy.backend(), Err(PipelineError::SessionInvalid)));
        assert!(session.switch_chain(1).is_err());
    }

    #[test]
    fn test_switch_chain_retires_previous_handle() {
        let session = session();
        let switched = session.switch_chain(1).unwrap();

        assert!(!session.is_valid());
        assert!(switched.is_valid());
        assert_eq!(switched.chain_id(), 1);
        assert_eq!(switched.identity(), session.identity());
    }
}
