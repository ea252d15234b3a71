use darkpool_intent::{Address, Side, Trade, TradeIntent, TradeSigner};
use darkpool_relayer::orchestrator::{PipelineOrchestrator, PipelineSettings, Stage, Terminal};
use darkpool_relayer::protocol::{LocalProtocol, Operation};
use darkpool_relayer::types::{
    DispatchError, GrantError, GrantFailurePolicy, GrantRequest, PipelineError, ProcessingRequest,
    Restrictions, RetryPolicy, SettlementError,
};
use darkpool_relayer::{
    AccessGrantManager, CancelToken, ExecutionDispatcher, InMemoryLedger, ProtectionClient,
    Session, SettlementSigner, SettlementSubmitter,
};
use std::sync::Arc;
use std::time::Duration;

const CHAIN_ID: u64 = 421614;

fn addr(last: &str) -> Address {
    Address::parse(&format!("0x{:0>40}", last)).unwrap()
}

fn owner() -> Address {
    addr("aa")
}

fn app() -> Address {
    Address::parse("0x9B0A0Fc519e7DE7E310e51C8b8583AF827fDa720").unwrap()
}

fn protocol() -> Arc<LocalProtocol> {
    Arc::new(
        LocalProtocol::new()
            .with_app(app(), 1_000_000_000)
            .with_workerpool(addr("f1"), 1_000_000_000),
    )
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        app: app(),
        price_per_access: 2_000_000_000,
        number_of_access: 500,
        app_max_price: 3_000_000_000,
        workerpool: None,
        call_timeout: Duration::from_secs(5),
        grant_failure: GrantFailurePolicy::Proceed,
    }
}

fn session(protocol: &Arc<LocalProtocol>) -> Session {
    Session::connect(owner(), CHAIN_ID, Arc::clone(protocol) as _)
}

fn buy() -> TradeIntent {
    TradeIntent::new(Side::Buy, owner())
}

#[tokio::test]
async fn test_grant_then_query_example() {
    let protocol = protocol();
    let asset = ProtectionClient::new(Arc::clone(&protocol))
        .protect(&buy())
        .await
        .unwrap();
    let grants = AccessGrantManager::new(Arc::clone(&protocol));

    let request = GrantRequest::from_raw_terms(
        asset.address.clone(),
        app(),
        owner(),
        "2000000000",
        "500",
    )
    .unwrap();
    grants.grant(&owner(), &request).await.unwrap();

    let grant = grants
        .query(&asset.address, &app(), &owner())
        .await
        .unwrap()
        .expect("grant should be visible");
    assert_eq!(grant.dataset_price, 2_000_000_000);
    assert_eq!(grant.volume, 500);
    assert_eq!(grant.authorized_app, app());
    assert_eq!(grant.authorized_user, owner());
    assert!(grant.workerpool_restrict.is_zero());

    // Another user sees nothing.
    assert!(grants
        .query(&asset.address, &app(), &addr("bb"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_restricted_grant_keeps_authorized_pair() {
    let protocol = protocol();
    let asset = ProtectionClient::new(Arc::clone(&protocol))
        .protect(&buy())
        .await
        .unwrap();
    let grants = AccessGrantManager::new(Arc::clone(&protocol));

    let pinned_pool = GrantRequest::new(asset.address.clone(), app(), owner(), 7, 3)
        .with_restrictions(Restrictions {
            app: app(),
            workerpool: addr("f1"),
            requester: Address::zero(),
        });
    grants.grant(&owner(), &pinned_pool).await.unwrap();

    let grant = grants
        .query(&asset.address, &app(), &owner())
        .await
        .unwrap()
        .expect("grant should be visible to its authorized user");
    assert_eq!(grant.authorized_app, app());
    assert_eq!(grant.authorized_user, owner());
    assert_eq!(grant.workerpool_restrict, addr("f1"));
    assert!(grant.requester_restrict.is_zero());

    // An open requester restriction does not extend the grant to other users.
    assert!(grants
        .query(&asset.address, &app(), &addr("bb"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_open_restrictions_still_report_authorized_pair() {
    let protocol = protocol();
    let asset = ProtectionClient::new(Arc::clone(&protocol))
        .protect(&buy())
        .await
        .unwrap();
    let grants = AccessGrantManager::new(Arc::clone(&protocol));

    let open = GrantRequest::new(asset.address.clone(), app(), owner(), 0, 1)
        .with_restrictions(Restrictions {
            app: Address::zero(),
            workerpool: Address::zero(),
            requester: Address::zero(),
        });
    let issued = grants.grant(&owner(), &open).await.unwrap();
    assert_eq!(issued.authorized_app, app());
    assert_eq!(issued.authorized_user, owner());
    assert!(issued.app_restrict.is_zero());

    let found = grants
        .query(&asset.address, &app(), &owner())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, issued);
}

#[tokio::test]
async fn test_requester_restriction_must_admit_authorized_user() {
    let protocol = protocol();
    let asset = ProtectionClient::new(Arc::clone(&protocol))
        .protect(&buy())
        .await
        .unwrap();
    let grants = AccessGrantManager::new(Arc::clone(&protocol));

    let request = GrantRequest::new(asset.address.clone(), app(), owner(), 0, 1)
        .with_restrictions(Restrictions {
            app: app(),
            workerpool: Address::zero(),
            requester: addr("bb"),
        });
    let err = grants.grant(&owner(), &request).await.unwrap_err();
    assert!(matches!(
        err,
        GrantError::InvalidParameter { field: "requesterRestrict", .. }
    ));
    assert_eq!(protocol.calls(Operation::GrantAccess).await, 0);
}

#[tokio::test]
async fn test_zero_volume_grant_is_issued_but_unusable() {
    let protocol = protocol();
    let asset = ProtectionClient::new(Arc::clone(&protocol))
        .protect(&buy())
        .await
        .unwrap();
    let grants = AccessGrantManager::new(Arc::clone(&protocol));

    let request = GrantRequest::from_raw_terms(asset.address.clone(), app(), owner(), "0", "0")
        .unwrap();
    let issued = grants.grant(&owner(), &request).await.unwrap();
    assert_eq!(issued.volume, 0);
    assert!(issued.is_exhausted());

    assert!(grants
        .query(&asset.address, &app(), &owner())
        .await
        .unwrap()
        .is_none());

    let err = ExecutionDispatcher::new(Arc::clone(&protocol))
        .dispatch(
            &owner(),
            &ProcessingRequest {
                protected_asset: asset.address.clone(),
                app: app(),
                app_max_price: 3_000_000_000,
                workerpool: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotAuthorized { .. }));
    assert_eq!(protocol.calls(Operation::Execute).await, 0);
}

#[tokio::test]
async fn test_same_intent_protected_twice_gives_distinct_assets() {
    let protocol = protocol();
    let client = ProtectionClient::new(Arc::clone(&protocol));

    let first = client.protect(&buy()).await.unwrap();
    let second = client.protect(&buy()).await.unwrap();
    assert_ne!(first.address, second.address);
    assert_ne!(first.encrypted_payload_ref, second.encrypted_payload_ref);

    let payload = protocol.open_asset(&second.address).await.unwrap();
    assert_eq!(payload, buy().payload());
}

#[tokio::test]
async fn test_successful_run_dispatches() {
    let protocol = protocol();
    let session = session(&protocol);
    let orchestrator = PipelineOrchestrator::new(settings());

    let outcome = orchestrator
        .submit(&session, buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.is_dispatched(), "{:?}", outcome.error());
    assert!(outcome.advisories.is_empty());
    assert_eq!(
        outcome.history,
        vec![
            Stage::Idle,
            Stage::Protecting,
            Stage::Protected,
            Stage::GrantingAccess,
            Stage::Granted,
            Stage::Dispatching,
            Stage::Accepted,
            Stage::Terminal,
        ]
    );

    let asset = outcome.asset.as_ref().unwrap();
    assert_eq!(asset.owner, owner());
    let receipt = outcome.receipt.as_ref().unwrap();
    assert_eq!(receipt.workerpool, addr("f1"));
    assert_eq!(receipt.price, 2_000_000_000);

    let status = orchestrator.status();
    assert_eq!(status.stage, Stage::Terminal);
    assert!(!status.pending);

    let summary = outcome.summary();
    assert_eq!(summary["status"], "dispatched");
    assert_eq!(summary["history"][7], "terminal");
}

#[tokio::test]
async fn test_dispatch_consumes_one_access() {
    let protocol = protocol();
    let session = session(&protocol);
    let orchestrator = PipelineOrchestrator::new(settings());

    let outcome = orchestrator
        .submit(&session, buy(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.grant.as_ref().unwrap().volume, 500);

    let asset = outcome.asset.unwrap();
    let grant = AccessGrantManager::new(Arc::clone(&protocol))
        .query(&asset.address, &app(), &owner())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.volume, 499);
}

#[tokio::test]
async fn test_protection_failure_stops_the_run() {
    let protocol = protocol();
    protocol
        .fail_next(Operation::RegisterAsset, "storage unavailable")
        .await;
    let orchestrator = PipelineOrchestrator::new(settings());

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            stage: Stage::Protecting,
            error: PipelineError::Protection(_)
        }
    ));
    assert_eq!(
        outcome.history,
        vec![Stage::Idle, Stage::Protecting, Stage::Terminal]
    );
    assert_eq!(protocol.calls(Operation::GrantAccess).await, 0);
    assert_eq!(protocol.calls(Operation::Quote).await, 0);
}

#[tokio::test]
async fn test_grant_failure_proceeds_by_default() {
    let protocol = protocol();
    protocol.fail_next(Operation::GrantAccess, "user rejected").await;
    let orchestrator = PipelineOrchestrator::new(settings());

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    // Dispatch is still attempted, and fails for lack of any grant.
    assert_eq!(outcome.advisories.len(), 1);
    assert!(outcome.advisories[0].contains("user rejected"));
    assert_eq!(protocol.calls(Operation::Quote).await, 1);
    assert!(outcome.history.contains(&Stage::GrantFailed));
    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            stage: Stage::DispatchFailed,
            error: PipelineError::Dispatch(DispatchError::NotAuthorized { .. })
        }
    ));
}

#[tokio::test]
async fn test_grant_failure_aborts_under_abort_policy() {
    let protocol = protocol();
    protocol.fail_next(Operation::GrantAccess, "user rejected").await;
    let orchestrator = PipelineOrchestrator::new(PipelineSettings {
        grant_failure: GrantFailurePolicy::Abort,
        ..settings()
    });

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            stage: Stage::GrantFailed,
            error: PipelineError::Grant(_)
        }
    ));
    assert_eq!(protocol.calls(Operation::Quote).await, 0);
}

#[tokio::test]
async fn test_grant_query_failure_is_advisory() {
    let protocol = protocol();
    protocol.fail_next(Operation::GrantedAccess, "indexer lagging").await;
    let orchestrator = PipelineOrchestrator::new(settings());

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.is_dispatched());
    assert_eq!(outcome.advisories.len(), 1);
    assert!(outcome.advisories[0].contains("indexer lagging"));
}

#[tokio::test]
async fn test_single_submission_in_flight() {
    let protocol = protocol();
    protocol.set_latency(Duration::from_millis(50));
    let session = session(&protocol);
    let orchestrator = PipelineOrchestrator::new(settings());
    let cancel = CancelToken::new();

    let (first, second) = tokio::join!(
        orchestrator.submit(&session, buy(), &cancel),
        orchestrator.submit(&session, TradeIntent::new(Side::Sell, owner()), &cancel),
    );

    assert!(first.unwrap().is_dispatched());
    assert!(matches!(second, Err(PipelineError::SubmissionInFlight)));
    assert_eq!(protocol.calls(Operation::RegisterAsset).await, 1);

    // The slot is released once the run ends.
    protocol.set_latency(Duration::ZERO);
    assert!(orchestrator
        .submit(&session, buy(), &cancel)
        .await
        .unwrap()
        .is_dispatched());
}

#[tokio::test]
async fn test_cancel_before_start_issues_no_calls() {
    let protocol = protocol();
    let orchestrator = PipelineOrchestrator::new(settings());
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &cancel)
        .await
        .unwrap();

    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            error: PipelineError::Cancelled {
                in_flight: false,
                ..
            },
            ..
        }
    ));
    assert_eq!(protocol.calls(Operation::RegisterAsset).await, 0);
}

#[tokio::test]
async fn test_cancel_while_in_flight() {
    let protocol = protocol();
    protocol.set_latency(Duration::from_millis(500));
    let orchestrator = PipelineOrchestrator::new(settings());
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &cancel)
        .await
        .unwrap();

    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            stage: Stage::Protecting,
            error: PipelineError::Cancelled {
                operation: "protect",
                in_flight: true,
            },
        }
    ));
    assert!(outcome.asset.is_none());
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let protocol = protocol();
    protocol.set_latency(Duration::from_millis(500));
    let orchestrator = PipelineOrchestrator::new(PipelineSettings {
        call_timeout: Duration::from_millis(50),
        ..settings()
    });

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.error(),
        Some(PipelineError::Timeout {
            operation: "protect",
            ..
        })
    ));
    assert_eq!(orchestrator.status().stage, Stage::Terminal);
}

#[tokio::test]
async fn test_budget_exceeded_fails_dispatch() {
    let protocol = protocol();
    let orchestrator = PipelineOrchestrator::new(PipelineSettings {
        app_max_price: 1_999_999_999,
        ..settings()
    });

    let outcome = orchestrator
        .submit(&session(&protocol), buy(), &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(
        outcome.terminal,
        Terminal::Failed {
            stage: Stage::DispatchFailed,
            error: PipelineError::Dispatch(DispatchError::BudgetExceeded {
                price: 2_000_000_000,
                max: 1_999_999_999,
            }),
        }
    ));
    assert_eq!(protocol.calls(Operation::Execute).await, 0);
}

#[tokio::test]
async fn test_stale_session_is_refused() {
    let protocol = protocol();
    let session = session(&protocol);
    let orchestrator = PipelineOrchestrator::new(settings());

    let moved = session.switch_chain(1).unwrap();
    assert!(matches!(
        orchestrator.submit(&session, buy(), &CancelToken::new()).await,
        Err(PipelineError::SessionInvalid)
    ));

    moved.disconnect();
    assert!(matches!(
        orchestrator.submit(&moved, buy(), &CancelToken::new()).await,
        Err(PipelineError::SessionInvalid)
    ));
    assert_eq!(protocol.calls(Operation::RegisterAsset).await, 0);
}

fn matched_trade() -> Trade {
    Trade {
        maker: addr("a2"),
        taker: owner(),
        base_asset: "IDP".to_string(),
        quote_asset: "PYUSD".to_string(),
        base_amount: 1,
        quote_amount: 100,
        price: 100,
        nonce: 9,
    }
}

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_settlement_retries_transient_failures() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger
        .fail_next(SettlementError::Network("connection reset".to_string()))
        .await;
    ledger
        .fail_next(SettlementError::Timeout("no response".to_string()))
        .await;
    let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(5));
    let artifact = TradeSigner::from_bytes(&[3u8; 32]).attest(&matched_trade());

    let receipt = submitter.settle(&artifact).await.unwrap();
    assert_eq!(receipt.attempts, 3);
    assert_eq!(ledger.submissions().await, 3);
    assert!(ledger.settled_tx(&artifact.trade_hash).await.is_some());
}

#[tokio::test]
async fn test_settlement_gives_up_after_max_attempts() {
    let ledger = Arc::new(InMemoryLedger::new());
    for _ in 0..5 {
        ledger
            .fail_next(SettlementError::Network("down".to_string()))
            .await;
    }
    let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3));
    let artifact = TradeSigner::from_bytes(&[3u8; 32]).attest(&matched_trade());

    let err = submitter.settle(&artifact).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::SettlementFailure { attempts: 3, .. }
    ));
    assert_eq!(ledger.submissions().await, 3);
}

#[tokio::test]
async fn test_settlement_revert_is_not_retried() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger
        .fail_next(SettlementError::ChainSubmission {
            reason: "execution reverted: bad signer".to_string(),
            reverted: true,
        })
        .await;
    let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(5));
    let artifact = TradeSigner::from_bytes(&[3u8; 32]).attest(&matched_trade());

    let err = submitter.settle(&artifact).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::SettlementFailure { attempts: 1, .. }
    ));
    assert_eq!(ledger.submissions().await, 1);
}

#[tokio::test]
async fn test_trade_settles_at_most_once() {
    let ledger = Arc::new(InMemoryLedger::new());
    let artifact = TradeSigner::from_bytes(&[3u8; 32]).attest(&matched_trade());

    let first = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3));
    let receipt = first.settle(&artifact).await.unwrap();
    assert!(!receipt.already_settled);

    let again = first.settle(&artifact).await.unwrap();
    assert!(again.already_settled);
    assert_eq!(again.tx_hash, receipt.tx_hash);

    // A fresh relayer instance finds the trade on the ledger.
    let second = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3));
    let elsewhere = second.settle(&artifact).await.unwrap();
    assert!(elsewhere.already_settled);

    assert_eq!(ledger.submissions().await, 1);
}

#[tokio::test]
async fn test_settlement_refuses_foreign_signer() {
    let ledger = Arc::new(InMemoryLedger::new());
    let relayer_key = SettlementSigner::from_seed_hex(&"03".repeat(32)).unwrap();
    let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3))
        .with_trusted_signer(relayer_key.public_key_hex());

    let foreign = TradeSigner::from_bytes(&[4u8; 32]).attest(&matched_trade());
    let err = submitter.settle(&foreign).await.unwrap_err();
    assert!(matches!(err, SettlementError::UntrustedSigner { .. }));
    assert_eq!(ledger.submissions().await, 0);

    let own = relayer_key.sign(&matched_trade());
    assert_eq!(own, TradeSigner::from_bytes(&[3u8; 32]).attest(&matched_trade()));
    submitter.settle(&own).await.unwrap();
    assert_eq!(ledger.submissions().await, 1);
}
