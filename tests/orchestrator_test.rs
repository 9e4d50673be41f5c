//! End-to-end lifecycle tests against the in-memory store, with scripted
//! connector replies instead of live provider services.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use payhub::audit::AuditChain;
use payhub::discovery::StaticDirectory;
use payhub::error::{AppError, AppResult};
use payhub::invoker::{BackoffPolicy, ConnectorTransport, ResilientInvoker, TransportError};
use payhub::model::{Merchant, TransactionStatus};
use payhub::orchestrator::{
    CreatePaymentRequest, FinalizeRequest, Orchestrator, SelectionOutcome,
};
use payhub::providers::{self, parse_execution_token, ConnectorClient, PaymentInstruction};
use payhub::store::{MemoryStore, TransactionStore};
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<JsonValue, TransportError>>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Result<JsonValue, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
        })
    }
}

#[async_trait]
impl ConnectorTransport for ScriptedTransport {
    async fn post_json(
        &self,
        _url: &str,
        _body: &JsonValue,
        _timeout: Duration,
    ) -> Result<JsonValue, TransportError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
    }
}

struct Engine {
    store: Arc<MemoryStore>,
    audit: Arc<AuditChain>,
    orchestrator: Orchestrator,
}

fn engine(transport: Arc<ScriptedTransport>, services: &[(&str, &[&str])]) -> Engine {
    let store = Arc::new(MemoryStore::new());
    store.add_merchant(Merchant::with_secret("M1", "s3cret"));
    for method in ["CARD", "QR", "PAYPAL", "CRYPTO"] {
        store.subscribe("M1", method, "cred");
    }

    let mut directory = StaticDirectory::new();
    for (service, urls) in services {
        directory.insert(service, urls);
    }

    let audit = Arc::new(AuditChain::new());
    let invoker = Arc::new(ResilientInvoker::new(
        Arc::new(directory),
        transport,
        audit.clone(),
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
        },
        Duration::from_secs(5),
    ));
    let registry = Arc::new(providers::standard_registry(
        ConnectorClient::new(invoker),
        "BTC",
    ));

    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        registry,
        audit.clone(),
        "https://pay.test/checkout/{id}",
        "https://pay.test/payments/finalize",
    );
    Engine {
        store,
        audit,
        orchestrator,
    }
}

fn create_request(order: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        merchant_id: "M1".to_string(),
        merchant_secret: "s3cret".to_string(),
        merchant_order_id: order.to_string(),
        amount: BigDecimal::from_str("120.50").unwrap(),
        currency: "EUR".to_string(),
        success_url: "https://shop.test/ok".to_string(),
        failed_url: "https://shop.test/failed".to_string(),
        error_url: "https://shop.test/error".to_string(),
    }
}

const ADDR: &str = "10.0.0.9";
const CARD_SERVICES: &[(&str, &[&str])] = &[("psp-card", &["http://card-connector:8082"])];

#[tokio::test]
async fn duplicate_order_leaves_a_single_record() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);

    let first = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    assert_eq!(
        first.payment_url,
        format!("https://pay.test/checkout/{}", first.transaction_id)
    );

    let err = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateOrder { .. }));

    let stored = e.store.find_by_order("M1", "O1").await.unwrap().unwrap();
    assert_eq!(stored.id, first.transaction_id);
}

#[tokio::test]
async fn bad_merchant_secret_is_rejected() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);
    let mut request = create_request("O1");
    request.merchant_secret = "wrong".to_string();
    let err = e.orchestrator.create_payment(&request, ADDR).await.unwrap_err();
    assert!(matches!(err, AppError::Auth { .. }));
}

#[tokio::test]
async fn full_card_flow_reaches_success_and_replays_idempotently() {
    let transport = ScriptedTransport::new(vec![
        Ok(json!({
            "success": true,
            "externalId": "EXT-77",
            "redirectUrl": "https://bank.test/3ds"
        })),
        Ok(json!(true)),
    ]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let id = created.transaction_id;

    let checkout = e.orchestrator.checkout_data(&id).await.unwrap();
    assert!(checkout.available_methods.contains(&"CARD".to_string()));

    let outcome = e
        .orchestrator
        .select_provider(&id, "CARD", ADDR)
        .await
        .unwrap();
    match outcome {
        SelectionOutcome::Proceed(PaymentInstruction::Redirect { url }) => {
            assert_eq!(url, "https://bank.test/3ds");
        }
        other => panic!("expected redirect, got {:?}", other),
    }
    let stored = e.store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::WaitingForPayment);
    assert_eq!(stored.chosen_provider.as_deref(), Some("CARD"));
    assert_eq!(stored.execution_id.as_deref(), Some("EXT-77"));

    let reply = e
        .orchestrator
        .finalize(
            &FinalizeRequest {
                transaction_id: id.clone(),
                status: "SUCCESS".to_string(),
                external_transaction_id: Some("BANK-REF-1".to_string()),
                execution_id: None,
                service_timestamp: None,
            },
            ADDR,
        )
        .await
        .unwrap();
    assert_eq!(reply.status, TransactionStatus::Success);
    assert!(reply
        .redirect_url
        .starts_with("https://shop.test/ok?transactionId="));
    assert!(reply.redirect_url.ends_with("&status=SUCCESS"));

    // A late contradictory callback changes nothing.
    let replay = e
        .orchestrator
        .finalize(
            &FinalizeRequest {
                transaction_id: id.clone(),
                status: "FAILED".to_string(),
                external_transaction_id: None,
                execution_id: None,
                service_timestamp: None,
            },
            ADDR,
        )
        .await
        .unwrap();
    assert_eq!(replay.status, TransactionStatus::Success);
    assert_eq!(replay.redirect_url, reply.redirect_url);

    let stored = e.store.get(&id).await.unwrap().unwrap();
    assert_eq!(
        stored.external_transaction_id.as_deref(),
        Some("BANK-REF-1")
    );
    assert!(stored.settled_at.is_some());
}

#[tokio::test]
async fn provider_decline_fails_the_transaction() {
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "success": false,
        "declineReason": "insufficient funds"
    }))]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let outcome = e
        .orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap();

    match outcome {
        SelectionOutcome::Declined { redirect_url } => {
            assert!(redirect_url.starts_with("https://shop.test/failed?"));
        }
        other => panic!("expected decline, got {:?}", other),
    }
    let stored = e.store.get(&created.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn exhausted_retries_mark_error_never_failed() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Timeout),
        Err(TransportError::Timeout),
        Err(TransportError::Timeout),
    ]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let err = e
        .orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExhaustedRetries { attempts: 3, .. }));

    let stored = e.store.get(&created.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Error);
}

#[tokio::test]
async fn no_live_instance_leaves_transaction_created() {
    // Directory knows no services at all.
    let e = engine(ScriptedTransport::new(vec![]), &[]);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let err = e
        .orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DownstreamUnavailable { .. }));

    // The customer can come back and try again.
    let stored = e.store.get(&created.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Created);

    // Exactly one alarm for the availability gap.
    assert_eq!(e.audit.alert_count(), 1);
}

#[tokio::test]
async fn unknown_method_is_rejected_before_any_call() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);
    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let err = e
        .orchestrator
        .select_provider(&created.transaction_id, "SOFORT", ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownProvider { .. }));
}

#[tokio::test]
async fn rejections_reach_the_audit_chain() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);

    // Malformed amount: rejected after auth, with an audit record.
    let before = e.audit.event_count();
    let mut bad = create_request("O1");
    bad.amount = BigDecimal::from_str("0").unwrap();
    let err = e.orchestrator.create_payment(&bad, ADDR).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(e.audit.event_count(), before + 1);

    // Unknown method on a live transaction.
    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let before = e.audit.event_count();
    e.orchestrator
        .select_provider(&created.transaction_id, "SOFORT", ADDR)
        .await
        .unwrap_err();
    assert_eq!(e.audit.event_count(), before + 1);
}

#[tokio::test]
async fn unrecognized_finalize_token_maps_to_error() {
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "success": true,
        "externalId": "EXT-1",
        "redirectUrl": "https://bank.test/3ds"
    }))]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    e.orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap();

    let reply = e
        .orchestrator
        .finalize(
            &FinalizeRequest {
                transaction_id: created.transaction_id.clone(),
                status: "COMPLETED_MAYBE".to_string(),
                external_transaction_id: None,
                execution_id: None,
                service_timestamp: None,
            },
            ADDR,
        )
        .await
        .unwrap();
    assert_eq!(reply.status, TransactionStatus::Error);
    assert!(reply.redirect_url.starts_with("https://shop.test/error?"));
}

#[tokio::test]
async fn refused_capture_downgrades_success_to_failed() {
    let transport = ScriptedTransport::new(vec![
        Ok(json!({
            "success": true,
            "externalId": "EXT-1",
            "redirectUrl": "https://bank.test/3ds"
        })),
        Ok(json!(false)),
    ]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    e.orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap();

    let reply = e
        .orchestrator
        .finalize(
            &FinalizeRequest {
                transaction_id: created.transaction_id,
                status: "SUCCESS".to_string(),
                external_transaction_id: None,
                execution_id: None,
                service_timestamp: None,
            },
            ADDR,
        )
        .await
        .unwrap();
    assert_eq!(reply.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn crypto_selection_records_settlement_expectation() {
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "success": true,
        "address": "bc1qtestaddr",
        "expectedUnits": 210_000
    }))]);
    let e = engine(
        transport,
        &[("psp-crypto", &["http://crypto-connector:8085"])],
    );

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    let outcome = e
        .orchestrator
        .select_provider(&created.transaction_id, "CRYPTO", ADDR)
        .await
        .unwrap();
    match outcome {
        SelectionOutcome::Proceed(PaymentInstruction::QrCode { data }) => {
            assert_eq!(data, "btc:bc1qtestaddr?amount=210000");
        }
        other => panic!("expected QR instruction, got {:?}", other),
    }

    let stored = e.store.get(&created.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.settlement_address.as_deref(), Some("bc1qtestaddr"));
    assert_eq!(stored.expected_settlement_units, Some(210_000));
    assert_eq!(stored.settlement_asset.as_deref(), Some("BTC"));

    let token = stored.execution_id.unwrap();
    assert_eq!(
        parse_execution_token(&token),
        Some(("bc1qtestaddr".to_string(), 210_000))
    );
}

#[tokio::test]
async fn merchant_can_cancel_only_created_transactions() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);
    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();

    let status = e
        .orchestrator
        .cancel("M1", "s3cret", &created.transaction_id, ADDR)
        .await
        .unwrap();
    assert_eq!(status, TransactionStatus::Failed);

    let err = e
        .orchestrator
        .cancel("M1", "s3cret", &created.transaction_id, ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
}

#[tokio::test]
async fn merchant_status_poll_requires_valid_credentials() {
    let e = engine(ScriptedTransport::new(vec![]), CARD_SERVICES);
    e.orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();

    let status = e
        .orchestrator
        .status_for_order("M1", "s3cret", "O1", ADDR)
        .await
        .unwrap();
    assert_eq!(status, TransactionStatus::Created);

    let err = e
        .orchestrator
        .status_for_order("M1", "wrong", "O1", ADDR)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Auth { .. }));
}

#[tokio::test]
async fn checkout_data_is_only_available_while_created() {
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "success": true,
        "externalId": "EXT-1",
        "redirectUrl": "https://bank.test/3ds"
    }))]);
    let e = engine(transport, CARD_SERVICES);

    let created = e
        .orchestrator
        .create_payment(&create_request("O1"), ADDR)
        .await
        .unwrap();
    e.orchestrator
        .select_provider(&created.transaction_id, "CARD", ADDR)
        .await
        .unwrap();

    let err = e
        .orchestrator
        .checkout_data(&created.transaction_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
}
