//! End-to-end tests of the transaction coordinators over an in-memory
//! database: finalization, compensation, cancellation idempotence, register
//! reconciliation and the stock-fold invariant.

use chrono::Utc;
use uuid::Uuid;

use varejo_core::{
    CartLine, CoreError, MovementCategory, MovementType, Payment, PaymentMethod, PaymentStatus,
    Product, SaleStatus, StockReason,
};
use varejo_db::{Database, DbConfig};
use varejo_engine::{CheckoutRequest, DraftRequest, Engine, EngineError};

// =============================================================================
// Harness
// =============================================================================

async fn engine() -> Engine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Engine::new(db)
}

/// Inserts a product and brings `stock` on hand through the ledger.
async fn seed_product(engine: &Engine, sku: &str, stock: i64, minimum: i64) -> String {
    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        price_cents: 1000,
        stock_quantity: 0,
        minimum_stock_level: minimum,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    engine.db().products().insert(&product).await.unwrap();

    if stock > 0 {
        engine
            .stock()
            .adjust(&product.id, stock, StockReason::Purchase, None)
            .await
            .unwrap();
    }

    product.id
}

async fn open_session(engine: &Engine, operator: &str, opening_cents: i64) -> String {
    engine
        .register()
        .open(operator, opening_cents)
        .await
        .unwrap()
        .id
}

fn cash(amount_cents: i64) -> Vec<Payment> {
    vec![Payment {
        method: PaymentMethod::Cash,
        amount_cents,
    }]
}

fn checkout_request(
    product_id: &str,
    quantity: i64,
    unit_price_cents: i64,
    session_id: &str,
    payments: Vec<Payment>,
) -> CheckoutRequest {
    CheckoutRequest {
        lines: vec![CartLine::new(product_id, quantity, unit_price_cents)],
        discount_cents: 0,
        delivery_fee_cents: 0,
        client_id: None,
        session_id: Some(session_id.to_string()),
        payments,
    }
}

/// The core invariant: the materialized quantity always equals the fold of
/// the adjustment log.
async fn assert_fold_invariant(engine: &Engine, product_id: &str) {
    let fold = engine.db().stock().fold(product_id).await.unwrap();
    let product = engine
        .db()
        .products()
        .get_by_id(product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        fold, product.stock_quantity,
        "stock_quantity must equal the adjustment fold"
    );
}

// =============================================================================
// Finalization
// =============================================================================

#[tokio::test]
async fn finalize_decrements_stock_and_records_cash() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "COKE-330", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    // stock=10, sell qty=2 at 10.00 paid with cash 20.00
    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(2000)))
        .await
        .unwrap();

    assert_eq!(sale.status, SaleStatus::Completed);
    assert_eq!(sale.payment_status, PaymentStatus::Paid);
    assert_eq!(sale.total_cents, 2000);
    assert!(sale.completed_at.is_some());

    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 8);

    let movements = engine.db().cash().movements_for_sale(&sale.id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Entrada);
    assert_eq!(movements[0].category, MovementCategory::Venda);
    assert_eq!(movements[0].amount_cents, 2000);

    // Completed sale ⇒ Σ entrada == total
    let entrada = engine
        .db()
        .cash()
        .entrada_total_for_sale(&sale.id)
        .await
        .unwrap();
    assert_eq!(entrada, sale.total_cents);

    assert_fold_invariant(&engine, &product_id).await;
}

#[tokio::test]
async fn finalize_split_tender_records_one_movement_per_payment() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "SPLIT-1", 5, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let payments = vec![
        Payment {
            method: PaymentMethod::Cash,
            amount_cents: 500,
        },
        Payment {
            method: PaymentMethod::Card,
            amount_cents: 1500,
        },
    ];

    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, payments))
        .await
        .unwrap();

    let movements = engine.db().cash().movements_for_sale(&sale.id).await.unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(
        movements.iter().map(|m| m.amount_cents).sum::<i64>(),
        2000
    );
}

#[tokio::test]
async fn finalize_insufficient_stock_persists_nothing() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "LAST-1", 1, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    // stock=1, attempt qty=2
    let err = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(2000)))
        .await
        .unwrap_err();

    match err {
        EngineError::InsufficientStock {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Stock untouched, no sale, no movements
    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 1);

    let sales = engine.db().sales().list_by_session(&session_id).await.unwrap();
    assert!(sales.is_empty());

    let movements = engine
        .db()
        .cash()
        .movements_for_session(&session_id)
        .await
        .unwrap();
    assert!(movements.is_empty());

    assert_fold_invariant(&engine, &product_id).await;
}

#[tokio::test]
async fn finalize_compensates_earlier_items_when_a_later_one_fails() {
    let engine = engine().await;
    let plenty = seed_product(&engine, "PLENTY-1", 10, 0).await;
    let scarce = seed_product(&engine, "SCARCE-1", 1, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let request = CheckoutRequest {
        lines: vec![
            CartLine::new(&plenty, 3, 1000),
            CartLine::new(&scarce, 2, 500),
        ],
        discount_cents: 0,
        delivery_fee_cents: 0,
        client_id: None,
        session_id: Some(session_id.clone()),
        payments: cash(4000),
    };

    let err = engine.checkout().finalize(&request).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { .. }));

    // The first item's decrement was rolled back via sale_reversal
    let plenty_row = engine.db().products().get_by_id(&plenty).await.unwrap().unwrap();
    assert_eq!(plenty_row.stock_quantity, 10);
    let scarce_row = engine.db().products().get_by_id(&scarce).await.unwrap().unwrap();
    assert_eq!(scarce_row.stock_quantity, 1);

    // Compensation is auditable: the ledger keeps the paired rows
    let history = engine.db().stock().history(&plenty).await.unwrap();
    let reasons: Vec<StockReason> = history.iter().map(|a| a.reason).collect();
    assert_eq!(
        reasons,
        vec![
            StockReason::Purchase,
            StockReason::Sale,
            StockReason::SaleReversal
        ]
    );

    // Sale header is gone
    let sales = engine.db().sales().list_by_session(&session_id).await.unwrap();
    assert!(sales.is_empty());

    assert_fold_invariant(&engine, &plenty).await;
    assert_fold_invariant(&engine, &scarce).await;
}

#[tokio::test]
async fn finalize_rejects_payment_mismatch_before_persisting() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "PAY-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let err = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(1500)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Core(CoreError::PaymentMismatch {
            expected_cents: 2000,
            received_cents: 1500,
        })
    ));

    let sales = engine.db().sales().list_by_session(&session_id).await.unwrap();
    assert!(sales.is_empty());
    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 10);
}

#[tokio::test]
async fn finalize_requires_an_open_register() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "REG-1", 10, 0).await;

    // No session at all
    let mut request = checkout_request(&product_id, 1, 1000, "ignored", cash(1000));
    request.session_id = None;
    let err = engine.checkout().finalize(&request).await.unwrap_err();
    assert!(matches!(err, EngineError::NoOpenRegister));

    // Closed session
    let session_id = open_session(&engine, "op-1", 0).await;
    engine.register().close(&session_id, 0).await.unwrap();

    let err = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 1, 1000, &session_id, cash(1000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed { .. }));
}

#[tokio::test]
async fn finalize_rejects_invalid_cart() {
    let engine = engine().await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let request = CheckoutRequest {
        lines: vec![],
        discount_cents: 0,
        delivery_fee_cents: 0,
        client_id: None,
        session_id: Some(session_id),
        payments: vec![],
    };

    let err = engine.checkout().finalize(&request).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Core(CoreError::InvalidCart { .. })
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn concurrent_finalizations_never_overdraw() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "RACE-1", 5, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        let product_id = product_id.clone();
        let session_id = session_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .checkout()
                .finalize(&checkout_request(&product_id, 1, 1000, &session_id, cash(1000)))
                .await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::InsufficientStock { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    // Exactly the available stock was sold, never more
    assert_eq!(succeeded, 5);
    assert_eq!(insufficient, 5);

    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 0);

    assert_fold_invariant(&engine, &product_id).await;
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancel_round_trip_restores_stock_and_balance() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "RT-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 10000).await;

    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(2000)))
        .await
        .unwrap();

    engine
        .cancellation()
        .cancel(&sale.id, "customer returned items")
        .await
        .unwrap();

    // Stock restored exactly
    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 10);

    // Sale is terminal
    let sale = engine.db().sales().get_by_id(&sale.id).await.unwrap().unwrap();
    assert_eq!(sale.status, SaleStatus::Cancelled);
    assert_eq!(sale.payment_status, PaymentStatus::Refunded);
    assert!(sale.cancelled_at.is_some());

    // The entrada was offset, not deleted: two movements, net zero
    let movements = engine.db().cash().movements_for_sale(&sale.id).await.unwrap();
    assert_eq!(movements.len(), 2);
    let net: i64 = movements.iter().map(|m| m.signed_amount().cents()).sum();
    assert_eq!(net, 0);
    assert!(movements
        .iter()
        .any(|m| m.category == MovementCategory::VendaCancelada
            && m.movement_type == MovementType::Saida
            && m.amount_cents == 2000));

    // Register balance back to its pre-sale value
    let entradas = engine
        .db()
        .cash()
        .sum_movements(&session_id, MovementType::Entrada)
        .await
        .unwrap();
    let saidas = engine
        .db()
        .cash()
        .sum_movements(&session_id, MovementType::Saida)
        .await
        .unwrap();
    assert_eq!(entradas - saidas, 0);

    assert_fold_invariant(&engine, &product_id).await;
}

#[tokio::test]
async fn cancel_twice_is_a_noop() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "TWICE-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(2000)))
        .await
        .unwrap();

    engine.cancellation().cancel(&sale.id, "first").await.unwrap();

    let err = engine
        .cancellation()
        .cancel(&sale.id, "second")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyCancelled { .. }));

    // Exactly one restoration and one offsetting entry
    let history = engine
        .db()
        .stock()
        .history_for_reference(&sale.id)
        .await
        .unwrap();
    let reversals = history
        .iter()
        .filter(|a| a.reason == StockReason::SaleReversal)
        .count();
    assert_eq!(reversals, 1);

    let movements = engine.db().cash().movements_for_sale(&sale.id).await.unwrap();
    let offsets = movements
        .iter()
        .filter(|m| m.category == MovementCategory::VendaCancelada)
        .count();
    assert_eq!(offsets, 1);

    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 10);
}

#[tokio::test]
async fn cancel_rejects_non_completed_sales() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "DRAFT-1", 10, 0).await;

    let draft = engine
        .checkout()
        .save_draft(&DraftRequest {
            lines: vec![CartLine::new(&product_id, 1, 1000)],
            discount_cents: 0,
            delivery_fee_cents: 0,
            client_id: None,
        })
        .await
        .unwrap();

    let err = engine
        .cancellation()
        .cancel(&draft.id, "should fail")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStateTransition {
            status: SaleStatus::Pending,
            ..
        }
    ));

    let err = engine.cancellation().cancel("missing", "nope").await.unwrap_err();
    assert!(matches!(err, EngineError::SaleNotFound(_)));
}

#[tokio::test]
async fn cancel_fails_when_the_sales_session_is_closed() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "CLOSED-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 1, 1000, &session_id, cash(1000)))
        .await
        .unwrap();

    engine.register().close(&session_id, 1000).await.unwrap();

    let err = engine
        .cancellation()
        .cancel(&sale.id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed { .. }));

    // Nothing was mutated
    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 9);
    let sale = engine.db().sales().get_by_id(&sale.id).await.unwrap().unwrap();
    assert_eq!(sale.status, SaleStatus::Completed);
}

// =============================================================================
// Register sessions
// =============================================================================

#[tokio::test]
async fn close_reconciles_expected_and_difference() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "ZREP-1", 10, 0).await;

    // opening 100.00, one entrada of 50.00, one saida of 10.00, counted 140.00
    let session_id = open_session(&engine, "op-1", 10000).await;

    engine
        .checkout()
        .finalize(&checkout_request(&product_id, 5, 1000, &session_id, cash(5000)))
        .await
        .unwrap();

    engine
        .register()
        .withdraw(&session_id, 1000, Some("troco para o caixa 2"))
        .await
        .unwrap();

    let closed = engine.register().close(&session_id, 14000).await.unwrap();
    assert_eq!(closed.expected_balance_cents, Some(14000));
    assert_eq!(closed.difference_cents, Some(0));
    assert_eq!(closed.closing_balance_cents, Some(14000));
    assert!(closed.closed_at.is_some());
}

#[tokio::test]
async fn close_reports_shortage() {
    let engine = engine().await;
    let session_id = open_session(&engine, "op-1", 10000).await;

    engine
        .register()
        .supply(&session_id, 2000, Some("fundo de troco"))
        .await
        .unwrap();

    // expected 120.00, counted 115.00 → short 5.00
    let closed = engine.register().close(&session_id, 11500).await.unwrap();
    assert_eq!(closed.expected_balance_cents, Some(12000));
    assert_eq!(closed.difference_cents, Some(-500));
}

#[tokio::test]
async fn closed_session_accepts_no_movements() {
    let engine = engine().await;
    let session_id = open_session(&engine, "op-1", 0).await;
    engine.register().close(&session_id, 0).await.unwrap();

    let err = engine
        .register()
        .withdraw(&session_id, 500, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed { .. }));

    let err = engine.register().close(&session_id, 0).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed { .. }));
}

#[tokio::test]
async fn one_open_session_per_operator() {
    let engine = engine().await;
    open_session(&engine, "op-1", 0).await;

    let err = engine.register().open("op-1", 5000).await.unwrap_err();
    assert!(matches!(err, EngineError::RegisterAlreadyOpen { .. }));

    // After closing, the operator can open a new shift
    let open = engine.register().find_open("op-1").await.unwrap().unwrap();
    engine.register().close(&open.id, 0).await.unwrap();
    engine.register().open("op-1", 0).await.unwrap();
}

// =============================================================================
// Drafts
// =============================================================================

#[tokio::test]
async fn draft_lifecycle_save_suspend_resume_finalize() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "LIFE-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let draft = engine
        .checkout()
        .save_draft(&DraftRequest {
            lines: vec![CartLine::new(&product_id, 3, 1000)],
            discount_cents: 500,
            delivery_fee_cents: 0,
            client_id: Some("client-9".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(draft.status, SaleStatus::Pending);
    assert_eq!(draft.total_cents, 2500);

    // No effects yet
    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 10);

    engine.checkout().suspend(&draft.id).await.unwrap();
    engine.checkout().resume(&draft.id).await.unwrap();

    let sale = engine
        .checkout()
        .finalize_draft(&draft.id, &session_id, &cash(2500))
        .await
        .unwrap();
    assert_eq!(sale.status, SaleStatus::Completed);
    assert_eq!(sale.cash_register_session_id.as_deref(), Some(session_id.as_str()));

    let product = engine
        .db()
        .products()
        .get_by_id(&product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.stock_quantity, 7);
}

#[tokio::test]
async fn discard_deletes_drafts_but_not_completed_sales() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "DISC-1", 10, 0).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let draft = engine
        .checkout()
        .save_draft(&DraftRequest {
            lines: vec![CartLine::new(&product_id, 1, 1000)],
            discount_cents: 0,
            delivery_fee_cents: 0,
            client_id: None,
        })
        .await
        .unwrap();

    engine.checkout().discard(&draft.id).await.unwrap();
    assert!(engine
        .db()
        .sales()
        .get_by_id(&draft.id)
        .await
        .unwrap()
        .is_none());

    let sale = engine
        .checkout()
        .finalize(&checkout_request(&product_id, 1, 1000, &session_id, cash(1000)))
        .await
        .unwrap();

    let err = engine.checkout().discard(&sale.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStateTransition {
            status: SaleStatus::Completed,
            ..
        }
    ));
}

// =============================================================================
// Low stock alerts
// =============================================================================

#[tokio::test]
async fn low_stock_alert_fires_after_commit() {
    let engine = engine().await;
    let product_id = seed_product(&engine, "ALERT-1", 5, 3).await;
    let session_id = open_session(&engine, "op-1", 0).await;

    let mut alerts = engine.subscribe_low_stock();

    // 5 → 3 hits the minimum level
    engine
        .checkout()
        .finalize(&checkout_request(&product_id, 2, 1000, &session_id, cash(2000)))
        .await
        .unwrap();

    let alert = alerts.recv().await.unwrap();
    assert_eq!(alert.product_id, product_id);
    assert_eq!(alert.quantity, 3);
    assert_eq!(alert.minimum_stock_level, 3);
}
