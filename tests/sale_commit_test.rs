mod common;

use common::{date, TestEngine};
use rust_decimal_macros::dec;
use rxstock::auth::{roles, Actor};
use rxstock::entities::{MovementType, PaymentMethod, SaleStatus};
use rxstock::errors::StockError;
use rxstock::events::Event;
use rxstock::services::movement_ledger::MovementFilter;
use rxstock::services::sales::{SaleLineRequest, SaleRequest};
use uuid::Uuid;

fn cashier() -> Actor {
    Actor::new(Uuid::now_v7(), "Kim", roles::CASHIER)
}

fn line(product_id: Uuid, quantity: i64, price: rust_decimal::Decimal) -> SaleLineRequest {
    SaleLineRequest {
        product_id,
        quantity,
        is_base_unit: true,
        unit_price: price,
    }
}

#[tokio::test]
async fn committed_sale_updates_every_derived_collection() {
    let t = TestEngine::new();
    let p1 = t.seed_product("Paracetamol 500mg", 1).await;
    t.seed_batch(p1.id, 30, date(2025, 1, 1)).await;
    let p2 = t.seed_product("Cough syrup", 1).await;
    t.seed_batch(p2.id, 12, date(2025, 3, 1)).await;

    let sale = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(p1.id, 10, dec!(0.80)), line(p2.id, 2, dec!(6.50))],
                payment_method: PaymentMethod::Card,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap();

    assert_eq!(sale.total, dec!(21.00));

    // Batches decremented.
    assert_eq!(t.engine.batches().total_stock(p1.id).await.unwrap(), 20);
    assert_eq!(t.engine.batches().total_stock(p2.id).await.unwrap(), 10);

    // Product aggregates recomputed from batches.
    assert_eq!(t.engine.products().require(p1.id).await.unwrap().stock, 20);
    assert_eq!(t.engine.products().require(p2.id).await.unwrap().stock, 10);

    // Sale, register entry, and one approved Sale movement per line.
    assert_eq!(t.engine.sales().list_sales().await.unwrap().len(), 1);
    let register = t.engine.sales().register_entries().await.unwrap();
    assert_eq!(register.len(), 1);
    assert_eq!(register[0].amount, dec!(21.00));

    let movements = t
        .engine
        .movements()
        .history(MovementFilter {
            movement_type: Some(MovementType::Sale),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(movements.len(), 2);
    assert!(movements.iter().all(|m| m.transaction_id == Some(sale.id)));
}

#[tokio::test]
async fn failing_line_unwinds_all_earlier_lines() {
    let mut t = TestEngine::new();
    let p1 = t.seed_product("Paracetamol 500mg", 1).await;
    t.seed_batch(p1.id, 30, date(2025, 1, 1)).await;
    let p2 = t.seed_product("Cough syrup", 1).await;
    t.seed_batch(p2.id, 1, date(2025, 3, 1)).await;

    let err = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(p1.id, 10, dec!(0.80)), line(p2.id, 5, dec!(6.50))],
                payment_method: PaymentMethod::Cash,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap_err();

    match err {
        StockError::InsufficientStock { product_id, .. } => assert_eq!(product_id, p2.id),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Everything is exactly as before the attempt.
    assert_eq!(t.engine.batches().total_stock(p1.id).await.unwrap(), 30);
    assert_eq!(t.engine.batches().total_stock(p2.id).await.unwrap(), 1);
    assert!(t.engine.sales().list_sales().await.unwrap().is_empty());
    assert!(t.engine.sales().register_entries().await.unwrap().is_empty());
    assert!(t
        .engine
        .movements()
        .history(Default::default())
        .await
        .unwrap()
        .is_empty());

    // The rollback names the line that sank the sale.
    let events = t.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::SaleRolledBack { failed_line: 1, product_id, .. } if *product_id == p2.id
    )));
}

#[tokio::test]
async fn pack_lines_convert_through_the_catalog() {
    let t = TestEngine::new();
    let product = t.seed_product("Amoxicillin 500mg", 12).await;
    t.seed_batch(product.id, 60, date(2025, 1, 1)).await;

    let sale = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![SaleLineRequest {
                    product_id: product.id,
                    quantity: 2,
                    is_base_unit: false,
                    unit_price: dec!(30.00),
                }],
                payment_method: PaymentMethod::Mobile,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap();

    // 2 packs of 12, priced per pack.
    assert_eq!(sale.lines[0].units, 24);
    assert_eq!(sale.total, dec!(60.00));
    assert_eq!(t.engine.batches().total_stock(product.id).await.unwrap(), 36);
}

#[tokio::test]
async fn deferred_sale_moves_stock_but_not_the_register() {
    let t = TestEngine::new();
    let product = t.seed_product("Insulin 10ml", 1).await;
    t.seed_batch(product.id, 10, date(2025, 1, 1)).await;

    let sale = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(product.id, 3, dec!(40.00))],
                payment_method: PaymentMethod::OnAccount,
                status: SaleStatus::Pending,
            },
            &cashier(),
        )
        .await
        .unwrap();

    assert_eq!(sale.status, SaleStatus::Pending);
    assert_eq!(t.engine.batches().total_stock(product.id).await.unwrap(), 7);
    assert!(t.engine.sales().register_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_register_write_unwinds_the_whole_sale() {
    let (t, store) = TestEngine::faulty();
    let product = t.seed_product("Paracetamol 500mg", 1).await;
    t.seed_batch(product.id, 20, date(2025, 1, 1)).await;

    store.fail_put("register_entries", 0);
    let err = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(product.id, 5, dec!(1.50))],
                payment_method: PaymentMethod::Cash,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap_err();

    // Compensation succeeded, so the substrate error surfaces as-is.
    assert!(matches!(err, StockError::Store(_)));

    // Stock, aggregate and every derived collection are back to square one.
    assert_eq!(t.engine.batches().total_stock(product.id).await.unwrap(), 20);
    assert_eq!(t.engine.products().require(product.id).await.unwrap().stock, 20);
    assert!(t.engine.sales().list_sales().await.unwrap().is_empty());
    assert!(t.engine.sales().register_entries().await.unwrap().is_empty());
    assert!(t
        .engine
        .movements()
        .history(Default::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn failed_compensation_surfaces_partial_commit() {
    let (t, store) = TestEngine::faulty();
    let product = t.seed_product("Paracetamol 500mg", 1).await;
    t.seed_batch(product.id, 20, date(2025, 1, 1)).await;

    // The register write sinks the commit; the sale-collection write during
    // the unwind (its second put) fails too, stranding the sale row.
    store.fail_put("register_entries", 0);
    store.fail_put("sales", 1);
    let err = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(product.id, 5, dec!(1.50))],
                payment_method: PaymentMethod::Cash,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StockError::PartialCommit(_)));
    // The orphaned sale row is still there for operators to reconcile.
    assert_eq!(t.engine.sales().list_sales().await.unwrap().len(), 1);
}

#[tokio::test]
async fn sale_allocations_follow_fefo_per_line() {
    let t = TestEngine::new();
    let product = t.seed_product("Vitamin C", 1).await;
    let later = t.seed_batch(product.id, 10, date(2025, 6, 1)).await;
    let sooner = t.seed_batch(product.id, 4, date(2025, 1, 1)).await;

    let sale = t
        .engine
        .sales()
        .commit_sale(
            SaleRequest {
                lines: vec![line(product.id, 6, dec!(1.00))],
                payment_method: PaymentMethod::Cash,
                status: SaleStatus::Completed,
            },
            &cashier(),
        )
        .await
        .unwrap();

    let allocations = &sale.lines[0].allocations;
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].batch_id, sooner.id);
    assert_eq!(allocations[0].quantity, 4);
    assert_eq!(allocations[1].batch_id, later.id);
    assert_eq!(allocations[1].quantity, 2);
}
