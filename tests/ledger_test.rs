mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use stockcontrol::entities::ledger_entry::MovementKind;
use stockcontrol::services::{LedgerHistoryFilter, NewMovement, StockItemKey};
use stockcontrol::StockError;

use common::{seed_item, setup};

fn movement(key: StockItemKey, kind: MovementKind, quantity: i32) -> NewMovement {
    NewMovement {
        key,
        kind,
        quantity,
        unit_cost: None,
        reference: None,
        reason: None,
    }
}

#[tokio::test]
async fn resulting_stock_reconciles_across_appends() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 0).await;

    let steps = [
        (MovementKind::InboundPurchase, 10),
        (MovementKind::OutboundSale, -3),
        (MovementKind::InboundReturn, 2),
        (MovementKind::OutboundShrinkage, -1),
    ];
    for (kind, quantity) in steps {
        env.engine
            .ledger
            .append(&env.ctx, movement(key, kind, quantity))
            .await
            .unwrap();
    }

    let (entries, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, LedgerHistoryFilter::default(), 1, 100)
        .await
        .unwrap();
    assert_eq!(total, 4);

    let mut previous = 0;
    for entry in &entries {
        assert_eq!(entry.resulting_stock, previous + entry.quantity);
        previous = entry.resulting_stock;
    }
    assert_eq!(previous, 8);

    let item = env
        .engine
        .catalog
        .get_stock_item(&env.ctx, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_on_hand, 8);
}

#[tokio::test]
async fn outbound_below_zero_is_rejected_and_leaves_no_trace() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 5).await;

    let err = env
        .engine
        .ledger
        .append(&env.ctx, movement(key, MovementKind::OutboundSale, -6))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::InsufficientStock {
            requested: 6,
            available: 5,
            ..
        }
    );

    // Failed append writes nothing.
    let (_, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, LedgerHistoryFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);

    let item = env
        .engine
        .catalog
        .get_stock_item(&env.ctx, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_on_hand, 5);
}

#[tokio::test]
async fn quantity_sign_must_match_kind() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 5).await;

    let err = env
        .engine
        .ledger
        .append(&env.ctx, movement(key, MovementKind::OutboundSale, 3))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidMovementDirection { quantity: 3, .. });

    let err = env
        .engine
        .ledger
        .append(&env.ctx, movement(key, MovementKind::InboundPurchase, -3))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidMovementDirection { .. });

    let err = env
        .engine
        .ledger
        .append(&env.ctx, movement(key, MovementKind::InboundAdjustment, 0))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidMovementDirection { quantity: 0, .. });
}

#[tokio::test]
async fn append_against_unknown_item_fails() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());

    let err = env
        .engine
        .ledger
        .append(&env.ctx, movement(key, MovementKind::InboundPurchase, 1))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::StockItemNotFound { .. });
}

#[tokio::test]
async fn history_filters_by_kind_and_pages_in_sequence_order() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 0).await;

    for _ in 0..3 {
        env.engine
            .ledger
            .append(&env.ctx, movement(key, MovementKind::InboundPurchase, 4))
            .await
            .unwrap();
        env.engine
            .ledger
            .append(&env.ctx, movement(key, MovementKind::OutboundSale, -1))
            .await
            .unwrap();
    }

    let filter = LedgerHistoryFilter {
        kind: Some(MovementKind::OutboundSale),
        ..Default::default()
    };
    let (sales, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, filter, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert!(sales.iter().all(|e| e.movement_kind == MovementKind::OutboundSale));

    // First page of two, ascending by sequence.
    let (page, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, LedgerHistoryFilter::default(), 1, 2)
        .await
        .unwrap();
    assert_eq!(total, 6);
    assert_eq!(page.len(), 2);
    assert!(page[0].id < page[1].id);
}

#[tokio::test]
async fn entry_lookup_is_tenant_scoped() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 0).await;

    let entry = env
        .engine
        .ledger
        .append(
            &env.ctx,
            NewMovement {
                key,
                kind: MovementKind::InboundPurchase,
                quantity: 5,
                unit_cost: Some(dec!(12.5000)),
                reference: Some("po:1001".to_string()),
                reason: None,
            },
        )
        .await
        .unwrap();

    let found = env.engine.ledger.entry(&env.ctx, entry.id).await.unwrap();
    assert_eq!(found.as_ref().map(|e| e.id), Some(entry.id));
    assert_eq!(found.as_ref().and_then(|e| e.unit_cost), Some(dec!(12.5000)));

    let stranger = common::other_tenant(&env);
    let hidden = env.engine.ledger.entry(&stranger, entry.id).await.unwrap();
    assert!(hidden.is_none());
}

#[tokio::test]
async fn ledger_is_isolated_between_tenants() {
    let env = setup().await;
    let stranger = common::other_tenant(&env);
    let product_id = Uuid::new_v4();
    let key = StockItemKey::product(product_id);

    seed_item(&env, key, 10).await;
    common::seed_item_for(&env, &stranger, key, 3).await;

    let mine = env
        .engine
        .availability
        .available(&env.ctx, &key)
        .await
        .unwrap();
    let theirs = env
        .engine
        .availability
        .available(&stranger, &key)
        .await
        .unwrap();
    assert_eq!(mine, 10);
    assert_eq!(theirs, 3);
}
