mod common;

use assert_matches::assert_matches;
use uuid::Uuid;

use stockcontrol::entities::ledger_entry::MovementKind;
use stockcontrol::entities::reservation::{OriginKind, ReservationState};
use stockcontrol::services::{LedgerHistoryFilter, NewMovement, ReservationFilter, StockItemKey};
use stockcontrol::StockError;

use common::{backdate_expiry, other_tenant, seed_item, setup};

#[tokio::test]
async fn hold_subtracts_from_availability_without_touching_stock() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 7, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    assert_eq!(reservation.state, ReservationState::Active);

    // Sellable drops to 3 while the counter still says 10.
    let available = env
        .engine
        .availability
        .available(&env.ctx, &key)
        .await
        .unwrap();
    assert_eq!(available, 3);
    let item = env
        .engine
        .catalog
        .get_stock_item(&env.ctx, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_on_hand, 10);

    // A second request for 5 sees only 3.
    let err = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 5, OriginKind::PosSale, None, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::InsufficientStock {
            requested: 5,
            available: 3,
            ..
        }
    );

    // Reserving the remainder works.
    env.engine
        .reservations
        .reserve(&env.ctx, key, 3, OriginKind::SalesOrder, None, None)
        .await
        .unwrap();
    let available = env
        .engine
        .availability
        .available(&env.ctx, &key)
        .await
        .unwrap();
    assert_eq!(available, 0);
}

#[tokio::test]
async fn confirm_writes_the_ledger_and_finishes_the_hold() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 7, OriginKind::PosSale, None, None)
        .await
        .unwrap();

    let entry = env
        .engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap();
    assert_eq!(entry.movement_kind, MovementKind::OutboundSale);
    assert_eq!(entry.quantity, -7);
    assert_eq!(entry.resulting_stock, 3);
    assert_eq!(
        entry.reference.as_deref(),
        Some(format!("reservation:{}", reservation.id).as_str())
    );

    let item = env
        .engine
        .catalog
        .get_stock_item(&env.ctx, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_on_hand, 3);

    // The hold no longer counts against availability.
    let available = env
        .engine
        .availability
        .available(&env.ctx, &key)
        .await
        .unwrap();
    assert_eq!(available, 3);

    let summary = env
        .engine
        .reservations
        .get_reservation(&env.ctx, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.state, ReservationState::Confirmed);
    assert!(summary.confirmed_at.is_some());

    // Confirm is not repeatable.
    let err = env
        .engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::ReservationNotActive {
            state: ReservationState::Confirmed,
            ..
        }
    );
}

#[tokio::test]
async fn confirm_kind_follows_the_origin_channel() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let appointment = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 2, OriginKind::ServiceAppointment, None, None)
        .await
        .unwrap();
    let entry = env
        .engine
        .reservations
        .confirm(&env.ctx, appointment.id)
        .await
        .unwrap();
    assert_eq!(entry.movement_kind, MovementKind::OutboundServiceUse);

    let transfer = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::Transfer, None, None)
        .await
        .unwrap();
    let entry = env
        .engine
        .reservations
        .confirm(&env.ctx, transfer.id)
        .await
        .unwrap();
    assert_eq!(entry.movement_kind, MovementKind::OutboundTransfer);
}

#[tokio::test]
async fn confirm_fails_when_stock_fell_below_the_hold() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 7, OriginKind::SalesOrder, None, None)
        .await
        .unwrap();

    // A manual adjustment bypasses holds and drops the counter below the
    // reserved quantity.
    env.engine
        .ledger
        .append(
            &env.ctx,
            NewMovement {
                key,
                kind: MovementKind::OutboundAdjustment,
                quantity: -5,
                unit_cost: None,
                reference: None,
                reason: Some("cycle count correction".to_string()),
            },
        )
        .await
        .unwrap();

    let err = env
        .engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::InsufficientStock {
            requested: 7,
            available: 5,
            ..
        }
    );

    // The failed confirmation changed nothing: the hold is still active
    // and no deduction was written.
    let summary = env
        .engine
        .reservations
        .get_reservation(&env.ctx, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.state, ReservationState::Active);
    assert!(summary.confirmed_at.is_none());

    let (_, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, LedgerHistoryFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 2);
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
async fn committed_cancel_is_never_overwritten_by_confirm() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 4, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    env.engine
        .reservations
        .cancel(&env.ctx, reservation.id)
        .await
        .unwrap();

    let err = env
        .engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::ReservationNotActive {
            state: ReservationState::Canceled,
            ..
        }
    );

    // The cancel outcome stands and the hold produced no deduction.
    let summary = env
        .engine
        .reservations
        .get_reservation(&env.ctx, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.state, ReservationState::Canceled);
    assert!(summary.canceled_at.is_some());
    assert!(summary.confirmed_at.is_none());

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
    assert_eq!(item.stock_on_hand, 10);
}

#[tokio::test]
async fn cancel_releases_the_hold_without_a_ledger_entry() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 4, OriginKind::SalesOrder, None, None)
        .await
        .unwrap();

    let canceled = env
        .engine
        .reservations
        .cancel(&env.ctx, reservation.id)
        .await
        .unwrap();
    assert_eq!(canceled.state, ReservationState::Canceled);
    assert!(canceled.canceled_at.is_some());

    let available = env
        .engine
        .availability
        .available(&env.ctx, &key)
        .await
        .unwrap();
    assert_eq!(available, 10);

    // Only the seed entry exists.
    let (_, total) = env
        .engine
        .ledger
        .history(&env.ctx, &key, LedgerHistoryFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);

    // Cancel is terminal too.
    let err = env
        .engine
        .reservations
        .cancel(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::ReservationNotActive {
            state: ReservationState::Canceled,
            ..
        }
    );
}

#[tokio::test]
async fn confirmed_holds_cannot_be_canceled() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 2, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    env.engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap();

    let err = env
        .engine
        .reservations
        .cancel(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::ReservationNotActive {
            state: ReservationState::Confirmed,
            ..
        }
    );
}

#[tokio::test]
async fn lapsed_hold_releases_availability_before_any_sweep() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 6, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    assert_eq!(
        env.engine
            .availability
            .available(&env.ctx, &key)
            .await
            .unwrap(),
        4
    );

    backdate_expiry(env.engine.db(), reservation.id, 5).await;

    // No sweep has run, the row still says active, but the hold is gone.
    assert_eq!(
        env.engine
            .availability
            .available(&env.ctx, &key)
            .await
            .unwrap(),
        10
    );

    // A lapsed hold can be neither confirmed, canceled nor extended.
    let err = env
        .engine
        .reservations
        .confirm(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        StockError::ReservationNotActive {
            state: ReservationState::Expired,
            ..
        }
    );
    let err = env
        .engine
        .reservations
        .cancel(&env.ctx, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::ReservationNotActive { .. });
    let err = env
        .engine
        .reservations
        .extend(&env.ctx, reservation.id, 10)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::ReservationNotActive { .. });
}

#[tokio::test]
async fn extend_pushes_expiry_and_enforces_the_per_call_cap() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::SalesOrder, None, Some(30))
        .await
        .unwrap();

    let extended = env
        .engine
        .reservations
        .extend(&env.ctx, reservation.id, 45)
        .await
        .unwrap();
    assert!(extended.expires_at > reservation.expires_at);

    let err = env
        .engine
        .reservations
        .extend(&env.ctx, reservation.id, 61)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidTtl(61));

    let err = env
        .engine
        .reservations
        .extend(&env.ctx, reservation.id, 0)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidTtl(0));
}

#[tokio::test]
async fn ttl_is_validated_and_clamped() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;

    let err = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::PosSale, None, Some(0))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidTtl(0));

    let err = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::PosSale, None, Some(-5))
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidTtl(-5));

    // Above the ceiling the TTL is clamped, not rejected.
    let clamped = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::PosSale, None, Some(10_000))
        .await
        .unwrap();
    let max = clamped.created_at + chrono::Duration::minutes(121);
    assert!(clamped.expires_at < max);

    let err = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 0, OriginKind::PosSale, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::InvalidQuantity(0));
}

#[tokio::test]
async fn cancel_by_origin_releases_what_it_can_and_reports_the_rest() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;
    let order_id = Uuid::new_v4();

    let active = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 2, OriginKind::SalesOrder, Some(order_id), None)
        .await
        .unwrap();
    let confirmed = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 3, OriginKind::SalesOrder, Some(order_id), None)
        .await
        .unwrap();
    env.engine
        .reservations
        .confirm(&env.ctx, confirmed.id)
        .await
        .unwrap();
    // Same origin id under a different kind is untouched.
    let unrelated = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 1, OriginKind::Transfer, Some(order_id), None)
        .await
        .unwrap();

    let result = env
        .engine
        .reservations
        .cancel_by_origin(&env.ctx, OriginKind::SalesOrder, order_id)
        .await
        .unwrap();
    assert_eq!(result.canceled, 1);
    assert_eq!(result.canceled_ids, vec![active.id]);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].id, confirmed.id);
    assert_eq!(
        result.skipped[0].effective_state,
        ReservationState::Confirmed
    );

    let untouched = env
        .engine
        .reservations
        .get_reservation(&env.ctx, unrelated.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.state, ReservationState::Active);

    // Nothing left to cancel: empty result, not an error.
    let again = env
        .engine
        .reservations
        .cancel_by_origin(&env.ctx, OriginKind::SalesOrder, order_id)
        .await
        .unwrap();
    assert_eq!(again.canceled, 0);
}

#[tokio::test]
async fn reservations_are_invisible_across_tenants() {
    let env = setup().await;
    let stranger = other_tenant(&env);
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 10).await;
    common::seed_item_for(&env, &stranger, key, 10).await;

    let reservation = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 7, OriginKind::PosSale, None, None)
        .await
        .unwrap();

    // The stranger's availability is unaffected and they cannot see or
    // mutate the hold.
    assert_eq!(
        env.engine
            .availability
            .available(&stranger, &key)
            .await
            .unwrap(),
        10
    );
    assert!(env
        .engine
        .reservations
        .get_reservation(&stranger, reservation.id)
        .await
        .unwrap()
        .is_none());
    let err = env
        .engine
        .reservations
        .cancel(&stranger, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::ReservationNotFound(_));
    let err = env
        .engine
        .reservations
        .confirm(&stranger, reservation.id)
        .await
        .unwrap_err();
    assert_matches!(err, StockError::ReservationNotFound(_));
}

#[tokio::test]
async fn listing_and_stats_reflect_reservation_lifecycles() {
    let env = setup().await;
    let key = StockItemKey::product(Uuid::new_v4());
    seed_item(&env, key, 20).await;

    let first = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 2, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    let second = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 3, OriginKind::SalesOrder, None, None)
        .await
        .unwrap();
    env.engine
        .reservations
        .cancel(&env.ctx, second.id)
        .await
        .unwrap();
    let third = env
        .engine
        .reservations
        .reserve(&env.ctx, key, 4, OriginKind::PosSale, None, None)
        .await
        .unwrap();
    backdate_expiry(env.engine.db(), third.id, 1).await;

    let (all, total) = env
        .engine
        .reservations
        .list_reservations(&env.ctx, 1, 50, ReservationFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 3);
    let lapsed = all.iter().find(|s| s.id == third.id).unwrap();
    assert_eq!(lapsed.state, ReservationState::Active);
    assert_eq!(lapsed.effective_state, ReservationState::Expired);

    let filter = ReservationFilter {
        origin_kind: Some(OriginKind::PosSale),
        ..Default::default()
    };
    let (pos, _) = env
        .engine
        .reservations
        .list_reservations(&env.ctx, 1, 50, filter)
        .await
        .unwrap();
    assert_eq!(pos.len(), 2);

    let stats = env
        .engine
        .reservations
        .reservation_stats(&env.ctx)
        .await
        .unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.expired_not_swept, 1);
    assert_eq!(stats.expiring_within_24h, 1);
    let _ = first;
}

#[tokio::test]
async fn bulk_availability_covers_multiple_pools() {
    let env = setup().await;
    let product = Uuid::new_v4();
    let branch = Uuid::new_v4();
    let org_wide = StockItemKey::product(product);
    let branched = StockItemKey::branch(product, branch);
    seed_item(&env, org_wide, 5).await;
    seed_item(&env, branched, 8).await;

    env.engine
        .reservations
        .reserve(&env.ctx, branched, 2, OriginKind::PosSale, None, None)
        .await
        .unwrap();

    let result = env
        .engine
        .availability
        .available_bulk(&env.ctx, &[org_wide, branched, org_wide])
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[&org_wide], 5);
    assert_eq!(result[&branched], 6);

    assert!(env
        .engine
        .availability
        .check(&env.ctx, &branched, 6)
        .await
        .unwrap());
    assert!(!env
        .engine
        .availability
        .check(&env.ctx, &branched, 7)
        .await
        .unwrap());

    // One unknown key fails the whole bulk lookup.
    let unknown = StockItemKey::product(Uuid::new_v4());
    let err = env
        .engine
        .availability
        .available_bulk(&env.ctx, &[org_wide, unknown])
        .await
        .unwrap_err();
    assert_matches!(err, StockError::StockItemNotFound { .. });
}
