use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use sea_orm::Iterable;
use uuid::Uuid;

use stockcontrol::entities::ledger_entry::{MovementDirection, MovementKind};
use stockcontrol::entities::reservation::{self, OriginKind, ReservationState};
use stockcontrol::services::StockItemKey;

fn any_kind() -> impl Strategy<Value = MovementKind> {
    prop::sample::select(MovementKind::iter().collect::<Vec<_>>())
}

fn any_state() -> impl Strategy<Value = ReservationState> {
    prop::sample::select(ReservationState::iter().collect::<Vec<_>>())
}

fn any_key() -> impl Strategy<Value = StockItemKey> {
    (any::<u128>(), any::<Option<u128>>(), any::<Option<u128>>()).prop_map(|(p, v, b)| {
        StockItemKey {
            product_id: Uuid::from_u128(p),
            variant_id: v.map(Uuid::from_u128),
            branch_id: b.map(Uuid::from_u128),
        }
    })
}

proptest! {
    // A quantity is legal for exactly one direction, and zero for none.
    #[test]
    fn quantity_legality_matches_direction(kind in any_kind(), quantity in any::<i32>()) {
        let legal = kind.allows_quantity(quantity);
        match kind.direction() {
            MovementDirection::Inbound => prop_assert_eq!(legal, quantity > 0),
            MovementDirection::Outbound => prop_assert_eq!(legal, quantity < 0),
        }
    }

    // Only an active row can change meaning with the clock; terminal rows
    // read the same at any instant.
    #[test]
    fn effective_state_only_reinterprets_active_rows(
        state in any_state(),
        offset_minutes in -10_000i64..10_000,
    ) {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).single().expect("valid timestamp");
        let model = reservation::Model {
            id: Uuid::nil(),
            organization_id: Uuid::nil(),
            product_id: Uuid::nil(),
            variant_id: None,
            branch_id: None,
            quantity: 1,
            origin_kind: OriginKind::PosSale,
            origin_id: None,
            state,
            expires_at: now + Duration::minutes(offset_minutes),
            created_at: now - Duration::hours(1),
            confirmed_at: None,
            canceled_at: None,
            updated_at: None,
        };
        let effective = model.effective_state(now);
        match state {
            ReservationState::Active if offset_minutes <= 0 => {
                prop_assert_eq!(effective, ReservationState::Expired)
            }
            other => {
                // Unexpired active stays active; terminal stays itself.
                let expected = if other == ReservationState::Active {
                    ReservationState::Active
                } else {
                    other
                };
                prop_assert_eq!(effective, expected)
            }
        }
    }

    // The lock-acquisition order must be total and antisymmetric so two
    // batches can never order the same pair of keys differently.
    #[test]
    fn key_ordering_is_a_total_order(a in any_key(), b in any_key(), c in any_key()) {
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
        prop_assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }
}
