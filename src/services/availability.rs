//! Availability calculator: pure reads over the stock counter and the
//! active reservations. Never mutates anything.
//!
//! Every predicate here uses the *effective* state of a reservation
//! (`state == active AND expires_at > now`), not the stored state alone.
//! A lapsed hold the sweeper has not flipped yet must not count against
//! availability.

use chrono::Utc;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationState};
use crate::entities::stock_item::{self, Entity as StockItemEntity};
use crate::errors::StockError;
use crate::services::catalog::{require_stock_item_on, StockItemKey};
use crate::tenant::TenantContext;

/// Sum of quantities held by effectively active reservations for one key.
pub(crate) async fn reserved_quantity_on<C: ConnectionTrait>(
    conn: &C,
    organization_id: Uuid,
    key: &StockItemKey,
) -> Result<i32, StockError> {
    let now = Utc::now();
    let mut query = ReservationEntity::find()
        .filter(reservation::Column::OrganizationId.eq(organization_id))
        .filter(reservation::Column::ProductId.eq(key.product_id))
        .filter(reservation::Column::State.eq(ReservationState::Active))
        .filter(reservation::Column::ExpiresAt.gt(now));
    query = match key.variant_id {
        Some(v) => query.filter(reservation::Column::VariantId.eq(v)),
        None => query.filter(reservation::Column::VariantId.is_null()),
    };
    query = match key.branch_id {
        Some(b) => query.filter(reservation::Column::BranchId.eq(b)),
        None => query.filter(reservation::Column::BranchId.is_null()),
    };

    let holds = query.all(conn).await.map_err(StockError::db_error)?;

    Ok(holds.iter().map(|r| r.quantity).sum())
}

/// Availability for a stock item row that has already been fetched
/// (typically under the admission-check row lock).
pub(crate) async fn available_for_item_on<C: ConnectionTrait>(
    conn: &C,
    item: &stock_item::Model,
) -> Result<i32, StockError> {
    let key = StockItemKey::from(item);
    let reserved = reserved_quantity_on(conn, item.organization_id, &key).await?;
    Ok(item.stock_on_hand - reserved)
}

/// Availability for a key on any connection. Fails with
/// `StockItemNotFound` when the catalog has no such pool.
pub(crate) async fn available_on<C: ConnectionTrait>(
    conn: &C,
    organization_id: Uuid,
    key: &StockItemKey,
) -> Result<i32, StockError> {
    let item = require_stock_item_on(conn, organization_id, key, false).await?;
    available_for_item_on(conn, &item).await
}

#[derive(Clone)]
pub struct AvailabilityService {
    db: Arc<DatabaseConnection>,
    max_bulk_items: usize,
}

impl AvailabilityService {
    pub fn new(db: Arc<DatabaseConnection>, max_bulk_items: usize) -> Self {
        Self { db, max_bulk_items }
    }

    /// How much of this product, at this branch, is sellable right now.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn available(
        &self,
        ctx: &TenantContext,
        key: &StockItemKey,
    ) -> Result<i32, StockError> {
        available_on(&*self.db, ctx.organization_id, key).await
    }

    /// Batched availability for up to `max_bulk_items` keys in one call.
    /// Duplicate keys collapse to one entry. Two queries regardless of the
    /// key count: one over the stock items, one over the active holds.
    #[instrument(skip(self, ctx, keys), fields(organization_id = %ctx.organization_id, keys = keys.len()))]
    pub async fn available_bulk(
        &self,
        ctx: &TenantContext,
        keys: &[StockItemKey],
    ) -> Result<HashMap<StockItemKey, i32>, StockError> {
        if keys.is_empty() {
            return Err(StockError::ValidationError(
                "available_bulk requires at least one item".to_string(),
            ));
        }
        if keys.len() > self.max_bulk_items {
            return Err(StockError::ValidationError(format!(
                "available_bulk accepts at most {} items, got {}",
                self.max_bulk_items,
                keys.len()
            )));
        }

        let product_ids: Vec<Uuid> = keys.iter().map(|k| k.product_id).collect();

        let items = StockItemEntity::find()
            .filter(stock_item::Column::OrganizationId.eq(ctx.organization_id))
            .filter(stock_item::Column::ProductId.is_in(product_ids.clone()))
            .all(&*self.db)
            .await
            .map_err(StockError::db_error)?;
        let on_hand: HashMap<StockItemKey, i32> = items
            .iter()
            .map(|item| (StockItemKey::from(item), item.stock_on_hand))
            .collect();

        for key in keys {
            if !on_hand.contains_key(key) {
                return Err(StockError::StockItemNotFound {
                    product_id: key.product_id,
                    branch_id: key.branch_id,
                });
            }
        }

        // Product-level fetch can return holds for pools nobody asked
        // about; they simply never match a requested key.
        let now = Utc::now();
        let holds = ReservationEntity::find()
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
            .filter(reservation::Column::ProductId.is_in(product_ids))
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .all(&*self.db)
            .await
            .map_err(StockError::db_error)?;
        let mut reserved: HashMap<StockItemKey, i32> = HashMap::new();
        for hold in &holds {
            *reserved.entry(StockItemKey::from(hold)).or_insert(0) += hold.quantity;
        }

        Ok(keys
            .iter()
            .map(|key| {
                let held = reserved.get(key).copied().unwrap_or(0);
                (*key, on_hand[key] - held)
            })
            .collect())
    }

    /// `available >= quantity`, purely derived, no side effects.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn check(
        &self,
        ctx: &TenantContext,
        key: &StockItemKey,
        quantity: i32,
    ) -> Result<bool, StockError> {
        if quantity < 1 {
            return Err(StockError::InvalidQuantity(quantity));
        }
        let available = self.available(ctx, key).await?;
        Ok(available >= quantity)
    }
}
