//! Stock ledger: the append-only movement log and the only legal writer of
//! `stock_on_hand`.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::with_retry;
use crate::entities::ledger_entry::{self, Entity as LedgerEntryEntity, MovementKind};
use crate::entities::stock_item;
use crate::errors::StockError;
use crate::events::{Event, EventSender};
use crate::services::catalog::{require_stock_item_on, StockItemKey};
use crate::tenant::TenantContext;

lazy_static! {
    static ref STOCK_MOVEMENTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stockcontrol_ledger_movements_total",
            "Total number of ledger entries appended"
        ),
        &["movement_kind"]
    )
    .expect("metric can be created");
    static ref STOCK_MOVEMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stockcontrol_ledger_movement_failures_total",
            "Total number of rejected ledger appends"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Input for one ledger append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub key: StockItemKey,
    pub kind: MovementKind,
    /// Signed: positive for inbound kinds, negative for outbound kinds.
    pub quantity: i32,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub reason: Option<String>,
}

/// Filters for the kardex/history view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerHistoryFilter {
    pub kind: Option<MovementKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Appends one movement on an already-open connection/transaction: locks
/// the stock item row, verifies the sign and underflow rules, writes the
/// entry and moves the counter. Shared by the public `append` and by
/// reservation confirmation.
pub(crate) async fn append_on<C: ConnectionTrait>(
    conn: &C,
    organization_id: Uuid,
    actor_id: Uuid,
    movement: &NewMovement,
) -> Result<ledger_entry::Model, StockError> {
    if !movement.kind.allows_quantity(movement.quantity) {
        STOCK_MOVEMENT_FAILURES
            .with_label_values(&["invalid_direction"])
            .inc();
        return Err(StockError::InvalidMovementDirection {
            kind: movement.kind,
            quantity: movement.quantity,
        });
    }

    let item = require_stock_item_on(conn, organization_id, &movement.key, true).await?;

    let resulting_stock = item.stock_on_hand + movement.quantity;
    if resulting_stock < 0 {
        STOCK_MOVEMENT_FAILURES
            .with_label_values(&["insufficient_stock"])
            .inc();
        return Err(StockError::InsufficientStock {
            product_id: movement.key.product_id,
            branch_id: movement.key.branch_id,
            requested: -movement.quantity,
            available: item.stock_on_hand,
        });
    }

    let entry = ledger_entry::ActiveModel {
        organization_id: Set(organization_id),
        product_id: Set(movement.key.product_id),
        variant_id: Set(movement.key.variant_id),
        branch_id: Set(movement.key.branch_id),
        movement_kind: Set(movement.kind),
        quantity: Set(movement.quantity),
        resulting_stock: Set(resulting_stock),
        unit_cost: Set(movement.unit_cost),
        reference: Set(movement.reference.clone()),
        reason: Set(movement.reason.clone()),
        actor_id: Set(actor_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let entry = entry.insert(conn).await.map_err(StockError::db_error)?;

    let mut item_active: stock_item::ActiveModel = item.into();
    item_active.stock_on_hand = Set(resulting_stock);
    item_active.update(conn).await.map_err(StockError::db_error)?;

    STOCK_MOVEMENTS
        .with_label_values(&[movement.kind.to_value().as_str()])
        .inc();

    Ok(entry)
}

#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Durably records one stock movement. Runs in a single transaction
    /// that locks the stock item row, so `resulting_stock` always
    /// reconciles with the previous entry. `InsufficientStock` and
    /// `InvalidMovementDirection` are terminal: clamping or retrying them
    /// would falsify the audit trail.
    #[instrument(skip(self, ctx, movement), fields(organization_id = %ctx.organization_id, product_id = %movement.key.product_id))]
    pub async fn append(
        &self,
        ctx: &TenantContext,
        movement: NewMovement,
    ) -> Result<ledger_entry::Model, StockError> {
        let ctx = *ctx;
        let entry = with_retry("ledger_append", || {
            let movement = movement.clone();
            async move {
                self.db
                    .transaction::<_, ledger_entry::Model, StockError>(move |txn| {
                        Box::pin(async move {
                            append_on(txn, ctx.organization_id, ctx.actor_id, &movement).await
                        })
                    })
                    .await
                    .map_err(unwrap_transaction_error)
            }
        })
        .await?;

        self.emit_movement(&entry).await;

        Ok(entry)
    }

    /// Kardex view: ordered, paginated, read-only.
    #[instrument(skip(self, ctx, filter), fields(organization_id = %ctx.organization_id))]
    pub async fn history(
        &self,
        ctx: &TenantContext,
        key: &StockItemKey,
        filter: LedgerHistoryFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<ledger_entry::Model>, u64), StockError> {
        if page == 0 {
            return Err(StockError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(StockError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let mut query = LedgerEntryEntity::find()
            .filter(ledger_entry::Column::OrganizationId.eq(ctx.organization_id))
            .filter(ledger_entry::Column::ProductId.eq(key.product_id));
        query = match key.variant_id {
            Some(v) => query.filter(ledger_entry::Column::VariantId.eq(v)),
            None => query.filter(ledger_entry::Column::VariantId.is_null()),
        };
        query = match key.branch_id {
            Some(b) => query.filter(ledger_entry::Column::BranchId.eq(b)),
            None => query.filter(ledger_entry::Column::BranchId.is_null()),
        };
        if let Some(kind) = filter.kind {
            query = query.filter(ledger_entry::Column::MovementKind.eq(kind));
        }
        if let Some(from) = filter.from {
            query = query.filter(ledger_entry::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(ledger_entry::Column::CreatedAt.lte(to));
        }

        // Sequence order: the auto-increment id totally orders entries.
        let paginator = query
            .order_by_asc(ledger_entry::Column::Id)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await.map_err(StockError::db_error)?;
        let entries = paginator
            .fetch_page(page - 1)
            .await
            .map_err(StockError::db_error)?;

        Ok((entries, total))
    }

    /// Point lookup for one ledger entry.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn entry(
        &self,
        ctx: &TenantContext,
        id: i64,
    ) -> Result<Option<ledger_entry::Model>, StockError> {
        LedgerEntryEntity::find_by_id(id)
            .filter(ledger_entry::Column::OrganizationId.eq(ctx.organization_id))
            .one(&*self.db)
            .await
            .map_err(StockError::db_error)
    }

    pub(crate) async fn emit_movement(&self, entry: &ledger_entry::Model) {
        let event = Event::StockMovementRecorded {
            entry_id: entry.id,
            organization_id: entry.organization_id,
            product_id: entry.product_id,
            branch_id: entry.branch_id,
            movement_kind: entry.movement_kind,
            quantity: entry.quantity,
            resulting_stock: entry.resulting_stock,
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(entry_id = entry.id, error = %e, "Failed to emit movement event");
        }
    }
}

pub(crate) fn unwrap_transaction_error(err: TransactionError<StockError>) -> StockError {
    match err {
        TransactionError::Connection(db_err) => StockError::DatabaseError(db_err),
        TransactionError::Transaction(stock_err) => stock_err,
    }
}
