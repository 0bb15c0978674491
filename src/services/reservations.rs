//! Reservation manager: grants, confirms, cancels, extends and reports on
//! time-boxed holds. Admission checks and confirmations run inside one
//! store transaction per call, with stock item rows locked in a stable
//! order, so concurrent callers can never jointly over-commit stock.

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ReservationSettings;
use crate::db::with_retry;
use crate::entities::ledger_entry::{self, MovementKind};
use crate::entities::reservation::{
    self, Entity as ReservationEntity, OriginKind, ReservationState,
};
use crate::errors::{BatchFailure, StockError};
use crate::events::{Event, EventSender};
use crate::services::availability::available_for_item_on;
use crate::services::catalog::{require_stock_item_on, StockItemKey};
use crate::services::ledger::{append_on, unwrap_transaction_error, NewMovement};
use crate::tenant::TenantContext;

lazy_static! {
    static ref RESERVATIONS_GRANTED: IntCounter = IntCounter::new(
        "stockcontrol_reservations_granted_total",
        "Total number of reservations granted"
    )
    .expect("metric can be created");
    static ref RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stockcontrol_reservation_failures_total",
            "Total number of failed reservation operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    static ref RESERVATIONS_CONFIRMED: IntCounter = IntCounter::new(
        "stockcontrol_reservations_confirmed_total",
        "Total number of reservations confirmed into the ledger"
    )
    .expect("metric can be created");
}

/// One line of a batch reservation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub key: StockItemKey,
    pub quantity: i32,
}

/// Summary of a reservation for callers and reporting, with the derived
/// expiry flag so dashboards never have to re-derive effective state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSummary {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub quantity: i32,
    pub state: ReservationState,
    pub effective_state: ReservationState,
    pub origin_kind: OriginKind,
    pub origin_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<reservation::Model> for ReservationSummary {
    fn from(model: reservation::Model) -> Self {
        let effective_state = model.effective_state(Utc::now());
        Self {
            id: model.id,
            product_id: model.product_id,
            variant_id: model.variant_id,
            branch_id: model.branch_id,
            quantity: model.quantity,
            state: model.state,
            effective_state,
            origin_kind: model.origin_kind,
            origin_id: model.origin_id,
            expires_at: model.expires_at,
            created_at: model.created_at,
            confirmed_at: model.confirmed_at,
            canceled_at: model.canceled_at,
        }
    }
}

/// Outcome of `cancel_by_origin`. Best-effort by design: reservations that
/// were already terminal are reported, not treated as a hard error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelByOriginResult {
    pub canceled: u64,
    pub canceled_ids: Vec<Uuid>,
    pub skipped: Vec<SkippedCancellation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCancellation {
    pub id: Uuid,
    pub effective_state: ReservationState,
}

/// Counts for reservation dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationStats {
    pub total: u64,
    pub active: u64,
    /// Lapsed holds the sweeper has not materialized yet. Non-zero values
    /// here are normal between sweep passes.
    pub expired_not_swept: u64,
    pub expiring_within_24h: u64,
    pub stats_at: DateTime<Utc>,
}

/// Optional filters for `list_reservations`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub state: Option<ReservationState>,
    pub product_id: Option<Uuid>,
    pub origin_kind: Option<OriginKind>,
    pub include_expired: bool,
}

/// Ledger movement kind used when a reservation from this channel is
/// confirmed.
fn outbound_kind(origin: OriginKind) -> MovementKind {
    match origin {
        OriginKind::PosSale | OriginKind::SalesOrder => MovementKind::OutboundSale,
        OriginKind::ServiceAppointment => MovementKind::OutboundServiceUse,
        OriginKind::Transfer => MovementKind::OutboundTransfer,
    }
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    settings: ReservationSettings,
}

impl ReservationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
        }
    }

    /// Resolves the effective TTL for a request: callers may pass nothing
    /// (default applies), zero/negative is rejected, and values above the
    /// configured ceiling are clamped down to it.
    fn resolve_ttl(&self, ttl_minutes: Option<i64>) -> Result<i64, StockError> {
        let ttl = ttl_minutes.unwrap_or(self.settings.default_ttl_minutes);
        if ttl <= 0 {
            return Err(StockError::InvalidTtl(ttl));
        }
        Ok(ttl.min(self.settings.max_ttl_minutes))
    }

    /// Grants a hold on stock. The availability re-check and the insert
    /// happen under the stock item row lock, so concurrent callers are
    /// admitted serially per item.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id, product_id = %key.product_id))]
    pub async fn reserve(
        &self,
        ctx: &TenantContext,
        key: StockItemKey,
        quantity: i32,
        origin_kind: OriginKind,
        origin_id: Option<Uuid>,
        ttl_minutes: Option<i64>,
    ) -> Result<reservation::Model, StockError> {
        if quantity < 1 {
            RESERVATION_FAILURES
                .with_label_values(&["invalid_quantity"])
                .inc();
            return Err(StockError::InvalidQuantity(quantity));
        }
        let ttl = self.resolve_ttl(ttl_minutes)?;
        let ctx = *ctx;

        let created = with_retry("reserve", || async {
            self.db
                .transaction::<_, reservation::Model, StockError>(move |txn| {
                    Box::pin(async move {
                        let item =
                            require_stock_item_on(txn, ctx.organization_id, &key, true).await?;
                        let available = available_for_item_on(txn, &item).await?;
                        if available < quantity {
                            return Err(StockError::InsufficientStock {
                                product_id: key.product_id,
                                branch_id: key.branch_id,
                                requested: quantity,
                                available,
                            });
                        }

                        let active = reservation::ActiveModel {
                            organization_id: Set(ctx.organization_id),
                            product_id: Set(key.product_id),
                            variant_id: Set(key.variant_id),
                            branch_id: Set(key.branch_id),
                            quantity: Set(quantity),
                            origin_kind: Set(origin_kind),
                            origin_id: Set(origin_id),
                            state: Set(ReservationState::Active),
                            expires_at: Set(Utc::now() + Duration::minutes(ttl)),
                            ..Default::default()
                        };
                        active.insert(txn).await.map_err(StockError::db_error)
                    })
                })
                .await
                .map_err(unwrap_transaction_error)
        })
        .await
        .map_err(|e| {
            RESERVATION_FAILURES.with_label_values(&[e.code()]).inc();
            e
        })?;

        RESERVATIONS_GRANTED.inc();
        self.emit(Event::ReservationCreated {
            reservation_id: created.id,
            organization_id: created.organization_id,
            product_id: created.product_id,
            branch_id: created.branch_id,
            quantity: created.quantity,
            origin_kind: created.origin_kind,
            expires_at: created.expires_at,
        })
        .await;

        Ok(created)
    }

    /// Grants a set of holds all-or-nothing. Items are processed in
    /// ascending key order so two concurrent batches always acquire the
    /// same row locks in the same order. If any item fails admission the
    /// whole batch rolls back and the error names every failing item.
    #[instrument(skip(self, ctx, items), fields(organization_id = %ctx.organization_id, items = items.len()))]
    pub async fn reserve_batch(
        &self,
        ctx: &TenantContext,
        items: Vec<ReserveRequest>,
        origin_kind: OriginKind,
        origin_id: Option<Uuid>,
        ttl_minutes: Option<i64>,
    ) -> Result<Vec<reservation::Model>, StockError> {
        if items.is_empty() {
            return Err(StockError::ValidationError(
                "reserve_batch requires at least one item".to_string(),
            ));
        }
        if items.len() > self.settings.max_batch_items {
            return Err(StockError::ValidationError(format!(
                "reserve_batch accepts at most {} items, got {}",
                self.settings.max_batch_items,
                items.len()
            )));
        }
        let ttl = self.resolve_ttl(ttl_minutes)?;
        let ctx = *ctx;

        // Stable lock order: sort by key, remember original positions for
        // failure reporting.
        let mut ordered: Vec<(usize, ReserveRequest)> = items.into_iter().enumerate().collect();
        ordered.sort_by(|a, b| a.1.key.cmp(&b.1.key).then(a.0.cmp(&b.0)));

        let created = with_retry("reserve_batch", || {
            let ordered = ordered.clone();
            async move {
                self.db
                    .transaction::<_, Vec<(usize, reservation::Model)>, StockError>(move |txn| {
                        Box::pin(async move {
                            let now = Utc::now();
                            let expires_at = now + Duration::minutes(ttl);
                            let mut failures: Vec<BatchFailure> = Vec::new();
                            // Quantity admitted for a key by an earlier line
                            // whose insert was skipped (a failure had already
                            // occurred). Inserted holds are visible to the
                            // availability query inside this transaction and
                            // must not be counted twice.
                            let mut consumed: HashMap<StockItemKey, i32> = HashMap::new();
                            let mut created = Vec::with_capacity(ordered.len());

                            for (index, request) in &ordered {
                                if request.quantity < 1 {
                                    failures.push(BatchFailure {
                                        index: *index,
                                        product_id: request.key.product_id,
                                        branch_id: request.key.branch_id,
                                        requested: request.quantity,
                                        available: None,
                                        reason: "quantity must be at least 1".to_string(),
                                    });
                                    continue;
                                }

                                let item = match require_stock_item_on(
                                    txn,
                                    ctx.organization_id,
                                    &request.key,
                                    true,
                                )
                                .await
                                {
                                    Ok(item) => item,
                                    Err(StockError::StockItemNotFound { .. }) => {
                                        failures.push(BatchFailure {
                                            index: *index,
                                            product_id: request.key.product_id,
                                            branch_id: request.key.branch_id,
                                            requested: request.quantity,
                                            available: None,
                                            reason: "stock item not found".to_string(),
                                        });
                                        continue;
                                    }
                                    Err(other) => return Err(other),
                                };

                                let already = consumed.get(&request.key).copied().unwrap_or(0);
                                let available =
                                    available_for_item_on(txn, &item).await? - already;
                                if available < request.quantity {
                                    failures.push(BatchFailure {
                                        index: *index,
                                        product_id: request.key.product_id,
                                        branch_id: request.key.branch_id,
                                        requested: request.quantity,
                                        available: Some(available),
                                        reason: "insufficient stock".to_string(),
                                    });
                                    continue;
                                }

                                if failures.is_empty() {
                                    let active = reservation::ActiveModel {
                                        organization_id: Set(ctx.organization_id),
                                        product_id: Set(request.key.product_id),
                                        variant_id: Set(request.key.variant_id),
                                        branch_id: Set(request.key.branch_id),
                                        quantity: Set(request.quantity),
                                        origin_kind: Set(origin_kind),
                                        origin_id: Set(origin_id),
                                        state: Set(ReservationState::Active),
                                        expires_at: Set(expires_at),
                                        ..Default::default()
                                    };
                                    let model =
                                        active.insert(txn).await.map_err(StockError::db_error)?;
                                    created.push((*index, model));
                                } else {
                                    *consumed.entry(request.key).or_insert(0) += request.quantity;
                                }
                            }

                            if !failures.is_empty() {
                                failures.sort_by_key(|f| f.index);
                                return Err(StockError::BatchPartialFailure(failures));
                            }

                            Ok(created)
                        })
                    })
                    .await
                    .map_err(unwrap_transaction_error)
            }
        })
        .await
        .map_err(|e| {
            RESERVATION_FAILURES.with_label_values(&[e.code()]).inc();
            e
        })?;

        // Restore the caller's item order.
        let mut created = created;
        created.sort_by_key(|(index, _)| *index);
        let models: Vec<reservation::Model> =
            created.into_iter().map(|(_, model)| model).collect();

        RESERVATIONS_GRANTED.inc_by(models.len() as u64);
        for model in &models {
            self.emit(Event::ReservationCreated {
                reservation_id: model.id,
                organization_id: model.organization_id,
                product_id: model.product_id,
                branch_id: model.branch_id,
                quantity: model.quantity,
                origin_kind: model.origin_kind,
                expires_at: model.expires_at,
            })
            .await;
        }

        Ok(models)
    }

    /// Converts a hold into a permanent deduction. The state transition and
    /// the ledger append are one atomic unit: if the append fails (for
    /// example a manual adjustment raced the hold below its quantity) the
    /// reservation stays active.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn confirm(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> Result<ledger_entry::Model, StockError> {
        let ctx = *ctx;

        let (entry, model) = with_retry("confirm", || async {
            self.db
                .transaction::<_, (ledger_entry::Model, reservation::Model), StockError>(
                    move |txn| {
                        Box::pin(async move {
                            confirm_on(txn, &ctx, reservation_id).await
                        })
                    },
                )
                .await
                .map_err(unwrap_transaction_error)
        })
        .await
        .map_err(|e| {
            RESERVATION_FAILURES.with_label_values(&[e.code()]).inc();
            e
        })?;

        RESERVATIONS_CONFIRMED.inc();
        self.emit(Event::StockMovementRecorded {
            entry_id: entry.id,
            organization_id: entry.organization_id,
            product_id: entry.product_id,
            branch_id: entry.branch_id,
            movement_kind: entry.movement_kind,
            quantity: entry.quantity,
            resulting_stock: entry.resulting_stock,
        })
        .await;
        self.emit(Event::ReservationConfirmed {
            reservation_id: model.id,
            ledger_entry_id: entry.id,
            quantity: model.quantity,
        })
        .await;

        Ok(entry)
    }

    /// Confirms a set of holds all-or-nothing, locking their stock item
    /// rows in ascending key order. Missing ids fail the call immediately;
    /// state or stock failures are collected so the caller learns every
    /// offending reservation.
    #[instrument(skip(self, ctx, reservation_ids), fields(organization_id = %ctx.organization_id, items = reservation_ids.len()))]
    pub async fn confirm_batch(
        &self,
        ctx: &TenantContext,
        reservation_ids: Vec<Uuid>,
    ) -> Result<Vec<ledger_entry::Model>, StockError> {
        if reservation_ids.is_empty() {
            return Err(StockError::ValidationError(
                "confirm_batch requires at least one reservation".to_string(),
            ));
        }
        if reservation_ids.len() > self.settings.max_batch_items {
            return Err(StockError::ValidationError(format!(
                "confirm_batch accepts at most {} items, got {}",
                self.settings.max_batch_items,
                reservation_ids.len()
            )));
        }
        let ctx = *ctx;

        let confirmed = with_retry("confirm_batch", || {
            let ids = reservation_ids.clone();
            async move {
                self.db
                    .transaction::<_, Vec<(usize, ledger_entry::Model, reservation::Model)>, StockError>(
                        move |txn| {
                            Box::pin(async move {
                                let models = ReservationEntity::find()
                                    .filter(
                                        reservation::Column::OrganizationId
                                            .eq(ctx.organization_id),
                                    )
                                    .filter(reservation::Column::Id.is_in(ids.clone()))
                                    .all(txn)
                                    .await
                                    .map_err(StockError::db_error)?;

                                let by_id: HashMap<Uuid, reservation::Model> =
                                    models.into_iter().map(|m| (m.id, m)).collect();
                                for id in &ids {
                                    if !by_id.contains_key(id) {
                                        return Err(StockError::ReservationNotFound(*id));
                                    }
                                }

                                // Stable lock order across batches.
                                let mut ordered: Vec<(usize, reservation::Model)> = ids
                                    .iter()
                                    .enumerate()
                                    .map(|(i, id)| (i, by_id[id].clone()))
                                    .collect();
                                ordered.sort_by(|a, b| {
                                    StockItemKey::from(&a.1)
                                        .cmp(&StockItemKey::from(&b.1))
                                        .then(a.0.cmp(&b.0))
                                });

                                let now = Utc::now();
                                let mut failures: Vec<BatchFailure> = Vec::new();
                                let mut confirmed = Vec::with_capacity(ordered.len());

                                for (index, model) in ordered {
                                    let effective = model.effective_state(now);
                                    if effective != ReservationState::Active {
                                        failures.push(BatchFailure {
                                            index,
                                            product_id: model.product_id,
                                            branch_id: model.branch_id,
                                            requested: model.quantity,
                                            available: None,
                                            reason: format!(
                                                "reservation not active ({:?})",
                                                effective
                                            ),
                                        });
                                        continue;
                                    }
                                    if !failures.is_empty() {
                                        continue;
                                    }

                                    let movement = confirm_movement(&model);
                                    match append_on(
                                        txn,
                                        ctx.organization_id,
                                        ctx.actor_id,
                                        &movement,
                                    )
                                    .await
                                    {
                                        Ok(entry) => {
                                            let updated =
                                                mark_confirmed(txn, &model, now).await?;
                                            confirmed.push((index, entry, updated));
                                        }
                                        Err(StockError::InsufficientStock {
                                            available, ..
                                        }) => {
                                            failures.push(BatchFailure {
                                                index,
                                                product_id: model.product_id,
                                                branch_id: model.branch_id,
                                                requested: model.quantity,
                                                available: Some(available),
                                                reason: "insufficient stock".to_string(),
                                            });
                                        }
                                        Err(other) => return Err(other),
                                    }
                                }

                                if !failures.is_empty() {
                                    failures.sort_by_key(|f| f.index);
                                    return Err(StockError::BatchPartialFailure(failures));
                                }

                                Ok(confirmed)
                            })
                        },
                    )
                    .await
                    .map_err(unwrap_transaction_error)
            }
        })
        .await
        .map_err(|e| {
            RESERVATION_FAILURES.with_label_values(&[e.code()]).inc();
            e
        })?;

        let mut confirmed = confirmed;
        confirmed.sort_by_key(|(index, _, _)| *index);

        RESERVATIONS_CONFIRMED.inc_by(confirmed.len() as u64);
        let mut entries = Vec::with_capacity(confirmed.len());
        for (_, entry, model) in confirmed {
            self.emit(Event::ReservationConfirmed {
                reservation_id: model.id,
                ledger_entry_id: entry.id,
                quantity: model.quantity,
            })
            .await;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Releases a hold. No ledger effect: the hold never touched
    /// `stock_on_hand`. Only effectively active reservations can be
    /// canceled; cancel-of-confirmed always fails.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn cancel(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> Result<reservation::Model, StockError> {
        let now = Utc::now();

        // Conditional update: loses the race against a concurrent confirm
        // or sweep, in which case we re-read to report the real state.
        let result = ReservationEntity::update_many()
            .col_expr(
                reservation::Column::State,
                Expr::value(ReservationState::Canceled),
            )
            .col_expr(reservation::Column::CanceledAt, Expr::value(now))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .exec(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        if result.rows_affected == 0 {
            let err = match self.find_in_org(ctx, reservation_id).await? {
                None => StockError::ReservationNotFound(reservation_id),
                Some(model) => StockError::ReservationNotActive {
                    id: reservation_id,
                    state: model.effective_state(now),
                },
            };
            RESERVATION_FAILURES.with_label_values(&[err.code()]).inc();
            return Err(err);
        }

        let model = self
            .find_in_org(ctx, reservation_id)
            .await?
            .ok_or(StockError::ReservationNotFound(reservation_id))?;

        self.emit(Event::ReservationCanceled {
            reservation_id: model.id,
            quantity: model.quantity,
        })
        .await;

        Ok(model)
    }

    /// Cancels every still-active reservation created for an upstream
    /// origin (order, appointment, transfer) that was itself canceled.
    /// Best-effort: already-confirmed or expired holds are reported in
    /// `skipped`, never as an error.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id, origin_id = %origin_id))]
    pub async fn cancel_by_origin(
        &self,
        ctx: &TenantContext,
        origin_kind: OriginKind,
        origin_id: Uuid,
    ) -> Result<CancelByOriginResult, StockError> {
        let now = Utc::now();

        let matching = ReservationEntity::find()
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
            .filter(reservation::Column::OriginKind.eq(origin_kind))
            .filter(reservation::Column::OriginId.eq(origin_id))
            .all(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        let mut canceled_ids = Vec::new();
        let mut skipped = Vec::new();

        for model in matching {
            if !model.is_effectively_active(now) {
                skipped.push(SkippedCancellation {
                    id: model.id,
                    effective_state: model.effective_state(now),
                });
                continue;
            }

            let result = ReservationEntity::update_many()
                .col_expr(
                    reservation::Column::State,
                    Expr::value(ReservationState::Canceled),
                )
                .col_expr(reservation::Column::CanceledAt, Expr::value(now))
                .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
                .filter(reservation::Column::Id.eq(model.id))
                .filter(reservation::Column::State.eq(ReservationState::Active))
                .filter(reservation::Column::ExpiresAt.gt(now))
                .exec(&*self.db)
                .await
                .map_err(StockError::db_error)?;

            if result.rows_affected == 1 {
                canceled_ids.push(model.id);
                self.emit(Event::ReservationCanceled {
                    reservation_id: model.id,
                    quantity: model.quantity,
                })
                .await;
            } else {
                // Lost a race with confirm/sweep between read and update.
                let state = self
                    .find_in_org(ctx, model.id)
                    .await?
                    .map(|m| m.effective_state(now))
                    .unwrap_or(ReservationState::Canceled);
                skipped.push(SkippedCancellation {
                    id: model.id,
                    effective_state: state,
                });
            }
        }

        info!(
            canceled = canceled_ids.len(),
            skipped = skipped.len(),
            "Canceled reservations by origin"
        );

        Ok(CancelByOriginResult {
            canceled: canceled_ids.len() as u64,
            canceled_ids,
            skipped,
        })
    }

    /// Pushes a hold's expiry out by up to `max_extend_minutes` per call.
    /// Extension never resurrects a lapsed or terminal hold.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn extend(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
        extra_minutes: i64,
    ) -> Result<reservation::Model, StockError> {
        if extra_minutes <= 0 || extra_minutes > self.settings.max_extend_minutes {
            RESERVATION_FAILURES
                .with_label_values(&["invalid_ttl"])
                .inc();
            return Err(StockError::InvalidTtl(extra_minutes));
        }

        let now = Utc::now();
        let model = self
            .find_in_org(ctx, reservation_id)
            .await?
            .ok_or(StockError::ReservationNotFound(reservation_id))?;

        let effective = model.effective_state(now);
        if effective != ReservationState::Active {
            let err = StockError::ReservationNotActive {
                id: reservation_id,
                state: effective,
            };
            RESERVATION_FAILURES.with_label_values(&[err.code()]).inc();
            return Err(err);
        }

        let new_expires_at = model.expires_at.max(now) + Duration::minutes(extra_minutes);

        // Conditional on still being active so a racing confirm/cancel/
        // sweep wins and the extension is refused.
        let result = ReservationEntity::update_many()
            .col_expr(reservation::Column::ExpiresAt, Expr::value(new_expires_at))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .exec(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        if result.rows_affected == 0 {
            let state = self
                .find_in_org(ctx, reservation_id)
                .await?
                .map(|m| m.effective_state(now))
                .unwrap_or(ReservationState::Expired);
            let err = StockError::ReservationNotActive {
                id: reservation_id,
                state,
            };
            RESERVATION_FAILURES.with_label_values(&[err.code()]).inc();
            return Err(err);
        }

        let updated = self
            .find_in_org(ctx, reservation_id)
            .await?
            .ok_or(StockError::ReservationNotFound(reservation_id))?;

        self.emit(Event::ReservationExtended {
            reservation_id: updated.id,
            expires_at: updated.expires_at,
        })
        .await;

        Ok(updated)
    }

    /// Gets a reservation by id, scoped to the caller's organization.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn get_reservation(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> Result<Option<ReservationSummary>, StockError> {
        Ok(self
            .find_in_org(ctx, reservation_id)
            .await?
            .map(ReservationSummary::from))
    }

    /// Lists reservations with pagination and optional filters.
    #[instrument(skip(self, ctx, filter), fields(organization_id = %ctx.organization_id))]
    pub async fn list_reservations(
        &self,
        ctx: &TenantContext,
        page: u64,
        limit: u64,
        filter: ReservationFilter,
    ) -> Result<(Vec<ReservationSummary>, u64), StockError> {
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

        let mut query = ReservationEntity::find()
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id));

        if let Some(state) = filter.state {
            query = query.filter(reservation::Column::State.eq(state));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(reservation::Column::ProductId.eq(product_id));
        }
        if let Some(origin_kind) = filter.origin_kind {
            query = query.filter(reservation::Column::OriginKind.eq(origin_kind));
        }
        if !filter.include_expired {
            query = query.filter(reservation::Column::State.ne(ReservationState::Expired));
        }

        let paginator = query
            .order_by_desc(reservation::Column::CreatedAt)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await.map_err(StockError::db_error)?;
        let models = paginator
            .fetch_page(page - 1)
            .await
            .map_err(StockError::db_error)?;

        Ok((
            models.into_iter().map(ReservationSummary::from).collect(),
            total,
        ))
    }

    /// Counts for dashboards. `expired_not_swept` shrinking to zero after a
    /// sweep pass is the sweeper's observable effect.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn reservation_stats(
        &self,
        ctx: &TenantContext,
    ) -> Result<ReservationStats, StockError> {
        let now = Utc::now();
        let org = reservation::Column::OrganizationId.eq(ctx.organization_id);

        let total = ReservationEntity::find()
            .filter(org.clone())
            .count(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        let active = ReservationEntity::find()
            .filter(org.clone())
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .count(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        let expired_not_swept = ReservationEntity::find()
            .filter(org.clone())
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.lte(now))
            .count(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        let expiring_within_24h = ReservationEntity::find()
            .filter(org)
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .filter(reservation::Column::ExpiresAt.lt(now + Duration::hours(24)))
            .count(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        Ok(ReservationStats {
            total,
            active,
            expired_not_swept,
            expiring_within_24h,
            stats_at: now,
        })
    }

    async fn find_in_org(
        &self,
        ctx: &TenantContext,
        reservation_id: Uuid,
    ) -> Result<Option<reservation::Model>, StockError> {
        ReservationEntity::find_by_id(reservation_id)
            .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
            .one(&*self.db)
            .await
            .map_err(StockError::db_error)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to emit reservation event");
        }
    }
}

fn confirm_movement(model: &reservation::Model) -> NewMovement {
    NewMovement {
        key: StockItemKey::from(model),
        kind: outbound_kind(model.origin_kind),
        quantity: -model.quantity,
        unit_cost: None,
        reference: Some(format!("reservation:{}", model.id)),
        reason: None,
    }
}

/// Flips a hold to confirmed, conditional on it still being active and
/// unexpired at write time. A concurrent confirm, cancel or sweep that
/// committed after our read makes `rows_affected` zero; failing here rolls
/// the whole transaction back, ledger append included, so one hold can
/// never produce two deductions or overwrite a committed cancel.
async fn mark_confirmed<C: ConnectionTrait>(
    conn: &C,
    model: &reservation::Model,
    now: DateTime<Utc>,
) -> Result<reservation::Model, StockError> {
    let result = ReservationEntity::update_many()
        .col_expr(
            reservation::Column::State,
            Expr::value(ReservationState::Confirmed),
        )
        .col_expr(reservation::Column::ConfirmedAt, Expr::value(now))
        .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
        .filter(reservation::Column::Id.eq(model.id))
        .filter(reservation::Column::State.eq(ReservationState::Active))
        .filter(reservation::Column::ExpiresAt.gt(now))
        .exec(conn)
        .await
        .map_err(StockError::db_error)?;

    if result.rows_affected == 0 {
        let state = ReservationEntity::find_by_id(model.id)
            .one(conn)
            .await
            .map_err(StockError::db_error)?
            .map(|m| m.effective_state(now))
            .unwrap_or(ReservationState::Expired);
        return Err(StockError::ReservationNotActive {
            id: model.id,
            state,
        });
    }

    let mut updated = model.clone();
    updated.state = ReservationState::Confirmed;
    updated.confirmed_at = Some(now);
    updated.updated_at = Some(now);
    Ok(updated)
}

/// Confirmation core, shared by `confirm` and usable on any open
/// transaction: effective-state check, ledger append, state transition.
async fn confirm_on<C: ConnectionTrait>(
    conn: &C,
    ctx: &TenantContext,
    reservation_id: Uuid,
) -> Result<(ledger_entry::Model, reservation::Model), StockError> {
    let model = ReservationEntity::find_by_id(reservation_id)
        .filter(reservation::Column::OrganizationId.eq(ctx.organization_id))
        .one(conn)
        .await
        .map_err(StockError::db_error)?
        .ok_or(StockError::ReservationNotFound(reservation_id))?;

    let now = Utc::now();
    let effective = model.effective_state(now);
    if effective != ReservationState::Active {
        return Err(StockError::ReservationNotActive {
            id: reservation_id,
            state: effective,
        });
    }

    let movement = confirm_movement(&model);
    let entry = append_on(conn, ctx.organization_id, ctx.actor_id, &movement).await?;
    let updated = mark_confirmed(conn, &model, now).await?;

    Ok((entry, updated))
}
