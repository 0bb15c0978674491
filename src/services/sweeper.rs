//! Expiration sweeper: materializes lapsed holds by flipping
//! `active` rows whose `expires_at` has passed to `expired`.
//!
//! The sweep is a hygiene pass, not a correctness mechanism. Availability
//! and admission already treat lapsed holds as expired through the
//! effective-state predicate; the sweeper only keeps the stored states and
//! dashboards honest.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::IntCounter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::SweeperSettings;
use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationState};
use crate::errors::StockError;
use crate::events::{Event, EventSender};

lazy_static! {
    static ref RESERVATIONS_EXPIRED: IntCounter = IntCounter::new(
        "stockcontrol_reservations_expired_total",
        "Total number of reservations flipped to expired by the sweeper"
    )
    .expect("metric can be created");
    static ref SWEEP_PASSES: IntCounter = IntCounter::new(
        "stockcontrol_sweep_passes_total",
        "Total number of sweep passes executed"
    )
    .expect("metric can be created");
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub expired_count: u64,
    pub swept_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ExpirationSweeper {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    settings: SweeperSettings,
}

impl ExpirationSweeper {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
        }
    }

    /// One pass over all organizations: select up to `batch_size` lapsed
    /// active rows, then flip exactly those rows with the lapse predicate
    /// repeated, so a hold confirmed or extended mid-pass is left alone.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepResult, StockError> {
        let now = Utc::now();
        SWEEP_PASSES.inc();

        let lapsed_ids: Vec<Uuid> = ReservationEntity::find()
            .select_only()
            .column(reservation::Column::Id)
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.lte(now))
            .order_by_asc(reservation::Column::ExpiresAt)
            .limit(self.settings.batch_size)
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        if lapsed_ids.is_empty() {
            return Ok(SweepResult {
                expired_count: 0,
                swept_at: now,
            });
        }

        let result = ReservationEntity::update_many()
            .col_expr(
                reservation::Column::State,
                Expr::value(ReservationState::Expired),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.is_in(lapsed_ids))
            .filter(reservation::Column::State.eq(ReservationState::Active))
            .filter(reservation::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await
            .map_err(StockError::db_error)?;

        let expired_count = result.rows_affected;
        RESERVATIONS_EXPIRED.inc_by(expired_count);

        if expired_count > 0 {
            info!(expired = expired_count, "Sweep pass expired reservations");
            if let Err(e) = self
                .event_sender
                .send(Event::ReservationsExpired {
                    organization_id: None,
                    count: expired_count,
                })
                .await
            {
                error!(error = %e, "Failed to emit sweep event");
            }
        }

        Ok(SweepResult {
            expired_count,
            swept_at: now,
        })
    }

    /// Periodic sweep loop. Runs until the process shuts down; a failing
    /// pass is logged and the next tick tries again.
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.settings.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.settings.interval_secs,
            batch_size = self.settings.batch_size,
            "Expiration sweeper started"
        );

        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Sweep pass failed");
            }
        }
    }
}
