use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored reservation state. `Active` is the only non-terminal state;
/// `Confirmed`, `Canceled` and `Expired` are terminal and no transition
/// leaves them.
///
/// The stored state can lag reality: a reservation whose `expires_at` has
/// passed is *effectively* expired even while the row still says `active`.
/// Always go through [`Model::effective_state`] for admission and
/// availability decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ReservationState {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Active)
    }
}

/// Which sales channel asked for the hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OriginKind {
    #[sea_orm(string_value = "pos_sale")]
    PosSale,
    #[sea_orm(string_value = "sales_order")]
    SalesOrder,
    #[sea_orm(string_value = "service_appointment")]
    ServiceAppointment,
    #[sea_orm(string_value = "transfer")]
    Transfer,
}

/// A short-lived, non-committing claim on stock. Created only by the
/// reservation manager's admission check; never deleted (kept for audit).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_reservations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub quantity: i32,
    pub origin_kind: OriginKind,
    pub origin_id: Option<Uuid>,
    pub state: ReservationState,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }

        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}

impl Model {
    /// The load-bearing predicate of the whole engine: stored state plus
    /// expiry comparison. A lapsed `active` row counts as `Expired` here
    /// even before the sweeper has materialized it.
    pub fn effective_state(&self, now: DateTime<Utc>) -> ReservationState {
        match self.state {
            ReservationState::Active if self.expires_at <= now => ReservationState::Expired,
            other => other,
        }
    }

    pub fn is_effectively_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_state(now) == ReservationState::Active
    }
}
