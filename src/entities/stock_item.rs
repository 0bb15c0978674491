use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One physical pool of stock, scoped by organization, product and
/// (optionally) variant and branch. `branch_id = NULL` means the stock is
/// held organization-wide rather than at a specific branch.
///
/// `stock_on_hand` is mutated exclusively by the stock ledger, inside the
/// same transaction that writes the matching ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub stock_on_hand: i32,
    pub stock_min: i32,
    pub stock_max: Option<i32>,
    pub created_at: DateTime<Utc>,
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
    /// True when the pool sits at or below its configured minimum.
    pub fn is_below_minimum(&self) -> bool {
        self.stock_on_hand <= self.stock_min
    }
}
