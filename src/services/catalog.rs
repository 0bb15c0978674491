//! Catalog seam: the stock-item rows are owned by the external catalog
//! service; the engine reads them here and only the ledger writes
//! `stock_on_hand`.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::reservation;
use crate::entities::stock_item::{self, Entity as StockItemEntity};
use crate::errors::StockError;
use crate::tenant::TenantContext;

/// Addressing key for one pool of stock within an organization.
///
/// `variant_id`/`branch_id` are part of the key: `None` means the
/// organization-wide pool, not a wildcard. The derived ordering gives
/// batches a stable lock-acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockItemKey {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

impl StockItemKey {
    pub fn product(product_id: Uuid) -> Self {
        Self {
            product_id,
            variant_id: None,
            branch_id: None,
        }
    }

    pub fn branch(product_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            product_id,
            variant_id: None,
            branch_id: Some(branch_id),
        }
    }
}

impl From<&stock_item::Model> for StockItemKey {
    fn from(item: &stock_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            variant_id: item.variant_id,
            branch_id: item.branch_id,
        }
    }
}

impl From<&reservation::Model> for StockItemKey {
    fn from(hold: &reservation::Model) -> Self {
        Self {
            product_id: hold.product_id,
            variant_id: hold.variant_id,
            branch_id: hold.branch_id,
        }
    }
}

fn scope_filter(
    query: sea_orm::Select<StockItemEntity>,
    organization_id: Uuid,
    key: &StockItemKey,
) -> sea_orm::Select<StockItemEntity> {
    let mut query = query
        .filter(stock_item::Column::OrganizationId.eq(organization_id))
        .filter(stock_item::Column::ProductId.eq(key.product_id));
    query = match key.variant_id {
        Some(v) => query.filter(stock_item::Column::VariantId.eq(v)),
        None => query.filter(stock_item::Column::VariantId.is_null()),
    };
    match key.branch_id {
        Some(b) => query.filter(stock_item::Column::BranchId.eq(b)),
        None => query.filter(stock_item::Column::BranchId.is_null()),
    }
}

/// Fetches the stock item for a key on any connection (pool or open
/// transaction). With `lock = true` the row is read `FOR UPDATE` on
/// Postgres; SQLite serializes writers on its own so the hint is skipped
/// there.
pub(crate) async fn find_stock_item_on<C: ConnectionTrait>(
    conn: &C,
    organization_id: Uuid,
    key: &StockItemKey,
    lock: bool,
) -> Result<Option<stock_item::Model>, StockError> {
    let mut query = scope_filter(StockItemEntity::find(), organization_id, key);
    if lock && conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    query.one(conn).await.map_err(StockError::db_error)
}

/// Same as [`find_stock_item_on`] but failing with `StockItemNotFound`.
pub(crate) async fn require_stock_item_on<C: ConnectionTrait>(
    conn: &C,
    organization_id: Uuid,
    key: &StockItemKey,
    lock: bool,
) -> Result<stock_item::Model, StockError> {
    find_stock_item_on(conn, organization_id, key, lock)
        .await?
        .ok_or(StockError::StockItemNotFound {
            product_id: key.product_id,
            branch_id: key.branch_id,
        })
}

/// Fields accepted when registering a stock item through the seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockItem {
    pub key: StockItemKey,
    pub stock_min: i32,
    pub stock_max: Option<i32>,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up the stock item for a key, read-only.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn get_stock_item(
        &self,
        ctx: &TenantContext,
        key: &StockItemKey,
    ) -> Result<Option<stock_item::Model>, StockError> {
        find_stock_item_on(&*self.db, ctx.organization_id, key, false).await
    }

    /// Registers a stock item with zero stock on hand. Initial stock enters
    /// through the ledger (an `inbound_*` movement), never here.
    #[instrument(skip(self, ctx, item), fields(organization_id = %ctx.organization_id))]
    pub async fn create_stock_item(
        &self,
        ctx: &TenantContext,
        item: NewStockItem,
    ) -> Result<stock_item::Model, StockError> {
        if let Some(existing) =
            find_stock_item_on(&*self.db, ctx.organization_id, &item.key, false).await?
        {
            return Err(StockError::ValidationError(format!(
                "stock item already exists for product {} (id {})",
                item.key.product_id, existing.id
            )));
        }

        let active = stock_item::ActiveModel {
            organization_id: Set(ctx.organization_id),
            product_id: Set(item.key.product_id),
            variant_id: Set(item.key.variant_id),
            branch_id: Set(item.key.branch_id),
            stock_on_hand: Set(0),
            stock_min: Set(item.stock_min),
            stock_max: Set(item.stock_max),
            ..Default::default()
        };

        active.insert(&*self.db).await.map_err(StockError::db_error)
    }

    /// Lists an organization's stock items with pagination.
    #[instrument(skip(self, ctx), fields(organization_id = %ctx.organization_id))]
    pub async fn list_stock_items(
        &self,
        ctx: &TenantContext,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_item::Model>, u64), StockError> {
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

        let paginator = StockItemEntity::find()
            .filter(stock_item::Column::OrganizationId.eq(ctx.organization_id))
            .order_by_asc(stock_item::Column::ProductId)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await.map_err(StockError::db_error)?;
        let items = paginator
            .fetch_page(page - 1)
            .await
            .map_err(StockError::db_error)?;

        Ok((items, total))
    }
}
