use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a stock movement. Derived from [`MovementKind`], never
/// stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

/// Every way stock can enter or leave a pool. The string values are the
/// stored representation and part of the audit format; do not rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MovementKind {
    #[sea_orm(string_value = "inbound_purchase")]
    InboundPurchase,
    #[sea_orm(string_value = "inbound_return")]
    InboundReturn,
    #[sea_orm(string_value = "inbound_adjustment")]
    InboundAdjustment,
    #[sea_orm(string_value = "inbound_transfer")]
    InboundTransfer,
    #[sea_orm(string_value = "outbound_sale")]
    OutboundSale,
    #[sea_orm(string_value = "outbound_service_use")]
    OutboundServiceUse,
    #[sea_orm(string_value = "outbound_shrinkage")]
    OutboundShrinkage,
    #[sea_orm(string_value = "outbound_theft")]
    OutboundTheft,
    #[sea_orm(string_value = "outbound_return")]
    OutboundReturn,
    #[sea_orm(string_value = "outbound_adjustment")]
    OutboundAdjustment,
    #[sea_orm(string_value = "outbound_transfer")]
    OutboundTransfer,
}

impl MovementKind {
    pub fn direction(&self) -> MovementDirection {
        match self {
            MovementKind::InboundPurchase
            | MovementKind::InboundReturn
            | MovementKind::InboundAdjustment
            | MovementKind::InboundTransfer => MovementDirection::Inbound,
            MovementKind::OutboundSale
            | MovementKind::OutboundServiceUse
            | MovementKind::OutboundShrinkage
            | MovementKind::OutboundTheft
            | MovementKind::OutboundReturn
            | MovementKind::OutboundAdjustment
            | MovementKind::OutboundTransfer => MovementDirection::Outbound,
        }
    }

    /// Whether a signed quantity is legal for this kind: inbound kinds take
    /// positive quantities, outbound kinds negative. Zero is never legal.
    pub fn allows_quantity(&self, quantity: i32) -> bool {
        match self.direction() {
            MovementDirection::Inbound => quantity > 0,
            MovementDirection::Outbound => quantity < 0,
        }
    }
}

/// Append-only record of one change to `stock_on_hand`.
///
/// The auto-increment primary key doubles as the sequence that totally
/// orders entries; `resulting_stock` of entry n must equal
/// `resulting_stock` of entry n-1 plus `quantity` of entry n.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub movement_kind: MovementKind,
    /// Signed quantity: positive for inbound kinds, negative for outbound.
    pub quantity: i32,
    /// Stock on hand immediately after applying `quantity`.
    pub resulting_stock: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_inbound(&self) -> bool {
        self.movement_kind.direction() == MovementDirection::Inbound
    }

    pub fn is_outbound(&self) -> bool {
        self.movement_kind.direction() == MovementDirection::Outbound
    }
}
