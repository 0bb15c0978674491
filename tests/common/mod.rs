#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use stockcontrol::config::{AppConfig, ReservationSettings, SweeperSettings};
use stockcontrol::db::{establish_connection_with_config, run_migrations, DbConfig};
use stockcontrol::entities::ledger_entry::MovementKind;
use stockcontrol::entities::reservation::{self, Entity as ReservationEntity};
use stockcontrol::entities::stock_item;
use stockcontrol::events;
use stockcontrol::services::{NewMovement, NewStockItem, StockItemKey};
use stockcontrol::{StockEngine, TenantContext};

pub struct TestEnv {
    pub engine: StockEngine,
    pub ctx: TenantContext,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        environment: "test".to_string(),
        log_level: "debug".to_string(),
        log_json: false,
        auto_migrate: true,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 30,
        db_acquire_timeout_secs: 8,
        db_idle_timeout_secs: 600,
        reservations: ReservationSettings::default(),
        sweeper: SweeperSettings::default(),
    }
}

/// Fresh in-memory engine with migrations applied. One connection so the
/// whole pool shares the same in-memory database.
pub async fn setup() -> TestEnv {
    setup_with_config(test_config()).await
}

pub async fn setup_with_config(config: AppConfig) -> TestEnv {
    let db_config = DbConfig {
        url: config.database_url.clone(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = establish_connection_with_config(&db_config)
        .await
        .expect("test database should connect");
    run_migrations(&db).await.expect("migrations should apply");

    let (event_sender, event_rx) = events::channel(64);
    tokio::spawn(events::process_events(event_rx));

    let engine = StockEngine::new(Arc::new(db), event_sender, config);
    let ctx = TenantContext {
        organization_id: Uuid::new_v4(),
        actor_id: Uuid::new_v4(),
    };

    TestEnv { engine, ctx }
}

pub fn other_tenant(env: &TestEnv) -> TenantContext {
    TenantContext {
        organization_id: Uuid::new_v4(),
        actor_id: env.ctx.actor_id,
    }
}

/// Registers a stock item and, when `initial > 0`, brings stock in through
/// the ledger (the only legal way stock enters).
pub async fn seed_item(env: &TestEnv, key: StockItemKey, initial: i32) -> stock_item::Model {
    seed_item_for(env, &env.ctx, key, initial).await
}

pub async fn seed_item_for(
    env: &TestEnv,
    ctx: &TenantContext,
    key: StockItemKey,
    initial: i32,
) -> stock_item::Model {
    let item = env
        .engine
        .catalog
        .create_stock_item(
            ctx,
            NewStockItem {
                key,
                stock_min: 0,
                stock_max: None,
            },
        )
        .await
        .expect("stock item should be created");
    assert_eq!(item.stock_on_hand, 0);

    if initial > 0 {
        env.engine
            .ledger
            .append(
                ctx,
                NewMovement {
                    key,
                    kind: MovementKind::InboundPurchase,
                    quantity: initial,
                    unit_cost: None,
                    reference: None,
                    reason: None,
                },
            )
            .await
            .expect("initial inbound movement should succeed");
    }

    env.engine
        .catalog
        .get_stock_item(ctx, &key)
        .await
        .expect("stock item lookup should succeed")
        .expect("stock item should exist")
}

/// Rewrites a reservation's expiry into the past so expiry behavior can be
/// exercised without sleeping.
pub async fn backdate_expiry(db: &DatabaseConnection, reservation_id: Uuid, minutes_ago: i64) {
    let result = ReservationEntity::update_many()
        .col_expr(
            reservation::Column::ExpiresAt,
            Expr::value(Utc::now() - Duration::minutes(minutes_ago)),
        )
        .filter(reservation::Column::Id.eq(reservation_id))
        .exec(db)
        .await
        .expect("backdating should succeed");
    assert_eq!(result.rows_affected, 1);
}
