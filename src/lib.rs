//! Multi-tenant stock reservation and ledger engine.
//!
//! Three cooperating pieces keep sellable quantity honest across branches
//! and sales channels:
//!
//! - an append-only **stock ledger**, the only writer of `stock_on_hand`,
//!   where every entry records the counter value it produced;
//! - a **reservation manager** granting time-boxed holds that subtract
//!   from availability without touching the counter until confirmed;
//! - an **expiration sweeper** that materializes lapsed holds in the
//!   background while reads treat them as expired immediately.
//!
//! [`StockEngine`] wires the services to one pool and one event channel.

#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;
pub mod tenant;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    AvailabilityService, CatalogService, ExpirationSweeper, ReservationService,
    StockLedgerService,
};

pub use crate::errors::StockError;
pub use crate::tenant::TenantContext;

/// Facade bundling every service over one pool and one event channel.
#[derive(Clone)]
pub struct StockEngine {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    config: AppConfig,
    pub catalog: CatalogService,
    pub availability: AvailabilityService,
    pub ledger: StockLedgerService,
    pub reservations: ReservationService,
}

impl StockEngine {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, config: AppConfig) -> Self {
        let catalog = CatalogService::new(db.clone());
        let availability = AvailabilityService::new(
            db.clone(),
            config.reservations.max_bulk_availability,
        );
        let ledger = StockLedgerService::new(db.clone(), event_sender.clone());
        let reservations = ReservationService::new(
            db.clone(),
            event_sender.clone(),
            config.reservations.clone(),
        );

        Self {
            db,
            event_sender,
            config,
            catalog,
            availability,
            ledger,
            reservations,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Builds a sweeper sharing this engine's pool and event channel. The
    /// caller decides whether to loop it (`run`) or drive passes manually
    /// (`sweep_once`).
    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.sweeper.clone(),
        )
    }

    /// Spawns the periodic sweep loop on the current runtime.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.sweeper().run())
    }
}
