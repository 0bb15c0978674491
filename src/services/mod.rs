//! Service layer. Each service owns one concern and shares the pool.

pub mod availability;
pub mod catalog;
pub mod ledger;
pub mod reservations;
pub mod sweeper;

pub use availability::AvailabilityService;
pub use catalog::{CatalogService, NewStockItem, StockItemKey};
pub use ledger::{LedgerHistoryFilter, NewMovement, StockLedgerService};
pub use reservations::{
    CancelByOriginResult, ReservationFilter, ReservationService, ReservationStats,
    ReservationSummary, ReserveRequest, SkippedCancellation,
};
pub use sweeper::{ExpirationSweeper, SweepResult};
