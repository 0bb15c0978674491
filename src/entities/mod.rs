//! Sea-ORM entity definitions for the stock engine's three tables:
//! the mutable stock counter, the append-only movement ledger and the
//! reservation rows.

pub mod ledger_entry;
pub mod reservation;
pub mod stock_item;
