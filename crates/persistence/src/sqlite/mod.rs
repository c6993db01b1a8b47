//! SQLite database management

mod accounts;
mod connection;
mod daily_rewards;
mod receipts;
mod settings;
mod transactions;
mod usage;
mod vip;
mod wallets;

pub use accounts::*;
pub use connection::{is_unique_violation, Database, WriteTx};
pub use daily_rewards::*;
pub use receipts::*;
pub use settings::*;
pub use transactions::*;
pub use usage::*;
pub use vip::*;
pub use wallets::*;
