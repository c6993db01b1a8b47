//! Rewards Persistence - SQLite storage for wallets, journal, and usage

pub mod sqlite;

pub use sqlite::{Database, WriteTx};
