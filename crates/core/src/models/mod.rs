//! Data models for rewards entities

mod account;
mod daily;
mod notification;
mod profile;
mod receipt;
mod source;
mod transaction;
mod vip;

pub use account::*;
pub use daily::*;
pub use notification::*;
pub use profile::*;
pub use receipt::*;
pub use source::*;
pub use transaction::*;
pub use vip::*;
