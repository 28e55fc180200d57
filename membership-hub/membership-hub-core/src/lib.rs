pub mod account;
pub mod config;
pub mod db;
pub mod error;
pub mod group;
pub mod membership;
mod schema;

pub use account::{Account, AccountSearchField, AccountState, AccountStore, NewAccount};
pub use config::{HubConfig, MembershipConfig};
pub use db::Database;
pub use error::{Error, Result};
pub use group::{BackendGroup, GroupSearchField, GroupStore, NewBackendGroup};
pub use membership::{AccountRef, GroupRef, MembershipStore, MembershipType};
