pub mod base32;
pub mod config;
pub mod error;
pub mod message;
pub mod receive;
pub mod secret;
pub mod share;
pub mod store;
pub mod topic;
pub mod totp;
pub mod transport;
pub mod vault;

pub use error::{Error, Result};
pub use receive::{receive, ReceiveOutcome};
pub use share::{share, ShareReport};
pub use store::VaultStore;
pub use topic::Topic;
pub use vault::{Entry, Vault};
