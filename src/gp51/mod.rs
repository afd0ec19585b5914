//! GP51 vendor integration: login, device roster and position sync.

pub mod auth;
pub mod client;
pub mod sync;
pub mod validation;

pub use auth::{Authenticator, LoginResult};
pub use client::{RetryPolicy, VendorClient};
pub use sync::{FullSyncReport, SyncService};

pub const ACTION_LOGIN: &str = "login";
pub const ACTION_DEVICE_LIST: &str = "querymonitorlist";
pub const ACTION_LAST_POSITION: &str = "lastposition";
