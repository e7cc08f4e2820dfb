pub mod config;
pub mod core;
pub mod err;
pub mod fs;
pub mod global_var;
pub mod network;
pub mod utilities;

pub use crate::core::{StabilityScheduler, WatchMapping};
pub use crate::network::{NextcloudClient, RemoteSync};
