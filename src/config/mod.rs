#[allow(clippy::module_inception)]
mod config;
mod opts;

pub use config::{
    Config, DEFAULT_DELETE_DELAY_SECONDS, DEFAULT_UPLOAD_DELAY_SECONDS, DirectoryConfig,
    LOG_STDOUT_ENV,
};
pub use opts::{DEFAULT_CONFIG_PATH, Opts};
