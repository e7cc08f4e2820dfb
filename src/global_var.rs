use crate::utilities::AsyncLogger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, OnceLock};

pub static LOGGER_CELL: OnceLock<AsyncLogger> = OnceLock::new();
pub static LOGGER: crate::utilities::logger::Logger = crate::utilities::logger::Logger;

pub static DEBUG_MODE: LazyLock<AtomicBool> = LazyLock::new(|| {
    let env_var = std::env::var("DEBUG_MODE").unwrap_or_default();
    AtomicBool::new(env_var == "1" || env_var == "true")
});

/// Name stamped on every log line.
pub const PROCESS_NAME: &str = "nextcloud_upload_daemon";

pub fn debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Turn on debug logging for the rest of the process (the `--debug` flag).
pub fn enable_debug_mode() {
    DEBUG_MODE.store(true, Ordering::Relaxed);
}
