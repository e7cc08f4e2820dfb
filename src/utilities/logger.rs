//! A small async logger built on Tokio.
//!
//! Log calls never block: each record is pushed into a bounded mpsc channel and a
//! single background task writes it to the configured sink (an append-mode file or
//! stdout). The daemon installs one logger into `LOGGER_CELL` at startup and every
//! module logs through the global `LOGGER`.
//!
//! Example
//! -------
//!
//! ```no_run
//! use nextcloud_upload_daemon::utilities::logger::{init_logger, LogSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (logger, task) = init_logger(LogSink::File("daemon.log".into()))
//!         .await
//!         .expect("init logger");
//!
//!     logger.info("Starting Nextcloud Upload Daemon");
//!     logger.warn("Local directory does not exist: /srv/missing");
//!
//!     logger.shutdown().await;
//!     let _ = task.await;
//! }
//! ```

use crate::err::Result;
use crate::global_var::{LOGGER_CELL, PROCESS_NAME, debug_mode};
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_BOUND: usize = 1024;

/// Log level for messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Where the background writer puts log lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    File(PathBuf),
    Stdout,
}

/// A cheap, cloneable logger handle.
///
/// A handle without a channel is "detached": records are dropped, or echoed to
/// stderr in debug mode. `LOGGER` hands one out until a real logger is installed.
#[derive(Clone, Debug)]
pub struct AsyncLogger {
    tx: Option<mpsc::Sender<LogRecord>>,
    // echo records to the console in debug mode; off when the sink already is the console
    echo: bool,
}

static DETACHED_LOGGER: AsyncLogger = AsyncLogger {
    tx: None,
    echo: true,
};

impl AsyncLogger {
    fn log<S: Into<String>>(&self, level: LogLevel, msg: S) {
        let str_msg = msg.into();
        if self.echo && debug_mode() {
            eprintln!("{}: {}", level, &str_msg);
        }
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(LogRecord::new(level, str_msg)) {
            eprintln!("Failed to send log message: {}", err);
        }
    }

    /// Request the logger task to flush and shut down.
    pub async fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            // the task may already be gone
            let _ = tx.send(LogRecord::Shutdown).await;
        }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }

    pub fn trace<S: Into<String>>(&self, msg: S) {
        if debug_mode() {
            self.log(LogLevel::Trace, msg);
        }
    }
    pub fn debug<S: Into<String>>(&self, msg: S) {
        if debug_mode() {
            self.log(LogLevel::Debug, msg);
        }
    }
    pub fn info<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Info, msg);
    }
    pub fn warn<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Warn, msg);
    }
    pub fn error<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Error, msg);
    }
}

#[derive(Debug)]
enum LogRecord {
    Message {
        level: LogLevel,
        msg: String,
        ts: DateTime<Utc>,
    },
    Shutdown,
}

impl LogRecord {
    fn new(level: LogLevel, msg: String) -> Self {
        Self::Message {
            level,
            msg,
            ts: Utc::now(),
        }
    }

    fn format_line(&self) -> Option<String> {
        match self {
            // 2025-10-08T21:22:33.123Z nextcloud_upload_daemon[4242]: [INFO] message\n
            LogRecord::Message { level, msg, ts } => Some(format!(
                "{} {}[{}]: [{}] {}\n",
                ts.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                PROCESS_NAME,
                std::process::id(),
                level,
                msg
            )),
            LogRecord::Shutdown => None,
        }
    }
}

/// Initialize a logger for the given sink and return the handle plus the writer task.
pub async fn init_logger(sink: LogSink) -> Result<(AsyncLogger, JoinHandle<()>)> {
    match sink {
        LogSink::File(path) => init_file_logger(path).await,
        LogSink::Stdout => Ok(init_stdout_logger()),
    }
}

/// Initialize a file-based async logger. Returns the logger handle and the background task handle.
/// Dropping the last logger handle will close the channel and allow the task to shut down.
pub async fn init_file_logger<P: AsRef<Path>>(path: P) -> Result<(AsyncLogger, JoinHandle<()>)> {
    let path_buf = path.as_ref().to_path_buf();
    if let Some(parent) = path_buf.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path_buf)
        .await?;

    let (tx, mut rx) = mpsc::channel::<LogRecord>(CHANNEL_BOUND);
    let mut writer = BufWriter::new(file);

    let task = tokio::spawn(async move {
        while let Some(rec) = rx.recv().await {
            let Some(line) = rec.format_line() else {
                break;
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                // Reopen once (the file may have been rotated away) and retry the line.
                let _ = writer.flush().await;
                match OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path_buf)
                    .await
                {
                    Ok(new_file) => {
                        writer = BufWriter::new(new_file);
                        let _ = writer.write_all(line.as_bytes()).await;
                    }
                    Err(_) => {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }
                }
            }
        }
        let _ = writer.flush().await;
    });

    Ok((
        AsyncLogger {
            tx: Some(tx),
            echo: true,
        },
        task,
    ))
}

/// Initialize a logger that writes every line to stdout.
pub fn init_stdout_logger() -> (AsyncLogger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<LogRecord>(CHANNEL_BOUND);
    let task = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(rec) = rx.recv().await {
            let Some(line) = rec.format_line() else {
                break;
            };
            let _ = out.write_all(line.as_bytes()).await;
            let _ = out.flush().await;
        }
    });
    (
        AsyncLogger {
            tx: Some(tx),
            echo: false,
        },
        task,
    )
}

/// Accessor behind the global `LOGGER`.
pub struct Logger;

impl Deref for Logger {
    type Target = AsyncLogger;
    fn deref(&self) -> &Self::Target {
        LOGGER_CELL.get().unwrap_or(&DETACHED_LOGGER)
    }
}
