use nextcloud_upload_daemon::config::{Config, Opts};
use nextcloud_upload_daemon::core::{
    EventRouter, SchedulerConfig, StabilityScheduler, TokioClock, dispatch_events,
};
use nextcloud_upload_daemon::err::Result;
use nextcloud_upload_daemon::fs::{EventFilter, FsListener};
use nextcloud_upload_daemon::global_var::{LOGGER, LOGGER_CELL, enable_debug_mode};
use nextcloud_upload_daemon::network::NextcloudClient;
use nextcloud_upload_daemon::utilities::init_logger;
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn print_version_and_exit() -> ! {
    // These are set by build.rs; fall back to unknown if missing
    let pkg_version = env!("CARGO_PKG_VERSION");
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let state = option_env!("GIT_STATE").unwrap_or("unknown");
    let built = option_env!("BUILD_TIME").unwrap_or("unknown time");
    println!(
        "nextcloud_upload_daemon {} (commit: {}, state: {}, built: {})",
        pkg_version, commit, state, built
    );
    std::process::exit(0)
}

async fn run(config: Config) -> Result<()> {
    let client = NextcloudClient::new(&config.nextcloud_server, &config.username, &config.password)?;
    client.test_connection().await?;
    LOGGER.info(format!(
        "Connected to Nextcloud server {} as {}",
        config.nextcloud_server, config.username
    ));

    let mappings = config.watch_mappings()?;
    let roots: Vec<_> = mappings.iter().map(|m| m.local_root().to_path_buf()).collect();
    let (listener, rx) = FsListener::watch(roots.as_slice(), EventFilter::new(config.ignore_regexes()?))?;

    let clock = Arc::new(TokioClock::new());
    let scheduler = StabilityScheduler::new(
        SchedulerConfig {
            upload_debounce: config.upload_delay(),
            delete_debounce: config.delete_delay(),
        },
        clock.clone(),
        Arc::new(client),
    );
    let dispatcher = tokio::spawn(dispatch_events(rx, EventRouter::new(mappings), scheduler.clone()));

    LOGGER.info(format!(
        "Daemon started (upload delay {}s, delete delay {}s)",
        config.upload_delay_seconds, config.delete_delay_seconds
    ));

    tokio::signal::ctrl_c().await?;
    LOGGER.info("Received shutdown signal, stopping");

    drop(listener);
    if let Err(e) = dispatcher.await {
        LOGGER.error(format!("Event dispatcher ended abnormally: {}", e));
    }
    clock.shutdown(SHUTDOWN_GRACE).await;
    LOGGER.info(format!(
        "Stopped with {} tracked files",
        scheduler.store().len()
    ));
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    if opts.version {
        print_version_and_exit();
    }
    if opts.debug {
        enable_debug_mode();
    }

    let config = match Config::from_config(&opts.config.to_string_lossy()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let logger_task = match init_logger(config.log_sink()).await {
        Ok((logger, task)) => {
            let _ = LOGGER_CELL.set(logger);
            Some(task)
        }
        Err(e) => {
            eprintln!("Failed to initialize logger: {}", e);
            None
        }
    };

    let outcome = run(config).await;
    if let Err(e) = &outcome {
        LOGGER.error(format!("{}", e));
    }

    LOGGER.shutdown().await;
    if let Some(task) = logger_task {
        let _ = task.await;
    }
    if outcome.is_err() {
        std::process::exit(1);
    }
}
