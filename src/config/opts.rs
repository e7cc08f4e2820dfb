use std::path::PathBuf;
use structopt::StructOpt;
use structopt::clap::ErrorKind;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nextcloud_upload_daemon.toml";

/// Command-line options for the daemon.
///
/// Examples:
/// - Run with a specific config file:
///   cargo run -- --config daemon.toml
/// - Show version:
///   cargo run -- --version
#[derive(StructOpt, Debug)]
#[structopt(
    name = "nextcloud_upload_daemon",
    about = "Uploads settled files to Nextcloud and cleans up local copies"
)]
pub struct Opts {
    #[structopt(short = "v", long = "version")]
    pub version: bool,

    #[structopt(short, long, help = "Enable debug mode (verbose logging)")]
    pub debug: bool,

    #[structopt(
        short = "c",
        long = "config",
        default_value = "/etc/nextcloud_upload_daemon.toml",
        parse(from_os_str),
        help = "Path to the configuration file."
    )]
    pub config: PathBuf,
}

impl Opts {
    /// Parse CLI arguments. If parsing fails, print the error and the full help, then exit.
    pub fn from_args() -> Self {
        let app = Opts::clap();
        match app.get_matches_safe() {
            Ok(m) => Opts::from_clap(&m),
            Err(e) => {
                let kind = e.kind;
                eprintln!("{}", e);
                let mut app = Opts::clap();
                eprintln!();
                let _ = app.print_long_help();
                eprintln!();
                std::process::exit(match kind {
                    ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => 0,
                    _ => 2,
                });
            }
        }
    }
}
