use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use ipatool::appstore::{DEFAULT_VERSION_COUNT, VersionOrder, VersionSelection};
use ipatool::commands::{self, DownloadArgs, Session};
use ipatool::config::{Config, OutputFormat};
use ipatool::error::StoreError;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ipatool")]
#[command(author, version, about = "Search, license and download iOS app packages from the App Store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text, env = "IPATOOL_FORMAT")]
    format: OutputFormat,

    /// Never prompt for input
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Directory holding the stored account (default: ~/.ipatool)
    #[arg(long, global = true, env = "IPATOOL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Device GUID to use instead of one derived from the MAC address
    #[arg(long, global = true, env = "IPATOOL_GUID")]
    guid: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with the App Store
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Look up an app by bundle identifier
    Lookup {
        #[arg(short = 'b', long = "bundle-identifier")]
        bundle_id: String,
    },

    /// Search for apps
    Search {
        /// Search term
        term: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 5)]
        limit: u32,
    },

    /// Obtain a license for a free app
    Purchase {
        #[arg(short = 'b', long = "bundle-identifier")]
        bundle_id: String,
    },

    /// Download an app package
    Download {
        #[command(flatten)]
        target: AppTarget,

        /// Destination file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Obtain a license first if the account does not own one
        #[arg(long)]
        purchase: bool,

        /// Do nothing if the destination file already exists
        #[arg(long)]
        skip_existing: bool,

        /// Download a specific historical build
        #[arg(long)]
        external_version_id: Option<String>,
    },

    /// List external version identifiers of an app
    ListVersions {
        #[command(flatten)]
        target: AppTarget,
    },

    /// Show version history with display versions
    VersionHistory {
        #[command(flatten)]
        target: AppTarget,

        /// Fetch every version
        #[arg(long, conflicts_with = "max_count")]
        all: bool,

        /// Maximum number of versions to resolve (0 means the default)
        #[arg(short = 'n', long, default_value_t = DEFAULT_VERSION_COUNT)]
        max_count: usize,

        /// List oldest versions first
        #[arg(long)]
        oldest_first: bool,
    },

    /// Show the display version and release date of a build
    GetVersionMetadata {
        #[command(flatten)]
        target: AppTarget,

        #[arg(long)]
        external_version_id: String,
    },

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Log in with an Apple ID
    Login {
        #[arg(short, long)]
        email: String,

        /// Prompted for when omitted
        #[arg(short, long, env = "IPATOOL_PASSWORD")]
        password: Option<String>,

        /// 2FA code
        #[arg(long)]
        auth_code: Option<String>,
    },

    /// Show the stored account
    Info,

    /// Remove the stored account
    Revoke,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct AppTarget {
    #[arg(short = 'i', long)]
    app_id: Option<u64>,

    #[arg(short = 'b', long = "bundle-identifier")]
    bundle_id: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    init_colors(cli.format);

    let format = cli.format;
    if let Err(err) = run(cli).await {
        let metadata = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<StoreError>())
            .and_then(StoreError::metadata);
        if let Some(metadata) = metadata {
            debug!(
                response = %serde_json::to_string(metadata).unwrap_or_default(),
                "server response"
            );
        }

        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "success": false, "error": format!("{err:#}") })
            ),
            OutputFormat::Text => eprintln!("{} {:#}", "Error:".red().bold(), err),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ipatool", &mut std::io::stdout());
        return Ok(());
    }

    let config = Config::new(cli.config_dir, cli.format, cli.non_interactive, cli.guid);
    let session = Session::new(config)?;

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login {
                email,
                password,
                auth_code,
            } => commands::login(&session, &email, password, auth_code).await?,
            AuthCommands::Info => commands::auth_info(&session)?,
            AuthCommands::Revoke => commands::revoke(&session)?,
        },
        Commands::Lookup { bundle_id } => commands::lookup(&session, &bundle_id).await?,
        Commands::Search { term, limit } => commands::search(&session, &term, limit).await?,
        Commands::Purchase { bundle_id } => commands::purchase(&session, &bundle_id).await?,
        Commands::Download {
            target,
            output,
            purchase,
            skip_existing,
            external_version_id,
        } => {
            let args = DownloadArgs {
                app_id: target.app_id,
                bundle_id: target.bundle_id,
                output,
                purchase,
                skip_existing,
                external_version_id,
            };
            commands::download(&session, args).await?;
        }
        Commands::ListVersions { target } => {
            commands::list_versions(&session, target.app_id, target.bundle_id.as_deref()).await?;
        }
        Commands::VersionHistory {
            target,
            all,
            max_count,
            oldest_first,
        } => {
            let selection = if all {
                VersionSelection::All
            } else {
                VersionSelection::Latest(max_count)
            };
            let order = if oldest_first {
                VersionOrder::OldestFirst
            } else {
                VersionOrder::NewestFirst
            };
            commands::version_history(
                &session,
                target.app_id,
                target.bundle_id.as_deref(),
                selection,
                order,
            )
            .await?;
        }
        Commands::GetVersionMetadata {
            target,
            external_version_id,
        } => {
            commands::get_version_metadata(
                &session,
                target.app_id,
                target.bundle_id.as_deref(),
                &external_version_id,
            )
            .await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise warnings only, or debug output for ipatool
/// itself with `--verbose`. Logs go to stderr.
fn init_logging(verbose: bool) {
    let default = if verbose { "warn,ipatool=debug" } else { "warn" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Honors NO_COLOR and CLICOLOR_FORCE; otherwise colors only on a terminal
/// and never in JSON mode.
fn init_colors(format: OutputFormat) {
    if format == OutputFormat::Json || std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
        return;
    }

    if std::env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0") {
        colored::control::set_override(true);
        return;
    }

    colored::control::set_override(std::io::stdout().is_terminal());
}
