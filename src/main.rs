use clap::{Parser, Subcommand};
use color_eyre::Result;
use kalico_flash::commands;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(about = "Build and flash Kalico/Klipper firmware onto USB-attached printer MCUs")]
struct Cli {
    /// Stream subprocess and informational output instead of just phase
    /// headers and results.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the registry file, overriding the XDG-derived default.
    #[arg(long, global = true)]
    registry_path: Option<camino::Utf8PathBuf>,

    /// Never prompt; fail safety checks that would otherwise ask for
    /// confirmation instead of blocking on input.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Flash one registered device.
    Flash(commands::flash::Flash),
    /// Flash every connected, eligible registered device.
    FlashAll(commands::flash_all::FlashAll),
    /// List registered devices and their connection status.
    List(commands::list::List),
    /// Register a new device.
    Add(commands::add::Add),
    /// Edit an existing device's registry entry.
    Edit(commands::edit::Edit),
    /// Remove a device from the registry.
    Remove(commands::remove::Remove),
    /// View or edit global configuration.
    Config(commands::config::Config),
    /// Show discovered USB devices and Moonraker status.
    Status(commands::status::Status),
}

/// Exit codes distinguishing clean success, user-input error, internal
/// error, and interruption.
const EXIT_OK: i32 = 0;
const EXIT_USER_ERROR: i32 = 1;
const EXIT_INTERNAL_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    // A Ctrl-C only requests cancellation; it never drops the command
    // future. Dropping it mid-flight would tear down a `with_service_stopped`
    // scope before its restart step ever polls, leaving the printer daemon
    // stopped. The command observes `cancel` itself and winds down instead.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let ctx = commands::GlobalArgs {
        verbose: cli.verbose,
        registry_path: cli.registry_path,
        assume_yes: cli.yes,
        cancel: cancel.clone(),
    };

    let result = match cli.command {
        Commands::Flash(c) => c.run(&ctx).await,
        Commands::FlashAll(c) => c.run(&ctx).await,
        Commands::List(c) => c.run(&ctx).await,
        Commands::Add(c) => c.run(&ctx).await,
        Commands::Edit(c) => c.run(&ctx).await,
        Commands::Remove(c) => c.run(&ctx).await,
        Commands::Config(c) => c.run(&ctx).await,
        Commands::Status(c) => c.run(&ctx).await,
    };

    if cancel.is_cancelled() {
        if let Err(report) = result {
            eprintln!("{report:?}");
        }
        std::process::exit(EXIT_INTERRUPTED);
    }

    match result {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(report) => {
            eprintln!("{report:?}");
            let code = if report.downcast_ref::<kalico_flash::error::KalicoError>().is_some() {
                EXIT_USER_ERROR
            } else {
                EXIT_INTERNAL_ERROR
            };
            std::process::exit(code);
        }
    }
}
