use clap::{Parser, Subcommand};
use rankrelay::ReportKind;
use rankrelay::cli::commands;
use rankrelay::cli::util::CommandContext;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rankrelay")]
#[command(
    version,
    about = "Rate-limited, chunking LLM request orchestrator for search-performance reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short,
        global = true,
        help = "Use this config file instead of the global/project layers"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt to the completion service
    Complete {
        #[arg(long, help = "System prompt file ('-' for stdin)")]
        system: PathBuf,
        #[arg(long, help = "User prompt file ('-' for stdin)")]
        user: PathBuf,
        #[arg(
            long,
            short,
            default_value = "insight-list",
            help = "Report kind: record-list, insight-list"
        )]
        kind: ReportKind,
        #[arg(long, help = "Skip the response cache")]
        no_cache: bool,
        #[arg(long, help = "Require a JSON result and pretty-print it")]
        json: bool,
        #[arg(long, help = "Give up waiting after this many seconds")]
        timeout: Option<u64>,
    },

    /// Estimate the token cost of a prompt
    Estimate {
        #[arg(help = "Prompt file ('-' for stdin)")]
        input: PathBuf,
        #[arg(long, help = "Output as JSON")]
        json: bool,
    },

    /// Show how a prompt would be chunked, without sending it
    Plan {
        #[arg(help = "User prompt file ('-' for stdin)")]
        user: PathBuf,
        #[arg(long, help = "System prompt file, counted toward the budget")]
        system: Option<PathBuf>,
        #[arg(
            long,
            short,
            default_value = "insight-list",
            help = "Report kind: record-list, insight-list"
        )]
        kind: ReportKind,
        #[arg(long, help = "Output as JSON")]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mrankrelay encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let load_context = || CommandContext::load(cli.config.as_deref());

    match cli.command {
        Commands::Complete {
            system,
            user,
            kind,
            no_cache,
            json,
            timeout,
        } => {
            let ctx = load_context()?;
            commands::complete::run(
                &ctx,
                commands::complete::CompleteOptions {
                    system,
                    user,
                    kind,
                    no_cache,
                    json,
                    timeout_secs: timeout,
                    quiet: cli.quiet,
                },
            )?;
        }
        Commands::Estimate { input, json } => {
            let ctx = load_context()?;
            commands::estimate::run(&ctx, &input, json)?;
        }
        Commands::Plan {
            user,
            system,
            kind,
            json,
        } => {
            let ctx = load_context()?;
            commands::plan::run(
                &ctx,
                commands::plan::PlanOptions {
                    user,
                    system,
                    kind,
                    json,
                },
            )?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                let ctx = load_context()?;
                commands::config::show(&ctx, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
