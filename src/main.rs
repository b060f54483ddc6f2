use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use designforge::cli::commands::{batch::BatchOptions, generate::GenerateOptions};

#[derive(Parser)]
#[command(name = "designforge")]
#[command(
    version,
    about = "Multi-backend image generation with fallback and budget tracking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Load this config file instead of the global/project chain
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one image
    Generate {
        #[arg(help = "Prompt text")]
        prompt: String,
        #[arg(long, help = "Prompt id (default: derived from the prompt)")]
        id: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        steps: Option<u32>,
        #[arg(long, allow_hyphen_values = true, help = "Seed (-1 for random)")]
        seed: Option<i64>,
        #[arg(long, help = "Guidance scale")]
        guidance: Option<f64>,
        #[arg(long, help = "Negative prompt")]
        negative: Option<String>,
        #[arg(long = "param", short = 'p', help = "Extra backend parameter key=value")]
        params: Vec<String>,
        #[arg(long, short, help = "Output image path")]
        output: Option<PathBuf>,
    },

    /// Generate every request in a JSON file
    Batch {
        #[arg(help = "JSON array of requests")]
        file: PathBuf,
        #[arg(long, help = "Directory for generated images")]
        output_dir: Option<PathBuf>,
        #[arg(long, short, help = "Approve an over-budget batch without asking")]
        yes: bool,
        #[arg(long, help = "Disable the progress display")]
        no_progress: bool,
        #[arg(long, help = "Also write the cost history to this file")]
        cost_report: Option<PathBuf>,
    },

    /// Show backend availability and budget
    Status {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
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
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
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
        eprintln!("\x1b[31mDesignForge encountered an unexpected error:\x1b[0m");
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

        // Backtrace when RUST_BACKTRACE=1
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
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Generate {
            prompt,
            id,
            width,
            height,
            steps,
            seed,
            guidance,
            negative,
            params,
            output,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(designforge::cli::commands::generate::run(
                GenerateOptions {
                    prompt,
                    id,
                    width,
                    height,
                    steps,
                    seed,
                    guidance,
                    negative,
                    params,
                    output,
                },
                config_path,
            ))?;
        }
        Commands::Batch {
            file,
            output_dir,
            yes,
            no_progress,
            cost_report,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(designforge::cli::commands::batch::run(
                BatchOptions {
                    file,
                    output_dir,
                    yes,
                    no_progress,
                    cost_report,
                },
                config_path,
            ))?;
        }
        Commands::Status { format } => {
            let rt = Runtime::new()?;
            rt.block_on(designforge::cli::commands::status::run(&format, config_path))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                designforge::cli::commands::config::show(global, &format, config_path)?;
            }
            ConfigAction::Path => {
                designforge::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                if global {
                    designforge::cli::commands::config::init_global(force)?;
                } else {
                    designforge::cli::commands::config::init_project(force)?;
                }
            }
        },
    }

    Ok(())
}
