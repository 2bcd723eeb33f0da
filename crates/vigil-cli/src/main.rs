use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Vigil prayer slot CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Slot assignment and lifecycle
    Slot {
        #[command(subcommand)]
        action: commands::slot::SlotAction,
    },
    /// Record attendance for one occurrence
    Attend(commands::attend::AttendArgs),
    /// Streaks, monthly sessions and coverage
    Stats {
        #[command(subcommand)]
        action: commands::stats::StatsAction,
    },
    /// Time until the next start of a window
    Countdown(commands::countdown::CountdownArgs),
    /// Expire skips, close out missed occurrences, release lapsed slots
    Maintain,
    /// Run the reminder and fallback tick until interrupted
    Watch(commands::watch::WatchArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vigil=info,vigil_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Slot { action } => commands::slot::run(action),
        Commands::Attend(args) => commands::attend::run(args),
        Commands::Stats { action } => commands::stats::run(action),
        Commands::Countdown(args) => commands::countdown::run(args),
        Commands::Maintain => commands::maintain::run(),
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
