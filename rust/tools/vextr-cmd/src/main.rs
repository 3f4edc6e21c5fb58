use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logger;

#[derive(Parser)]
#[command(name = "vextr-cmd")]
#[command(about = "Command-line driver for the vextr containers and coroutine scheduler")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one coroutine per duration; each sleeps that long and reports when it woke
    Sleepers {
        /// Sleep durations in milliseconds
        #[arg(required = true)]
        millis: Vec<u64>,
    },

    /// Bounce a counter between two coroutines over a pair of pipes
    PingPong {
        /// Number of round trips
        #[arg(short, long, default_value_t = 10)]
        rounds: u32,

        /// Give up on a round trip after this many milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Grow a small-buffer vector past its embedded capacity and report storage changes
    Vector {
        /// Number of elements to append
        #[arg(short, long, default_value_t = 20)]
        count: usize,
    },

    /// Load the lines of a text file into small-buffer strings
    Strings {
        /// Text file to read
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose)?;

    match cli.command {
        Commands::Sleepers { millis } => commands::sleepers::run(millis),
        Commands::PingPong { rounds, timeout_ms } => commands::ping_pong::run(rounds, timeout_ms),
        Commands::Vector { count } => commands::vector::run(count),
        Commands::Strings { path } => commands::strings::run(&path).map(|report| print!("{report}")),
    }
}
