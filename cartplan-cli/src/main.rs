use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logging;
mod state;

#[derive(Parser, Debug)]
#[command(name = "cartplan", version, about = "Cartridge and plate scheduling for fibre-plug surveys")]
struct Cli {
    /// Configuration file (default: ~/.cartplan/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Plate and exposure tables shared by every command that reads a snapshot.
#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Plate table (CSV)
    #[arg(long)]
    plates: PathBuf,

    /// Exposure table (CSV)
    #[arg(long)]
    exposures: PathBuf,

    /// Cart states (CSV); otherwise derived from the plates' recorded carts
    #[arg(long)]
    carts: Option<PathBuf>,

    /// Plate list to leave out, one id per line
    #[arg(long)]
    ignore: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Completion and set status of every plate in a snapshot
    Status {
        #[command(flatten)]
        snapshot: SnapshotArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Regroup exposures into sets and report what changed
    Rearrange {
        #[command(flatten)]
        snapshot: SnapshotArgs,

        /// Also regroup complete sets
        #[arg(long)]
        all: bool,
    },

    /// Choose the plates to plug for one night
    Plug {
        #[command(flatten)]
        snapshot: SnapshotArgs,

        /// Night to plan, by the local date of its evening
        #[arg(long, conflicts_with_all = ["start_jd", "end_jd"])]
        date: Option<NaiveDate>,

        #[arg(long, requires = "end_jd")]
        start_jd: Option<f64>,

        #[arg(long, requires = "start_jd")]
        end_jd: Option<f64>,

        /// Plan an APOGEE night instead of a MaNGA one
        #[arg(long)]
        apogee: bool,

        /// Write the plugging file here instead of printing it
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Simulate the survey over a date range and forecast plate completion
    Plan {
        #[command(flatten)]
        snapshot: SnapshotArgs,

        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        /// Survey schedule blocks (CSV); otherwise every night uses the configured hours
        #[arg(long)]
        blocks: Option<PathBuf>,

        /// Monte Carlo trials, one seed each
        #[arg(long, default_value_t = 1)]
        trials: usize,

        /// Seed of the first trial (default: planner.seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for forecast.txt and forecast.json (default: ~/.cartplan/out)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Config { command } => match command {
            ConfigCommand::Init { force } => config::init_config(config_path, force)?,
            ConfigCommand::Show => {
                let cfg = config::load_config(config_path)?;
                print!("{}", toml::to_string_pretty(&cfg)?);
            }
        },

        Command::Status { snapshot, json } => {
            let cfg = config::load_config(config_path)?;
            let snap = commands::load(&cfg, &snapshot)?;
            commands::status(&cfg, &snap, json)?;
        }

        Command::Rearrange { snapshot, all } => {
            let cfg = config::load_config(config_path)?;
            let mut snap = commands::load(&cfg, &snapshot)?;
            commands::rearrange(&cfg, &mut snap, all)?;
        }

        Command::Plug {
            snapshot,
            date,
            start_jd,
            end_jd,
            apogee,
            out,
        } => {
            let cfg = config::load_config(config_path)?;
            let mut snap = commands::load(&cfg, &snapshot)?;
            let window = commands::night_window(&cfg, date, start_jd.zip(end_jd), apogee)?;
            commands::plug(&cfg, &mut snap, &window, out.as_deref())?;
        }

        Command::Plan {
            snapshot,
            start,
            end,
            blocks,
            trials,
            seed,
            out,
        } => {
            let cfg = config::load_config(config_path)?;
            let snap = commands::load(&cfg, &snapshot)?;
            let request = commands::PlanRequest {
                start,
                end,
                blocks,
                trials,
                seed,
                out,
            };
            commands::plan(&cfg, &snap, &request)?;
        }
    }

    Ok(())
}
