mod commands;
mod config;
mod http;
mod server;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    Edit, cmd_edit, cmd_history, cmd_protocol_set, cmd_status, cmd_workout_plan, parse_date,
};
use crate::config::Config;
use crate::http::HttpRemoteStore;
use rollin_core::models::MuscleGroup;
use rollin_core::remote::{PlanStore, RemoteStore};
use rollin_core::store::LocalStore;

#[derive(Parser)]
#[command(
    name = "rollin",
    version,
    about = "Track protocol compliance, workouts, and muscle soreness",
    long_about = "Track protocol compliance, workouts, and muscle soreness.\n\n\
        Edits are applied locally at once and written in the background; \
        an edit the store refuses is rolled back and reported."
)]
struct Cli {
    /// Use a `rollin serve` instance instead of the local database
    #[arg(long, global = true, value_name = "URL")]
    remote: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the day's protocol food list
    Protocol {
        #[command(subcommand)]
        command: ProtocolCommands,
    },
    /// Mark a protocol food as eaten
    Check {
        /// Food name, as it appears in the protocol
        food: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a protocol food as not eaten
    Uncheck {
        /// Food name, as it appears in the protocol
        food: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record muscle soreness
    Soreness {
        #[command(subcommand)]
        command: SorenessCommands,
    },
    /// Plan and log workouts
    Workout {
        #[command(subcommand)]
        command: WorkoutCommands,
    },
    /// Show the day: checklist, workout, soreness, scores, and streak
    Status {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show adherence for the last N days
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "7", value_parser = clap::value_parser!(u32).range(1..=365))]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server over the local database
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum ProtocolCommands {
    /// Set the day's food list (keeps eaten state for foods already listed)
    Set {
        /// Foods, in order
        #[arg(required = true)]
        foods: Vec<String>,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SorenessCommands {
    /// Set soreness for a muscle group (0-10)
    Set {
        /// chest, back, shoulders, legs, core, or arms
        group: MuscleGroup,
        /// Intensity from 0 (none) to 10
        #[arg(value_parser = clap::value_parser!(u8).range(0..=10))]
        intensity: u8,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WorkoutCommands {
    /// Set the day's exercise list (keeps completion for exercises already listed)
    Plan {
        /// Exercises, in order
        #[arg(required = true)]
        exercises: Vec<String>,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an exercise as done
    Done {
        /// Exercise name, as it appears in the plan
        exercise: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an exercise as not done
    Undo {
        /// Exercise name, as it appears in the plan
        exercise: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log rate of perceived exertion (1-10)
    Rpe {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=10))]
        rpe: u8,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Predict how sore a muscle group will be after this workout (0-10)
    Predict {
        /// chest, back, shoulders, legs, core, or arms
        group: MuscleGroup,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=10))]
        intensity: u8,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    let command = match cli.command {
        Commands::Serve { port, bind } => {
            if cli.remote.is_some() {
                bail!("serve always uses the local database; drop --remote");
            }
            let store = LocalStore::open(&config.db_path)?;
            return server::start_server(store, port, &bind).await;
        }
        command => command,
    };

    match cli.remote.or_else(|| config.remote.clone()) {
        Some(url) => {
            let store = Arc::new(HttpRemoteStore::new(&url)?);
            dispatch(store, &config, command).await
        }
        None => {
            let store = Arc::new(LocalStore::open(&config.db_path)?);
            dispatch(store, &config, command).await
        }
    }
}

async fn apply<S: RemoteStore>(
    store: Arc<S>,
    config: &Config,
    date: Option<String>,
    edit: Edit,
    json: bool,
) -> Result<()> {
    cmd_edit(store, config.sync, parse_date(date)?, edit, json).await
}

async fn dispatch<S: RemoteStore + PlanStore>(
    store: Arc<S>,
    config: &Config,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Protocol {
            command: ProtocolCommands::Set { foods, date, json },
        } => cmd_protocol_set(store.as_ref(), parse_date(date)?, foods, json).await,
        Commands::Check { food, date, json } => {
            let check = Edit::Food {
                name: food,
                consumed: true,
            };
            apply(store, config, date, check, json).await
        }
        Commands::Uncheck { food, date, json } => {
            let uncheck = Edit::Food {
                name: food,
                consumed: false,
            };
            apply(store, config, date, uncheck, json).await
        }
        Commands::Soreness {
            command:
                SorenessCommands::Set {
                    group,
                    intensity,
                    date,
                    json,
                },
        } => apply(store, config, date, Edit::Soreness { group, intensity }, json).await,
        Commands::Workout { command } => match command {
            WorkoutCommands::Plan {
                exercises,
                date,
                json,
            } => cmd_workout_plan(store.as_ref(), parse_date(date)?, exercises, json).await,
            WorkoutCommands::Done {
                exercise,
                date,
                json,
            } => {
                let done = Edit::Exercise {
                    name: exercise,
                    done: true,
                };
                apply(store, config, date, done, json).await
            }
            WorkoutCommands::Undo {
                exercise,
                date,
                json,
            } => {
                let undo = Edit::Exercise {
                    name: exercise,
                    done: false,
                };
                apply(store, config, date, undo, json).await
            }
            WorkoutCommands::Rpe { rpe, date, json } => {
                apply(store, config, date, Edit::Rpe(rpe), json).await
            }
            WorkoutCommands::Predict {
                group,
                intensity,
                date,
                json,
            } => {
                let predict = Edit::Prediction { group, intensity };
                apply(store, config, date, predict, json).await
            }
        },
        Commands::Status { date, json } => {
            cmd_status(store, config.sync, parse_date(date)?, json).await
        }
        Commands::History { days, json } => cmd_history(store.as_ref(), days, json).await,
        Commands::Serve { .. } => bail!("serve always uses the local database"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_edits() {
        let cli = Cli::try_parse_from(["rollin", "soreness", "set", "legs", "7", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Soreness {
                command: SorenessCommands::Set {
                    group: MuscleGroup::Legs,
                    intensity: 7,
                    json: true,
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_cli_rejects_out_of_range_intensity() {
        assert!(Cli::try_parse_from(["rollin", "soreness", "set", "legs", "11"]).is_err());
        assert!(Cli::try_parse_from(["rollin", "workout", "rpe", "0"]).is_err());
        assert!(Cli::try_parse_from(["rollin", "soreness", "set", "neck", "3"]).is_err());
    }

    #[test]
    fn test_remote_flag_is_global() {
        let cli = Cli::try_parse_from(["rollin", "status", "--remote", "http://host:8080"]).unwrap();
        assert_eq!(cli.remote.as_deref(), Some("http://host:8080"));
    }

    #[test]
    fn test_protocol_requires_foods() {
        assert!(Cli::try_parse_from(["rollin", "protocol", "set"]).is_err());
    }
}
