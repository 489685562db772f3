//! URFab command-line client
//!
//! Runs fabrication command files and queries robot state. Without a
//! subcommand it prints the current tool frame.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use urfab::{parse_commands, Config, UrRobot};

#[derive(Parser)]
#[command(name = "urfab")]
#[command(about = "Execute fabrication command sequences on Universal Robots arms")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Robot address, overrides the configured host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current tool frame
    Pose,
    /// Print the current joint configuration
    Joints,
    /// Execute a JSON command file and wait for the session report
    Run {
        /// JSON array of commands
        file: String,
    },
    /// Halt robot motion
    Stop,
    /// Read or write a standard digital output
    Io {
        #[command(subcommand)]
        action: IoAction,
    },
    /// Enter or leave teach mode
    Teach {
        #[command(subcommand)]
        action: TeachAction,
    },
}

#[derive(Subcommand)]
enum IoAction {
    Get { signal: u8 },
    Set {
        signal: u8,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
        /// Use the tool connector outputs
        #[arg(long)]
        tool: bool,
    },
}

#[derive(Subcommand)]
enum TeachAction {
    Start,
    Stop,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .or_else(|| std::env::var("URFAB_CONFIG").ok());

        let mut config = match path {
            Some(path) => Config::load_from_path(&path).with_context(|| format!("Failed to load config {}", path))?,
            None => Config::default(),
        };
        if let Some(host) = &self.host {
            config.robot.host = host.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "urfab=debug" } else { "urfab=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = args.load_config()?;
    info!("Robot: {}", config.robot.host);
    let robot = UrRobot::from_config(&config);

    match args.command.unwrap_or(Commands::Pose) {
        Commands::Pose => {
            let frame = robot.get_tcp_frame().await.context("Failed to read tool pose")?;
            println!("{}", serde_json::to_string_pretty(&frame)?);
        }
        Commands::Joints => {
            let joints = robot.get_config().await.context("Failed to read joint positions")?;
            println!("{}", serde_json::to_string_pretty(&joints)?);
        }
        Commands::Run { file } => {
            let contents = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file))?;
            let commands = parse_commands(&contents).context("Invalid command file")?;
            info!("Submitting {} commands from {}", commands.len(), file);

            let report = robot.send_commands(commands).wait().await?;
            println!(
                "{}",
                serde_json::json!({
                    "session": report.id.to_string(),
                    "state": format!("{:?}", report.state),
                    "groups": report.groups,
                    "groups_dispatched": report.groups_dispatched,
                    "error": report.error,
                    "started_at": report.started_at.to_rfc3339(),
                    "finished_at": report.finished_at.to_rfc3339(),
                })
            );
            if !report.is_completed() {
                error!("Session did not complete");
                std::process::exit(1);
            }
        }
        Commands::Stop => {
            robot.stop().await.context("Failed to halt robot")?;
            info!("Robot halted");
        }
        Commands::Io { action } => match action {
            IoAction::Get { signal } => {
                let value = robot.get_digital_io(signal).await?;
                println!("{}", value);
            }
            IoAction::Set { signal, value, tool } => {
                if tool {
                    robot.set_tool_digital_io(signal, value).await?;
                } else {
                    robot.set_digital_io(signal, value).await?;
                }
                info!("Digital output {} set to {}", signal, value);
            }
        },
        Commands::Teach { action } => match action {
            TeachAction::Start => robot.start_teach_mode().await?,
            TeachAction::Stop => robot.stop_teach_mode().await?,
        },
    }

    Ok(())
}
