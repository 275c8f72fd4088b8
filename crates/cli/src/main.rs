mod scripts;

use clap::{Args, Parser, Subcommand};
use nubot::config::{load_config, Config};
use nubot::{Robot, RobotEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nubot")]
#[command(about = "Nubot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the robot on the configured adapter (the default when no command is given).
    Run(RunArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Config file path (default: NUBOT_CONFIG_PATH or ~/.nubot/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Robot name
    #[arg(long, short)]
    name: Option<String>,

    /// Alternate name the robot answers to
    #[arg(long = "alias", short = 'l')]
    alias: Option<String>,

    /// Adapter to use (built in: shell)
    #[arg(long, short)]
    adapter: Option<String>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl RunArgs {
    fn apply(self, config: &mut Config) {
        if let Some(name) = self.name {
            config.robot.name = name;
        }
        if let Some(alias) = self.alias {
            config.robot.alias = Some(alias);
        }
        if let Some(adapter) = self.adapter {
            config.adapter = adapter;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("nubot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run(args)) => run_or_exit(args).await,
        None => run_or_exit(RunArgs::default()).await,
    }
}

async fn run_or_exit(args: RunArgs) {
    if let Err(e) = run(args).await {
        eprintln!("nubot: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(mut args: RunArgs) -> anyhow::Result<()> {
    let (mut config, path) = load_config(args.config.take())?;
    config.apply_env_overrides();
    args.apply(&mut config);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    // load_config ran before the logger existed; report where config came from now.
    log::debug!("{}", config_source(&path));

    let robot = Robot::from_config(&config)?;
    scripts::load(&robot)?;
    log::info!(
        "{} loaded {} listeners on the {} adapter",
        robot.name(),
        robot.listener_count(),
        robot.adapter().name()
    );

    watch_events(&robot);
    shutdown_on_ctrl_c(&robot);

    robot.run().await?;
    Ok(())
}

fn config_source(path: &Path) -> String {
    if path.exists() {
        format!("using config {}", path.display())
    } else {
        format!("config file not found, using defaults: {}", path.display())
    }
}

fn watch_events(robot: &Arc<Robot>) {
    let mut events = robot.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RobotEvent::Connected => log::info!("adapter connected"),
                RobotEvent::Shutdown => log::info!("shutting down"),
                RobotEvent::Running => log::debug!("robot running"),
            }
        }
    });
}

fn shutdown_on_ctrl_c(robot: &Arc<Robot>) {
    let robot = Arc::clone(robot);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => robot.shutdown(),
            Err(e) => log::warn!("cannot listen for ctrl-c: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_source_reports_missing_file() {
        let path = std::env::temp_dir().join("nubot-cli-no-such-config.json");
        assert_eq!(
            config_source(&path),
            format!("config file not found, using defaults: {}", path.display())
        );
        let here = std::env::temp_dir();
        assert!(config_source(&here).starts_with("using config "));
    }

    #[test]
    fn run_args_override_config() {
        let mut config = Config::default();
        let args = RunArgs {
            name: Some("Hal".into()),
            alias: Some("/".into()),
            log_level: Some("debug".into()),
            ..RunArgs::default()
        };
        args.apply(&mut config);
        assert_eq!(config.robot.name, "Hal");
        assert_eq!(config.alias(), Some("/"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.adapter, "shell");
    }
}
