mod config;
mod fleet_cmd;
mod output;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use hookfleet_core::RunOptions;
use hookfleet_core::bridge::AdbBridge;

use config::Overrides;
use fleet_cmd::FleetCommand;

#[derive(Parser)]
#[command(
    name = "hookfleet",
    version,
    about = "Instrument an app across every attached Android device"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Config file (defaults to ~/.config/hookfleet/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to the adb binary (overrides HOOKFLEET_ADB)
    #[arg(long, global = true)]
    adb: Option<String>,
    /// Path to the frida binary (overrides HOOKFLEET_AGENT)
    #[arg(long, global = true)]
    agent: Option<String>,
    /// Timeout for each device command in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Print the final report as JSON instead of status lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct SettleArgs {
    /// Wait the whole settle window instead of polling the process table
    #[arg(long)]
    blind_settle: bool,
    /// Settle window after stopping or starting the server, in seconds
    #[arg(long)]
    settle_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restart the server, launch the app and attach the agent on every device
    Run {
        /// Push the server binary before restarting it
        #[arg(long)]
        deploy: bool,
        /// Push the payload file to every device first
        #[arg(long)]
        push_payload: bool,
        #[command(flatten)]
        settle: SettleArgs,
        /// Delay between launching apps and attaching, in seconds
        #[arg(long)]
        launch_settle_secs: Option<u64>,
        /// Exit after attaching instead of holding the agent sessions open
        #[arg(long)]
        no_hold: bool,
    },
    /// List attached devices
    Devices {
        /// Also query each device's screen size
        #[arg(long)]
        screen: bool,
    },
    /// Push the server binary and make it executable
    Deploy,
    /// Look for the server in each device's process table
    Find,
    /// Start the server
    Start,
    /// Stop the server
    Stop,
    /// Stop, verify, start, verify
    Restart {
        #[command(flatten)]
        settle: SettleArgs,
    },
    /// Launch the app
    Launch,
    /// Kill the app
    Kill,
    /// Attach the agent to the running app
    Attach {
        /// Exit after attaching instead of holding the agent sessions open
        #[arg(long)]
        no_hold: bool,
    },
    /// Push the payload file to every device
    PushPayload,
    /// Tap the configured point on every device's screen
    Tap,
    /// Write a default config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            adb: self.adb.clone(),
            agent: self.agent.clone(),
            timeout_secs: self.timeout_secs,
            ..Overrides::default()
        }
    }
}

/// Execute the `hookfleet init` command: write config file.
fn cmd_init(explicit: Option<&std::path::Path>, force: bool) -> anyhow::Result<()> {
    let path = explicit.map(PathBuf::from).unwrap_or_else(config::config_path);
    config::write_default_config(&path, force)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next: set the [target] names (or APP_NAME, PACKAGE_NAME and");
    println!("LOCAL_FRIDA_SERVER_NAME), then run `hookfleet run --deploy`.");
    Ok(())
}

/// Execute the `hookfleet devices` command. Needs no target names.
async fn cmd_devices(global: &GlobalArgs, screen: bool) -> anyhow::Result<ExitCode> {
    let file = config::load_for(global.config.as_deref())?;
    let env = |var: &str| std::env::var(var).ok();
    let overrides = global.overrides();
    let tools = config::resolve_tools(file.as_ref(), &env, &overrides);
    let timeout = config::resolve_command_timeout(file.as_ref(), &overrides);

    let bridge = AdbBridge::new(tools.adb).with_timeout(timeout);
    let code = fleet_cmd::list_devices(&bridge, screen, global.json).await?;
    Ok(ExitCode::from(code))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    let fleet = |command: FleetCommand, overrides: Overrides| {
        let global = global.clone();
        async move {
            let config = config::resolve(global.config.as_deref(), &overrides)?;
            fleet_cmd::run(config, global.json, command).await
        }
    };

    match cli.command {
        Commands::Init { force } => {
            cmd_init(global.config.as_deref(), force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "hookfleet",
                &mut std::io::stdout(),
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Devices { screen } => cmd_devices(&global, screen).await,
        Commands::Run {
            deploy,
            push_payload,
            settle,
            launch_settle_secs,
            no_hold,
        } => {
            let overrides = Overrides {
                settle_secs: settle.settle_secs,
                blind_settle: settle.blind_settle,
                launch_settle_secs,
                ..global.overrides()
            };
            let config = config::resolve(global.config.as_deref(), &overrides)?;
            let options = RunOptions {
                deploy,
                push_payload,
            };
            run_cmd::run(config, global.json, options, !no_hold).await
        }
        Commands::Restart { settle } => {
            let overrides = Overrides {
                settle_secs: settle.settle_secs,
                blind_settle: settle.blind_settle,
                ..global.overrides()
            };
            fleet(FleetCommand::Restart, overrides).await
        }
        Commands::Deploy => fleet(FleetCommand::Deploy, global.overrides()).await,
        Commands::Find => fleet(FleetCommand::Find, global.overrides()).await,
        Commands::Start => fleet(FleetCommand::Start, global.overrides()).await,
        Commands::Stop => fleet(FleetCommand::Stop, global.overrides()).await,
        Commands::Launch => fleet(FleetCommand::Launch, global.overrides()).await,
        Commands::Kill => fleet(FleetCommand::Kill, global.overrides()).await,
        Commands::Attach { no_hold } => {
            fleet(FleetCommand::Attach { hold: !no_hold }, global.overrides()).await
        }
        Commands::PushPayload => fleet(FleetCommand::PushPayload, global.overrides()).await,
        Commands::Tap => fleet(FleetCommand::Tap, global.overrides()).await,
    }
}
