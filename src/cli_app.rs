//! The `dsd` command-line surface: argument definitions, dispatch, and the
//! exit-code contract (1 = bad input, 2 = runtime failure, 3 = internal).

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use disk_spindown::core::config::Config;
use disk_spindown::daemon::loop_main::{DaemonArgs as LoopArgs, PollDaemon};
use disk_spindown::engine::state::{CounterSnapshot, DeviceId};
use disk_spindown::stats::discovery::{discover_devices, resolve_tracked};
use disk_spindown::stats::diskstats::DiskstatsReader;

#[derive(Debug, Parser)]
#[command(
    name = "dsd",
    author,
    version,
    about = "Disk Spin-down Daemon - powers down idle disks",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Use this config file instead of the default.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Emit machine-readable JSON instead of human output.
    #[arg(long, global = true)]
    json: bool,
    /// Never colorize output.
    #[arg(long, global = true)]
    no_color: bool,
    /// More detail in human output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Less detail in human output.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the polling daemon in the foreground.
    Daemon(DaemonArgs),
    /// Probe current device activity with a short two-sample read.
    Status(StatusArgs),
    /// List present whole-disk devices and the resolved tracked set.
    Devices,
    /// Inspect and validate configuration.
    Config(ConfigArgs),
    /// Print version information.
    Version(VersionArgs),
    /// Emit a shell completion script to stdout.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DaemonArgs {
    /// Write a pidfile at this path (non-systemd deployments).
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Systemd watchdog timeout in seconds; 0 disables the heartbeat.
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    watchdog_sec: u64,
}

#[derive(Debug, Clone, Args, Serialize)]
struct StatusArgs {
    /// Gap between the two counter samples.
    #[arg(long, default_value_t = 2, value_name = "SECONDS")]
    sample_secs: u64,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    action: Option<ConfigAction>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigAction {
    /// Print the config file path that would be used.
    Path,
    /// Print the effective configuration as TOML.
    Show,
    /// Load, validate, and report the config hash.
    Validate,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct VersionArgs {
    /// Also print build metadata.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Failures surfaced to the shell, classified by exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// The user asked for something impossible (exit 1).
    #[error("{0}")]
    User(String),
    /// The environment refused: missing files, failing commands (exit 2).
    #[error("{0}")]
    Runtime(String),
    /// A bug on our side (exit 3).
    #[error("{0}")]
    Internal(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

fn runtime(e: impl std::fmt::Display) -> CliError {
    CliError::Runtime(e.to_string())
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Devices => run_devices(cli),
        Command::Config(args) => match args.action {
            None | Some(ConfigAction::Path) => config_path(cli),
            Some(ConfigAction::Show) => config_show(cli),
            Some(ConfigAction::Validate) => config_validate(cli),
        },
        Command::Version(args) => run_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            generate(args.shell, &mut command, "dsd", &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(runtime)?;
    let loop_args = LoopArgs {
        pidfile: args.pidfile.clone(),
        watchdog_sec: args.watchdog_sec,
    };
    let mut daemon = PollDaemon::init(config, &loop_args).map_err(runtime)?;
    daemon.run().map_err(runtime)
}

// ──────────────────── status ────────────────────

#[derive(Debug, Serialize)]
struct DeviceProbe {
    device: String,
    activity: &'static str,
    sectors_read: Option<u64>,
    sectors_written: Option<u64>,
}

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(runtime)?;
    let resolved = resolve_tracked(&config).map_err(runtime)?;
    if resolved.devices.is_empty() {
        return Err(CliError::User("no tracked devices present".to_string()));
    }

    // Counter movement between two reads a few seconds apart means the
    // device is doing I/O right now.
    let gap = args.sample_secs.max(1);
    let reader = DiskstatsReader::new(&config.paths.diskstats);
    let first = reader.read(&resolved.devices).map_err(runtime)?;
    thread::sleep(Duration::from_secs(gap));
    let second = reader.read(&resolved.devices).map_err(runtime)?;

    let probes: Vec<DeviceProbe> = resolved
        .devices
        .iter()
        .map(|dev| probe_device(dev, first.get(dev), second.get(dev)))
        .collect();

    if output_mode(cli) == OutputMode::Json {
        return emit_json(&json!({
            "command": "status",
            "sample_secs": gap,
            "devices": serde_json::to_value(&probes)?,
        }));
    }

    if !cli.quiet {
        println!("disk-spindown v{}", env!("CARGO_PKG_VERSION"));
        println!("  Config: {}", config.paths.config_file.display());
        if cli.verbose {
            println!("  Stats source: {}", config.paths.diskstats.display());
        }
        println!("  Sampled {} device(s) over {gap}s\n", probes.len());
    }
    println!(
        "  {:<12}  {:<10}  {:>14}  {:>16}",
        "Device", "Activity", "Sectors Read", "Sectors Written"
    );
    println!("  {}", "-".repeat(60));
    for probe in &probes {
        let activity = match probe.activity {
            "active" => probe.activity.green(),
            "idle" => probe.activity.cyan(),
            _ => probe.activity.yellow(),
        };
        println!(
            "  {:<12}  {:<10}  {:>14}  {:>16}",
            probe.device,
            activity,
            opt_counter(probe.sectors_read),
            opt_counter(probe.sectors_written),
        );
    }
    Ok(())
}

fn opt_counter(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn probe_device(
    device: &DeviceId,
    first: Option<&CounterSnapshot>,
    second: Option<&CounterSnapshot>,
) -> DeviceProbe {
    let activity = match (first, second) {
        (Some(a), Some(b)) if a != b => "active",
        (Some(_), Some(_)) => "idle",
        _ => "absent",
    };
    DeviceProbe {
        device: device.as_str().to_string(),
        activity,
        sectors_read: second.map(|s| s.sectors_read),
        sectors_written: second.map(|s| s.sectors_written),
    }
}

// ──────────────────── devices ────────────────────

fn run_devices(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(runtime)?;
    let device_dir = config.devices.effective_device_dir();
    let discovered = discover_devices(&device_dir).map_err(runtime)?;
    let resolved = resolve_tracked(&config).map_err(runtime)?;

    if output_mode(cli) == OutputMode::Json {
        return emit_json(&json!({
            "command": "devices",
            "device_dir": device_dir.to_string_lossy(),
            "discovered": names(&discovered),
            "tracked": names(&resolved.devices),
            "dropped": names(&resolved.dropped),
            "discovered_all": resolved.discovered_all,
        }));
    }

    println!("Device directory: {}", device_dir.display());
    println!("Discovered whole-disk devices:");
    if discovered.is_empty() {
        println!("  (none)");
    }
    for dev in &discovered {
        let marker = if resolved.devices.contains(dev) {
            "tracked".green()
        } else {
            "".normal()
        };
        println!("  {:<12}  {marker}", dev.as_str());
    }
    for dropped in &resolved.dropped {
        println!(
            "  {:<12}  {}",
            dropped.as_str(),
            "configured but not present".yellow()
        );
    }
    if resolved.discovered_all {
        println!("\nNo devices configured; all discovered devices are tracked.");
    }
    Ok(())
}

fn names(devices: &[DeviceId]) -> Vec<&str> {
    devices.iter().map(DeviceId::as_str).collect()
}

// ──────────────────── config ────────────────────

fn config_path(cli: &Cli) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let exists = path.exists();

    if output_mode(cli) == OutputMode::Json {
        return emit_json(&json!({
            "command": "config path",
            "path": path.to_string_lossy(),
            "exists": exists,
        }));
    }
    println!("{}", path.display());
    if !exists {
        println!("  (file does not exist; defaults will be used)");
    }
    Ok(())
}

fn config_show(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(runtime)?;

    if output_mode(cli) == OutputMode::Json {
        return emit_json(&json!({
            "command": "config show",
            "config": serde_json::to_value(&config)?,
        }));
    }
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
    println!("{rendered}");
    Ok(())
}

fn config_validate(cli: &Cli) -> Result<(), CliError> {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            let hash = config.stable_hash().map_err(runtime)?;
            if output_mode(cli) == OutputMode::Json {
                return emit_json(&json!({
                    "command": "config validate",
                    "valid": true,
                    "source": config.paths.config_file.to_string_lossy(),
                    "hash": hash,
                }));
            }
            println!("Configuration is valid.");
            println!("  Source: {}", config.paths.config_file.display());
            println!("  Hash: {hash}");
            Ok(())
        }
        Err(e) => {
            if output_mode(cli) == OutputMode::Json {
                emit_json(&json!({
                    "command": "config validate",
                    "valid": false,
                    "error": e.to_string(),
                }))?;
            } else {
                eprintln!("Configuration is invalid: {e}");
            }
            Err(CliError::User(e.to_string()))
        }
    }
}

// ──────────────────── version ────────────────────

fn run_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");

    if output_mode(cli) == OutputMode::Json {
        return emit_json(&json!({
            "binary": "dsd",
            "version": version,
            "package": package,
        }));
    }
    println!("dsd {version}");
    if args.verbose {
        println!("package: {package}");
    }
    Ok(())
}

// ──────────────────── output helpers ────────────────────

fn emit_json(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DSD_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

/// Precedence: `--json` flag, then `DSD_OUTPUT_FORMAT`, then TTY detection
/// (human on a terminal, JSON when piped).
fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    match env_mode.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ if stdout_is_tty => OutputMode::Human,
        _ => OutputMode::Json,
    }
}

// ──────────────────── tests ────────────────────
