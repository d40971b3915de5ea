// gpio-shutdown - Long-press GPIO shutdown button monitor
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use gpio_shutdown::config::{Config, MonitorConfig};
use gpio_shutdown::defaults;
use gpio_shutdown::gpio::SysfsLine;
use gpio_shutdown::halt::{self, check_privilege};
use gpio_shutdown::logger;
use gpio_shutdown::monitor::{supervise, SystemClock};
use gpio_shutdown::signals::TermSignals;
use gpio_shutdown::systemd::{notify_ready, notify_status, Watchdog};
use gpio_shutdown::{error, info, warn};

#[derive(Parser)]
#[command(name = "gpio-shutdown")]
#[command(about = "Halt the system when a GPIO button is held down")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = defaults::CONFIG_FILE)]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Command line values win over the config file and environment
#[derive(Args)]
struct Overrides {
    /// BCM number of the button line
    #[arg(long, global = true)]
    pin: Option<u32>,

    /// Continuous actuation required, e.g. 2, 2.5, 2s
    #[arg(long, global = true, value_name = "DURATION")]
    hold_duration: Option<String>,

    /// Sampling cadence, e.g. 100ms
    #[arg(long, global = true, value_name = "DURATION")]
    poll_interval: Option<String>,

    /// Line level while the button is not actuated (high or low)
    #[arg(long, global = true, value_name = "LEVEL")]
    idle_level: Option<String>,

    /// Log instead of halting; skips the root check
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the button (default)
    Run,
    /// Show the effective configuration
    Config,
    /// Read the line once and report its level
    Probe,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config) => show_config(&cli).map(|()| defaults::EXIT_OK),
        Some(Commands::Probe) => probe(&cli).map(|()| defaults::EXIT_OK),
        Some(Commands::Run) | None => run(&cli),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(defaults::EXIT_FATAL);
        }
    }
}

/// Layer defaults < config file < environment < command line
fn load_config(cli: &Cli) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    let mut config = Config::load(&cli.config)?;
    let overrides = &cli.overrides;

    if let Some(pin) = overrides.pin {
        config.set("pin", pin.to_string());
    }
    if let Some(ref hold) = overrides.hold_duration {
        config.set("hold_duration", hold.as_str());
    }
    if let Some(ref poll) = overrides.poll_interval {
        config.set("poll_interval", poll.as_str());
    }
    if let Some(ref level) = overrides.idle_level {
        config.set("idle_level", level.as_str());
    }
    if overrides.dry_run {
        config.set("dry_run", "yes");
    }

    Ok(MonitorConfig::from_config(&config)?)
}

/// Run the monitor until a confirmed hold or a termination signal
fn run(cli: &Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    if let Err(e) = logger::init(&config.log_file, config.log_max_size, config.log_keep) {
        warn!("{} (logging to stdout only)", e);
    }
    info!(
        "gpio-shutdown {} starting (pid {})",
        env!("CARGO_PKG_VERSION"),
        nix::unistd::getpid()
    );

    check_privilege(config.dry_run)?;
    let signals = TermSignals::install()?;
    let mut halt = halt::from_config(&config)?;
    let mut line = SysfsLine::open(&config)?;

    info!(
        "Monitoring GPIO {}: hold {} ms, poll {} ms, halt '{}'",
        config.pin,
        config.hold_duration.as_millis(),
        config.poll_interval.as_millis(),
        halt.describe()
    );
    notify_ready();
    notify_status("Monitoring");

    let mut clock = SystemClock;
    let code = supervise(
        &config,
        &mut line,
        halt.as_mut(),
        &mut clock,
        Watchdog::from_env(),
        signals.flag(),
    );

    if let Some(sig) = signals.received() {
        info!("Received {}", sig);
    }
    Ok(code)
}

/// Show the configuration the monitor would run with
fn show_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("=== Effective configuration ({}) ===", cli.config.display());
    for (key, value) in config.config_pairs() {
        println!("  {:<16} {}", key, value);
    }
    Ok(())
}

/// Claim the line, read it once and release it
fn probe(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;
    let line = SysfsLine::open(&config)?;
    let raw = line.read_raw()?;

    let state = if raw != config.idle_level.raw() {
        "actuated"
    } else {
        "idle"
    };
    println!(
        "GPIO {}: level {} ({}, idle level {})",
        line.pin(),
        raw,
        state,
        config.idle_level
    );
    Ok(())
}
