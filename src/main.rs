//! CLI entry point for gpio-chardev
//!
//! Drives the driver against the in-memory host:
//! - `demo`: load, toggle the line through the device node, unload
//! - `inject`: fail one load step and show what the unwind left behind
//! - `show-config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! gpio-chardev demo --static
//! gpio-chardev inject --step claim_pin
//! GPIO_CHARDEV_GPIO__PIN=17 gpio-chardev show-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use gpio_chardev::config::{DriverConfig, DEFAULT_CONFIG_PATH};
use gpio_chardev::host::sim::{HostOp, SimHost};
use gpio_chardev::identity::DeviceNumbering;
use gpio_chardev::lifecycle::{load_status, GpioDriver, LoadStep};
use gpio_chardev::logging::{self, OutputFormat};

#[derive(Parser)]
#[command(name = "gpio-chardev")]
#[command(about = "GPIO character device driver on a simulated host", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, write "1abc", read back, write "0", unload
    Demo {
        /// Use the fixed 255:0 device number instead of a dynamic one
        #[arg(long = "static")]
        fixed: bool,
    },

    /// Fail one load step and report the status and leftover resources
    Inject {
        /// Step to fail (reserve_number, register_cdev, create_class,
        /// create_node, allocate_buffer, claim_pin, configure_pin)
        #[arg(long)]
        step: LoadStep,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DriverConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    logging::init_from_config(&config, cli.log_format).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Demo { fixed } => run_demo(config, fixed),
        Commands::Inject { step } => run_inject(config, step),
        Commands::ShowConfig => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
    }
}

fn run_demo(mut config: DriverConfig, fixed: bool) -> Result<()> {
    if fixed {
        config.numbering = DeviceNumbering::fixed();
    }

    let host = SimHost::new();
    let driver = GpioDriver::load(Arc::new(host.clone()), &config).context("Driver load failed")?;
    let gpio = config.gpio.line();
    println!("Loaded: major={} minor={}", driver.major(), driver.minor());
    println!(
        "Node {}: {}",
        driver.node_path().display(),
        if host.node_exists(driver.node_path()) { "present" } else { "missing" }
    );

    let mut file = host
        .open(driver.node_path())
        .context("Failed to open device node")?;

    file.write_all(b"1abc").context("Write failed")?;
    let mut out = vec![0u8; config.buffer_size];
    let n = file.read_into(&mut out).context("Read failed")?;
    println!(
        "Read {n} bytes, first byte {:?}; pin {gpio} is {}",
        char::from(out[0]),
        host.pin_level(gpio).unwrap_or_default()
    );

    file.write_all(b"0").context("Write failed")?;
    println!("Wrote \"0\"; pin {gpio} is {}", host.pin_level(gpio).unwrap_or_default());

    file.release().context("Release failed")?;
    let node = driver.node_path().to_path_buf();
    driver.unload();

    println!(
        "Unloaded: node {}; pin history {:?}",
        if host.node_exists(&node) { "still present" } else { "removed" },
        host.pin_events(gpio)
    );

    let snapshot = host.snapshot();
    if !snapshot.is_clean() {
        bail!("Resources left after unload: {snapshot:?}");
    }
    info!("Demo complete");
    Ok(())
}

fn run_inject(config: DriverConfig, step: LoadStep) -> Result<()> {
    let host = SimHost::new();
    host.inject(HostOp::for_step(step, config.numbering));

    let result = GpioDriver::load(Arc::new(host.clone()), &config);
    let status = load_status(&result);
    match result {
        Ok(driver) => {
            println!("Step {step}: load unexpectedly succeeded");
            driver.unload();
        }
        Err(e) => println!("Step {step}: load failed with status {status} ({e})"),
    }

    let snapshot = host.snapshot();
    println!("Host after unwind: {snapshot:#?}");
    if !snapshot.is_clean() {
        bail!("Unwind after {step} left resources behind");
    }
    Ok(())
}
