//! mwm - grid-snapping X11 window manager
//!
//! Manages top-level windows without reparenting: directional focus, grid
//! snapping, mouse move/resize and multi-monitor placement. Monitors that
//! speak DDC/CI are polled for their active input, and can be switched
//! back to this machine from the keyboard.
//!
//! # Examples
//!
//! ```bash
//! # Manage $DISPLAY with ~/.config/mwm/config.toml
//! mwm
//!
//! # Check a configuration without touching the display
//! mwm --config ./mwm.toml --check-config
//! ```

mod actions;
mod config;
mod ddc;
mod display;
mod error;
mod event;
mod geometry;
mod grid;
mod i2c;
mod launcher;
mod monitor;
mod registry;
mod state;
#[cfg(test)]
mod testing;
mod wm;
mod x11;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use config::Config;
use ddc::DisplayDataChannel;
use i2c::I2cChannel;
use launcher::ProcessLauncher;
use wm::Wm;
use x11::{log_protocol_error, X11Display};

/// mwm - grid-snapping X11 window manager
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// X display to manage (default: the config's `display`, then $DISPLAY)
    #[arg(long)]
    display: Option<String>,

    /// Config file (default: ~/.config/mwm/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the config, print the declared monitors and exit
    #[arg(long)]
    check_config: bool,
}

/// Print the monitors a config declares
fn print_monitor_table(config: &Config) {
    if config.monitors.is_empty() {
        println!("No monitors declared: every active output will be adopted");
        return;
    }
    println!("{:<12} {:>6} {:<12} {:>7}  DDC/CI", "MONITOR", "SCREEN", "CONNECTOR", "INPUT");
    for (name, m) in &config.monitors {
        let ddc = match m.ddc_identity() {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<12} {:>6} {:<12} {:>#7x}  {}",
            name, m.screen, m.connector, m.visible_input, ddc
        );
    }
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", path))?;

    if cli.check_config {
        print_monitor_table(&config);
        return Ok(());
    }

    log::info!("Starting mwm");

    let display_name = cli.display.or_else(|| config.display.clone());
    let display = X11Display::connect(display_name.as_deref(), Box::new(log_protocol_error))?;

    let wants_ddc = config.monitors.values().any(|m| m.ddc_identity().is_some());
    let ddc = if config.ddc.enabled && wants_ddc {
        Some(DisplayDataChannel::new(I2cChannel::new()))
    } else {
        log::info!("DDC/CI disabled");
        None
    };

    let mut wm = Wm::new(display, ProcessLauncher::default(), ddc, &config)?;
    wm.run()?;

    log::info!("Exiting window manager");
    Ok(())
}
