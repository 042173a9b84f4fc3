//! hidpp-dpi CLI: list Logitech HID++ mice and read or set their DPI.

mod prefs;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use hidpp_dpi_core::backend::HidapiBackend;
use hidpp_dpi_core::comm::{check_device_status, status_message};
use hidpp_dpi_core::selection::with_session;
use hidpp_dpi_core::{dpi, features};
use hidpp_dpi_core::{DeviceDescriptor, Registry, SessionConfig};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::prefs::Prefs;

#[derive(Parser)]
#[command(
    name = "hidpp-dpi",
    version,
    about = "Read and set the DPI of Logitech HID++ mice"
)]
struct Cli {
    /// JSON session configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-request reply timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Device id or index from `list-devices`. Defaults to the last used device.
    #[arg(short, long, global = true, value_name = "ID|INDEX")]
    device: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected Logitech mice.
    ListDevices {
        /// Print the list as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the device list whenever a mouse is plugged in or removed.
    Watch,
    /// Show report capabilities and the DPI feature of a device.
    Info,
    /// List the DPI values the sensor supports.
    ListDpi,
    /// Get the current DPI.
    GetDpi,
    /// Set the DPI.
    SetDpi {
        /// DPI value to set (1-65535).
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        value: u16,
    },
    /// Re-apply the last DPI set on the last used device.
    Restore,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<hidpp_dpi_core::Error>() {
                Some(core) => {
                    debug!(error = %core, "command failed");
                    eprintln!("error: {}", status_message(core));
                }
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let prefs_path = prefs::prefs_path()?;
    let mut prefs = Prefs::load_from(&prefs_path)?;

    // Checked before touching the bus.
    if matches!(cli.command, Commands::Restore)
        && cli.device.is_none()
        && prefs.restore_target().is_none()
    {
        bail!("no stored DPI to restore; run set-dpi first");
    }

    let registry = Registry::new(Arc::new(HidapiBackend::new()?), config);

    match cli.command {
        Commands::ListDevices { json } => {
            let devices = registry.snapshot()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No Logitech mice found.");
                println!("Ensure the mouse is connected and you have access to its HID device.");
            } else {
                print_devices(&devices);
            }
        }
        Commands::Watch => {
            let devices = registry.snapshot()?;
            print_devices(&devices);

            let (tx, rx) = mpsc::channel();
            let _handle = registry.watch(move |devices| {
                let _ = tx.send(devices);
            })?;
            for devices in rx {
                println!("--");
                print_devices(&devices);
            }
        }
        Commands::Info => {
            let device = pick_device(&registry.snapshot()?, cli.device.as_deref(), &prefs)?;
            let session = registry.session(&device);
            let (device, status, capabilities, feature) = with_session(&session, |s| {
                Ok((
                    s.describe(),
                    check_device_status(s),
                    s.capabilities(),
                    features::detect_dpi_feature(s)?,
                ))
            })?;

            println!("{} ({})", device.name, device.id);
            println!(
                "  VID: 0x{:04X}  PID: 0x{:04X}  transport: {}",
                device.vendor_id, device.product_id, device.transport
            );
            println!("  status: {status}");
            if let Some(caps) = capabilities {
                println!("  output reports: {:02X?}", caps.output);
                println!("  feature reports: {:02X?}", caps.feature);
            }
            if let (Some(input), Some(output)) =
                (device.max_input_report_size, device.max_output_report_size)
            {
                println!("  max report size: input {input} bytes, output {output} bytes");
            }
            match feature {
                Some(feature) => println!(
                    "  DPI feature: 0x{:04X} at index {} ({:?})",
                    feature.variant.feature_id(),
                    feature.index,
                    feature.variant
                ),
                None => println!("  DPI feature: none"),
            }
            remember(&mut prefs, &prefs_path, |p| p.remember_device(&device.id));
        }
        Commands::ListDpi => {
            let device = pick_device(&registry.snapshot()?, cli.device.as_deref(), &prefs)?;
            let session = registry.session(&device);
            let presets = with_session(&session, |s| {
                let feature = features::require_dpi_feature(s)?;
                dpi::fetch_dpi_list(s, &feature)
            })?;
            let values: Vec<String> = presets.iter().map(u16::to_string).collect();
            println!("Supported DPI: {}", values.join(", "));
            remember(&mut prefs, &prefs_path, |p| p.remember_device(&device.id));
        }
        Commands::GetDpi => {
            let device = pick_device(&registry.snapshot()?, cli.device.as_deref(), &prefs)?;
            let session = registry.session(&device);
            let current = with_session(&session, |s| {
                let feature = features::require_dpi_feature(s)?;
                dpi::read_dpi(s, &feature)
            })?;
            println!("Current DPI: {current}");
            remember(&mut prefs, &prefs_path, |p| p.remember_device(&device.id));
        }
        Commands::SetDpi { value } => {
            let device = pick_device(&registry.snapshot()?, cli.device.as_deref(), &prefs)?;
            let applied = apply_dpi(&registry, &device, value)?;
            println!("DPI set to {applied}");
            remember(&mut prefs, &prefs_path, |p| p.remember_dpi(&device.id, applied));
        }
        Commands::Restore => {
            let devices = registry.snapshot()?;
            let (device, value) = match cli.device.as_deref() {
                Some(wanted) => {
                    let device = pick_device(&devices, Some(wanted), &prefs)?;
                    let value = prefs
                        .last_dpi
                        .get(&device.id)
                        .copied()
                        .ok_or_else(|| anyhow!("no stored DPI for {}", device.name))?;
                    (device, value)
                }
                None => {
                    let (id, value) = prefs
                        .restore_target()
                        .ok_or_else(|| anyhow!("no stored DPI to restore"))?;
                    let device = devices
                        .iter()
                        .find(|d| d.id == id)
                        .cloned()
                        .ok_or_else(|| anyhow!("last used device {id} is not connected"))?;
                    (device, value)
                }
            };
            let applied = apply_dpi(&registry, &device, value)?;
            println!("Restored DPI {applied} on {}", device.name);
            remember(&mut prefs, &prefs_path, |p| p.remember_device(&device.id));
        }
    }

    Ok(())
}

fn apply_dpi(registry: &Registry, device: &DeviceDescriptor, value: u16) -> Result<u16> {
    let session = registry.session(device);
    Ok(with_session(&session, |s| {
        let feature = features::require_dpi_feature(s)?;
        dpi::set_dpi(s, &feature, value)
    })?)
}

/// Update and save preferences. A save failure only warns.
fn remember(prefs: &mut Prefs, path: &std::path::Path, update: impl FnOnce(&mut Prefs)) {
    update(prefs);
    if let Err(e) = prefs.save_to(path) {
        warn!(error = %e, "could not save preferences");
    }
}

fn print_devices(devices: &[DeviceDescriptor]) {
    if devices.is_empty() {
        println!("No Logitech mice found.");
        return;
    }
    for (index, dev) in devices.iter().enumerate() {
        println!(
            "[{index}] {} (VID: 0x{:04X}, PID: 0x{:04X}, {}, id: {})",
            dev.name, dev.vendor_id, dev.product_id, dev.transport, dev.id
        );
    }
}

/// Choose a device by explicit id/index, else the last used one, else the
/// first in the list.
fn pick_device(
    devices: &[DeviceDescriptor],
    wanted: Option<&str>,
    prefs: &Prefs,
) -> Result<DeviceDescriptor> {
    if devices.is_empty() {
        bail!("no Logitech mouse found");
    }

    if let Some(wanted) = wanted {
        if let Some(device) = devices.iter().find(|d| d.id == wanted) {
            return Ok(device.clone());
        }
        if let Ok(index) = wanted.parse::<usize>() {
            if let Some(device) = devices.get(index) {
                return Ok(device.clone());
            }
        }
        bail!("device {wanted:?} not found; run list-devices to see available devices");
    }

    let remembered = prefs
        .last_device
        .as_deref()
        .and_then(|id| devices.iter().find(|d| d.id == id));
    Ok(remembered.unwrap_or(&devices[0]).clone())
}
