//! # SVWS Station Daemon
//!
//! Polls the station's sensor set and emits one loop packet per cycle as a
//! JSON line on stdout for the aggregation host.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config location
//! svws_station
//!
//! # Explicit config, verbose logging
//! svws_station --config config/station.toml -v
//!
//! # One packet and exit (cabling check)
//! svws_station --config config/station.toml --once
//! ```

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use svws_common::config::{ConfigLoader, DEFAULT_CONFIG_PATH, LogLevel, StationConfig};
use svws_station::emit::{JsonLinesEmitter, PacketEmitter};
use svws_station::station::Station;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

/// SVWS Station - weather-station telemetry daemon
#[derive(Parser, Debug)]
#[command(name = "svws_station")]
#[command(version)]
#[command(about = "Polls the station sensors and emits loop packets")]
struct Args {
    /// Path to the station configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit a single loop packet and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        // Logs go to stderr; the packet stream owns stdout.
        eprintln!("svws_station: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = StationConfig::load(&args.config)?;
    config.validate()?;
    setup_tracing(&args, config.shared.log_level);

    info!("SVWS station v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("service_name: {}", config.shared.service_name);
    log_configured(&config);

    let mut station = Station::from_config(&config)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let mut emitter = JsonLinesEmitter::new(std::io::stdout().lock());

    if args.once {
        let packet = station.poll_once();
        emitter.emit(&packet)?;
        info!("single packet emitted ({} fields)", packet.len());
    } else {
        info!(
            "entering polling loop, interval {:?}",
            station.interval()
        );
        station.run(&mut emitter, &running)?;
    }

    info!("SVWS station shutdown complete");
    Ok(())
}

/// Log every configured port and address, the way the station has always
/// announced itself at startup.
fn log_configured(config: &StationConfig) {
    if let Some(bus) = &config.rs485 {
        info!(
            "rs485: port={} baud={} settle_ms={} txden_pin={:?}",
            bus.port, bus.baud, bus.settle_ms, bus.txden_pin
        );
    }
    if let Some(bus) = &config.rs485_aux {
        info!(
            "rs485_aux: port={} baud={} settle_ms={} txden_pin={:?}",
            bus.port, bus.baud, bus.settle_ms, bus.txden_pin
        );
    }
    if let Some(sensor) = &config.wind_direction {
        info!(
            "wind_direction: address={} bus={:?}",
            sensor.address, sensor.bus
        );
    }
    if let Some(sensor) = &config.wind_speed {
        info!("wind_speed: address={} bus={:?}", sensor.address, sensor.bus);
    }
    if let Some(sensor) = &config.rain {
        info!("rain: address={} bus={:?}", sensor.address, sensor.bus);
    }
    if let Some(bms) = &config.bms {
        info!("bms: port={} address={}", bms.port, bms.address);
    }
    if let Some(solar) = &config.solar {
        info!("solar: port={} baud={}", solar.port, solar.baud);
    }
    if let Some(dht) = &config.dht22 {
        info!("dht22: pin={} tries={}", dht.pin, dht.tries);
    }
    if let Some(onewire) = &config.onewire {
        info!(
            "onewire: devices_dir={} enclosure_id={:?} soil_probes={}",
            onewire.devices_dir.display(),
            onewire.enclosure_id,
            if onewire.soil_ids().is_some() { 6 } else { 0 }
        );
    }
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
