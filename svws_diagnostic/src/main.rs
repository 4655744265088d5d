//! # SVWS Diagnostic
//!
//! One-shot commissioning probes for the station's sensor buses. Each
//! subcommand opens one device, takes one reading, prints it human-readably
//! and exits non-zero on failure.
//!
//! ```bash
//! svws_diagnostic modbus --port /dev/ttySC0 --address 16
//! svws_diagnostic bms --port /dev/ttyAMA0
//! svws_diagnostic solar --port /dev/ttyAMA1
//! svws_diagnostic onewire
//! svws_diagnostic dht --pin 17
//! ```

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use svws_common::config::{BmsConfig, BusConfig, DhtConfig, SolarConfig};
use svws_common::units;
use svws_sensors::{bms, dht22, modbus, onewire, vedirect};

/// SVWS Diagnostic - sensor bus commissioning probes
#[derive(Parser, Debug)]
#[command(name = "svws_diagnostic")]
#[command(version)]
#[command(about = "One-shot probes for the station's sensor buses")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one holding register from a Modbus unit
    Modbus {
        #[arg(long)]
        port: String,
        #[arg(long, default_value_t = 9600)]
        baud: u32,
        /// Modbus unit id
        #[arg(long)]
        address: u8,
        #[arg(long, default_value_t = 0)]
        register: u16,
    },
    /// Print a full BMS snapshot
    Bms {
        #[arg(long)]
        port: String,
        #[arg(long, default_value_t = 9600)]
        baud: u32,
        #[arg(long, default_value_t = 8)]
        address: u8,
    },
    /// Dump one decoded VE.Direct frame
    Solar {
        #[arg(long)]
        port: String,
        #[arg(long, default_value_t = 19200)]
        baud: u32,
    },
    /// List and read every DS18B20 probe on the bus
    Onewire {
        #[arg(long, default_value = "/sys/bus/w1/devices")]
        devices_dir: PathBuf,
    },
    /// Single DHT22 read
    Dht {
        /// BCM pin number of the data line
        #[arg(long)]
        pin: u8,
        #[arg(long, default_value_t = 4)]
        tries: u32,
    },
}

fn main() {
    tracing_subscriber::fmt().compact().init();
    if let Err(e) = run() {
        eprintln!("svws_diagnostic: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    match Args::parse().command {
        Command::Modbus {
            port,
            baud,
            address,
            register,
        } => probe_modbus(&port, baud, address, register),
        Command::Bms {
            port,
            baud,
            address,
        } => probe_bms(&port, baud, address),
        Command::Solar { port, baud } => probe_solar(&port, baud),
        Command::Onewire { devices_dir } => probe_onewire(&devices_dir),
        Command::Dht { pin, tries } => probe_dht(pin, tries),
    }
}

fn probe_modbus(port: &str, baud: u32, address: u8, register: u16) -> Result<(), Box<dyn Error>> {
    let config = BusConfig {
        port: port.to_string(),
        baud,
        timeout_ms: 500,
        settle_ms: 100,
        txden_pin: None,
    };
    let mut bus = modbus::open(&config)?;

    let raw = bus.read_holding_register(address, register)?;
    println!("unit {address} register {register:#06x}: {raw} (tenths: {})", units::tenths(raw));
    Ok(())
}

fn probe_bms(port: &str, baud: u32, address: u8) -> Result<(), Box<dyn Error>> {
    let config = BmsConfig {
        port: port.to_string(),
        baud,
        timeout_ms: 500,
        address,
    };
    let mut client = bms::open(&config)?;
    let snapshot = client.snapshot()?;

    println!("pack voltage:  {:.1} V", snapshot.voltage);
    println!("pack current:  {:.1} A", snapshot.current);
    println!("state of charge: {:.1} %", snapshot.soc);
    println!("cycles:        {}", snapshot.cycles);
    println!(
        "charger/load:  {}/{}",
        if snapshot.charger_running { "on" } else { "off" },
        if snapshot.load_running { "on" } else { "off" }
    );
    for (i, volts) in snapshot.cell_voltages.iter().enumerate() {
        println!("cell {}:        {volts:.3} V", i + 1);
    }
    for (i, celsius) in snapshot.temperatures.iter().enumerate() {
        println!("probe {}:       {celsius:.0} C", i + 1);
    }
    Ok(())
}

fn probe_solar(port: &str, baud: u32) -> Result<(), Box<dyn Error>> {
    let config = SolarConfig {
        port: port.to_string(),
        baud,
        timeout_ms: 3000,
    };
    let mut charger = vedirect::open(&config)?;
    let frame = charger.read_frame()?;

    let mut labels: Vec<&str> = frame.labels().collect();
    labels.sort_unstable();
    for label in labels {
        if let Some(value) = frame.get(label) {
            println!("{label}\t{value}");
        }
    }

    println!();
    if let Some(state) = frame.device_state() {
        println!("state:        {state}");
    }
    if let Some(mode) = frame.tracker_mode() {
        println!("tracker:      {mode}");
    }
    if let Some(err) = frame.error() {
        println!("error:        {err}");
    }
    if let Some(mask) = frame.off_reason() {
        println!("off reason:   {mask:?}");
    }
    Ok(())
}

fn probe_onewire(devices_dir: &Path) -> Result<(), Box<dyn Error>> {
    let ids = onewire::discover(devices_dir)?;
    if ids.is_empty() {
        println!("no DS18B20 devices found under {}", devices_dir.display());
        return Ok(());
    }

    for id in ids {
        let probe = onewire::W1Probe::new(devices_dir, &id);
        match probe.read_celsius() {
            Ok(celsius) => println!("{id}: {:.2} F", units::c_to_f(celsius)),
            Err(err) => println!("{id}: read failed: {err}"),
        }
    }
    Ok(())
}

fn probe_dht(pin: u8, tries: u32) -> Result<(), Box<dyn Error>> {
    let config = DhtConfig { pin, tries };
    let mut dht = dht22::open(&config)?;
    let reading = dht.read()?;

    println!("temperature: {:.1} F", units::c_to_f(reading.temperature));
    println!("humidity:    {:.1} %", reading.humidity);
    Ok(())
}
