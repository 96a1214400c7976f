//! A small CLI that exercises the coordination layer end to end: it
//! connects to an in-process simulated MCU ([`McuController::connect_file`]),
//! negotiates config, and prints the resulting stats. This stands in for
//! the higher-level host application (G-code dispatch, kinematics, a web
//! front end) that would normally drive this crate and is out of scope
//! here.

use anyhow::Result;
use clap::Parser;
use klipper_host::McuController;
use klipper_proto::commands::Dictionary;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "klipper-host", about = "Dry-run a config negotiation against a simulated MCU")]
struct Cli {
    /// Name to report for the simulated MCU connection.
    #[arg(long, default_value = "mcu")]
    name: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    info!(mcu = %cli.name, "connecting to simulated MCU");
    let mcu = McuController::connect_file(&cli.name, Dictionary::simulated());

    let _stepper = mcu.create_stepper("PA0", "PA1", 10, false);
    let _endstop_stepper = mcu.create_stepper("PB0", "PB1", 10, false);

    mcu.build_config()?;
    info!(
        crc = ?mcu.config_crc(),
        move_count = mcu.move_count(),
        "config negotiated"
    );

    println!("{}", mcu.stats(0.0)?);
    Ok(())
}
