//! Connects to the bundled in-process MCU emulator, builds a small
//! config (two steppers, an endstop, a fan), negotiates it, pushes a few
//! steps through the flush path, and prints the resulting stats line.
//!
//! Run with `cargo run --example connect_emulator`.

use klipper_host::fan::PrinterFan;
use klipper_host::mcu::McuController;
use klipper_proto::commands::Dictionary;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mcu = McuController::connect_file("emulated_mcu", Dictionary::simulated());

    let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
    let endstop = mcu.create_endstop("PA2", &stepper, true, true);
    let mut fan = PrinterFan::new(&mcu, "PB0", 0.1);

    mcu.build_config()?;
    println!(
        "connected to {}: crc={:?} move_count={}",
        mcu.name(),
        mcu.config_crc(),
        mcu.move_count()
    );

    stepper.reset_step_clock(0)?;
    for clock in [1_000u64, 2_000, 3_000, 4_000] {
        stepper.queue_step(clock);
    }
    mcu.flush_moves(0.0)?;

    mcu.note_alive(0.0);
    endstop.home_start(0.0, 0, 100)?;
    endstop.home_finalize(1.0)?;
    endstop.on_end_stop_state(0.5, 4_500, false, true, 9);
    endstop.home_wait(0.5, 10.0)?;

    fan.set_speed(&mcu, 0.0, 0.75)?;

    println!("{}", mcu.stats(0.0)?);
    Ok(())
}
