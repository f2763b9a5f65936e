//! Lists configured devices, sensors and controllers.
//!
//! Run with `RUST_LOG=debug` to see the binding's own diagnostics.

use tellstick::ffi::{TELLSTICK_HUMIDITY, TELLSTICK_TEMPERATURE};
use tellstick::TellStick;

fn run() -> tellstick::Result<()> {
    let tellstick = TellStick::new()?;

    println!("Devices:");
    for device in tellstick.devices()? {
        println!(
            "  #{} {} ({}/{})",
            device.id(),
            device.name()?,
            device.protocol()?,
            device.model()?
        );
    }

    println!("Sensors:");
    for sensor in tellstick.sensors()? {
        print!("  {}/{} id {}", sensor.protocol(), sensor.model(), sensor.id());
        if sensor.has_value(TELLSTICK_TEMPERATURE) {
            print!("  {} C", sensor.temperature()?.value);
        }
        if sensor.has_value(TELLSTICK_HUMIDITY) {
            print!("  {} %", sensor.humidity()?.value);
        }
        println!();
    }

    println!("Controllers:");
    for controller in tellstick.controllers()? {
        println!(
            "  #{} {} ({})",
            controller.id(),
            controller.name(),
            if controller.is_available() { "connected" } else { "offline" }
        );
    }

    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
