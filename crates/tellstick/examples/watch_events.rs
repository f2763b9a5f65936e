//! Tails device and sensor events on the main thread.
//!
//! Uses the queued dispatch strategy: telldus-core's callback thread only
//! enqueues, and this thread delivers.

use std::sync::Arc;
use tellstick::{OpenOptions, QueuedDispatcher, TellStick};

fn main() {
    env_logger::init();

    let queue = Arc::new(QueuedDispatcher::new());
    let tellstick = match TellStick::with_options(OpenOptions {
        dispatcher: Some(queue.clone()),
        ..Default::default()
    }) {
        Ok(tellstick) => tellstick,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    tellstick
        .register_device_event(|event| {
            println!(
                "device {} method {} data {:?}",
                event.device_id, event.method, event.data
            );
        })
        .expect("register device event");

    tellstick
        .register_sensor_event(|event| {
            println!(
                "sensor {}/{} id {} type {} = {} ({})",
                event.protocol,
                event.model,
                event.sensor_id,
                event.datatype,
                event.value,
                event.timestamp
            );
        })
        .expect("register sensor event");

    println!("watching for events, ctrl-c to quit");
    loop {
        queue.process_one(true);
    }
}
