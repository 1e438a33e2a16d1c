//! Calibration walkthrough on a Linux I2C bus.
//!
//! Wakes the sensor, streams readings from the background broadcaster,
//! collects samples until Ctrl+C, fits the hard/soft-iron correction and
//! prints corrected headings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use linux_embedded_hal::I2cdev;
use qmc5883l_rs::{calibration, compass, Broadcaster, Qmc5883lConfig, DEFAULT_I2C_ADDRESS};

fn main() {
    env_logger::init();

    println!("QMC5883L - calibration demo");

    // Ctrl+C ends the collection window
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        println!("\nFinishing sample collection...");
        flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to install the Ctrl+C handler");

    let i2c = match I2cdev::new("/dev/i2c-1") {
        Ok(i2c) => i2c,
        Err(e) => {
            eprintln!("failed to open the I2C device: {e:?}");
            return;
        }
    };

    let device = match qmc5883l_rs::new_i2c_device(i2c, DEFAULT_I2C_ADDRESS, Qmc5883lConfig::default())
    {
        Ok(device) => device,
        Err(e) => {
            eprintln!("failed to initialize the sensor: {e}");
            return;
        }
    };
    println!("sensor awake and in continuous measurement");

    let broadcaster = Broadcaster::spawn(device);

    println!("rotate the sensor through all orientations, then press Ctrl+C");
    let result = calibration::run(&broadcaster, &cancel, 0.48);

    let mut device = match broadcaster.close() {
        Ok(device) => device,
        Err(e) => {
            eprintln!("polling loop failed: {e}");
            return;
        }
    };

    let calibration = match result {
        Ok(calibration) => calibration,
        Err(e) => {
            eprintln!("calibration failed: {e}");
            return;
        }
    };
    println!("b   = {:.3?}", calibration.offset);
    println!("A⁻¹ = {:.3?}", calibration.correction);

    println!("corrected headings (10 readings):");
    for _ in 0..10 {
        match device.read_vector() {
            Ok(raw) => {
                let corrected = calibration.correct(raw);
                println!("  {:7.1}°", compass::heading(&corrected));
            }
            Err(e) => {
                eprintln!("read failed: {e}");
                break;
            }
        }
        thread::sleep(Duration::from_millis(200));
    }

    // standby + hand the bus back
    let _bus = device.release();
}
