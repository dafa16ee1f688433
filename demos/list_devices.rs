//! Lists audio devices.
//!
//! Prints every capture and playback device with the index accepted by
//! `DeviceSelection::index`.
//!
//! Run with: cargo run --example list_devices

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Input devices:");
    for device in vocal_stream::list_input_devices()? {
        print_device(&device);
    }

    println!();
    println!("Output devices:");
    for device in vocal_stream::list_output_devices()? {
        print_device(&device);
    }

    Ok(())
}

fn print_device(device: &vocal_stream::DeviceInfo) {
    let marker = if device.is_default { "*" } else { " " };
    println!(
        "{marker} [{}] {} ({}ch, {}Hz)",
        device.index, device.name, device.channels, device.default_sample_rate
    );
}
