//! Live vocal isolation example.
//!
//! Streams the default input device through the pipeline to an output
//! device until Ctrl+C is pressed. Uses `MockModel`, which passes the
//! mixture through unchanged, so the example runs without model weights.
//!
//! # Usage
//!
//! ```bash
//! # Default devices
//! cargo run --example live_vocals
//!
//! # Output device by index (see the list_devices example), decoupled inference
//! VOCAL_STREAM_OUTPUT=3 VOCAL_STREAM_DECOUPLED=1 cargo run --example live_vocals
//! ```

use vocal_stream::{
    event_channel, DeviceSelection, MockModel, ModelError, PipelineConfig, PipelineEvent,
    SchedulingStrategy, SeparationModel, VocalStream,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocal_stream=info".into()),
        )
        .init();

    let mut config = PipelineConfig::default();
    if let Ok(index) = std::env::var("VOCAL_STREAM_OUTPUT") {
        config = config.with_output_device(DeviceSelection::index(index.parse()?));
    }
    if std::env::var_os("VOCAL_STREAM_DECOUPLED").is_some() {
        config = config.with_scheduling(SchedulingStrategy::Decoupled);
    }

    let (callback, mut events) = event_channel(256);
    let controller = VocalStream::builder()
        .config(config.clone())
        .on_event_callback(callback)
        .build()?;

    // Print log lines and every 20th timing report
    tokio::spawn(async move {
        let mut blocks = 0u64;
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Log { level, message } => println!("[{level:?}] {message}"),
                PipelineEvent::Timing(sample) => {
                    blocks += 1;
                    if blocks % 20 == 0 {
                        println!(
                            "processing {:.1}ms / block {:.1}ms (RT factor {:.2})",
                            sample.processing_ms, sample.block_ms, sample.real_time_factor
                        );
                    }
                }
                PipelineEvent::StreamErrored { error } => println!("stream failed: {error}"),
                _ => {}
            }
        }
    });

    controller
        .load_model(|| -> Result<Box<dyn SeparationModel>, ModelError> {
            Ok(Box::new(MockModel::new()))
        })
        .await?;

    controller.start()?;
    println!(
        "Streaming with {:.0}ms latency. Press Ctrl+C to stop.",
        config.nominal_latency().as_secs_f64() * 1000.0
    );

    tokio::signal::ctrl_c().await?;

    let stats = controller.stats();
    controller.stop()?;
    println!("Stats: {stats:?}");

    Ok(())
}
