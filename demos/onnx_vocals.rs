//! Live vocal isolation with an ONNX separation model.
//!
//! Loads a four-stem {drums, bass, other, vocals} model and plays the
//! vocals stem on the default output device until Ctrl+C is pressed.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example onnx_vocals --features onnx -- path/to/model.onnx
//!
//! # On an NVIDIA GPU:
//! cargo run --example onnx_vocals --features cuda -- path/to/model.onnx
//! ```

use vocal_stream::{ExecutionTarget, OnnxModelLoader, PipelineConfig, SchedulingStrategy, VocalStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocal_stream=info".into()),
        )
        .init();

    let Some(model_path) = std::env::args().nth(1) else {
        eprintln!("usage: onnx_vocals <model.onnx>");
        std::process::exit(2);
    };

    // A real model rarely keeps up inside the device callback
    let config = PipelineConfig::default().with_scheduling(SchedulingStrategy::Decoupled);

    let controller = VocalStream::builder()
        .config(config)
        .on_event(|event| tracing::debug!(?event, "pipeline event"))
        .build()?;

    let loader = OnnxModelLoader::new(model_path).with_target(ExecutionTarget::preferred());
    controller.spawn_model_load(loader).await??;

    controller.start()?;
    println!("Isolating vocals. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    let stats = controller.stats();
    controller.stop()?;
    println!(
        "Processed {} blocks, {} failures, peak {:.1}ms",
        stats.blocks_processed, stats.inference_failures, stats.peak_processing_ms
    );

    Ok(())
}
