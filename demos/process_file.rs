//! Offline vocal isolation example.
//!
//! Feeds a WAV file through `BlockProcessor` block by block, exactly as the
//! device callback would, and writes the result to another WAV file. The
//! output lags the input by `block_size + back_offset` frames.
//!
//! Run with: cargo run --example process_file -- input.wav vocals.wav

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use vocal_stream::model::shared_model;
use vocal_stream::pipeline::BlockProcessor;
use vocal_stream::{MockModel, PipelineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let (Some(input_path), Some(output_path)) = (args.next(), args.next()) else {
        eprintln!("usage: process_file <input.wav> <output.wav>");
        std::process::exit(2);
    };

    let mut reader = WavReader::open(&input_path)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let config = PipelineConfig {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        ..PipelineConfig::default()
    };
    config.validate()?;

    let mut processor = BlockProcessor::new(&config, shared_model(MockModel::new()));
    let mut writer = WavWriter::create(
        &output_path,
        WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let block_samples = config.block_samples();
    let mut output = vec![0.0; block_samples];
    let mut total_ms = 0.0;
    let mut blocks = 0u32;

    for chunk in samples.chunks(block_samples) {
        let mut input = chunk.to_vec();
        input.resize(block_samples, 0.0);

        processor.process_block(&input, &mut output);
        for &sample in &output {
            writer.write_sample(sample)?;
        }

        if let Some(timing) = processor.last_timing() {
            total_ms += timing.processing_ms;
        }
        blocks += 1;
    }
    writer.finalize()?;

    println!("Wrote {blocks} blocks to {output_path}");
    if blocks > 0 {
        println!(
            "Average processing: {:.2}ms per {:.1}ms block",
            total_ms / f64::from(blocks),
            config.block_ms()
        );
    }

    Ok(())
}
