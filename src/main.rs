/// Clap listener binary
///
/// Listens to a WAV file, a raw S16_LE stream on stdin or (with the `live`
/// feature) the microphone, and logs every clap and completed clap sequence.

use anyhow::{bail, Context, Result};
use clap_detector::{
    BlockFormat, BlockSource, ClapListener, DetectorConfig, DetectorEvent, RawStreamSource,
    WavSource,
};
use std::env;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clap_detector=info,clap_listener=info")),
        )
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_config_flag(&mut args)?;

    let Some(command) = args.first().cloned() else {
        print_usage();
        return Ok(());
    };

    let config = DetectorConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    match command.as_str() {
        "wav" => {
            let Some(path) = args.get(1) else {
                bail!("Usage: clap-listener wav <path>");
            };
            let mut source = WavSource::open(Path::new(path), BlockFormat::from_config(&config))
                .with_context(|| format!("Failed to open {}", path))?;
            listen(config, &mut source).await?;
        }
        "stdin" => {
            info!(
                "Reading raw S16_LE audio from stdin ({} Hz, {} channels)",
                config.sample_rate, config.channels
            );
            let mut source = RawStreamSource::stdin(BlockFormat::from_config(&config));
            listen(config, &mut source).await?;
        }
        "mic" => listen_microphone(config).await?,
        "devices" => list_devices()?,
        "config" => {
            println!("{}", config.to_json_pretty()?);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Remove `--config <file>` from the argument list
fn take_config_flag(args: &mut Vec<String>) -> Result<Option<PathBuf>> {
    let Some(index) = args.iter().position(|a| a == "--config") else {
        return Ok(None);
    };

    if index + 1 >= args.len() {
        bail!("--config requires a file path");
    }

    let path = PathBuf::from(args.remove(index + 1));
    args.remove(index);
    Ok(Some(path))
}

fn print_usage() {
    println!("Clap Listener v{}", clap_detector::VERSION);
    println!();
    println!("Usage:");
    println!("  clap-listener [--config <file>] <command>");
    println!();
    println!("Commands:");
    println!("  wav <path>   Detect claps in a 16-bit WAV file");
    println!("  stdin        Detect claps in raw S16_LE audio read from stdin");
    println!("  mic          Listen to the microphone (requires the `live` feature)");
    println!("  devices      List input devices (requires the `live` feature)");
    println!("  config       Print the effective configuration as JSON");
    println!();
    println!("Examples:");
    println!("  clap-listener wav recording.wav");
    println!("  arecord -f S16_LE -r 44100 -c 2 -t raw | clap-listener stdin");
    println!("  CLAP_COUNT_GOAL=2 clap-listener --config clap.json mic");
}

async fn listen<S>(config: DetectorConfig, source: &mut S) -> Result<()>
where
    S: BlockSource + ?Sized,
{
    let mut listener = ClapListener::new(config).context("Failed to create listener")?;
    let Some(mut events) = listener.take_receiver() else {
        bail!("Event receiver already taken");
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, shutting down");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    info!("Listening for claps...");
    let stats = listener.run(source, &cancel).await;
    drop(listener);

    if let Err(e) = printer.await {
        warn!("Event printer failed: {}", e);
    }

    info!(
        "Processed {} blocks ({:.1}s): {} noisy, {} malformed, {} capture errors",
        stats.blocks_processed,
        stats.stream_time.as_secs_f64(),
        stats.noisy_blocks,
        stats.malformed_blocks,
        stats.capture_errors
    );
    info!(
        "Taps: {}, claps: {}, sequences: {}, threshold {:.6} ({} raises, {} lowers)",
        stats.taps_detected,
        stats.claps_observed,
        stats.sequences_completed,
        stats.threshold,
        stats.threshold_raises,
        stats.threshold_lowers
    );

    Ok(())
}

fn log_event(event: &DetectorEvent) {
    match event {
        DetectorEvent::TapDetected { .. } => {}
        DetectorEvent::ClapObserved {
            timestamp,
            count: 1,
            peak_frequency_hz,
        } => info!(
            "[{:>8.1}s] 1 Detected / Reset Count. Detected Frequency: {:.1} Hz",
            timestamp.as_secs_f64(),
            peak_frequency_hz
        ),
        DetectorEvent::ClapObserved {
            timestamp,
            count,
            peak_frequency_hz,
        } => info!(
            "[{:>8.1}s] {} Clap Detected. Detected Frequency: {:.1} Hz",
            timestamp.as_secs_f64(),
            count,
            peak_frequency_hz
        ),
        DetectorEvent::ClapSequenceComplete { timestamp, count } => info!(
            "[{:>8.1}s] {} rapid claps detected",
            timestamp.as_secs_f64(),
            count
        ),
    }
}

#[cfg(feature = "live")]
async fn listen_microphone(config: DetectorConfig) -> Result<()> {
    let mut source = clap_detector::MicrophoneSource::start(BlockFormat::from_config(&config))
        .context("Failed to start microphone capture")?;
    listen(config, &mut source).await?;

    if source.dropped_samples() > 0 {
        warn!("{} samples dropped while processing fell behind", source.dropped_samples());
    }
    Ok(())
}

#[cfg(not(feature = "live"))]
async fn listen_microphone(_config: DetectorConfig) -> Result<()> {
    bail!("Microphone capture requires building with `--features live`")
}

#[cfg(feature = "live")]
fn list_devices() -> Result<()> {
    let devices = clap_detector::list_input_devices().context("Failed to list input devices")?;
    let preferred = clap_detector::microphone::find_preferred_device(&devices);

    println!("Input Devices ({}):", devices.len());
    for (i, name) in devices.iter().enumerate() {
        let marker = if Some(i) == preferred { " (selected)" } else { "" };
        println!("  {}{}", name, marker);
    }
    Ok(())
}

#[cfg(not(feature = "live"))]
fn list_devices() -> Result<()> {
    bail!("Device listing requires building with `--features live`")
}
