//! V4L2 capture service: streams frames from a capture device into a
//! bounded channel and reconfigures on SIGHUP

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::block_in_place;
use tracing::{error, info, warn};

use v4l2_input::capture::{CaptureSource, KernelOpener};
use v4l2_input::pipeline::ChannelSink;
use v4l2_input::{utils, CaptureSettings, Config};

/// Fill in the device path when it was left empty
fn resolve_device(mut settings: CaptureSettings) -> Result<CaptureSettings> {
    if settings.device_path.is_empty() {
        let device = utils::auto_detect_device()?;
        info!("Using capture device: {} ({})", device.path, device.card);
        settings.device_path = device.path;
    }
    Ok(settings)
}

fn apply(source: &mut CaptureSource<KernelOpener>, config: &Config) {
    let settings = match resolve_device(config.capture.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("No capture device: {}", e);
            return;
        }
    };

    match block_in_place(|| source.update(&settings)) {
        Ok(true) => info!("Capture settings applied"),
        Ok(false) => info!("Capture settings unchanged"),
        // Already logged by the source; wait for a reload
        Err(_) => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("v4l2_input=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("v4l2-input launching...");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    v4l2_input::CONFIG.store(Arc::new(config.clone()));

    let (sink, rx, faults) = ChannelSink::bounded(config.pipeline.channel_capacity);
    let sink = Arc::new(sink);
    let mut source = CaptureSource::new(KernelOpener, sink.clone(), config.stream.clone());

    apply(&mut source, &config);

    let consumer = tokio::spawn(async move {
        let mut window_start = Instant::now();
        let mut window_frames = 0u32;

        while let Ok(frame) = rx.recv_async().await {
            window_frames += 1;
            let elapsed = window_start.elapsed();
            if elapsed >= Duration::from_secs(5) {
                info!(
                    "{}x{} {:?}: {:.1} fps (frame {})",
                    frame.meta.width,
                    frame.meta.height,
                    frame.meta.format,
                    window_frames as f64 / elapsed.as_secs_f64(),
                    frame.meta.sequence
                );
                window_start = Instant::now();
                window_frames = 0;
            }
        }
    });

    let mut hangup = signal(SignalKind::hangup())?;
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = hangup.recv() => {
                info!("Reloading configuration");
                match Config::load(config_path.as_deref()) {
                    Ok(config) => {
                        v4l2_input::CONFIG.store(Arc::new(config.clone()));
                        apply(&mut source, &config);
                    }
                    Err(e) => error!("Failed to reload configuration: {}", e),
                }
            }
            _ = tick.tick() => {
                if let Some(fault) = block_in_place(|| source.poll_fault()) {
                    warn!("Capture stopped: {}", fault);
                }
                while let Ok(message) = faults.try_recv() {
                    warn!("Sink reported: {}", message);
                }
            }
        }
    }

    block_in_place(|| source.shutdown());
    drop(source);
    let (sent, dropped) = sink.stats();
    info!("Delivered {} frames, dropped {}", sent, dropped);
    drop(sink);
    let _ = consumer.await;

    info!("v4l2-input shutting down");
    Ok(())
}
