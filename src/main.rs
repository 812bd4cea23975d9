//! danmaku-replay - headless replay of a comment collection
//!
//! Loads a collection from a file or URL, plays it against a virtual 60 fps
//! clock and logs how many comments were shown or dropped.

use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use tracing::info;

use danmaku::api::HttpBackend;
use danmaku::danmaku::RetireReason;
use danmaku::{CommentManager, DanmakuEvent, EngineConfig, SharedPlaybackClock, event_channel};

const FPS: f64 = 60.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        eprintln!("usage: danmaku-replay <file-or-url> [seconds]");
        std::process::exit(2);
    };
    let seconds: f64 = args
        .next()
        .map(|s| s.parse::<f64>())
        .transpose()
        .context("duration must be a number of seconds")?
        .unwrap_or(60.0);

    let config = EngineConfig::load();
    let backend = HttpBackend::new(Duration::from_secs(config.request_timeout_secs))?;
    let clock = SharedPlaybackClock::new();
    let (tx, mut rx) = event_channel();
    let mut manager = CommentManager::new(config, clock.clone(), tx)
        .with_surface(1280.0, 720.0)
        .with_backend(backend);

    manager.load(source.clone())?;
    manager.flush_remote().await;
    while let Ok(event) = rx.try_recv() {
        if let DanmakuEvent::LoadFailed { error, .. } = event {
            bail!("{}", error);
        }
    }
    info!("Replaying {} comments for {:.0}s", manager.len(), seconds);

    let start = Instant::now();
    let frames = (seconds.max(0.0) * FPS).ceil() as u64;
    let mut shown = 0usize;
    let mut completed = 0usize;
    let mut peak = 0usize;

    clock.set_playing(true);
    for frame in 0..=frames {
        let elapsed = frame as f64 / FPS;
        clock.set_position(elapsed);
        manager.tick_at(start + Duration::from_secs_f64(elapsed));

        while let Ok(event) = rx.try_recv() {
            match event {
                DanmakuEvent::ItemActivated { .. } => shown += 1,
                DanmakuEvent::ItemRetired {
                    reason: RetireReason::Completed,
                    ..
                } => completed += 1,
                _ => {}
            }
        }
        peak = peak.max(manager.stage().active().len());

        if frame > 0 && frame % (FPS as u64 * 10) == 0 {
            info!(
                "t={:>5.1}s on screen {:>3}, shown {}",
                elapsed,
                manager.stage().active().len(),
                shown
            );
        }
    }

    let stats = manager.stats();
    info!(
        "Done: shown {}, completed {}, dropped {}, filtered {}, pending {}, peak {}",
        shown, completed, stats.dropped, stats.filtered, stats.pending, peak
    );
    info!(
        "Pool: created {}, recycled {}, destroyed {}",
        stats.pool.created, stats.pool.recycled, stats.pool.destroyed
    );
    manager.destroy();
    Ok(())
}
