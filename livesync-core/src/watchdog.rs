//! Live-playback latency watchdog
//!
//! Keeps a live player pinned near the broadcast's live edge without causing
//! visible stutter from over-eager corrective action. The watchdog samples
//! the player on an interval and picks between a cheap seek-to-live and a
//! full stream reload; reloads are rate-limited by a cooldown so that rapid
//! degradation cannot turn into a reload storm. Sustained buffering triggers
//! an immediate re-evaluation instead of waiting for the next tick.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::error::Result;

/// Player buffering state at sample time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Playing,
    Buffering,
    Paused,
}

/// One poll of the player. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct LivenessSample {
    /// Gap between the live edge and the rendering position, in seconds.
    /// Non-finite values mean "unknown" and cause no action.
    pub latency_sec: f64,
    pub buffer_state: BufferState,
    pub timestamp: Instant,
}

/// The player seam: sampling is cheap and synchronous, corrective actions
/// go through the player's async machinery.
#[async_trait]
pub trait LivePlayer: Send + Sync + 'static {
    fn sample(&self) -> LivenessSample;

    /// Seek to the end of the buffered duration. Non-disruptive.
    async fn seek_to_live_edge(&self) -> Result<()>;

    /// Tear down and re-open the stream. Capability of last resort.
    async fn reload(&self) -> Result<()>;
}

/// Corrective action for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    SeekToLive,
    Reload,
}

/// Decide the corrective action for a latency sample.
///
/// Reload wins above `reload_threshold_sec` when the cooldown has elapsed;
/// a cooldown-blocked reload degrades to a seek, which needs no cooldown.
#[must_use]
pub fn decide(
    latency_sec: f64,
    since_last_reload: Option<Duration>,
    config: &WatchdogConfig,
) -> Option<WatchdogAction> {
    if !latency_sec.is_finite() {
        return None;
    }

    if latency_sec >= config.reload_threshold_sec {
        let cooled_down =
            since_last_reload.is_none_or(|elapsed| elapsed >= config.reload_cooldown());
        if cooled_down {
            return Some(WatchdogAction::Reload);
        }
    }

    if latency_sec >= config.seek_threshold_sec {
        return Some(WatchdogAction::SeekToLive);
    }

    None
}

/// Handle to a running watchdog; shutting down is deterministic.
pub struct LatencyWatchdog {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LatencyWatchdog {
    /// Spawn the poll loop for one player.
    #[must_use]
    pub fn spawn(config: WatchdogConfig, player: Arc<dyn LivePlayer>) -> Self {
        let cancel = CancellationToken::new();
        let run = RunLoop {
            config,
            player,
            cancel: cancel.clone(),
            last_reload: None,
            buffering_since: None,
        };
        Self {
            cancel,
            task: tokio::spawn(run.run()),
        }
    }

    /// Stop polling; no player action is issued after this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "Watchdog task ended abnormally");
        }
    }
}

struct RunLoop {
    config: WatchdogConfig,
    player: Arc<dyn LivePlayer>,
    cancel: CancellationToken,
    last_reload: Option<Instant>,
    buffering_since: Option<Instant>,
}

impl RunLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let buffering_deadline = self
                .buffering_since
                .map(|since| since + self.config.buffering_timeout());

            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                () = async {
                    match buffering_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        // Disarmed while not buffering.
                        None => std::future::pending().await,
                    }
                } => {
                    debug!("Buffering timeout, re-evaluating latency immediately");
                    // Re-arm so sustained buffering re-triggers once per window.
                    self.buffering_since = Some(Instant::now());
                }
            }

            self.evaluate().await;
        }
    }

    async fn evaluate(&mut self) {
        let sample = self.player.sample();

        match sample.buffer_state {
            BufferState::Paused => {
                self.buffering_since = None;
                return;
            }
            BufferState::Buffering => {
                if self.buffering_since.is_none() {
                    self.buffering_since = Some(sample.timestamp);
                }
            }
            BufferState::Playing => self.buffering_since = None,
        }

        let since_last_reload = self.last_reload.map(|at| at.elapsed());
        match decide(sample.latency_sec, since_last_reload, &self.config) {
            Some(WatchdogAction::Reload) => {
                info!(
                    latency_sec = sample.latency_sec,
                    "Latency past reload threshold, reloading stream"
                );
                match self.player.reload().await {
                    Ok(()) => self.last_reload = Some(Instant::now()),
                    // Retried on the next tick; cooldown only tracks
                    // successful reloads.
                    Err(err) => warn!(error = %err, "Stream reload failed"),
                }
            }
            Some(WatchdogAction::SeekToLive) => {
                info!(
                    latency_sec = sample.latency_sec,
                    "Latency past seek threshold, seeking to live edge"
                );
                if let Err(err) = self.player.seek_to_live_edge().await {
                    warn!(error = %err, "Seek to live edge failed");
                }
            }
            None => {}
        }
    }
}
