use crate::device::CameraSession;
use crate::error::LapsecamError;
use crate::output::CaptureSink;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Result of one trigger poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A shot was due for a new slot and was captured.
    Fired { shot_index: i64 },
    /// Nothing due: unscheduled, paused, or the slot already fired.
    Quiet,
}

/// Decides from wall-clock time whether exactly one shot is due per
/// interval slot, and executes it with bounded fault recovery.
///
/// The slot number is recomputed from absolute elapsed time on every
/// tick instead of counting timer expirations, so irregular polling
/// cannot double-fire a slot or skip one permanently: a late tick still
/// fires once for the slot it is late for, and an early tick is a no-op.
pub struct CaptureDirector {
    interval: Duration,
    start_ts: Option<SystemTime>,
    last_shot: i64,
    paused: bool,
    max_attempts: u32,
}

impl CaptureDirector {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            start_ts: None,
            last_shot: -1,
            paused: false,
            max_attempts,
        }
    }

    /// Set a new interval and start the schedule.
    pub fn schedule(&mut self, interval: Duration, now: SystemTime) {
        self.interval = interval;
        self.start(now);
    }

    /// Begin (or restart) the schedule at `now`.
    pub fn start(&mut self, now: SystemTime) {
        info!(
            "Schedule started: one shot every {:.1}s",
            self.interval.as_secs_f64()
        );
        self.start_ts = Some(now);
        self.last_shot = -1;
    }

    /// Clear the schedule. Pause state and interval survive a stop.
    pub fn stop(&mut self) {
        if self.start_ts.take().is_some() {
            info!("Schedule stopped");
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!("Schedule {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    pub fn is_scheduled(&self) -> bool {
        self.start_ts.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn last_shot(&self) -> i64 {
        self.last_shot
    }

    /// Interval slot that `now + offset` falls into, or `None` when the
    /// schedule is idle or paused.
    fn slot_index(&self, now: SystemTime, offset: Duration) -> Option<i64> {
        let start = self.start_ts?;
        if self.paused {
            return None;
        }
        let elapsed = now.duration_since(start).unwrap_or(Duration::ZERO) + offset;
        Some((elapsed.as_secs_f64() / self.interval.as_secs_f64()).floor() as i64)
    }

    /// Poll the trigger. Fires at most once per interval slot, so this is
    /// safe to call at arbitrary sub-interval frequency.
    ///
    /// The slot is consumed before the capture attempt: when the retry
    /// budget is exhausted the fault propagates, but the slot is
    /// forfeited rather than replayed on the next tick.
    pub async fn tick(
        &mut self,
        now: SystemTime,
        session: &mut CameraSession,
        sink: &CaptureSink,
    ) -> Result<TickOutcome, LapsecamError> {
        let Some(shot) = self.slot_index(now, Duration::ZERO) else {
            return Ok(TickOutcome::Quiet);
        };
        if shot == self.last_shot {
            return Ok(TickOutcome::Quiet);
        }
        self.last_shot = shot;

        debug!("Slot {} is due", shot);
        let path = self.capture_now(session, sink, shot).await?;
        info!("Shot {} captured to {}", shot, path.display());
        Ok(TickOutcome::Fired { shot_index: shot })
    }

    /// Whether a shot would become due within `offset` from now. Pure:
    /// never consumes the slot.
    pub fn pretrigger(&self, now: SystemTime, offset: Duration) -> bool {
        match self.slot_index(now, offset) {
            Some(shot) => shot != self.last_shot,
            None => false,
        }
    }

    /// One capture (trigger, transfer, sink write) under the bounded
    /// retry policy: a transient device fault resets the session and
    /// retries immediately, up to the attempt ceiling.
    pub async fn capture_now(
        &self,
        session: &mut CameraSession,
        sink: &CaptureSink,
        shot_index: i64,
    ) -> Result<PathBuf, LapsecamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::capture_once(session, sink).await {
                Ok(path) => return Ok(path),
                Err(LapsecamError::Device(fault)) if fault.is_transient() => {
                    if attempt >= self.max_attempts {
                        error!(
                            "Capture for slot {} failed {} times, giving up: {}",
                            shot_index, attempt, fault
                        );
                        return Err(LapsecamError::CaptureExhausted {
                            shot_index,
                            attempts: attempt,
                            source: fault,
                        });
                    }
                    warn!(
                        "Capture attempt {}/{} failed ({}), resetting session",
                        attempt, self.max_attempts, fault
                    );
                    session.reset().await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Device-side cleanup under the same retry-and-reset policy as
    /// capture.
    pub async fn cleanup(
        &self,
        session: &mut CameraSession,
        folder: &str,
    ) -> Result<(), LapsecamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match session.delete_all(folder).await {
                Ok(()) => return Ok(()),
                Err(fault) if fault.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "Cleanup attempt {}/{} failed ({}), resetting session",
                        attempt, self.max_attempts, fault
                    );
                    session.reset().await;
                }
                Err(fault) => return Err(fault.into()),
            }
        }
    }

    async fn capture_once(
        session: &mut CameraSession,
        sink: &CaptureSink,
    ) -> Result<PathBuf, LapsecamError> {
        let handle = session.capture().await?;
        let bytes = session.transfer(&handle).await?;
        let path = sink.save(&handle.name, &bytes).await?;
        Ok(path)
    }
}
