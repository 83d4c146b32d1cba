use crate::config::{CaptureMode, GateMode, LapsecamConfig};
use crate::device::CameraSession;
use crate::director::{CaptureDirector, TickOutcome};
use crate::error::{LapsecamError, Result};
use crate::exposure::{plan, SweepBounds};
use crate::output::{CaptureSink, ManifestCell, OutputLayout, SweepManifest};
use crate::tree::NodeValue;
use chrono::{DateTime, Local, Timelike};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one scheduler step did, and therefore how long the run loop
/// should sleep before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Gate inactive; re-check after the gate backoff.
    Standby,
    /// A full sweep finished; sleep the inter-sweep interval.
    SweepComplete { cells: usize },
    /// Single-shot trigger polled; sleep the poll period.
    SlotPolled { fired: bool },
}

/// Top-level run loop: gates capture on an externally supplied darkness
/// predicate and, when active, runs either a fixed-interval single shot
/// or a full exposure sweep.
///
/// `step` takes the current time and the gate result as explicit inputs,
/// which keeps the scheduling decisions replayable; `run` is the thin
/// wall-clock wrapper around it.
pub struct TimelapseScheduler<G> {
    config: LapsecamConfig,
    session: CameraSession,
    director: CaptureDirector,
    output: OutputLayout,
    gate: G,
    single_sink: Option<CaptureSink>,
}

impl<G> TimelapseScheduler<G>
where
    G: Fn(SystemTime) -> bool,
{
    pub fn new(config: LapsecamConfig, session: CameraSession, gate: G) -> Self {
        let director = CaptureDirector::new(
            Duration::from_secs_f64(config.schedule.interval_seconds),
            config.schedule.max_attempts,
        );
        let output = OutputLayout::new(config.output.root.clone());
        Self {
            config,
            session,
            director,
            output,
            gate,
            single_sink: None,
        }
    }

    /// Loop until the process is shut down externally.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Timelapse loop started in {:?} mode",
            self.config.schedule.mode
        );
        loop {
            let now = SystemTime::now();
            let dark = (self.gate)(now);
            let outcome = match self.step(now, dark).await {
                Ok(outcome) => outcome,
                Err(err @ LapsecamError::CaptureExhausted { .. })
                    if self.config.system.continue_after_failure =>
                {
                    error!("Continuing past failed slot: {}", err);
                    match self.config.schedule.mode {
                        CaptureMode::Sweep => StepOutcome::SweepComplete { cells: 0 },
                        CaptureMode::Single => StepOutcome::SlotPolled { fired: false },
                    }
                }
                Err(err) => return Err(err),
            };

            let pause = match outcome {
                StepOutcome::Standby => {
                    Duration::from_secs_f64(self.config.system.gate_backoff_seconds)
                }
                StepOutcome::SweepComplete { .. } => {
                    Duration::from_secs_f64(self.config.schedule.interval_seconds)
                }
                StepOutcome::SlotPolled { .. } => {
                    Duration::from_secs_f64(self.config.schedule.poll_seconds)
                }
            };
            sleep(pause).await;
        }
    }

    /// Execute one scheduling decision for `now` with the gate already
    /// evaluated.
    pub async fn step(&mut self, now: SystemTime, dark: bool) -> Result<StepOutcome> {
        if !dark {
            debug!("Gate inactive; standing by");
            return Ok(StepOutcome::Standby);
        }
        match self.config.schedule.mode {
            CaptureMode::Sweep => self.run_sweep(now).await,
            CaptureMode::Single => self.poll_slot(now).await,
        }
    }

    /// Hand the device session back, ending the schedule.
    pub fn into_session(self) -> CameraSession {
        self.session
    }

    async fn poll_slot(&mut self, now: SystemTime) -> Result<StepOutcome> {
        if self.single_sink.is_none() {
            let date = DateTime::<Local>::from(now).date_naive();
            let dir = self.output.run_dir(date).await?;
            self.single_sink = Some(CaptureSink::new(dir, ""));
        }
        if !self.director.is_scheduled() {
            self.director.start(now);
        }

        let offset = Duration::from_secs_f64(self.config.schedule.pretrigger_seconds);
        if self.director.pretrigger(now, offset) {
            debug!("Shot due within {:.1}s", offset.as_secs_f64());
        }

        let fired = if let Some(sink) = &self.single_sink {
            matches!(
                self.director.tick(now, &mut self.session, sink).await?,
                TickOutcome::Fired { .. }
            )
        } else {
            false
        };
        Ok(StepOutcome::SlotPolled { fired })
    }

    async fn run_sweep(&mut self, now: SystemTime) -> Result<StepOutcome> {
        let mut tree = self.session.get_config().await?;
        let aperture_id = tree
            .lookup_path(&self.config.device.aperture_path)
            .ok_or_else(|| LapsecamError::UnknownSetting {
                path: self.config.device.aperture_path.clone(),
            })?;
        let shutter_id = tree
            .lookup_path(&self.config.device.shutter_path)
            .ok_or_else(|| LapsecamError::UnknownSetting {
                path: self.config.device.shutter_path.clone(),
            })?;

        let bounds = SweepBounds {
            aperture_max: self.config.sweep.aperture_max,
            shutter_min: self.config.sweep.shutter_min,
            shutter_max: self.config.sweep.shutter_max,
        };
        let cells = plan(
            &tree.node(aperture_id).choices,
            &tree.node(shutter_id).choices,
            &bounds,
        );
        if cells.is_empty() {
            warn!("Exposure plan is empty; nothing to capture");
            return Ok(StepOutcome::SweepComplete { cells: 0 });
        }

        let run_id = Uuid::new_v4().to_string();
        let date = DateTime::<Local>::from(now).date_naive();
        let run_dir = self.output.run_dir(date).await?;
        info!(
            "Sweep run {} started: {} cells under {}",
            run_id,
            cells.len(),
            run_dir.display()
        );

        let settle = Duration::from_secs_f64(self.config.sweep.settle_seconds);
        let mut manifest_cells = Vec::with_capacity(cells.len());

        for (index, cell) in cells.iter().enumerate() {
            debug!(
                "Sweep cell {}/{}: f/{} at {}s",
                index + 1,
                cells.len(),
                cell.aperture.label,
                cell.shutter.label
            );
            tree.write(
                aperture_id,
                NodeValue::Text(cell.aperture.label.clone()),
                &mut self.session,
            )
            .await?;
            tree.write(
                shutter_id,
                NodeValue::Text(cell.shutter.label.clone()),
                &mut self.session,
            )
            .await?;

            let sink = CaptureSink::new(run_dir.join(cell.aperture_dir()), cell.file_stub());
            let path = match self
                .director
                .capture_now(&mut self.session, &sink, index as i64)
                .await
            {
                Ok(path) => path,
                Err(err) => {
                    error!(
                        "Sweep cell {} (f/{} at {}s) failed: {}",
                        index + 1,
                        cell.aperture.label,
                        cell.shutter.label,
                        err
                    );
                    return Err(err);
                }
            };

            if !settle.is_zero() {
                sleep(settle).await;
            }
            self.director
                .cleanup(&mut self.session, &self.config.device.storage_folder)
                .await?;

            manifest_cells.push(ManifestCell {
                aperture: cell.aperture.label.clone(),
                f_number: cell.aperture.f_number,
                shutter: cell.shutter.label.clone(),
                seconds: cell.shutter.seconds,
                file: path.display().to_string(),
            });
        }

        if self.config.output.save_manifest {
            let manifest = SweepManifest {
                run_id,
                started_at: now.into(),
                cells: manifest_cells,
            };
            manifest.write_to(&run_dir).await?;
        }

        info!("Sweep complete: {} cells captured", cells.len());
        Ok(StepOutcome::SweepComplete { cells: cells.len() })
    }
}

/// Clock-hour darkness gate built from configuration.
///
/// Stands in for an astronomical dusk/dawn source: active from
/// `dusk_hour` through midnight to `dawn_hour`, or always active in
/// `Always` mode.
pub fn clock_gate(mode: GateMode, dusk_hour: u32, dawn_hour: u32) -> impl Fn(SystemTime) -> bool {
    move |now| match mode {
        GateMode::Always => true,
        GateMode::Hours => {
            let hour = DateTime::<Local>::from(now).hour();
            hour >= dusk_hour || hour < dawn_hour
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MockCamera, MockHandle};
    use tempfile::TempDir;

    fn test_scheduler(
        mutate: impl FnOnce(&mut LapsecamConfig),
    ) -> (
        TimelapseScheduler<fn(SystemTime) -> bool>,
        MockHandle,
        TempDir,
    ) {
        let root = tempfile::tempdir().unwrap();
        let mut config = LapsecamConfig::default();
        config.output.root = root.path().to_string_lossy().into_owned();
        config.sweep.settle_seconds = 0.0;
        mutate(&mut config);

        let camera = MockCamera::new();
        let handle = camera.handle();
        let session = CameraSession::acquire(Box::new(camera));
        let gate: fn(SystemTime) -> bool = |_| true;
        let scheduler = TimelapseScheduler::new(config, session, gate);
        (scheduler, handle, root)
    }

    #[tokio::test]
    async fn test_step_stands_by_when_gate_inactive() {
        let (mut scheduler, handle, _root) = test_scheduler(|_| {});
        let outcome = scheduler.step(SystemTime::now(), false).await.unwrap();
        assert_eq!(outcome, StepOutcome::Standby);
        assert_eq!(handle.captures(), 0);
    }

    #[tokio::test]
    async fn test_sweep_covers_matrix_in_order() {
        let (mut scheduler, handle, root) = test_scheduler(|_| {});
        let now = SystemTime::now();

        let outcome = scheduler.step(now, true).await.unwrap();
        // Mock tree: apertures {2.8, 5.6} pass the 5.6 bound; shutter
        // choices {1/125, 1/60, 1/30, 1/4, 0.3} are in range, Bulb skipped
        assert_eq!(outcome, StepOutcome::SweepComplete { cells: 10 });
        assert_eq!(handle.captures(), 10);

        // Device settings end on the last cell of the sweep
        assert_eq!(
            handle.applied("main.capturesettings.aperture").as_deref(),
            Some("5.6")
        );
        assert_eq!(
            handle.applied("main.capturesettings.shutterspeed").as_deref(),
            Some("0.3")
        );

        // Device folder cleared after every cell
        assert!(handle.device_files().is_empty());

        let date = DateTime::<Local>::from(now).date_naive();
        let run_dir = root
            .path()
            .join(date.format("%m.%d.%y").to_string())
            .join("1");
        assert!(run_dir.join("2.8").is_dir());
        assert!(run_dir.join("5.6").is_dir());
        assert_eq!(std::fs::read_dir(run_dir.join("2.8")).unwrap().count(), 5);
        assert!(run_dir.join("manifest.json").is_file());
    }

    #[tokio::test]
    async fn test_sweep_unknown_setting_path() {
        let (mut scheduler, _handle, _root) = test_scheduler(|config| {
            config.device.aperture_path = "main.capturesettings.iso".to_string();
        });
        let err = scheduler.step(SystemTime::now(), true).await.unwrap_err();
        assert!(matches!(err, LapsecamError::UnknownSetting { .. }));
    }

    #[tokio::test]
    async fn test_sweep_aborts_on_rejected_write() {
        let (mut scheduler, handle, _root) = test_scheduler(|_| {});
        handle.reject_value("2.8");

        let err = scheduler.step(SystemTime::now(), true).await.unwrap_err();
        assert!(matches!(
            err,
            LapsecamError::Device(crate::error::DeviceError::Rejected { .. })
        ));
        // The rejection is permanent: no capture was attempted
        assert_eq!(handle.captures(), 0);
    }

    #[tokio::test]
    async fn test_sweep_surfaces_exhausted_capture() {
        let (mut scheduler, handle, _root) = test_scheduler(|_| {});
        handle.fail_next_captures(5);

        let err = scheduler.step(SystemTime::now(), true).await.unwrap_err();
        assert!(matches!(err, LapsecamError::CaptureExhausted { .. }));
    }

    #[tokio::test]
    async fn test_single_mode_fires_once_per_slot() {
        let (mut scheduler, handle, _root) = test_scheduler(|config| {
            config.schedule.mode = CaptureMode::Single;
            config.schedule.interval_seconds = 60.0;
        });
        let now = SystemTime::now();

        let outcome = scheduler.step(now, true).await.unwrap();
        assert_eq!(outcome, StepOutcome::SlotPolled { fired: true });
        assert_eq!(handle.captures(), 1);

        // Same slot on the next poll: quiet
        let outcome = scheduler.step(now, true).await.unwrap();
        assert_eq!(outcome, StepOutcome::SlotPolled { fired: false });
        assert_eq!(handle.captures(), 1);
    }

    #[test]
    fn test_clock_gate_modes() {
        let always = clock_gate(GateMode::Always, 20, 6);
        assert!(always(SystemTime::now()));

        let hours = clock_gate(GateMode::Hours, 0, 0);
        // dusk 0 means every hour satisfies `hour >= dusk`
        assert!(hours(SystemTime::now()));
    }
}
