use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LapsecamConfig {
    pub device: DeviceConfig,
    pub schedule: ScheduleConfig,
    pub sweep: SweepConfig,
    pub output: OutputConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Dot-path of the aperture setting in the device configuration tree
    #[serde(default = "default_aperture_path")]
    pub aperture_path: String,

    /// Dot-path of the shutter speed setting in the device configuration tree
    #[serde(default = "default_shutter_path")]
    pub shutter_path: String,

    /// Device-side folder that captures land in (listed and cleared between shots)
    #[serde(default = "default_storage_folder")]
    pub storage_folder: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Capture mode: full exposure sweep or fixed-interval single shot
    #[serde(default = "default_capture_mode")]
    pub mode: CaptureMode,

    /// Seconds between sweeps (sweep mode) or between shots (single mode)
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,

    /// Polling period for the trigger loop in single mode
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: f64,

    /// Lookahead used to forecast an upcoming shot
    #[serde(default = "default_pretrigger_seconds")]
    pub pretrigger_seconds: f64,

    /// Capture attempts per due shot before the fault is surfaced
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SweepConfig {
    /// Largest f-number included in a sweep
    #[serde(default = "default_aperture_max")]
    pub aperture_max: f64,

    /// Fastest shutter speed included in a sweep, in seconds
    #[serde(default = "default_shutter_min")]
    pub shutter_min: f64,

    /// Slowest shutter speed included in a sweep, in seconds
    #[serde(default = "default_shutter_max")]
    pub shutter_max: f64,

    /// Seconds to let the device settle between a capture and its cleanup
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Base path for storing captures
    #[serde(default = "default_output_root")]
    pub root: String,

    /// Write a manifest JSON file for each sweep run
    #[serde(default = "default_save_manifest")]
    pub save_manifest: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Seconds to wait before re-checking an inactive day/night gate
    #[serde(default = "default_gate_backoff_seconds")]
    pub gate_backoff_seconds: f64,

    /// Keep running after a shot exhausts its retry budget
    #[serde(default = "default_continue_after_failure")]
    pub continue_after_failure: bool,

    /// Day/night gate: always active, or active between dusk and dawn hours
    #[serde(default = "default_gate_mode")]
    pub gate: GateMode,

    /// Hour of day (0-23) after which the gate opens
    #[serde(default = "default_dusk_hour")]
    pub dusk_hour: u32,

    /// Hour of day (0-23) before which the gate stays open
    #[serde(default = "default_dawn_hour")]
    pub dawn_hour: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Sweep,
    Single,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    Always,
    Hours,
}

impl LapsecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("lapsecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("device.aperture_path", default_aperture_path())?
            .set_default("device.shutter_path", default_shutter_path())?
            .set_default("device.storage_folder", default_storage_folder())?
            .set_default("schedule.mode", "sweep")?
            .set_default("schedule.interval_seconds", default_interval_seconds())?
            .set_default("schedule.poll_seconds", default_poll_seconds())?
            .set_default("schedule.pretrigger_seconds", default_pretrigger_seconds())?
            .set_default("schedule.max_attempts", default_max_attempts())?
            .set_default("sweep.aperture_max", default_aperture_max())?
            .set_default("sweep.shutter_min", default_shutter_min())?
            .set_default("sweep.shutter_max", default_shutter_max())?
            .set_default("sweep.settle_seconds", default_settle_seconds())?
            .set_default("output.root", default_output_root())?
            .set_default("output.save_manifest", default_save_manifest())?
            .set_default("system.gate_backoff_seconds", default_gate_backoff_seconds())?
            .set_default(
                "system.continue_after_failure",
                default_continue_after_failure(),
            )?
            .set_default("system.gate", "hours")?
            .set_default("system.dusk_hour", default_dusk_hour())?
            .set_default("system.dawn_hour", default_dawn_hour())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with LAPSECAM_ prefix
            .add_source(Environment::with_prefix("LAPSECAM").separator("_"))
            .build()?;

        let config: LapsecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "Schedule interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.schedule.poll_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "Schedule poll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.schedule.max_attempts == 0 {
            return Err(ConfigError::Message(
                "Schedule max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.sweep.aperture_max <= 0.0 {
            return Err(ConfigError::Message(
                "Sweep aperture_max must be greater than 0".to_string(),
            ));
        }

        if self.sweep.shutter_min <= 0.0 || self.sweep.shutter_max < self.sweep.shutter_min {
            return Err(ConfigError::Message(
                "Sweep shutter range must satisfy 0 < shutter_min <= shutter_max".to_string(),
            ));
        }

        if self.sweep.settle_seconds < 0.0 {
            return Err(ConfigError::Message(
                "Sweep settle_seconds must not be negative".to_string(),
            ));
        }

        if self.output.root.is_empty() {
            return Err(ConfigError::Message(
                "Output root must not be empty".to_string(),
            ));
        }

        if self.system.dusk_hour > 23 || self.system.dawn_hour > 23 {
            return Err(ConfigError::Message(
                "Gate hours must be in the range 0-23".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LapsecamConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                aperture_path: default_aperture_path(),
                shutter_path: default_shutter_path(),
                storage_folder: default_storage_folder(),
            },
            schedule: ScheduleConfig {
                mode: default_capture_mode(),
                interval_seconds: default_interval_seconds(),
                poll_seconds: default_poll_seconds(),
                pretrigger_seconds: default_pretrigger_seconds(),
                max_attempts: default_max_attempts(),
            },
            sweep: SweepConfig {
                aperture_max: default_aperture_max(),
                shutter_min: default_shutter_min(),
                shutter_max: default_shutter_max(),
                settle_seconds: default_settle_seconds(),
            },
            output: OutputConfig {
                root: default_output_root(),
                save_manifest: default_save_manifest(),
            },
            system: SystemConfig {
                gate_backoff_seconds: default_gate_backoff_seconds(),
                continue_after_failure: default_continue_after_failure(),
                gate: default_gate_mode(),
                dusk_hour: default_dusk_hour(),
                dawn_hour: default_dawn_hour(),
            },
        }
    }
}

// Default value functions
fn default_aperture_path() -> String {
    "main.capturesettings.aperture".to_string()
}
fn default_shutter_path() -> String {
    "main.capturesettings.shutterspeed".to_string()
}
fn default_storage_folder() -> String {
    "/DCIM/100CANON".to_string()
}

fn default_capture_mode() -> CaptureMode {
    CaptureMode::Sweep
}
fn default_interval_seconds() -> f64 {
    3600.0
}
fn default_poll_seconds() -> f64 {
    1.0
}
fn default_pretrigger_seconds() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    5
}

fn default_aperture_max() -> f64 {
    5.6
}
fn default_shutter_min() -> f64 {
    0.008
}
fn default_shutter_max() -> f64 {
    0.334
}
fn default_settle_seconds() -> f64 {
    20.0
}

fn default_output_root() -> String {
    "./captures".to_string()
}
fn default_save_manifest() -> bool {
    true
}

fn default_gate_backoff_seconds() -> f64 {
    10.0
}
fn default_continue_after_failure() -> bool {
    false
}
fn default_gate_mode() -> GateMode {
    GateMode::Hours
}
fn default_dusk_hour() -> u32 {
    20
}
fn default_dawn_hour() -> u32 {
    6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = LapsecamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.mode, CaptureMode::Sweep);
        assert_eq!(config.schedule.max_attempts, 5);
        assert_eq!(config.sweep.aperture_max, 5.6);
    }

    #[test]
    fn test_config_validation_rejects_bad_interval() {
        let mut config = LapsecamConfig::default();
        config.schedule.interval_seconds = 0.0;
        assert!(config.validate().is_err());

        config.schedule.interval_seconds = 60.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_inverted_shutter_range() {
        let mut config = LapsecamConfig::default();
        config.sweep.shutter_min = 0.5;
        config.sweep.shutter_max = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_bad_gate_hours() {
        let mut config = LapsecamConfig::default();
        config.system.dusk_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_roundtrip_through_toml() {
        let config = LapsecamConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: LapsecamConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.schedule.mode, config.schedule.mode);
        assert_eq!(back.system.gate, config.system.gate);
    }
}
