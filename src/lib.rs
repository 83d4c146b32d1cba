pub mod config;
pub mod device;
pub mod director;
pub mod error;
pub mod exposure;
pub mod output;
pub mod scheduler;
pub mod tree;

pub use config::{CaptureMode, GateMode, LapsecamConfig};
pub use device::{CameraSession, CameraTransport, FileHandle, MockCamera, MockHandle};
pub use director::{CaptureDirector, TickOutcome};
pub use error::{DeviceError, LapsecamError, Result};
pub use exposure::{plan, Aperture, ShutterSpeed, SweepBounds, SweepCell};
pub use output::{CaptureSink, ManifestCell, OutputLayout, SweepManifest};
pub use scheduler::{clock_gate, StepOutcome, TimelapseScheduler};
pub use tree::{ConfigNode, ConfigTree, NodeId, NodeType, NodeValue, SettingDomain};
