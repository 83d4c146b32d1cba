use thiserror::Error;

/// Faults raised by the camera transport.
///
/// Every variant except `Rejected` is transient: the director answers it
/// with a session reset and a bounded retry. `Rejected` means the device
/// refused a configuration value for its current state, and retrying the
/// same value cannot help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("capture failed: {details}")]
    Capture { details: String },

    #[error("transfer of {name} failed: {details}")]
    Transfer { name: String, details: String },

    #[error("listing files in {folder} failed: {details}")]
    List { folder: String, details: String },

    #[error("deleting files in {folder} failed: {details}")]
    Delete { folder: String, details: String },

    #[error("reading device configuration failed: {details}")]
    ConfigRead { details: String },

    #[error("device rejected value {value:?} for {setting}")]
    Rejected { setting: String, value: String },
}

impl DeviceError {
    pub fn capture<S: Into<String>>(details: S) -> Self {
        Self::Capture {
            details: details.into(),
        }
    }

    /// Whether a session reset followed by a retry can plausibly clear
    /// the fault.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DeviceError::Rejected { .. })
    }
}

#[derive(Error, Debug)]
pub enum LapsecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("capture for slot {shot_index} gave up after {attempts} attempts: {source}")]
    CaptureExhausted {
        shot_index: i64,
        attempts: u32,
        #[source]
        source: DeviceError,
    },

    #[error("no such setting: {path}")]
    UnknownSetting { path: String },
}

pub type Result<T> = std::result::Result<T, LapsecamError>;
