use crate::error::LapsecamError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Deterministic on-disk layout for captured frames.
///
/// Runs are keyed by capture date and a per-date sequence number:
/// `<root>/<MM.DD.YY>/<seq>/`. Sweep cells add an aperture subdirectory
/// below the run, and filenames carry a shutter-speed stub so cells never
/// collide and sort naturally by aperture then speed.
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the next run directory for `date`, creating it.
    pub async fn run_dir(&self, date: NaiveDate) -> std::io::Result<PathBuf> {
        let dated = self.root.join(date.format("%m.%d.%y").to_string());
        fs::create_dir_all(&dated).await?;

        let mut entries = fs::read_dir(&dated).await?;
        let mut count = 0usize;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }

        let run = dated.join((count + 1).to_string());
        fs::create_dir_all(&run).await?;
        info!("Capture run directory: {}", run.display());
        Ok(run)
    }
}

/// Write target for one capture: a directory plus the filename stub
/// inserted before the extension of the device-side name.
pub struct CaptureSink {
    dir: PathBuf,
    stub: String,
}

impl CaptureSink {
    pub fn new<S: Into<String>>(dir: PathBuf, stub: S) -> Self {
        Self {
            dir,
            stub: stub.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist transferred bytes under this sink's directory. The
    /// directory is created on first use.
    pub async fn save(&self, device_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let name = Path::new(device_name);
        let stem = name
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(device_name);
        let target_name = match name.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}{}.{}", stem, self.stub, ext),
            None => format!("{}{}", stem, self.stub),
        };
        let target = self.dir.join(target_name);

        fs::write(&target, bytes).await?;
        debug!("Saved {} bytes to {}", bytes.len(), target.display());
        Ok(target)
    }
}

/// Record of one sweep run, written beside its captures.
#[derive(Debug, Serialize)]
pub struct SweepManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub cells: Vec<ManifestCell>,
}

#[derive(Debug, Serialize)]
pub struct ManifestCell {
    pub aperture: String,
    pub f_number: f64,
    pub shutter: String,
    pub seconds: f64,
    pub file: String,
}

impl SweepManifest {
    pub async fn write_to(&self, run_dir: &Path) -> Result<PathBuf, LapsecamError> {
        let target = run_dir.join("manifest.json");
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&target, body).await?;
        debug!("Sweep manifest written to {}", target.display());
        Ok(target)
    }
}
