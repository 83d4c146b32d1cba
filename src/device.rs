use crate::error::{DeviceError, LapsecamError};
use crate::tree::{ConfigNode, ConfigTree, NodeType, NodeValue};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tracing::{debug, info, trace, warn};

/// Device-side location of a captured file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub folder: String,
    pub name: String,
}

/// The camera transport boundary.
///
/// Implementations own the wire-level protocol (USB, PTP, a mock). Every
/// fault except a configuration rejection is transient from the caller's
/// point of view; the director answers transients with `reset_session`
/// followed by a retry.
#[async_trait]
pub trait CameraTransport: Send {
    /// Read the full settings tree. Never cached; each call reflects the
    /// device's current state.
    async fn get_config(&mut self) -> Result<ConfigTree, DeviceError>;

    /// Submit a whole settings tree. The device does not take deltas.
    async fn set_config(&mut self, root: &ConfigTree) -> Result<(), DeviceError>;

    /// Trigger a capture and return the device-side file it produced.
    async fn capture(&mut self) -> Result<FileHandle, DeviceError>;

    /// Download a captured file's bytes.
    async fn transfer(&mut self, file: &FileHandle) -> Result<Vec<u8>, DeviceError>;

    /// List file names in a device folder.
    async fn list_files(&mut self, folder: &str) -> Result<Vec<String>, DeviceError>;

    /// Delete every file in a device folder.
    async fn delete_all(&mut self, folder: &str) -> Result<(), DeviceError>;

    /// Tear down the connection state. The next call reacquires lazily.
    async fn reset_session(&mut self);
}

/// Explicit session context for device access.
///
/// There is exactly one session per run and at most one device call in
/// flight at any time; callers never issue a second call before the prior
/// one returns. A `reset` invalidates whatever the transport has cached
/// and bumps the reset counter the retry tests observe.
pub struct CameraSession {
    transport: Box<dyn CameraTransport>,
    resets: u64,
}

impl CameraSession {
    pub fn acquire(transport: Box<dyn CameraTransport>) -> Self {
        info!("Camera session acquired");
        Self {
            transport,
            resets: 0,
        }
    }

    /// Number of session resets performed so far.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    pub async fn get_config(&mut self) -> Result<ConfigTree, DeviceError> {
        trace!("Reading device configuration tree");
        self.transport.get_config().await
    }

    pub async fn set_config(&mut self, root: &ConfigTree) -> Result<(), DeviceError> {
        trace!("Submitting device configuration tree");
        self.transport.set_config(root).await
    }

    pub async fn capture(&mut self) -> Result<FileHandle, DeviceError> {
        self.transport.capture().await
    }

    pub async fn transfer(&mut self, file: &FileHandle) -> Result<Vec<u8>, DeviceError> {
        self.transport.transfer(file).await
    }

    pub async fn list_files(&mut self, folder: &str) -> Result<Vec<String>, DeviceError> {
        self.transport.list_files(folder).await
    }

    pub async fn delete_all(&mut self, folder: &str) -> Result<(), DeviceError> {
        self.transport.delete_all(folder).await
    }

    /// Invalidate the device connection; the next call reacquires it.
    pub async fn reset(&mut self) {
        self.resets += 1;
        warn!("Resetting camera session (reset #{})", self.resets);
        self.transport.reset_session().await;
    }

    /// Download every file left in a device folder into `dir`, then
    /// delete them device-side. Returns the number of files recovered.
    pub async fn drain_to(&mut self, folder: &str, dir: &Path) -> Result<usize, LapsecamError> {
        let names = self.list_files(folder).await?;
        if names.is_empty() {
            debug!("No files left on device in {}", folder);
            return Ok(0);
        }

        fs::create_dir_all(dir).await?;
        for name in &names {
            let handle = FileHandle {
                folder: folder.to_string(),
                name: name.clone(),
            };
            let bytes = self.transfer(&handle).await?;
            let target = dir.join(name);
            fs::write(&target, &bytes).await?;
            info!("Recovered {} to {}", name, target.display());
        }
        self.delete_all(folder).await?;

        Ok(names.len())
    }

    /// End the session explicitly.
    pub fn release(self) {
        info!(
            "Camera session released after {} reset(s)",
            self.resets
        );
    }
}

/// Observable state shared between a `MockCamera` and its test handle.
#[derive(Debug, Default)]
struct MockState {
    captures: u64,
    resets: u64,
    capture_faults_remaining: u32,
    delete_faults_remaining: u32,
    rejected_values: Vec<String>,
    files: Vec<String>,
    applied: BTreeMap<String, String>,
}

/// Handle for observing and scripting a `MockCamera` after it has been
/// boxed into a session.
#[derive(Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn captures(&self) -> u64 {
        self.lock().captures
    }

    pub fn resets(&self) -> u64 {
        self.lock().resets
    }

    /// Make the next `count` capture calls fail with a transient fault.
    pub fn fail_next_captures(&self, count: u32) {
        self.lock().capture_faults_remaining = count;
    }

    /// Make the next `count` delete calls fail with a transient fault.
    pub fn fail_next_deletes(&self, count: u32) {
        self.lock().delete_faults_remaining = count;
    }

    /// Refuse any configuration submission that carries this value.
    pub fn reject_value(&self, value: &str) {
        self.lock().rejected_values.push(value.to_string());
    }

    /// Last value applied for a fully qualified setting path.
    pub fn applied(&self, path: &str) -> Option<String> {
        self.lock().applied.get(path).cloned()
    }

    /// File names currently sitting in the device folder.
    pub fn device_files(&self) -> Vec<String> {
        self.lock().files.clone()
    }
}

/// In-memory stand-in for a tethered camera body.
///
/// Serves a synthetic settings tree, counts captures and resets, and can
/// be scripted to inject faults. Used by the test suite and by hosts
/// without real camera hardware, the same way the reference system falls
/// back to a mock capture source.
pub struct MockCamera {
    template: ConfigTree,
    folder: String,
    state: Arc<Mutex<MockState>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::with_tree(Self::default_tree())
    }

    pub fn with_tree(template: ConfigTree) -> Self {
        Self {
            template,
            folder: "/DCIM/100CANON".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Clone an observation/scripting handle before boxing the camera.
    pub fn handle(&self) -> MockHandle {
        MockHandle(Arc::clone(&self.state))
    }

    /// Synthetic settings tree mirroring a tethered DSLR's layout.
    pub fn default_tree() -> ConfigTree {
        let mut tree = ConfigTree::new(ConfigNode::new(0, "main", NodeType::Window));
        let settings = tree.add_child(
            tree.root(),
            ConfigNode::new(1, "capturesettings", NodeType::Section),
        );
        tree.add_child(
            settings,
            ConfigNode::new(2, "aperture", NodeType::Radio)
                .with_value(NodeValue::Text("5.6".to_string()))
                .with_choices(["2.8", "5.6", "8", "11"]),
        );
        tree.add_child(
            settings,
            ConfigNode::new(3, "shutterspeed", NodeType::Radio)
                .with_value(NodeValue::Text("1/60".to_string()))
                .with_choices(["1/125", "1/60", "1/30", "1/4", "0.3", "Bulb"]),
        );
        let status = tree.add_child(tree.root(), ConfigNode::new(4, "status", NodeType::Section));
        tree.add_child(
            status,
            ConfigNode::new(5, "batterylevel", NodeType::Text)
                .with_value(NodeValue::Text("100%".to_string()))
                .read_only(),
        );
        tree.add_child(status, ConfigNode::new(6, "flashopen", NodeType::Toggle));
        tree
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraTransport for MockCamera {
    async fn get_config(&mut self) -> Result<ConfigTree, DeviceError> {
        Ok(self.template.clone())
    }

    async fn set_config(&mut self, root: &ConfigTree) -> Result<(), DeviceError> {
        let flat = root.flatten_values();
        {
            let state = self.lock();
            for (path, value) in &flat {
                if let Some(text) = value.as_ref().and_then(NodeValue::as_text) {
                    if state.rejected_values.iter().any(|v| v == text) {
                        return Err(DeviceError::Rejected {
                            setting: path.clone(),
                            value: text.to_string(),
                        });
                    }
                }
            }
        }

        let mut state = self.lock();
        for (path, value) in flat {
            if let Some(value) = value {
                state.applied.insert(path, value.to_string());
            }
        }
        drop(state);

        self.template = root.clone();
        Ok(())
    }

    async fn capture(&mut self) -> Result<FileHandle, DeviceError> {
        let mut state = self.lock();
        if state.capture_faults_remaining > 0 {
            state.capture_faults_remaining -= 1;
            return Err(DeviceError::capture("simulated shutter fault"));
        }
        state.captures += 1;
        let name = format!("IMG_{:04}.JPG", state.captures);
        state.files.push(name.clone());
        Ok(FileHandle {
            folder: self.folder.clone(),
            name,
        })
    }

    async fn transfer(&mut self, file: &FileHandle) -> Result<Vec<u8>, DeviceError> {
        let state = self.lock();
        if !state.files.contains(&file.name) {
            return Err(DeviceError::Transfer {
                name: file.name.clone(),
                details: "no such file on device".to_string(),
            });
        }
        Ok(file.name.clone().into_bytes())
    }

    async fn list_files(&mut self, _folder: &str) -> Result<Vec<String>, DeviceError> {
        Ok(self.lock().files.clone())
    }

    async fn delete_all(&mut self, folder: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.delete_faults_remaining > 0 {
            state.delete_faults_remaining -= 1;
            return Err(DeviceError::Delete {
                folder: folder.to_string(),
                details: "simulated storage fault".to_string(),
            });
        }
        state.files.clear();
        Ok(())
    }

    async fn reset_session(&mut self) {
        self.lock().resets += 1;
    }
}
