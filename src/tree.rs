use crate::device::CameraSession;
use crate::error::DeviceError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// Index of a node within its tree's arena.
pub type NodeId = usize;

/// The closed set of widget types a device configuration tree can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Section,
    Window,
    Menu,
    Radio,
    Toggle,
    Range,
    Text,
    Date,
}

/// A leaf node's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Float(f64),
    Int(i64),
    Text(String),
    Date(DateTime<Utc>),
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Float(v) => write!(f, "{}", v),
            NodeValue::Int(v) => write!(f, "{}", v),
            NodeValue::Text(v) => write!(f, "{}", v),
            NodeValue::Date(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl NodeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// The enumerable domain of one settable leaf, as reported by `flatten_domains`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingDomain {
    /// Explicit choice list (Menu/Radio widgets)
    Choices(Vec<String>),
    /// The fixed on/off pair {1, 0}
    Toggle,
    /// No enumerable domain; tagged with the widget type instead
    Open(NodeType),
}

impl SettingDomain {
    /// Enumerated legal values, when the domain has them.
    pub fn values(&self) -> Option<Vec<String>> {
        match self {
            SettingDomain::Choices(choices) => Some(choices.clone()),
            SettingDomain::Toggle => Some(vec!["1".to_string(), "0".to_string()]),
            SettingDomain::Open(_) => None,
        }
    }
}

/// One node of the device's settings tree.
///
/// Sibling names are unique, so a dot-separated path resolves to at most
/// one node. `choices` is populated only for Menu/Radio widgets, and a
/// `None` value means the device reported the setting unreadable.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    /// Opaque widget identity assigned by the device
    pub id: u32,
    pub name: String,
    pub node_type: NodeType,
    pub value: Option<NodeValue>,
    pub readonly: bool,
    pub choices: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ConfigNode {
    pub fn new<S: Into<String>>(id: u32, name: S, node_type: NodeType) -> Self {
        Self {
            id,
            name: name.into(),
            node_type,
            value: None,
            readonly: false,
            choices: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: NodeValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.readonly = true;
        self
    }
}

/// In-memory settings tree, built fresh by each `get_config` call.
///
/// Nodes live in an arena with parent/child links stored as indices, so
/// the tree's lifetime is independent of the device session that produced
/// it.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    nodes: Vec<ConfigNode>,
    root: NodeId,
}

impl ConfigTree {
    pub fn new(root: ConfigNode) -> Self {
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    /// Append a node under `parent` and return its id.
    pub fn add_child(&mut self, parent: NodeId, node: ConfigNode) -> NodeId {
        debug_assert!(
            !self.nodes[parent]
                .children
                .iter()
                .any(|&c| self.nodes[c].name == node.name),
            "sibling names must be unique"
        );
        let id = self.nodes.len();
        self.nodes.push(ConfigNode {
            parent: Some(parent),
            ..node
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ConfigNode {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id].children.iter().copied()
    }

    /// Walk parent links from `id` up to its root ancestor.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            current = parent;
        }
        current
    }

    /// Fully dot-qualified name of a node, from its root ancestor down.
    pub fn qualified_name(&self, id: NodeId) -> String {
        let mut segments = vec![self.nodes[id].name.as_str()];
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            segments.push(self.nodes[parent].name.as_str());
            current = parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Resolve a dot-separated path against `from`.
    ///
    /// A leading segment equal to the starting node's own name is
    /// stripped before walking child names. Returns `None` as soon as a
    /// segment fails to match; a missing setting is a legitimate answer,
    /// not an error.
    pub fn lookup(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let mut parts: Vec<&str> = path.split('.').collect();
        if parts.first() == Some(&self.nodes[from].name.as_str()) {
            parts.remove(0);
        }
        let mut current = from;
        for part in parts {
            current = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].name == part)?;
        }
        Some(current)
    }

    /// Resolve a dot-separated path against the tree root.
    pub fn lookup_path(&self, path: &str) -> Option<NodeId> {
        self.lookup(self.root, path)
    }

    /// Current value of a node, or `None` when the device reported it
    /// unreadable.
    pub fn read(&self, id: NodeId) -> Option<&NodeValue> {
        self.nodes[id].value.as_ref()
    }

    /// Map every leaf's fully qualified name to its current value.
    pub fn flatten_values(&self) -> BTreeMap<String, Option<NodeValue>> {
        let mut out = BTreeMap::new();
        self.collect_values(self.root, "", &mut out);
        out
    }

    /// Map every leaf's fully qualified name to its enumerable domain.
    pub fn flatten_domains(&self) -> BTreeMap<String, SettingDomain> {
        let mut out = BTreeMap::new();
        self.collect_domains(self.root, "", &mut out);
        out
    }

    fn collect_values(
        &self,
        id: NodeId,
        prefix: &str,
        out: &mut BTreeMap<String, Option<NodeValue>>,
    ) {
        let node = &self.nodes[id];
        let name = qualify(prefix, &node.name);
        match node.node_type {
            NodeType::Section | NodeType::Menu | NodeType::Window => {
                for &child in &node.children {
                    self.collect_values(child, &name, out);
                }
            }
            NodeType::Radio | NodeType::Toggle | NodeType::Range | NodeType::Text
            | NodeType::Date => {
                out.insert(name, node.value.clone());
            }
        }
    }

    fn collect_domains(&self, id: NodeId, prefix: &str, out: &mut BTreeMap<String, SettingDomain>) {
        let node = &self.nodes[id];
        let name = qualify(prefix, &node.name);
        match node.node_type {
            NodeType::Section | NodeType::Menu | NodeType::Window => {
                for &child in &node.children {
                    self.collect_domains(child, &name, out);
                }
            }
            NodeType::Radio => {
                out.insert(name, SettingDomain::Choices(node.choices.clone()));
            }
            NodeType::Toggle => {
                out.insert(name, SettingDomain::Toggle);
            }
            NodeType::Range | NodeType::Text | NodeType::Date => {
                out.insert(name, SettingDomain::Open(node.node_type));
            }
        }
    }

    /// Set a node's value and push the change to the device.
    ///
    /// The device only accepts whole-tree submission, so the write walks
    /// up to the mutated node's root ancestor and submits from there; a
    /// child-only submission would silently fail to apply.
    pub async fn write(
        &mut self,
        id: NodeId,
        value: NodeValue,
        session: &mut CameraSession,
    ) -> Result<(), DeviceError> {
        let setting = self.qualified_name(id);
        if self.nodes[id].readonly {
            return Err(DeviceError::Rejected {
                setting,
                value: value.to_string(),
            });
        }

        trace!("Writing {} = {}", setting, value);
        self.nodes[id].value = Some(value);

        let root = self.root_of(id);
        debug_assert_eq!(root, self.root);
        debug!("Submitting configuration tree from root {:?}", self.nodes[root].name);
        session.set_config(self).await
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CameraSession, MockCamera};
    use chrono::TimeZone;

    fn sample_tree() -> ConfigTree {
        let mut tree = ConfigTree::new(ConfigNode::new(0, "main", NodeType::Window));
        let settings = tree.add_child(
            tree.root(),
            ConfigNode::new(1, "capturesettings", NodeType::Section),
        );
        tree.add_child(
            settings,
            ConfigNode::new(2, "aperture", NodeType::Radio)
                .with_value(NodeValue::Text("5.6".to_string()))
                .with_choices(["2.8", "5.6", "8"]),
        );
        tree.add_child(
            settings,
            ConfigNode::new(3, "shutterspeed", NodeType::Radio)
                .with_value(NodeValue::Text("1/60".to_string()))
                .with_choices(["1/125", "1/60", "1/30"]),
        );
        let status = tree.add_child(tree.root(), ConfigNode::new(4, "status", NodeType::Section));
        tree.add_child(
            status,
            ConfigNode::new(5, "batterylevel", NodeType::Text)
                .with_value(NodeValue::Text("100%".to_string()))
                .read_only(),
        );
        tree.add_child(status, ConfigNode::new(6, "flashopen", NodeType::Toggle));
        tree.add_child(
            status,
            ConfigNode::new(7, "exposurecompensation", NodeType::Range)
                .with_value(NodeValue::Float(0.0)),
        );
        tree.add_child(
            status,
            ConfigNode::new(8, "datetime", NodeType::Date)
                .with_value(NodeValue::Date(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
        );
        tree
    }

    #[test]
    fn test_lookup_full_path() {
        let tree = sample_tree();
        let id = tree.lookup_path("main.capturesettings.aperture").unwrap();
        assert_eq!(tree.node(id).name, "aperture");
        assert_eq!(tree.node(id).node_type, NodeType::Radio);
    }

    #[test]
    fn test_lookup_without_leading_root_name() {
        let tree = sample_tree();
        let id = tree.lookup_path("capturesettings.shutterspeed").unwrap();
        assert_eq!(tree.node(id).name, "shutterspeed");
    }

    #[test]
    fn test_lookup_missing_segment() {
        let tree = sample_tree();
        assert!(tree.lookup_path("main.capturesettings.iso").is_none());
        assert!(tree.lookup_path("main.nosuchsection.aperture").is_none());
        assert!(tree.lookup_path("").is_none());
    }

    #[test]
    fn test_lookup_from_interior_node() {
        let tree = sample_tree();
        let settings = tree.lookup_path("main.capturesettings").unwrap();
        let id = tree.lookup(settings, "capturesettings.aperture").unwrap();
        assert_eq!(tree.node(id).name, "aperture");
        // Own-name path resolves to the node itself
        assert_eq!(tree.lookup(settings, "capturesettings"), Some(settings));
    }

    #[test]
    fn test_qualified_name_and_root_of() {
        let tree = sample_tree();
        let id = tree.lookup_path("main.status.batterylevel").unwrap();
        assert_eq!(tree.qualified_name(id), "main.status.batterylevel");
        assert_eq!(tree.root_of(id), tree.root());
    }

    #[test]
    fn test_flatten_values() {
        let tree = sample_tree();
        let flat = tree.flatten_values();
        assert_eq!(
            flat.get("main.capturesettings.aperture"),
            Some(&Some(NodeValue::Text("5.6".to_string())))
        );
        // Unreadable leaf flattens to an absent value, not an error
        assert_eq!(flat.get("main.status.flashopen"), Some(&None));
        // Containers themselves never appear
        assert!(!flat.contains_key("main.capturesettings"));
        assert_eq!(flat.len(), 6);
    }

    #[test]
    fn test_flatten_domains() {
        let tree = sample_tree();
        let flat = tree.flatten_domains();
        assert_eq!(
            flat.get("main.capturesettings.aperture"),
            Some(&SettingDomain::Choices(vec![
                "2.8".to_string(),
                "5.6".to_string(),
                "8".to_string()
            ]))
        );
        assert_eq!(flat.get("main.status.flashopen"), Some(&SettingDomain::Toggle));
        assert_eq!(
            flat["main.status.flashopen"].values(),
            Some(vec!["1".to_string(), "0".to_string()])
        );
        assert_eq!(
            flat.get("main.status.exposurecompensation"),
            Some(&SettingDomain::Open(NodeType::Range))
        );
        assert!(flat["main.status.exposurecompensation"].values().is_none());
        assert_eq!(
            flat.get("main.status.datetime"),
            Some(&SettingDomain::Open(NodeType::Date))
        );
    }

    #[test]
    fn test_read_absent_value() {
        let tree = sample_tree();
        let toggle = tree.lookup_path("main.status.flashopen").unwrap();
        assert!(tree.read(toggle).is_none());
        let battery = tree.lookup_path("main.status.batterylevel").unwrap();
        assert_eq!(
            tree.read(battery),
            Some(&NodeValue::Text("100%".to_string()))
        );
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let camera = MockCamera::new();
        let mut session = CameraSession::acquire(Box::new(camera));
        let mut tree = session.get_config().await.unwrap();

        let id = tree.lookup_path("main.capturesettings.aperture").unwrap();
        tree.write(id, NodeValue::Text("2.8".to_string()), &mut session)
            .await
            .unwrap();
        assert_eq!(tree.read(id), Some(&NodeValue::Text("2.8".to_string())));

        // A fresh configuration read reflects the accepted write
        let fresh = session.get_config().await.unwrap();
        let id = fresh.lookup_path("main.capturesettings.aperture").unwrap();
        assert_eq!(fresh.read(id), Some(&NodeValue::Text("2.8".to_string())));
    }

    #[tokio::test]
    async fn test_write_readonly_refused() {
        let camera = MockCamera::new();
        let mut session = CameraSession::acquire(Box::new(camera));
        let mut tree = session.get_config().await.unwrap();

        let id = tree.lookup_path("main.status.batterylevel").unwrap();
        let err = tree
            .write(id, NodeValue::Text("50%".to_string()), &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Rejected { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_write_rejected_by_device() {
        let camera = MockCamera::new();
        let handle = camera.handle();
        handle.reject_value("8");
        let mut session = CameraSession::acquire(Box::new(camera));
        let mut tree = session.get_config().await.unwrap();

        let id = tree.lookup_path("main.capturesettings.aperture").unwrap();
        let err = tree
            .write(id, NodeValue::Text("8".to_string()), &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Rejected { .. }));
    }
}
