//! Container metadata attached to correlated events
//!
//! Enrichment is a callback: the correlator hands every event's
//! [`CommonData`] and mount namespace id to an [`Enricher`], which fills in
//! whatever it knows. Closures implement [`Enricher`] directly.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::MountNsId;

/// Kubernetes context shared by every event of one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonData {
    pub node: String,
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

pub trait Enricher: Send + Sync {
    fn enrich(&self, common: &mut CommonData, mount_ns_id: MountNsId);
}

impl<F> Enricher for F
where
    F: Fn(&mut CommonData, MountNsId) + Send + Sync,
{
    fn enrich(&self, common: &mut CommonData, mount_ns_id: MountNsId) {
        self(common, mount_ns_id);
    }
}

/// Static mount-namespace-to-container map
///
/// Unknown namespaces only get the node name.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    node: String,
    containers: DashMap<MountNsId, CommonData>,
}

impl ContainerRegistry {
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into(), containers: DashMap::new() }
    }

    /// Register or replace the metadata of a namespace
    pub fn insert(&self, mount_ns_id: MountNsId, mut data: CommonData) {
        if data.node.is_empty() {
            data.node.clone_from(&self.node);
        }
        self.containers.insert(mount_ns_id, data);
    }

    pub fn remove(&self, mount_ns_id: MountNsId) -> Option<CommonData> {
        self.containers.remove(&mount_ns_id).map(|(_, data)| data)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl Enricher for ContainerRegistry {
    fn enrich(&self, common: &mut CommonData, mount_ns_id: MountNsId) {
        match self.containers.get(&mount_ns_id) {
            Some(data) => common.clone_from(&data),
            None => common.node.clone_from(&self.node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pod: &str, container: &str) -> CommonData {
        CommonData {
            namespace: "default".to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            ..CommonData::default()
        }
    }

    #[test]
    fn test_registry_fills_known_namespace() {
        let registry = ContainerRegistry::new("node-1");
        registry.insert(MountNsId(10), data("web-0", "nginx"));

        let mut common = CommonData::default();
        registry.enrich(&mut common, MountNsId(10));
        assert_eq!(common.node, "node-1");
        assert_eq!(common.pod, "web-0");
        assert_eq!(common.container, "nginx");
    }

    #[test]
    fn test_registry_unknown_namespace_gets_node_only() {
        let registry = ContainerRegistry::new("node-1");
        let mut common = CommonData::default();
        registry.enrich(&mut common, MountNsId(11));
        assert_eq!(common, CommonData { node: "node-1".to_string(), ..CommonData::default() });
    }

    #[test]
    fn test_registry_remove() {
        let registry = ContainerRegistry::new("n");
        registry.insert(MountNsId(1), data("p", "c"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove(MountNsId(1)).map(|d| d.pod), Some("p".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closure_is_an_enricher() {
        let enricher = |common: &mut CommonData, mntns: MountNsId| {
            common.container = format!("c-{}", mntns.0);
        };
        let mut common = CommonData::default();
        Enricher::enrich(&enricher, &mut common, MountNsId(5));
        assert_eq!(common.container, "c-5");
    }
}
