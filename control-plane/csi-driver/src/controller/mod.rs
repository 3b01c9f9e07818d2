//! Volume lifecycle orchestration of the CSI controller.
//!
//! [`ScaleController`] turns CSI controller requests into sequences of connector calls. It holds
//! no process globals: the connectors, the in-flight request store, the path lock table and the
//! node mapping are all owned by the instance.
mod create;
mod delete;
mod publish;

use crate::{
    csi::{volume_capability, VolumeCapability},
    limiter::{InflightEntry, InflightStore},
    node_mapping::NodeMapping,
    path_lock::PathLock,
    scale::{ConnectorError, ConnectorMap, ScaleConnector},
    store::MemStore,
};
use std::sync::Arc;
use tonic::Status;

/// Behaviour switches of the controller.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Never mount filesystems on nodes, fail instead.
    pub skip_mount_unmount: bool,
    /// Prefix of the default consistency group of advanced volumes.
    pub cg_prefix: Option<String>,
    /// Replaces the leading `pvc` of volume names.
    pub volume_name_prefix: Option<String>,
}

/// Where the primary cluster keeps the volume symlinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryInfo {
    /// Id of the primary cluster.
    pub cluster_id: String,
    /// The primary filesystem, as named on the primary cluster.
    pub fs: String,
    /// Mount point of the primary filesystem.
    pub mount_point: String,
    /// The primary fileset.
    pub fileset: String,
    /// Absolute path of the directory holding the volume symlinks.
    pub symlink_dir: String,
}

impl PrimaryInfo {
    /// The symlink directory, relative to the primary filesystem mount point.
    pub fn symlink_dir_relative(&self) -> &str {
        relative_to(&self.mount_point, &self.symlink_dir)
    }
    /// Absolute path of the symlink of a volume.
    pub fn symlink_path(&self, volume_name: &str) -> String {
        format!("{}/{volume_name}", self.symlink_dir.trim_end_matches('/'))
    }
    /// Path of the symlink of a volume relative to the primary filesystem mount point.
    pub fn symlink_relative(&self, volume_name: &str) -> String {
        join(self.symlink_dir_relative(), volume_name)
    }
}

/// The CSI controller core.
#[derive(Debug)]
pub struct ScaleController {
    connectors: ConnectorMap,
    primary: PrimaryInfo,
    inflight: Arc<InflightStore>,
    path_lock: PathLock,
    node_mapping: NodeMapping,
    options: ControllerOptions,
}

impl ScaleController {
    /// Create a controller tracking its in-flight requests in memory.
    pub fn new(
        connectors: ConnectorMap,
        primary: PrimaryInfo,
        node_mapping: NodeMapping,
        options: ControllerOptions,
    ) -> Self {
        Self {
            connectors,
            primary,
            inflight: Arc::new(MemStore::<String, InflightEntry>::new()),
            path_lock: PathLock::new(),
            node_mapping,
            options,
        }
    }

    /// Use another store for the in-flight create requests.
    pub fn with_inflight_store(mut self, store: Arc<InflightStore>) -> Self {
        self.inflight = store;
        self
    }

    /// The primary cluster settings.
    pub fn primary(&self) -> &PrimaryInfo {
        &self.primary
    }

    /// The path lock table.
    pub fn path_lock(&self) -> &PathLock {
        &self.path_lock
    }

    /// Whether the primary cluster answers. Only an unreachable cluster makes the driver not
    /// ready, any other failure will surface on the volume requests.
    pub async fn probe(&self) -> bool {
        let Ok(primary) = self.primary_connector() else {
            return false;
        };
        match primary.get_cluster_id().await {
            Err(error @ ConnectorError::Unreachable { .. }) => {
                tracing::error!(%error, "Primary cluster is not reachable");
                false
            }
            _ => true,
        }
    }

    fn primary_connector(&self) -> Result<Arc<dyn ScaleConnector>, Status> {
        self.connectors
            .primary()
            .ok_or_else(|| Status::internal("No connector for the primary cluster"))
    }

    /// The connector of the cluster owning a volume, the primary cluster by default.
    fn cluster_connector(
        &self,
        cluster_id: Option<&str>,
    ) -> Result<Arc<dyn ScaleConnector>, Status> {
        match cluster_id {
            None => self.primary_connector(),
            Some(id) if id == self.primary.cluster_id => self.primary_connector(),
            Some(id) => self.connectors.get(id).ok_or_else(|| {
                Status::invalid_argument(format!("Cluster '{id}' is not configured"))
            }),
        }
    }

    /// The name of the storage objects backing a volume.
    fn storage_name(&self, csi_name: &str) -> String {
        match (&self.options.volume_name_prefix, csi_name.strip_prefix("pvc")) {
            (Some(prefix), Some(rest)) if !prefix.is_empty() => format!("{prefix}{rest}"),
            _ => csi_name.to_string(),
        }
    }
}

/// Reject capabilities the driver cannot honour: block access and read only many.
fn check_volume_capabilities(capabilities: &[VolumeCapability]) -> Result<(), Status> {
    if capabilities.is_empty() {
        return Err(Status::invalid_argument("Volume capabilities are required"));
    }
    for capability in capabilities {
        if let Some(volume_capability::AccessType::Block(_)) = capability.access_type {
            return Err(Status::invalid_argument("Block access is not supported"));
        }
        if let Some(access_mode) = &capability.access_mode {
            let reader_only = volume_capability::access_mode::Mode::MultiNodeReaderOnly as i32;
            if access_mode.mode == reader_only {
                return Err(Status::invalid_argument(
                    "Volume access mode MULTI_NODE_READER_ONLY is not supported",
                ));
            }
        }
    }
    Ok(())
}

/// Strip the mount point from `path`, giving a path relative to the filesystem.
fn relative_to<'a>(mount_point: &str, path: &'a str) -> &'a str {
    let mount_point = mount_point.trim_end_matches('/');
    match path.strip_prefix(mount_point) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => path.trim_start_matches('/'),
    }
}

/// Join two relative path components.
fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    match parent.is_empty() {
        true => child.to_string(),
        false => format!("{parent}/{child}"),
    }
}

/// Wrap a connector failure with what was being done.
fn connector_error(error: ConnectorError, action: impl std::fmt::Display) -> Status {
    let status = Status::from(error);
    Status::new(status.code(), format!("Failed to {action}: {}", status.message()))
}

/// Treat a remote "already exists" failure as success.
fn ignore_already_exists(result: Result<(), ConnectorError>) -> Result<(), ConnectorError> {
    match result {
        Err(error) if error.is_already_exists() => Ok(()),
        result => result,
    }
}

/// Treat a remote "not found" failure as success.
fn ignore_not_found(result: Result<(), ConnectorError>) -> Result<(), ConnectorError> {
    match result {
        Err(error) if error.is_not_found() => Ok(()),
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csi::volume_capability::{access_mode::Mode, AccessMode, BlockVolume, MountVolume};

    fn capability(mode: Mode, block: bool) -> VolumeCapability {
        VolumeCapability {
            access_type: Some(match block {
                true => volume_capability::AccessType::Block(BlockVolume {}),
                false => volume_capability::AccessType::Mount(MountVolume::default()),
            }),
            access_mode: Some(AccessMode { mode: mode as i32 }),
        }
    }

    #[test]
    fn capabilities() {
        assert!(check_volume_capabilities(&[]).is_err());
        let writer = capability(Mode::MultiNodeMultiWriter, false);
        assert!(check_volume_capabilities(&[writer]).is_ok());
        assert!(check_volume_capabilities(&[capability(Mode::SingleNodeWriter, true)]).is_err());
        assert!(check_volume_capabilities(&[
            capability(Mode::SingleNodeWriter, false),
            capability(Mode::MultiNodeReaderOnly, false)
        ])
        .is_err());
    }

    #[test]
    fn paths() {
        assert_eq!(relative_to("/ibm/fs1", "/ibm/fs1/a/b"), "a/b");
        assert_eq!(relative_to("/ibm/fs1/", "/ibm/fs1"), "");
        assert_eq!(relative_to("/ibm/fs1", "/ibm/fs10/a"), "ibm/fs10/a");
        assert_eq!(join("", "pvc-1"), "pvc-1");
        assert_eq!(join("/a/b/", "pvc-1"), "a/b/pvc-1");

        let primary = PrimaryInfo {
            cluster_id: "1".into(),
            fs: "fs1".into(),
            mount_point: "/ibm/fs1".into(),
            fileset: "store".into(),
            symlink_dir: "/ibm/fs1/store/.volumes".into(),
        };
        assert_eq!(primary.symlink_dir_relative(), "store/.volumes");
        assert_eq!(primary.symlink_path("pvc-1"), "/ibm/fs1/store/.volumes/pvc-1");
        assert_eq!(primary.symlink_relative("pvc-1"), "store/.volumes/pvc-1");
    }

    #[test]
    fn storage_name() {
        let primary = PrimaryInfo {
            cluster_id: "1".into(),
            fs: "fs1".into(),
            mount_point: "/ibm/fs1".into(),
            fileset: "store".into(),
            symlink_dir: "/ibm/fs1/store/.volumes".into(),
        };
        let options = ControllerOptions {
            volume_name_prefix: Some("vol".into()),
            ..Default::default()
        };
        let controller = ScaleController::new(
            ConnectorMap::new(),
            primary,
            NodeMapping::default(),
            options,
        );
        assert_eq!(controller.storage_name("pvc-1234"), "vol-1234");
        assert_eq!(controller.storage_name("data-1234"), "data-1234");
        assert!(controller.primary_connector().is_err());
    }
}
