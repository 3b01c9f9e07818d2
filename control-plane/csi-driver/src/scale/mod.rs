//! Access to the Storage Scale management REST API.
//!
//! The controller only talks to a cluster through the [`ScaleConnector`] trait, which has a
//! REST implementation ([`rest::RestConnector`]) and an in-memory one ([`fake::FakeConnector`]).

mod error;
pub mod fake;
pub mod rest;

pub use error::ConnectorError;

use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

/// Result of a connector operation.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Mount information of a filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemMountDetails {
    /// The filesystem name on the cluster which was asked.
    pub name: String,
    /// The filesystem uuid.
    pub uuid: String,
    /// Where the filesystem is mounted.
    pub mount_point: String,
    /// `<owning cluster>:<fs name>` for remotely mounted filesystems.
    pub remote_device_name: String,
    /// Admin names of the nodes which have the filesystem mounted.
    pub nodes_mounted: Vec<String>,
}

impl FilesystemMountDetails {
    /// The name of the filesystem on the cluster which owns it.
    pub fn owning_fs_name(&self) -> &str {
        match self.remote_device_name.split_once(':') {
            Some((_, name)) if !name.is_empty() => name,
            _ => &self.name,
        }
    }

    /// Whether the filesystem is mounted on the given node.
    pub fn is_mounted_on(&self, node: &str) -> bool {
        self.nodes_mounted.iter().any(|mounted| mounted == node)
    }
}

/// A fileset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesetInfo {
    pub name: String,
    pub id: u64,
    /// The junction path, if linked.
    pub path: Option<String>,
    /// Whether the fileset owns its inode space.
    pub independent: bool,
    pub max_num_inodes: u64,
}

/// Where a new fileset allocates its inodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeSpace {
    /// A new inode space, making the fileset independent.
    New,
    /// The inode space of the named independent fileset.
    Of(String),
}

impl Serialize for InodeSpace {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::New => serializer.serialize_str("new"),
            Self::Of(fileset) => serializer.serialize_str(fileset),
        }
    }
}

/// Body of a create fileset request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilesetRequest {
    pub fileset_name: String,
    pub inode_space: InodeSpace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_num_inodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alloc_inodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afm_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub afm_mode: Option<String>,
}

impl CreateFilesetRequest {
    /// A request for a fileset with the given name and inode space.
    pub fn new(fileset_name: impl Into<String>, inode_space: InodeSpace) -> Self {
        Self {
            fileset_name: fileset_name.into(),
            inode_space,
            max_num_inodes: None,
            alloc_inodes: None,
            owner: None,
            permissions: None,
            comment: None,
            compression: None,
            tier: None,
            afm_target: None,
            afm_mode: None,
        }
    }
}

/// Owner and mode of a new directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryOwner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

/// The operations the driver needs from a Storage Scale cluster.
/// Relative paths are relative to the mount point of the filesystem they refer to.
#[async_trait::async_trait]
pub trait ScaleConnector: Send + Sync + std::fmt::Debug {
    /// The id of the cluster.
    async fn get_cluster_id(&self) -> ConnectorResult<String>;
    /// Mount information of the filesystem.
    async fn get_filesystem_mount_details(&self, fs: &str)
        -> ConnectorResult<FilesystemMountDetails>;
    /// Name of the filesystem with the given uuid.
    async fn get_fs_name_from_uuid(&self, uuid: &str) -> ConnectorResult<String>;
    /// Mount the filesystem on the node.
    async fn mount_filesystem(&self, fs: &str, node: &str) -> ConnectorResult<()>;

    /// Get a fileset by name.
    async fn list_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<FilesetInfo>;
    /// Name of the fileset with the given numeric id.
    async fn get_fileset_name_from_id(&self, fs: &str, id: &str) -> ConnectorResult<String>;
    async fn create_fileset(&self, fs: &str, request: &CreateFilesetRequest) -> ConnectorResult<()>;
    /// Link the fileset at the absolute junction `path`.
    async fn link_fileset(&self, fs: &str, fileset: &str, path: &str) -> ConnectorResult<()>;
    async fn unlink_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()>;
    async fn delete_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()>;
    /// Set the block quota of the fileset, in bytes.
    async fn set_fileset_quota(&self, fs: &str, fileset: &str, bytes: u64) -> ConnectorResult<()>;
    /// The block quota of the fileset, in bytes. Zero means no quota.
    async fn get_fileset_quota(&self, fs: &str, fileset: &str) -> ConnectorResult<u64>;

    async fn make_directory(
        &self,
        fs: &str,
        path: &str,
        owner: &DirectoryOwner,
    ) -> ConnectorResult<()>;
    async fn delete_directory(&self, fs: &str, path: &str) -> ConnectorResult<()>;
    /// Whether the path exists.
    async fn path_exists(&self, fs: &str, path: &str) -> ConnectorResult<bool>;
    /// Create the symlink `link` on `fs` pointing at `target` on `target_fs`.
    async fn create_symlink(
        &self,
        fs: &str,
        target_fs: &str,
        target: &str,
        link: &str,
    ) -> ConnectorResult<()>;
    async fn delete_symlink(&self, fs: &str, link: &str) -> ConnectorResult<()>;

    /// Names of the snapshots of the fileset.
    async fn list_fileset_snapshots(&self, fs: &str, fileset: &str)
        -> ConnectorResult<Vec<String>>;
    /// Whether the node class exists.
    async fn is_valid_node_class(&self, node_class: &str) -> ConnectorResult<bool>;
}

/// Connectors keyed by cluster id, with the primary cluster also available under
/// [`utils::PRIMARY_CONNECTOR_KEY`].
#[derive(Debug, Clone, Default)]
pub struct ConnectorMap {
    connectors: HashMap<String, Arc<dyn ScaleConnector>>,
}

impl ConnectorMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }
    /// Add the connector of a cluster.
    pub fn insert(&mut self, cluster_id: impl Into<String>, connector: Arc<dyn ScaleConnector>) {
        self.connectors.insert(cluster_id.into(), connector);
    }
    /// Add the connector of the primary cluster, under both its id and the primary key.
    pub fn insert_primary(
        &mut self,
        cluster_id: impl Into<String>,
        connector: Arc<dyn ScaleConnector>,
    ) {
        self.connectors
            .insert(utils::PRIMARY_CONNECTOR_KEY.to_string(), connector.clone());
        self.connectors.insert(cluster_id.into(), connector);
    }
    /// The connector of the cluster.
    pub fn get(&self, cluster_id: &str) -> Option<Arc<dyn ScaleConnector>> {
        self.connectors.get(cluster_id).cloned()
    }
    /// The connector of the primary cluster.
    pub fn primary(&self) -> Option<Arc<dyn ScaleConnector>> {
        self.get(utils::PRIMARY_CONNECTOR_KEY)
    }
    /// Number of entries, the primary key included.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }
    /// Whether the map has no connectors.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
