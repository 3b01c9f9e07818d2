//! An in-memory [`ScaleConnector`] used to exercise the controller without a cluster.
//!
//! It models filesystems, filesets, quotas, directories, symlinks, mounts, snapshots and node
//! classes closely enough for the driver's needs, records every call and can be told to fail
//! any operation.
use super::{
    ConnectorError, ConnectorResult, CreateFilesetRequest, DirectoryOwner, FilesetInfo,
    FilesystemMountDetails, InodeSpace, ScaleConnector,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

/// A failure to inject into an operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with an API error carrying the message.
    Api(String),
    /// Fail with a failed job carrying the stderr.
    Job(String),
    /// Fail with an authentication error.
    Unauthenticated,
}

impl Fault {
    fn to_error(&self, op: &str) -> ConnectorError {
        match self {
            Self::Api(message) => ConnectorError::Api {
                url: op.to_string(),
                status: 500,
                message: message.clone(),
            },
            Self::Job(stderr) => ConnectorError::JobFailed {
                job_id: 0,
                stderr: stderr.clone(),
            },
            Self::Unauthenticated => ConnectorError::Unauthenticated {
                url: op.to_string(),
                message: "invalid credentials".to_string(),
            },
        }
    }
}

type Key = (String, String);

fn key(fs: &str, name: &str) -> Key {
    (fs.to_string(), name.trim_matches('/').to_string())
}

/// Whether `dir` is `parent` or below it.
fn is_within(dir: &str, parent: &str) -> bool {
    dir == parent || dir.starts_with(&format!("{parent}/"))
}

fn job_failed(stderr: String) -> ConnectorError {
    ConnectorError::JobFailed { job_id: 0, stderr }
}

#[derive(Debug, Default)]
struct FakeState {
    filesystems: HashMap<String, FilesystemMountDetails>,
    filesets: HashMap<Key, FilesetInfo>,
    quotas: HashMap<Key, u64>,
    snapshots: HashMap<Key, Vec<String>>,
    directories: HashSet<Key>,
    symlinks: HashMap<Key, (String, String)>,
    node_classes: HashSet<String>,
    faults: HashMap<String, Fault>,
    calls: Vec<String>,
    next_fileset_id: u64,
}

impl FakeState {
    fn mount_point(&self, fs: &str) -> String {
        self.filesystems
            .get(fs)
            .map(|details| details.mount_point.clone())
            .unwrap_or_default()
    }

    /// The path relative to the filesystem mount point.
    fn relative(&self, fs: &str, path: &str) -> String {
        let mount_point = self.mount_point(fs);
        path.strip_prefix(&mount_point)
            .unwrap_or(path)
            .trim_matches('/')
            .to_string()
    }

    fn parent_exists(&self, fs: &str, path: &str) -> bool {
        match path.trim_matches('/').rsplit_once('/') {
            None => true,
            Some((parent, _)) => self.directories.contains(&key(fs, parent)),
        }
    }
}

/// The in-memory connector.
#[derive(Debug)]
pub struct FakeConnector {
    cluster_id: String,
    state: Mutex<FakeState>,
}

impl FakeConnector {
    /// An empty cluster with the given id.
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            state: Mutex::new(FakeState {
                next_fileset_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and return the injected fault, if any.
    fn enter(&self, op: &str, args: &[&str]) -> ConnectorResult<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(format!("{op} {}", args.join(" ")).trim_end().to_string());
        if let Some(fault) = state.faults.get(op) {
            return Err(fault.to_error(op));
        }
        Ok(state)
    }

    /// Add a filesystem. A local filesystem has an empty remote device name.
    pub fn add_filesystem(
        &self,
        name: &str,
        uuid: &str,
        mount_point: &str,
        remote_device_name: &str,
    ) {
        self.lock().filesystems.insert(
            name.to_string(),
            FilesystemMountDetails {
                name: name.to_string(),
                uuid: uuid.to_string(),
                mount_point: mount_point.to_string(),
                remote_device_name: remote_device_name.to_string(),
                nodes_mounted: Vec::new(),
            },
        );
    }

    /// Mark the filesystem as mounted on the node.
    pub fn set_mounted(&self, fs: &str, node: &str) {
        if let Some(details) = self.lock().filesystems.get_mut(fs) {
            if !details.is_mounted_on(node) {
                details.nodes_mounted.push(node.to_string());
            }
        }
    }

    /// Whether the filesystem is mounted on the node.
    pub fn is_mounted(&self, fs: &str, node: &str) -> bool {
        self.lock()
            .filesystems
            .get(fs)
            .map(|details| details.is_mounted_on(node))
            .unwrap_or(false)
    }

    /// Add a fileset, linked when `junction` is given.
    pub fn add_fileset(&self, fs: &str, name: &str, independent: bool, junction: Option<&str>) {
        let mut state = self.lock();
        let id = state.next_fileset_id;
        state.next_fileset_id += 1;
        if let Some(junction) = junction {
            let relative = state.relative(fs, junction);
            state.directories.insert(key(fs, &relative));
        }
        state.filesets.insert(
            key(fs, name),
            FilesetInfo {
                name: name.to_string(),
                id,
                path: junction.map(ToString::to_string),
                independent,
                max_num_inodes: 0,
            },
        );
    }

    /// Get a fileset.
    pub fn fileset(&self, fs: &str, name: &str) -> Option<FilesetInfo> {
        self.lock().filesets.get(&key(fs, name)).cloned()
    }

    /// The quota of a fileset in bytes.
    pub fn quota(&self, fs: &str, fileset: &str) -> Option<u64> {
        self.lock().quotas.get(&key(fs, fileset)).copied()
    }

    /// Add a snapshot of a fileset.
    pub fn add_snapshot(&self, fs: &str, fileset: &str, snapshot: &str) {
        self.lock()
            .snapshots
            .entry(key(fs, fileset))
            .or_default()
            .push(snapshot.to_string());
    }

    /// Add a directory, relative to the filesystem mount point.
    pub fn add_directory(&self, fs: &str, path: &str) {
        self.lock().directories.insert(key(fs, path));
    }

    /// Whether the directory exists.
    pub fn has_directory(&self, fs: &str, path: &str) -> bool {
        self.lock().directories.contains(&key(fs, path))
    }

    /// The `(filesystem, target)` of a symlink.
    pub fn symlink(&self, fs: &str, link: &str) -> Option<(String, String)> {
        self.lock().symlinks.get(&key(fs, link)).cloned()
    }

    /// Add a node class.
    pub fn add_node_class(&self, name: &str) {
        self.lock().node_classes.insert(name.to_string());
    }

    /// Make every call to `op` fail until cleared.
    pub fn inject(&self, op: &str, fault: Fault) {
        self.lock().faults.insert(op.to_string(), fault);
    }

    /// Stop failing calls to `op`.
    pub fn clear(&self, op: &str) {
        self.lock().faults.remove(op);
    }

    /// Every call made so far, as `<op> <args>`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls made to `op`.
    pub fn call_count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }
}

#[async_trait::async_trait]
impl ScaleConnector for FakeConnector {
    async fn get_cluster_id(&self) -> ConnectorResult<String> {
        self.enter("get_cluster_id", &[])?;
        Ok(self.cluster_id.clone())
    }

    async fn get_filesystem_mount_details(
        &self,
        fs: &str,
    ) -> ConnectorResult<FilesystemMountDetails> {
        let state = self.enter("get_filesystem_mount_details", &[fs])?;
        state
            .filesystems
            .get(fs)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                message: format!("filesystem {fs}"),
            })
    }

    async fn get_fs_name_from_uuid(&self, uuid: &str) -> ConnectorResult<String> {
        let state = self.enter("get_fs_name_from_uuid", &[uuid])?;
        state
            .filesystems
            .values()
            .find(|details| details.uuid == uuid)
            .map(|details| details.name.clone())
            .ok_or_else(|| ConnectorError::NotFound {
                message: format!("filesystem with uuid {uuid}"),
            })
    }

    async fn mount_filesystem(&self, fs: &str, node: &str) -> ConnectorResult<()> {
        let mut state = self.enter("mount_filesystem", &[fs, node])?;
        let details = state
            .filesystems
            .get_mut(fs)
            .ok_or_else(|| job_failed(format!("Filesystem {fs} does not exist")))?;
        if !details.is_mounted_on(node) {
            details.nodes_mounted.push(node.to_string());
        }
        Ok(())
    }

    async fn list_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<FilesetInfo> {
        let state = self.enter("list_fileset", &[fs, fileset])?;
        state
            .filesets
            .get(&key(fs, fileset))
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                message: format!("fileset {fileset} in filesystem {fs}"),
            })
    }

    async fn get_fileset_name_from_id(&self, fs: &str, id: &str) -> ConnectorResult<String> {
        let state = self.enter("get_fileset_name_from_id", &[fs, id])?;
        state
            .filesets
            .iter()
            .find(|((fileset_fs, _), info)| fileset_fs == fs && info.id.to_string() == id)
            .map(|(_, info)| info.name.clone())
            .ok_or_else(|| ConnectorError::NotFound {
                message: format!("fileset with id {id} in filesystem {fs}"),
            })
    }

    async fn create_fileset(
        &self,
        fs: &str,
        request: &CreateFilesetRequest,
    ) -> ConnectorResult<()> {
        let mut state = self.enter("create_fileset", &[fs, &request.fileset_name])?;
        if !state.filesystems.contains_key(fs) {
            return Err(job_failed(format!("Filesystem {fs} does not exist")));
        }
        let fileset_key = key(fs, &request.fileset_name);
        if state.filesets.contains_key(&fileset_key) {
            return Err(job_failed(format!(
                "EFSSP1102C: Fileset {} already exists.",
                request.fileset_name
            )));
        }
        if let InodeSpace::Of(parent) = &request.inode_space {
            match state.filesets.get(&key(fs, parent)) {
                Some(info) if info.independent => {}
                _ => {
                    return Err(job_failed(format!(
                        "Inode space {parent} does not exist"
                    )))
                }
            }
        }
        let id = state.next_fileset_id;
        state.next_fileset_id += 1;
        state.filesets.insert(
            fileset_key,
            FilesetInfo {
                name: request.fileset_name.clone(),
                id,
                path: None,
                independent: request.inode_space == InodeSpace::New,
                max_num_inodes: request.max_num_inodes.unwrap_or_default(),
            },
        );
        Ok(())
    }

    async fn link_fileset(&self, fs: &str, fileset: &str, path: &str) -> ConnectorResult<()> {
        let mut state = self.enter("link_fileset", &[fs, fileset, path])?;
        let relative = state.relative(fs, path);
        if !state.parent_exists(fs, &relative) {
            return Err(job_failed(format!("Path {path} does not exist")));
        }
        let info = state
            .filesets
            .get_mut(&key(fs, fileset))
            .ok_or_else(|| job_failed(format!("Fileset {fileset} does not exist")))?;
        if info.path.is_some() {
            return Err(job_failed(format!("Fileset {fileset} is already linked")));
        }
        info.path = Some(path.to_string());
        state.directories.insert(key(fs, &relative));
        Ok(())
    }

    async fn unlink_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()> {
        let mut state = self.enter("unlink_fileset", &[fs, fileset])?;
        let info = state
            .filesets
            .get_mut(&key(fs, fileset))
            .ok_or_else(|| job_failed(format!("Fileset {fileset} does not exist")))?;
        if let Some(path) = info.path.take() {
            let relative = state.relative(fs, &path);
            state
                .directories
                .retain(|(dir_fs, dir)| !(dir_fs == fs && is_within(dir, &relative)));
        }
        Ok(())
    }

    async fn delete_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()> {
        let mut state = self.enter("delete_fileset", &[fs, fileset])?;
        let fileset_key = key(fs, fileset);
        match state.filesets.get(&fileset_key) {
            None => return Err(job_failed(format!("Fileset {fileset} does not exist"))),
            Some(info) if info.path.is_some() => {
                return Err(job_failed(format!("Fileset {fileset} is still linked")))
            }
            Some(_) => {}
        }
        state.filesets.remove(&fileset_key);
        state.quotas.remove(&fileset_key);
        state.snapshots.remove(&fileset_key);
        Ok(())
    }

    async fn set_fileset_quota(&self, fs: &str, fileset: &str, bytes: u64) -> ConnectorResult<()> {
        let mut state = self.enter("set_fileset_quota", &[fs, fileset, &bytes.to_string()])?;
        let fileset_key = key(fs, fileset);
        if !state.filesets.contains_key(&fileset_key) {
            return Err(job_failed(format!("Fileset {fileset} does not exist")));
        }
        state.quotas.insert(fileset_key, bytes.div_ceil(1024) * 1024);
        Ok(())
    }

    async fn get_fileset_quota(&self, fs: &str, fileset: &str) -> ConnectorResult<u64> {
        let state = self.enter("get_fileset_quota", &[fs, fileset])?;
        Ok(state.quotas.get(&key(fs, fileset)).copied().unwrap_or_default())
    }

    async fn make_directory(
        &self,
        fs: &str,
        path: &str,
        _owner: &DirectoryOwner,
    ) -> ConnectorResult<()> {
        let mut state = self.enter("make_directory", &[fs, path])?;
        let dir_key = key(fs, path);
        if state.directories.contains(&dir_key) {
            return Err(job_failed(format!("EFSSG0762C: Directory {path} already exists")));
        }
        if !state.parent_exists(fs, path) {
            return Err(job_failed(format!("Parent of {path} does not exist")));
        }
        state.directories.insert(dir_key);
        Ok(())
    }

    async fn delete_directory(&self, fs: &str, path: &str) -> ConnectorResult<()> {
        let mut state = self.enter("delete_directory", &[fs, path])?;
        let (_, relative) = key(fs, path);
        if !state.directories.contains(&key(fs, path)) {
            return Err(job_failed(format!("Directory {path} does not exist")));
        }
        state
            .directories
            .retain(|(dir_fs, dir)| !(dir_fs == fs && is_within(dir, &relative)));
        Ok(())
    }

    async fn path_exists(&self, fs: &str, path: &str) -> ConnectorResult<bool> {
        let state = self.enter("path_exists", &[fs, path])?;
        let path_key = key(fs, path);
        Ok(path_key.1.is_empty()
            || state.directories.contains(&path_key)
            || state.symlinks.contains_key(&path_key))
    }

    async fn create_symlink(
        &self,
        fs: &str,
        target_fs: &str,
        target: &str,
        link: &str,
    ) -> ConnectorResult<()> {
        let mut state = self.enter("create_symlink", &[fs, target_fs, target, link])?;
        let link_key = key(fs, link);
        if state.symlinks.contains_key(&link_key) {
            return Err(job_failed(format!("EFSSG0762C: Symlink {link} already exists")));
        }
        if !state.parent_exists(fs, link) {
            return Err(job_failed(format!("Parent of {link} does not exist")));
        }
        state
            .symlinks
            .insert(link_key, (target_fs.to_string(), target.to_string()));
        Ok(())
    }

    async fn delete_symlink(&self, fs: &str, link: &str) -> ConnectorResult<()> {
        let mut state = self.enter("delete_symlink", &[fs, link])?;
        match state.symlinks.remove(&key(fs, link)) {
            Some(_) => Ok(()),
            None => Err(job_failed(format!("Symlink {link} does not exist"))),
        }
    }

    async fn list_fileset_snapshots(
        &self,
        fs: &str,
        fileset: &str,
    ) -> ConnectorResult<Vec<String>> {
        let state = self.enter("list_fileset_snapshots", &[fs, fileset])?;
        let fileset_key = key(fs, fileset);
        if !state.filesets.contains_key(&fileset_key) {
            return Err(ConnectorError::NotFound {
                message: format!("fileset {fileset} in filesystem {fs}"),
            });
        }
        Ok(state.snapshots.get(&fileset_key).cloned().unwrap_or_default())
    }

    async fn is_valid_node_class(&self, node_class: &str) -> ConnectorResult<bool> {
        let state = self.enter("is_valid_node_class", &[node_class])?;
        Ok(state.node_classes.contains(node_class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fileset_lifecycle() {
        let fake = FakeConnector::new("1");
        fake.add_filesystem("fs1", "0A1B", "/ibm/fs1", "");
        let request = CreateFilesetRequest::new("pvc-1", InodeSpace::New);

        fake.create_fileset("fs1", &request).await.unwrap();
        let error = fake.create_fileset("fs1", &request).await.unwrap_err();
        assert!(error.is_already_exists());

        fake.link_fileset("fs1", "pvc-1", "/ibm/fs1/pvc-1").await.unwrap();
        assert!(fake.path_exists("fs1", "pvc-1").await.unwrap());
        fake.make_directory("fs1", "pvc-1/pvc-1-data", &DirectoryOwner::default())
            .await
            .unwrap();
        fake.set_fileset_quota("fs1", "pvc-1", 1000).await.unwrap();
        assert_eq!(fake.get_fileset_quota("fs1", "pvc-1").await.unwrap(), 1024);

        assert!(fake.delete_fileset("fs1", "pvc-1").await.is_err());
        fake.unlink_fileset("fs1", "pvc-1").await.unwrap();
        assert!(!fake.has_directory("fs1", "pvc-1/pvc-1-data"));
        fake.delete_fileset("fs1", "pvc-1").await.unwrap();
        let error = fake.delete_fileset("fs1", "pvc-1").await.unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(fake.call_count("create_fileset"), 2);
    }

    #[tokio::test]
    async fn faults() {
        let fake = FakeConnector::new("1");
        fake.inject("get_cluster_id", Fault::Unauthenticated);
        let error = fake.get_cluster_id().await.unwrap_err();
        assert!(matches!(error, ConnectorError::Unauthenticated { .. }));
        fake.clear("get_cluster_id");
        assert_eq!(fake.get_cluster_id().await.unwrap(), "1");
        assert_eq!(fake.calls(), vec!["get_cluster_id", "get_cluster_id"]);
    }

    #[tokio::test]
    async fn directories_need_a_parent() {
        let fake = FakeConnector::new("1");
        fake.add_filesystem("fs1", "0A1B", "/ibm/fs1", "");
        let owner = DirectoryOwner::default();
        assert!(fake.make_directory("fs1", "a/b", &owner).await.is_err());
        fake.make_directory("fs1", "a", &owner).await.unwrap();
        fake.make_directory("fs1", "a/b", &owner).await.unwrap();
        fake.delete_directory("fs1", "a").await.unwrap();
        assert!(!fake.path_exists("fs1", "a/b").await.unwrap());
    }
}
