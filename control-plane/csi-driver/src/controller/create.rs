use super::{
    check_volume_capabilities, connector_error, ignore_already_exists, join, relative_to,
    ScaleController,
};
use crate::{
    context::VolumeSpec,
    csi::{CreateVolumeRequest, CreateVolumeResponse, Volume},
    limiter::VolumeOpGuard,
    path_lock::OpKind,
    scale::{
        ConnectorError, CreateFilesetRequest, DirectoryOwner, FilesetInfo, FilesystemMountDetails,
        InodeSpace, ScaleConnector,
    },
    volume_id::{StorageClassType, VolumeId, VolumeType},
};
use std::sync::Arc;
use tonic::Status;
use tracing::{debug, info, warn};
use utils::{
    bytes::into_human, DEFAULT_INODE_LIMIT, FILESET_DATA_DIR_SUFFIX, MIN_FILESET_VOLUME_SIZE,
};

const ROOT_FILESET: &str = "root";
const FILESET_COMMENT: &str = "Fileset created by IBM Container Storage Interface driver";

/// What a create call made so far, undone by [`ScaleController::compensate`] on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Created {
    Nothing,
    Directory { fs: String, path: String },
    Fileset { fs: String, name: String },
}

/// Everything resolved about the volume being created.
struct Target<'a> {
    spec: &'a VolumeSpec,
    /// Name of the fileset or directory.
    name: String,
    /// Requested size in bytes, raised to the fileset minimum.
    size: u64,
    cluster_id: String,
    /// Connector of the cluster owning the filesystem, the primary one for lightweight volumes.
    connector: Arc<dyn ScaleConnector>,
    /// Connector of the primary cluster, which holds the symlinks.
    primary: Arc<dyn ScaleConnector>,
    /// The filesystem as mounted on the primary cluster.
    local: FilesystemMountDetails,
    /// The filesystem as seen by the owning cluster.
    owning: FilesystemMountDetails,
}

impl Target<'_> {
    fn owning_fs(&self) -> &str {
        &self.owning.name
    }
    fn owner(&self) -> DirectoryOwner {
        DirectoryOwner {
            uid: self.spec.uid.map(|uid| uid.to_string()),
            gid: self.spec.gid.map(|gid| gid.to_string()),
            permissions: self.spec.permissions.clone(),
        }
    }
}

impl ScaleController {
    /// Create a volume, or return the existing one when it matches the request.
    pub async fn create_volume(
        &self,
        args: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, Status> {
        if args.name.is_empty() {
            return Err(Status::invalid_argument("Volume name is required"));
        }
        if args.volume_content_source.is_some() {
            return Err(Status::invalid_argument(
                "Source for create volume is not supported",
            ));
        }
        check_volume_capabilities(&args.volume_capabilities)?;

        let requested = match &args.capacity_range {
            Some(range) if range.required_bytes < 0 => {
                return Err(Status::invalid_argument(
                    "Volume size must be a non-negative number",
                ))
            }
            Some(range) => range.required_bytes as u64,
            None => 0,
        };

        let spec = VolumeSpec::parse(&args.parameters, self.options.cg_prefix.as_deref())?;
        let name = self.storage_name(&args.name);
        let size = match spec.fileset_based && requested > 0 {
            true => requested.max(MIN_FILESET_VOLUME_SIZE),
            false => requested,
        };
        if size != requested {
            debug!(
                requested = %into_human(requested),
                size = %into_human(size),
                "Raised the fileset volume to the minimum size"
            );
        }

        let _guard = VolumeOpGuard::new(self.inflight.clone(), &args.name, size)?;
        let symlink = self.primary.symlink_path(&name);
        let _lock = self
            .path_lock
            .try_acquire(&symlink, OpKind::CreateVolume)
            .ok_or_else(|| {
                Status::aborted(format!("Volume {name} is being deleted, try again later"))
            })?;

        let primary = self.primary_connector()?;
        let local = primary
            .get_filesystem_mount_details(&spec.backend_fs)
            .await
            .map_err(|error| match error.is_not_found() {
                true => Status::invalid_argument(format!(
                    "Filesystem '{}' does not exist on the primary cluster",
                    spec.backend_fs
                )),
                false => connector_error(
                    error,
                    format!("get the details of filesystem {}", spec.backend_fs),
                ),
            })?;

        let cluster_id = spec
            .cluster_id
            .clone()
            .unwrap_or_else(|| self.primary.cluster_id.clone());
        // Lightweight volumes are directories of the filesystem as mounted on the primary
        // cluster, only filesets are made by the cluster owning the filesystem.
        let (connector, owning) = match spec.fileset_based {
            true => {
                let connector = self.cluster_connector(Some(&cluster_id))?;
                let owning_fs = local.owning_fs_name().to_string();
                let owning = connector
                    .get_filesystem_mount_details(&owning_fs)
                    .await
                    .map_err(|error| {
                        let action = format!("get the details of filesystem {owning_fs}");
                        connector_error(error, format!("{action} on cluster {cluster_id}"))
                    })?;
                (connector, owning)
            }
            false => {
                // The cluster must still be configured.
                self.cluster_connector(Some(&cluster_id))?;
                (primary.clone(), local.clone())
            }
        };

        if let Some(node_class) = &spec.node_class {
            let valid = connector
                .is_valid_node_class(node_class)
                .await
                .map_err(|error| {
                    connector_error(error, format!("look up node class {node_class}"))
                })?;
            if !valid {
                return Err(Status::invalid_argument(format!(
                    "Node class '{node_class}' does not exist on cluster {cluster_id}"
                )));
            }
        }

        let target = Target {
            spec: &spec,
            name,
            size,
            cluster_id,
            connector,
            primary,
            local,
            owning,
        };
        let (volume_id, capacity) = if spec.existing_volume {
            self.create_static_volume(&target).await?
        } else if spec.fileset_based {
            self.create_fileset_volume(&target).await?
        } else {
            self.create_lightweight_volume(&target).await?
        };
        let volume_id = volume_id.to_string();
        info!(volume.id = %volume_id, volume.name = %args.name, capacity, "Volume created");

        Ok(CreateVolumeResponse {
            volume: Some(Volume {
                capacity_bytes: capacity as i64,
                volume_id,
                volume_context: args.parameters,
                content_source: None,
                accessible_topology: vec![],
            }),
        })
    }

    /// A directory under the base path of the storage class.
    async fn create_lightweight_volume(
        &self,
        target: &Target<'_>,
    ) -> Result<(VolumeId, u64), Status> {
        let fs = target.owning_fs();
        let base = target.spec.dir_base_path.as_deref().unwrap_or_default();
        let base_exists = target
            .connector
            .path_exists(fs, base)
            .await
            .map_err(|error| connector_error(error, format!("look up directory {base}")))?;
        if !base_exists {
            return Err(Status::invalid_argument(format!(
                "Directory base path '{base}' does not exist in filesystem '{fs}'"
            )));
        }

        let dir = join(base, &target.name);
        let link = self.primary.symlink_relative(&target.name);
        let volume_id = VolumeId::Current {
            storage_class: StorageClassType::Classic,
            volume_type: VolumeType::Lightweight,
            cluster_id: target.cluster_id.clone(),
            fs_uuid: target.local.uuid.clone(),
            consistency_group: String::new(),
            fileset_name: String::new(),
            path: format!("{}/{dir}", target.local.mount_point.trim_end_matches('/')),
        };

        let dir_exists = target
            .connector
            .path_exists(fs, &dir)
            .await
            .map_err(|error| connector_error(error, format!("look up directory {dir}")))?;
        let link_exists = self.symlink_exists(target, &link).await?;
        if dir_exists && link_exists {
            debug!(volume.name = %target.name, "Lightweight volume already exists");
            return Ok((volume_id, target.size));
        }

        let mut created = Created::Nothing;
        if !dir_exists {
            match target
                .connector
                .make_directory(fs, &dir, &target.owner())
                .await
            {
                Ok(()) => {
                    created = Created::Directory {
                        fs: fs.to_string(),
                        path: dir.clone(),
                    }
                }
                Err(error) if error.is_already_exists() => {}
                Err(error) => {
                    return Err(connector_error(error, format!("create directory {dir}")))
                }
            }
        }
        if !link_exists {
            if let Err(status) = self.create_symlink(target, &dir, &link).await {
                return Err(self.fail(target, created, status).await);
            }
        }
        Ok((volume_id, target.size))
    }

    /// A fileset linked into the owning filesystem, with a data directory and a quota.
    async fn create_fileset_volume(&self, target: &Target<'_>) -> Result<(VolumeId, u64), Status> {
        let spec = target.spec;
        let fs = target.owning_fs();
        let volume_type = spec.volume_type();
        let consistency_group = spec.consistency_group.clone().unwrap_or_default();
        let volume_id = VolumeId::Current {
            storage_class: spec.storage_class,
            volume_type,
            cluster_id: target.cluster_id.clone(),
            fs_uuid: target.local.uuid.clone(),
            consistency_group: consistency_group.clone(),
            fileset_name: target.name.clone(),
            path: self.primary.symlink_path(&target.name),
        };
        let link = self.primary.symlink_relative(&target.name);

        let existing = match target.connector.list_fileset(fs, &target.name).await {
            Ok(info) => Some(info),
            Err(error) if error.is_not_found() => None,
            Err(error) => {
                return Err(connector_error(
                    error,
                    format!("look up fileset {}", target.name),
                ))
            }
        };

        let mut created = Created::Nothing;
        let (junction, quota) = match existing {
            Some(info) => {
                let quota = self.check_existing_quota(target).await?;
                let quota_set = target.size == 0 || quota > 0;
                if info.path.is_some() && quota_set && self.symlink_exists(target, &link).await? {
                    debug!(volume.name = %target.name, "Fileset volume already exists");
                    return Ok((volume_id, target.size.max(quota)));
                }
                (info.path, quota)
            }
            None => {
                let (inode_space, parent_junction) = self
                    .inode_space(target, volume_type, &consistency_group)
                    .await?;
                let request = self.fileset_request(target, inode_space);
                match target.connector.create_fileset(fs, &request).await {
                    Ok(()) => {
                        created = Created::Fileset {
                            fs: fs.to_string(),
                            name: target.name.clone(),
                        }
                    }
                    Err(error) if error.is_already_exists() => {}
                    Err(error) => {
                        return Err(connector_error(
                            error,
                            format!("create fileset {}", target.name),
                        ))
                    }
                }
                let junction = format!("{}/{}", parent_junction.trim_end_matches('/'), target.name);
                match self.link_fileset(target, &junction).await {
                    Ok(()) => (Some(junction), 0),
                    Err(status) => return Err(self.fail(target, created, status).await),
                }
            }
        };

        match self
            .finish_fileset_volume(target, junction, quota, &link)
            .await
        {
            Ok(()) => Ok((volume_id, target.size)),
            Err(status) => Err(self.fail(target, created, status).await),
        }
    }

    /// Link when needed, then set the quota and create the data directory and the symlink.
    async fn finish_fileset_volume(
        &self,
        target: &Target<'_>,
        junction: Option<String>,
        quota: u64,
        link: &str,
    ) -> Result<(), Status> {
        let fs = target.owning_fs();
        let junction = match junction {
            Some(junction) => junction,
            None => {
                let junction = format!(
                    "{}/{}",
                    target.owning.mount_point.trim_end_matches('/'),
                    target.name
                );
                self.link_fileset(target, &junction).await?;
                junction
            }
        };

        if target.size > 0 && quota.div_ceil(1024) != target.size.div_ceil(1024) {
            target
                .connector
                .set_fileset_quota(fs, &target.name, target.size)
                .await
                .map_err(|error| {
                    connector_error(error, format!("set the quota of fileset {}", target.name))
                })?;
        }

        let data_dir = join(
            relative_to(&target.owning.mount_point, &junction),
            &format!("{}{FILESET_DATA_DIR_SUFFIX}", target.name),
        );
        let data_dir_exists = target
            .connector
            .path_exists(fs, &data_dir)
            .await
            .map_err(|error| connector_error(error, format!("look up directory {data_dir}")))?;
        if !data_dir_exists {
            ignore_already_exists(
                target
                    .connector
                    .make_directory(fs, &data_dir, &target.owner())
                    .await,
            )
            .map_err(|error| connector_error(error, format!("create directory {data_dir}")))?;
        }

        if !self.symlink_exists(target, link).await? {
            self.create_symlink(target, &data_dir, link).await?;
        }
        Ok(())
    }

    /// A pre-provisioned fileset which only needs linking and a symlink.
    async fn create_static_volume(&self, target: &Target<'_>) -> Result<(VolumeId, u64), Status> {
        let fs = target.owning_fs();
        let info = match target.connector.list_fileset(fs, &target.name).await {
            Ok(info) => info,
            Err(error) if error.is_not_found() => {
                return Err(Status::invalid_argument(format!(
                    "Fileset '{}' of the existing volume does not exist in filesystem '{fs}'",
                    target.name
                )))
            }
            Err(error) => {
                return Err(connector_error(
                    error,
                    format!("look up fileset {}", target.name),
                ))
            }
        };
        let junction = match info.path {
            Some(junction) => junction,
            None => {
                let junction = format!(
                    "{}/{}",
                    target.owning.mount_point.trim_end_matches('/'),
                    target.name
                );
                self.link_fileset(target, &junction).await?;
                junction
            }
        };
        let link = self.primary.symlink_relative(&target.name);
        if !self.symlink_exists(target, &link).await? {
            self.create_symlink(
                target,
                relative_to(&target.owning.mount_point, &junction),
                &link,
            )
            .await?;
        }

        let quota = target
            .connector
            .get_fileset_quota(fs, &target.name)
            .await
            .map_err(|error| {
                connector_error(error, format!("get the quota of fileset {}", target.name))
            })?;
        let volume_type = match info.independent {
            true => VolumeType::IndependentFileset,
            false => VolumeType::DependentFileset,
        };
        let volume_id = VolumeId::Current {
            storage_class: StorageClassType::Classic,
            volume_type,
            cluster_id: target.cluster_id.clone(),
            fs_uuid: target.local.uuid.clone(),
            consistency_group: String::new(),
            fileset_name: target.name.clone(),
            path: self.primary.symlink_path(&target.name),
        };
        let capacity = match quota {
            0 => target.size,
            quota => quota,
        };
        Ok((volume_id, capacity))
    }

    /// The inode space of a new fileset and the junction of its parent.
    async fn inode_space(
        &self,
        target: &Target<'_>,
        volume_type: VolumeType,
        consistency_group: &str,
    ) -> Result<(InodeSpace, String), Status> {
        let spec = target.spec;
        if volume_type != VolumeType::DependentFileset {
            return Ok((InodeSpace::New, target.owning.mount_point.clone()));
        }
        if spec.storage_class == StorageClassType::Advanced {
            let junction = self
                .ensure_consistency_group(target, consistency_group)
                .await?;
            return Ok((InodeSpace::Of(consistency_group.to_string()), junction));
        }

        let parent = spec.parent_fileset.as_deref().unwrap_or(ROOT_FILESET);
        if parent == ROOT_FILESET {
            return Ok((
                InodeSpace::Of(ROOT_FILESET.to_string()),
                target.owning.mount_point.clone(),
            ));
        }
        let info = match target.connector.list_fileset(target.owning_fs(), parent).await {
            Ok(info) => info,
            Err(error) if error.is_not_found() => {
                return Err(Status::invalid_argument(format!(
                    "Parent fileset '{parent}' does not exist"
                )))
            }
            Err(error) => {
                return Err(connector_error(error, format!("look up fileset {parent}")))
            }
        };
        if !info.independent {
            return Err(Status::invalid_argument(format!(
                "Parent fileset '{parent}' is not an independent fileset"
            )));
        }
        let junction = info.path.ok_or_else(|| {
            Status::invalid_argument(format!("Parent fileset '{parent}' is not linked"))
        })?;
        Ok((InodeSpace::Of(parent.to_string()), junction))
    }

    /// Create and link the consistency group fileset when missing, returning its junction.
    async fn ensure_consistency_group(
        &self,
        target: &Target<'_>,
        group: &str,
    ) -> Result<String, Status> {
        let fs = target.owning_fs();
        let info = match target.connector.list_fileset(fs, group).await {
            Ok(info) => info,
            Err(error) if error.is_not_found() => {
                let mut request = CreateFilesetRequest::new(group, InodeSpace::New);
                request.max_num_inodes =
                    Some(target.spec.inode_limit.unwrap_or(DEFAULT_INODE_LIMIT));
                request.comment = Some(FILESET_COMMENT.to_string());
                ignore_already_exists(target.connector.create_fileset(fs, &request).await)
                    .map_err(|error| {
                        connector_error(error, format!("create consistency group {group}"))
                    })?;
                info!(fileset = group, "Consistency group created");
                FilesetInfo {
                    name: group.to_string(),
                    independent: true,
                    ..Default::default()
                }
            }
            Err(error) => {
                return Err(connector_error(
                    error,
                    format!("look up consistency group {group}"),
                ))
            }
        };
        if !info.independent {
            return Err(Status::invalid_argument(format!(
                "Consistency group fileset '{group}' is not an independent fileset"
            )));
        }
        match info.path {
            Some(junction) => Ok(junction),
            None => {
                let junction =
                    format!("{}/{group}", target.owning.mount_point.trim_end_matches('/'));
                target
                    .connector
                    .link_fileset(fs, group, &junction)
                    .await
                    .map_err(|error| {
                        connector_error(error, format!("link consistency group {group}"))
                    })?;
                Ok(junction)
            }
        }
    }

    fn fileset_request(
        &self,
        target: &Target<'_>,
        inode_space: InodeSpace,
    ) -> CreateFilesetRequest {
        let spec = target.spec;
        let mut request = CreateFilesetRequest::new(&target.name, inode_space);
        if request.inode_space == InodeSpace::New {
            request.max_num_inodes = Some(spec.inode_limit.unwrap_or(DEFAULT_INODE_LIMIT));
        }
        if let (Some(uid), Some(gid)) = (spec.uid, spec.gid) {
            request.owner = Some(format!("{uid}:{gid}"));
        }
        request.comment = Some(FILESET_COMMENT.to_string());
        request.compression = spec.compression.clone();
        request.tier = spec.tier.clone();
        if let Some(cache) = &spec.cache {
            request.afm_target = Some(cache.afm_target.clone());
            request.afm_mode = Some(cache.mode.afm_mode().to_string());
        }
        request
    }

    /// The quota of an existing fileset, failing when it conflicts with the requested size.
    async fn check_existing_quota(&self, target: &Target<'_>) -> Result<u64, Status> {
        let quota = target
            .connector
            .get_fileset_quota(target.owning_fs(), &target.name)
            .await
            .map_err(|error| {
                connector_error(error, format!("get the quota of fileset {}", target.name))
            })?;
        if target.size > 0 && quota > 0 && quota.div_ceil(1024) != target.size.div_ceil(1024) {
            return Err(Status::already_exists(format!(
                "Volume {} already exists with a quota of {quota} bytes ({} requested)",
                target.name, target.size
            )));
        }
        Ok(quota)
    }

    async fn link_fileset(&self, target: &Target<'_>, junction: &str) -> Result<(), Status> {
        target
            .connector
            .link_fileset(target.owning_fs(), &target.name, junction)
            .await
            .map_err(|error| {
                connector_error(error, format!("link fileset {} at {junction}", target.name))
            })
    }

    async fn symlink_exists(&self, target: &Target<'_>, link: &str) -> Result<bool, Status> {
        target
            .primary
            .path_exists(&self.primary.fs, link)
            .await
            .map_err(|error| connector_error(error, format!("look up symlink {link}")))
    }

    /// Create the symlink on the primary filesystem pointing at `path` of the volume filesystem.
    async fn create_symlink(
        &self,
        target: &Target<'_>,
        path: &str,
        link: &str,
    ) -> Result<(), Status> {
        ignore_already_exists(
            target
                .primary
                .create_symlink(&self.primary.fs, &target.spec.backend_fs, path, link)
                .await,
        )
        .map_err(|error| connector_error(error, format!("create symlink {link}")))
    }

    /// Undo what a failed create call made. The failure of the undo itself is returned for
    /// logging only.
    async fn compensate(
        &self,
        connector: &dyn ScaleConnector,
        created: &Created,
    ) -> Result<(), ConnectorError> {
        match created {
            Created::Nothing => Ok(()),
            Created::Directory { fs, path } => connector.delete_directory(fs, path).await,
            Created::Fileset { fs, name } => {
                if let Err(error) = connector.unlink_fileset(fs, name).await {
                    if !error.is_not_found() {
                        debug!(fileset = %name, %error, "Failed to unlink fileset");
                    }
                }
                connector.delete_fileset(fs, name).await
            }
        }
    }

    /// Run the compensation and return the original failure.
    async fn fail(&self, target: &Target<'_>, created: Created, status: Status) -> Status {
        if let Err(error) = self.compensate(target.connector.as_ref(), &created).await {
            warn!(
                volume.name = %target.name,
                ?created,
                %error,
                "Failed to clean up after a failed create"
            );
        }
        status
    }
}
