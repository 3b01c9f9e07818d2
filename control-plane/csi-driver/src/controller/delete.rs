use super::{connector_error, ignore_not_found, relative_to, ScaleController};
use crate::{
    csi::{DeleteVolumeRequest, DeleteVolumeResponse},
    path_lock::OpKind,
    scale::{FilesystemMountDetails, ScaleConnector},
    volume_id::{FilesetRef, VolumeId},
};
use tonic::Status;
use tracing::{debug, info, warn};

impl ScaleController {
    /// Delete a volume. Anything already gone counts as deleted.
    pub async fn delete_volume(
        &self,
        args: DeleteVolumeRequest,
    ) -> Result<DeleteVolumeResponse, Status> {
        if args.volume_id.is_empty() {
            return Err(Status::invalid_argument("Volume id is required"));
        }
        let volume = match args.volume_id.parse::<VolumeId>() {
            Ok(volume) => volume,
            Err(error) => {
                warn!(
                    volume.id = %args.volume_id,
                    %error,
                    "Undecodable volume id, assuming the volume is gone"
                );
                return Ok(DeleteVolumeResponse {});
            }
        };

        let symlink = match volume.is_fileset_based() {
            true => volume.path().to_string(),
            false => self.primary.symlink_path(volume.volume_name()),
        };
        let _lock = self
            .path_lock
            .try_acquire(&symlink, OpKind::DeleteVolume)
            .ok_or_else(|| {
                Status::aborted(format!(
                    "Volume {} is being created, try again later",
                    volume.volume_name()
                ))
            })?;

        let primary = self.primary_connector()?;
        let local_fs = match primary.get_fs_name_from_uuid(volume.fs_uuid()).await {
            Ok(name) => name,
            Err(error) if error.is_not_found() => {
                info!(volume.id = %args.volume_id, "Filesystem of the volume is gone");
                return Ok(DeleteVolumeResponse {});
            }
            Err(error) => {
                return Err(connector_error(
                    error,
                    format!("resolve the filesystem with uuid {}", volume.fs_uuid()),
                ))
            }
        };
        let local = primary
            .get_filesystem_mount_details(&local_fs)
            .await
            .map_err(|error| {
                connector_error(error, format!("get the details of filesystem {local_fs}"))
            })?;

        if volume.is_fileset_based() {
            let connector = self.cluster_connector(Some(volume.cluster_id()))?;
            self.delete_fileset(connector.as_ref(), &local, &volume)
                .await?;
        } else {
            let dir = relative_to(&local.mount_point, volume.path());
            ignore_not_found(primary.delete_directory(&local.name, dir).await)
                .map_err(|error| connector_error(error, format!("delete directory {dir}")))?;
        }

        let link = relative_to(&self.primary.mount_point, &symlink);
        ignore_not_found(primary.delete_symlink(&self.primary.fs, link).await)
            .map_err(|error| connector_error(error, format!("delete symlink {link}")))?;

        info!(volume.id = %args.volume_id, "Volume deleted");
        Ok(DeleteVolumeResponse {})
    }

    /// Unlink and delete the fileset of a volume, unless it still has snapshots.
    async fn delete_fileset(
        &self,
        connector: &dyn ScaleConnector,
        local: &FilesystemMountDetails,
        volume: &VolumeId,
    ) -> Result<(), Status> {
        let fs = local.owning_fs_name();
        let name = match volume.fileset() {
            Some(FilesetRef::Name(name)) => name,
            Some(FilesetRef::Id(id)) => match connector.get_fileset_name_from_id(fs, &id).await {
                Ok(name) => name,
                Err(error) if error.is_not_found() => {
                    debug!(fileset.id = %id, "Fileset is already gone");
                    return Ok(());
                }
                Err(error) => {
                    return Err(connector_error(
                        error,
                        format!("resolve the fileset with id {id}"),
                    ))
                }
            },
            None => return Ok(()),
        };
        if name != volume.volume_name() {
            return Err(Status::internal(format!(
                "Fileset '{name}' does not match the volume path '{}'",
                volume.path()
            )));
        }

        let info = match connector.list_fileset(fs, &name).await {
            Ok(info) => info,
            Err(error) if error.is_not_found() => {
                debug!(fileset = %name, "Fileset is already gone");
                return Ok(());
            }
            Err(error) => return Err(connector_error(error, format!("look up fileset {name}"))),
        };
        if info.independent {
            let snapshots = match connector.list_fileset_snapshots(fs, &name).await {
                Ok(snapshots) => snapshots,
                Err(error) if error.is_not_found() => vec![],
                Err(error) => {
                    return Err(connector_error(
                        error,
                        format!("list the snapshots of fileset {name}"),
                    ))
                }
            };
            if !snapshots.is_empty() {
                return Err(Status::failed_precondition(format!(
                    "Fileset {name} still has {} snapshots",
                    snapshots.len()
                )));
            }
        }
        if info.path.is_some() {
            ignore_not_found(connector.unlink_fileset(fs, &name).await)
                .map_err(|error| connector_error(error, format!("unlink fileset {name}")))?;
        }
        ignore_not_found(connector.delete_fileset(fs, &name).await)
            .map_err(|error| connector_error(error, format!("delete fileset {name}")))
    }
}
