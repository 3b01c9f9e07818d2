use super::{check_volume_capabilities, connector_error, ScaleController};
use crate::{
    csi::{
        validate_volume_capabilities_response::Confirmed, ControllerPublishVolumeRequest,
        ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest,
        ControllerUnpublishVolumeResponse, ValidateVolumeCapabilitiesRequest,
        ValidateVolumeCapabilitiesResponse,
    },
    volume_id::VolumeId,
};
use std::collections::HashMap;
use tonic::Status;
use tracing::{debug, info};

/// Decode a volume id received from the orchestrator.
fn parse_volume_id(volume_id: &str) -> Result<VolumeId, Status> {
    if volume_id.is_empty() {
        return Err(Status::invalid_argument("Volume id is required"));
    }
    volume_id
        .parse::<VolumeId>()
        .map_err(|error| Status::invalid_argument(error.to_string()))
}

impl ScaleController {
    /// Make sure the primary filesystem and the filesystem of the volume are mounted on the node.
    pub async fn controller_publish_volume(
        &self,
        args: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, Status> {
        let volume = parse_volume_id(&args.volume_id)?;
        if args.node_id.is_empty() {
            return Err(Status::invalid_argument("Node id is required"));
        }
        let capability = args
            .volume_capability
            .ok_or_else(|| Status::invalid_argument("Volume capability is required"))?;
        check_volume_capabilities(&[capability])?;

        let node = self.node_mapping.admin_node_name(&args.node_id);
        let primary = self.primary_connector()?;
        let volume_fs = match primary.get_fs_name_from_uuid(volume.fs_uuid()).await {
            Ok(name) => name,
            Err(error) if error.is_not_found() => {
                return Err(Status::not_found(format!(
                    "Filesystem with uuid {} of volume {} does not exist",
                    volume.fs_uuid(),
                    args.volume_id
                )))
            }
            Err(error) => {
                return Err(connector_error(
                    error,
                    format!("resolve the filesystem with uuid {}", volume.fs_uuid()),
                ))
            }
        };

        let mut filesystems = vec![self.primary.fs.clone()];
        if volume_fs != self.primary.fs {
            filesystems.push(volume_fs);
        }
        for fs in filesystems {
            let details = primary
                .get_filesystem_mount_details(&fs)
                .await
                .map_err(|error| {
                    connector_error(error, format!("get the details of filesystem {fs}"))
                })?;
            if details.is_mounted_on(&node) {
                debug!(%fs, %node, "Filesystem is already mounted");
                continue;
            }
            if self.options.skip_mount_unmount {
                return Err(Status::internal(format!(
                    "Filesystem {fs} is not mounted on node {node} and mounting is disabled"
                )));
            }
            primary.mount_filesystem(&fs, &node).await.map_err(|error| {
                connector_error(error, format!("mount filesystem {fs} on node {node}"))
            })?;
            info!(%fs, %node, "Filesystem mounted");
        }

        Ok(ControllerPublishVolumeResponse {
            publish_context: HashMap::new(),
        })
    }

    /// Filesystems stay mounted for the other volumes, so only the arguments are checked.
    pub async fn controller_unpublish_volume(
        &self,
        args: ControllerUnpublishVolumeRequest,
    ) -> Result<ControllerUnpublishVolumeResponse, Status> {
        parse_volume_id(&args.volume_id)?;
        Ok(ControllerUnpublishVolumeResponse {})
    }

    /// Confirm the capabilities unless block access is requested.
    pub async fn validate_volume_capabilities(
        &self,
        args: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, Status> {
        parse_volume_id(&args.volume_id)?;
        if args.volume_capabilities.is_empty() {
            return Err(Status::invalid_argument("Volume capabilities are required"));
        }
        Ok(match check_volume_capabilities(&args.volume_capabilities) {
            Ok(()) => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(Confirmed {
                    volume_context: args.volume_context,
                    volume_capabilities: args.volume_capabilities,
                    parameters: args.parameters,
                    mutable_parameters: args.mutable_parameters,
                }),
                message: String::new(),
            },
            Err(status) => ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: status.message().to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_ids_are_arguments() {
        let status = parse_volume_id("").unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        let status = parse_volume_id("a;b").unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(parse_volume_id("1;0A1B;path=/ibm/fs1/lw/pvc-1").is_ok());
    }
}
