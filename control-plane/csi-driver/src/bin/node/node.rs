//! Implementation of the CSI Node gRPC service.
//!
//! Volumes are directories of a Storage Scale filesystem already mounted on the node, so
//! publishing a volume is a bind mount of its directory onto the target path.
use crate::mount;
use rpc::csi::{
    node_server, volume_capability::AccessType, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeStageVolumeRequest,
    NodeStageVolumeResponse, NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse,
    NodeUnstageVolumeRequest, NodeUnstageVolumeResponse, VolumeCapability,
};
use scale_csi::{plugin_capabilities::node_capabilities, volume_id::VolumeId};
use std::{fs, io::ErrorKind, path::Path};
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug)]
pub(crate) struct Node {
    node_name: String,
}

impl Node {
    pub(crate) fn new(node_name: String) -> Self {
        Self { node_name }
    }
}

fn parse_volume_id(volume_id: &str) -> Result<VolumeId, Status> {
    if volume_id.is_empty() {
        return Err(Status::invalid_argument("Volume id is required"));
    }
    volume_id
        .parse::<VolumeId>()
        .map_err(|error| Status::invalid_argument(error.to_string()))
}

/// Only filesystem access is supported.
fn check_capability(capability: &Option<VolumeCapability>) -> Result<(), Status> {
    match capability.as_ref().and_then(|c| c.access_type.as_ref()) {
        None => Err(Status::invalid_argument("Volume capability is required")),
        Some(AccessType::Block(_)) => Err(Status::invalid_argument(
            "Block access is not supported",
        )),
        Some(AccessType::Mount(_)) => Ok(()),
    }
}

fn path_argument<'a>(path: &'a str, name: &str) -> Result<&'a str, Status> {
    match path.is_empty() {
        true => Err(Status::invalid_argument(format!("{name} is required"))),
        false => Ok(path),
    }
}

#[tonic::async_trait]
impl node_server::Node for Node {
    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let args = request.into_inner();
        parse_volume_id(&args.volume_id)?;
        path_argument(&args.staging_target_path, "Staging target path")?;
        check_capability(&args.volume_capability)?;
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let args = request.into_inner();
        parse_volume_id(&args.volume_id)?;
        path_argument(&args.staging_target_path, "Staging target path")?;
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let args = request.into_inner();
        let volume = parse_volume_id(&args.volume_id)?;
        let target = path_argument(&args.target_path, "Target path")?;
        check_capability(&args.volume_capability)?;

        // Fileset volumes are reached through their symlink.
        let source = fs::canonicalize(volume.path()).map_err(|error| {
            Status::not_found(format!(
                "Volume path {} is not accessible: {error}",
                volume.path()
            ))
        })?;
        let source = source.to_string_lossy();

        let existing = mount::find_mount(target).map_err(|error| {
            Status::internal(format!("Failed to read the mount table: {error}"))
        })?;
        if let Some(existing) = existing {
            if existing.readonly() != args.readonly {
                return Err(Status::already_exists(format!(
                    "Target path {target} is already mounted with a different read only mode"
                )));
            }
            debug!(
                target,
                source = %existing.source,
                fstype = %existing.fstype,
                "Volume is already published"
            );
            return Ok(Response::new(NodePublishVolumeResponse {}));
        }

        mount::create_target(target).map_err(|error| {
            Status::internal(format!("Failed to create target path {target}: {error}"))
        })?;
        mount::bind_mount(&source, target, args.readonly).map_err(|error| {
            Status::internal(format!(
                "Failed to bind mount {source} onto {target}: {error}"
            ))
        })?;
        info!(source = %source, target, readonly = args.readonly, "Volume published");
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let args = request.into_inner();
        parse_volume_id(&args.volume_id)?;
        let target = path_argument(&args.target_path, "Target path")?;

        let mounted = mount::find_mount(target).map_err(|error| {
            Status::internal(format!("Failed to read the mount table: {error}"))
        })?;
        if mounted.is_some() {
            mount::bind_unmount(target).map_err(|error| {
                Status::internal(format!("Failed to unmount {target}: {error}"))
            })?;
        }
        match fs::remove_dir(Path::new(target)) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(target, %error, "Failed to remove the target path");
                return Err(Status::internal(format!(
                    "Failed to remove target path {target}: {error}"
                )));
            }
        }
        info!(target, "Volume unpublished");
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    #[instrument(err, skip_all)]
    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("NodeGetVolumeStats is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: node_capabilities(),
        }))
    }

    #[instrument(err, skip_all)]
    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_name.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_server::Node as _;
    use rpc::csi::volume_capability::{BlockVolume, MountVolume};

    fn node() -> Node {
        Node::new("worker-1".into())
    }

    fn capability(block: bool) -> Option<VolumeCapability> {
        Some(VolumeCapability {
            access_type: Some(match block {
                true => AccessType::Block(BlockVolume {}),
                false => AccessType::Mount(MountVolume::default()),
            }),
            access_mode: None,
        })
    }

    #[tokio::test]
    async fn stage_validates_arguments() {
        let request = NodeStageVolumeRequest {
            volume_id: "1;0A1B;path=/ibm/fs1/lw/pvc-1".into(),
            staging_target_path: "/staging".into(),
            volume_capability: capability(false),
            ..Default::default()
        };
        assert!(node().node_stage_volume(Request::new(request.clone())).await.is_ok());

        let block = NodeStageVolumeRequest {
            volume_capability: capability(true),
            ..request.clone()
        };
        let status = node().node_stage_volume(Request::new(block)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let bad_id = NodeStageVolumeRequest {
            volume_id: "nonsense".into(),
            ..request
        };
        let status = node().node_stage_volume(Request::new(bad_id)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn publish_needs_the_volume_path() {
        let request = NodePublishVolumeRequest {
            volume_id: "1;0A1B;path=/does/not/exist/pvc-1".into(),
            target_path: "/target".into(),
            volume_capability: capability(false),
            ..Default::default()
        };
        let status = node().node_publish_volume(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn unpublish_removes_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mount");
        fs::create_dir(&target).unwrap();
        let request = NodeUnpublishVolumeRequest {
            volume_id: "1;0A1B;path=/ibm/fs1/lw/pvc-1".into(),
            target_path: target.to_string_lossy().into_owned(),
        };
        node()
            .node_unpublish_volume(Request::new(request.clone()))
            .await
            .unwrap();
        assert!(!target.exists());
        // Unpublishing twice is fine.
        node().node_unpublish_volume(Request::new(request)).await.unwrap();
    }

    #[tokio::test]
    async fn info_and_capabilities() {
        let info = node()
            .node_get_info(Request::new(NodeGetInfoRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(info.node_id, "worker-1");
        let capabilities = node()
            .node_get_capabilities(Request::new(NodeGetCapabilitiesRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(capabilities.capabilities.len(), 1);
    }
}
