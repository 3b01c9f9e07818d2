use rpc::csi::*;
use scale_csi::{controller::ScaleController, plugin_capabilities::controller_capabilities};

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

/// The CSI controller and group controller services.
#[derive(Debug, Clone)]
pub(crate) struct CsiControllerSvc {
    controller: Arc<ScaleController>,
}

impl CsiControllerSvc {
    pub(crate) fn new(controller: Arc<ScaleController>) -> Self {
        Self { controller }
    }
}

#[tonic::async_trait]
impl rpc::csi::controller_server::Controller for CsiControllerSvc {
    #[instrument(err, fields(volume.name = %request.get_ref().name), skip(self, request))]
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let args = request.into_inner();
        debug!(parameters = ?args.parameters, "CreateVolume request");
        self.controller.create_volume(args).await.map(Response::new)
    }

    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        self.controller
            .delete_volume(request.into_inner())
            .await
            .map(Response::new)
    }

    #[instrument(
        err,
        fields(volume.id = %request.get_ref().volume_id, node = %request.get_ref().node_id),
        skip(self, request)
    )]
    async fn controller_publish_volume(
        &self,
        request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        self.controller
            .controller_publish_volume(request.into_inner())
            .await
            .map(Response::new)
    }

    #[instrument(
        err,
        fields(volume.id = %request.get_ref().volume_id, node = %request.get_ref().node_id),
        skip(self, request)
    )]
    async fn controller_unpublish_volume(
        &self,
        request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        self.controller
            .controller_unpublish_volume(request.into_inner())
            .await
            .map(Response::new)
    }

    #[instrument(err, fields(volume.id = %request.get_ref().volume_id), skip(self, request))]
    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        self.controller
            .validate_volume_capabilities(request.into_inner())
            .await
            .map(Response::new)
    }

    #[instrument(err, skip_all)]
    async fn list_volumes(
        &self,
        _request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        Err(Status::unimplemented("ListVolumes is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        Err(Status::unimplemented("GetCapacity is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: controller_capabilities(),
        }))
    }

    #[instrument(err, skip_all)]
    async fn create_snapshot(
        &self,
        _request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("CreateSnapshot is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn delete_snapshot(
        &self,
        _request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("DeleteSnapshot is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("ListSnapshots is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn controller_expand_volume(
        &self,
        _request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerExpandVolume is not supported"))
    }

    #[instrument(err, skip_all)]
    async fn controller_get_volume(
        &self,
        _request: Request<ControllerGetVolumeRequest>,
    ) -> Result<Response<ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is not supported"))
    }
}

#[tonic::async_trait]
impl rpc::csi::group_controller_server::GroupController for CsiControllerSvc {
    #[instrument(err, skip_all)]
    async fn group_controller_get_capabilities(
        &self,
        _request: Request<GroupControllerGetCapabilitiesRequest>,
    ) -> Result<Response<GroupControllerGetCapabilitiesResponse>, Status> {
        Ok(Response::new(GroupControllerGetCapabilitiesResponse {
            capabilities: vec![],
        }))
    }

    #[instrument(err, skip_all)]
    async fn create_volume_group_snapshot(
        &self,
        _request: Request<CreateVolumeGroupSnapshotRequest>,
    ) -> Result<Response<CreateVolumeGroupSnapshotResponse>, Status> {
        Err(Status::unimplemented("Volume group snapshots are not supported"))
    }

    #[instrument(err, skip_all)]
    async fn delete_volume_group_snapshot(
        &self,
        _request: Request<DeleteVolumeGroupSnapshotRequest>,
    ) -> Result<Response<DeleteVolumeGroupSnapshotResponse>, Status> {
        Err(Status::unimplemented("Volume group snapshots are not supported"))
    }

    #[instrument(err, skip_all)]
    async fn get_volume_group_snapshot(
        &self,
        _request: Request<GetVolumeGroupSnapshotRequest>,
    ) -> Result<Response<GetVolumeGroupSnapshotResponse>, Status> {
        Err(Status::unimplemented("Volume group snapshots are not supported"))
    }
}
