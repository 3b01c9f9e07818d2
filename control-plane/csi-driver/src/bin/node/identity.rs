//! Implementation of gRPC methods from CSI Identity gRPC service.

use scale_csi::{csi::*, csi_plugin_name};

use std::collections::HashMap;
use tonic::{Request, Response, Status};
use tracing::debug;

const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug)]
pub(crate) struct Identity {}

#[tonic::async_trait]
impl identity_server::Identity for Identity {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        debug!(
            "GetPluginInfo request ({}:{})",
            csi_plugin_name(),
            PLUGIN_VERSION
        );

        Ok(Response::new(GetPluginInfoResponse {
            name: csi_plugin_name(),
            vendor_version: PLUGIN_VERSION.to_owned(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        // The node plugin only serves the node service.
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec![],
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        // Volumes only need the local filesystem mounts, so the plugin is always ready.
        Ok(Response::new(ProbeResponse { ready: Some(true) }))
    }
}
