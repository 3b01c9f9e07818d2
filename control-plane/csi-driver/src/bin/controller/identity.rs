use rpc::csi::{
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, PluginCapability, ProbeRequest, ProbeResponse,
};
use scale_csi::{controller::ScaleController, csi_plugin_name, driver::ScaleDriver};

use std::{collections::HashMap, sync::Arc};
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

#[derive(Debug)]
pub(crate) struct CsiIdentitySvc {
    controller: Arc<ScaleController>,
    capabilities: Vec<PluginCapability>,
}

impl CsiIdentitySvc {
    pub(crate) fn new(driver: &ScaleDriver) -> Self {
        Self {
            controller: driver.controller(),
            capabilities: driver.capabilities().to_vec(),
        }
    }
}

const CSI_PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tonic::async_trait]
impl rpc::csi::identity_server::Identity for CsiIdentitySvc {
    #[instrument(skip_all)]
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        debug!(
            "Request to get CSI plugin info, plugin: {}:{}",
            csi_plugin_name(),
            CSI_PLUGIN_VERSION,
        );
        let mut manifest = HashMap::new();
        manifest.insert("commit".to_string(), utils::raw_version_string());
        Ok(Response::new(GetPluginInfoResponse {
            name: csi_plugin_name(),
            vendor_version: CSI_PLUGIN_VERSION.to_string(),
            manifest,
        }))
    }

    #[instrument(skip_all)]
    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: self.capabilities.clone(),
        }))
    }

    #[instrument(skip_all)]
    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        // An unreachable cluster is not ready, not an error.
        let ready = self.controller.probe().await;
        debug!("CSI plugin ready: {}", ready);
        Ok(Response::new(ProbeResponse { ready: Some(ready) }))
    }
}
