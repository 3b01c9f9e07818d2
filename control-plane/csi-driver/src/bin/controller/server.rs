use crate::{controller::CsiControllerSvc, identity::CsiIdentitySvc, CsiControllerConfig};
use rpc::csi::{
    controller_server::ControllerServer, group_controller_server::GroupControllerServer,
    identity_server::IdentityServer,
};
use scale_csi::{
    driver::ScaleDriver,
    transport::{csi_incoming, shutdown_signal},
};
use tonic::transport::Server;
use tracing::error;

pub(crate) struct CsiServer {}

impl CsiServer {
    /// Serve the identity and controller services until a termination signal arrives.
    pub(crate) async fn run(driver: ScaleDriver) -> anyhow::Result<()> {
        let cfg = CsiControllerConfig::get_config();
        let incoming = csi_incoming(cfg.csi_socket()).map_err(|error| {
            anyhow::anyhow!("Failed to bind CSI socket {}: {}", cfg.csi_socket(), error)
        })?;

        let controller = CsiControllerSvc::new(driver.controller());
        Server::builder()
            .timeout(cfg.request_timeout())
            .add_service(IdentityServer::new(CsiIdentitySvc::new(&driver)))
            .add_service(ControllerServer::new(controller.clone()))
            .add_service(GroupControllerServer::new(controller))
            .serve_with_incoming_shutdown(incoming, shutdown_signal())
            .await
            .map_err(|error| {
                error!(%error, "CsiServer failed");
                anyhow::anyhow!("Failed to start gRPC server: {}", error)
            })
    }
}
