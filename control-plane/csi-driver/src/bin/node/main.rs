//! Storage Scale CSI node plugin.
//!
//! Publishes volumes on the node they are scheduled on.
#[cfg(target_os = "linux")]
mod identity;
#[cfg(target_os = "linux")]
mod mount;
#[cfg(target_os = "linux")]
mod node;

#[cfg(target_os = "linux")]
mod server {
    use crate::{identity::Identity, node::Node};
    use clap::Arg;
    use scale_csi::{
        csi::{identity_server::IdentityServer, node_server::NodeServer},
        transport::{csi_incoming, shutdown_signal},
    };
    use tonic::transport::Server;
    use tracing::{error, info};
    use utils::tracing_telemetry::{FmtStyle, TracingTelemetry};

    pub(crate) async fn main() -> anyhow::Result<()> {
        let matches = clap::Command::new(utils::package_description!())
            .about("k8s sidecar for Storage Scale implementing the CSI node service")
            .version(utils::version_info_str!())
            .arg(
                Arg::new("csi-socket")
                    .short('c')
                    .long("csi-socket")
                    .env("CSI_ENDPOINT")
                    .value_name("PATH")
                    .default_value(utils::DEFAULT_CSI_SOCKET)
                    .help("CSI gRPC listen socket"),
            )
            .arg(
                Arg::new("node-name")
                    .short('n')
                    .long("node-name")
                    .env("KUBE_NODE_NAME")
                    .value_name("NAME")
                    .help("Unique node name where this instance runs")
                    .required(true),
            )
            .arg(
                Arg::new("fmt-style")
                    .long("fmt-style")
                    .default_value("pretty")
                    .value_parser(clap::value_parser!(FmtStyle))
                    .help("formatting style of the logs"),
            )
            .get_matches();

        utils::print_package_info!();

        let tags = utils::tracing_telemetry::default_tracing_tags(
            utils::raw_version_str(),
            env!("CARGO_PKG_VERSION"),
        );
        TracingTelemetry::builder()
            .with_style(*matches.get_one::<FmtStyle>("fmt-style").unwrap_or(&FmtStyle::Pretty))
            .with_tracing_tags(tags)
            .init("csi-node");

        let csi_socket = matches
            .get_one::<String>("csi-socket")
            .map(|s| s.as_str())
            .unwrap_or(utils::DEFAULT_CSI_SOCKET);
        let node_name = matches
            .get_one::<String>("node-name")
            .ok_or_else(|| anyhow::anyhow!("the node name must be specified"))?;

        let incoming = csi_incoming(csi_socket)
            .map_err(|error| anyhow::anyhow!("Failed to bind CSI socket {csi_socket}: {error}"))?;
        info!(node = %node_name, "Starting Storage Scale CSI Node");

        let result = Server::builder()
            .add_service(NodeServer::new(Node::new(node_name.clone())))
            .add_service(IdentityServer::new(Identity {}))
            .serve_with_incoming_shutdown(incoming, shutdown_signal())
            .await
            .map_err(|error| {
                error!(%error, "CsiServer failed");
                anyhow::anyhow!("CSI node server failed: {error}")
            });
        utils::tracing_telemetry::flush_traces();
        result
    }
}

#[tokio::main]
#[cfg(target_os = "linux")]
async fn main() -> anyhow::Result<()> {
    server::main().await.map_err(|error| {
        tracing::error!(%error, "Terminated with error");
        error
    })
}

#[tokio::main]
#[cfg(not(target_os = "linux"))]
async fn main() -> anyhow::Result<()> {
    Ok(())
}
