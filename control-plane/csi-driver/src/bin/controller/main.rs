use clap::{Arg, ArgMatches};
use scale_csi::driver::ScaleDriver;
use tracing::info;
use utils::tracing_telemetry::{FmtStyle, KeyValue, TracingTelemetry};

mod config;
mod controller;
mod identity;
mod server;

use config::CsiControllerConfig;

/// Initialize all components before starting the CSI controller.
async fn initialize_controller(args: &ArgMatches) -> anyhow::Result<ScaleDriver> {
    CsiControllerConfig::initialize(args)?;
    let options = CsiControllerConfig::get_config().driver_options();
    ScaleDriver::initialize(options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize the driver, error = {}", e))
}

#[tokio::main(worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let args = clap::Command::new(utils::package_description!())
        .version(utils::version_info_str!())
        .arg(
            Arg::new("socket")
                .long("csi-socket")
                .short('c')
                .env("CSI_ENDPOINT")
                .default_value(utils::DEFAULT_CSI_SOCKET)
                .help("CSI socket path"),
        )
        .arg(
            Arg::new("config-file")
                .long("config-file")
                .env("SCALE_CONFIG_FILE")
                .default_value(utils::DEFAULT_CONFIG_FILE)
                .help("the cluster configuration file"),
        )
        .arg(
            Arg::new("secrets-dir")
                .long("secrets-dir")
                .default_value(utils::DEFAULT_SECRETS_DIR)
                .help("directory holding the REST credentials of each cluster"),
        )
        .arg(
            Arg::new("cacert-dir")
                .long("cacert-dir")
                .default_value(utils::DEFAULT_CACERT_DIR)
                .help("directory holding the CA certificates of the REST endpoints"),
        )
        .arg(
            Arg::new("rest-timeout")
                .short('t')
                .long("rest-timeout")
                .env("REST_TIMEOUT")
                .default_value(utils::DEFAULT_REST_TIMEOUT),
        )
        .arg(
            Arg::new("job-timeout")
                .long("job-timeout")
                .env("JOB_TIMEOUT")
                .default_value(utils::DEFAULT_JOB_TIMEOUT)
                .help("how long to wait for an asynchronous REST job"),
        )
        .arg(
            Arg::new("skip-mount-unmount")
                .long("skip-mount-unmount")
                .env("SKIP_MOUNT_UNMOUNT")
                .action(clap::ArgAction::SetTrue)
                .help("never mount filesystems on the nodes when publishing"),
        )
        .arg(
            Arg::new("node-mapping-prefix")
                .long("node-mapping-prefix")
                .env("SCALE_NODE_MAPPING_PREFIX")
                .default_value(utils::DEFAULT_NODE_MAPPING_PREFIX)
                .help("prefix of the mapping entries of node names starting with a digit"),
        )
        .arg(
            Arg::new("cg-prefix")
                .long("cg-prefix")
                .env("CSI_CG_PREFIX")
                .help("prefix of the default consistency group names"),
        )
        .arg(
            Arg::new("volume-name-prefix")
                .long("volume-name-prefix")
                .env("VOLUME_NAME_PREFIX")
                .help("replaces the 'pvc' prefix of the storage object names"),
        )
        .arg(
            Arg::new("symlink-dir-path")
                .long("symlink-dir-path")
                .env("SYMLINK_DIR_PATH")
                .help("overrides the directory holding the volume symlinks"),
        )
        .arg(
            Arg::new("tracing-endpoint")
                .long("tracing-endpoint")
                .short('j')
                .env("TRACING_ENDPOINT")
                .help("enable open telemetry and forward to the OTLP collector"),
        )
        .arg(
            Arg::new("tracing-tags")
                .long("tracing-tags")
                .env("TRACING_TAGS")
                .value_delimiter(',')
                .action(clap::ArgAction::Append)
                .value_parser(utils::tracing_telemetry::parse_key_value)
                .help("add process service tags to the traces"),
        )
        .arg(
            Arg::new("fmt-style")
                .long("fmt-style")
                .default_value("pretty")
                .value_parser(clap::value_parser!(FmtStyle))
                .help("formatting style of the logs"),
        )
        .arg(
            Arg::new("ansi-colours")
                .long("ansi-colours")
                .default_value("true")
                .value_parser(clap::value_parser!(bool))
                .help("enable ansi colours in the logs"),
        )
        .get_matches();

    utils::print_package_info!();

    let mut tags = utils::tracing_telemetry::default_tracing_tags(
        utils::raw_version_str(),
        env!("CARGO_PKG_VERSION"),
    );
    if let Some(extra) = args.get_many::<KeyValue>("tracing-tags") {
        tags.extend(extra.cloned());
    }
    TracingTelemetry::builder()
        .with_style(*args.get_one::<FmtStyle>("fmt-style").unwrap_or(&FmtStyle::Pretty))
        .with_colours(*args.get_one::<bool>("ansi-colours").unwrap_or(&true))
        .with_tracing_endpoint(args.get_one::<String>("tracing-endpoint").cloned())
        .with_tracing_tags(tags)
        .init("csi-controller");

    let driver = initialize_controller(&args).await?;

    info!(
        cluster.id = %driver.controller().primary().cluster_id,
        "Starting Storage Scale CSI Controller"
    );

    let result = server::CsiServer::run(driver).await;
    utils::tracing_telemetry::flush_traces();
    result
}
