use anyhow::Context;
use clap::ArgMatches;
use once_cell::sync::OnceCell;
use scale_csi::{controller::ControllerOptions, driver::DriverOptions, scale::rest::RestOptions};
use std::{path::PathBuf, time::Duration};

static CONFIG: OnceCell<CsiControllerConfig> = OnceCell::new();

// Global CSI Controller config.
pub(crate) struct CsiControllerConfig {
    /// CSI gRPC listen socket.
    csi_socket: String,
    /// I/O timeout for REST API operations.
    io_timeout: Duration,
    /// Driver initialisation options.
    driver: DriverOptions,
}

/// Get a non-empty optional argument.
fn optional(args: &ArgMatches, name: &str) -> Option<String> {
    args.get_one::<String>(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn duration(args: &ArgMatches, name: &str) -> anyhow::Result<Duration> {
    let value = args
        .get_one::<String>(name)
        .with_context(|| format!("{name} must be specified"))?
        .parse::<humantime::Duration>()
        .with_context(|| format!("invalid {name}"))?;
    Ok(value.into())
}

impl CsiControllerConfig {
    /// Initialize global instance of the CSI config. Must be called prior to using the config.
    pub(crate) fn initialize(args: &ArgMatches) -> anyhow::Result<()> {
        assert!(
            CONFIG.get().is_none(),
            "CSI Controller config already initialized"
        );

        let csi_socket = args
            .get_one::<String>("socket")
            .context("CSI socket must be specified")?
            .clone();
        let path = |name: &str| -> anyhow::Result<PathBuf> {
            args.get_one::<String>(name)
                .map(PathBuf::from)
                .with_context(|| format!("{name} must be specified"))
        };

        let io_timeout = duration(args, "rest-timeout")?;
        let rest = RestOptions {
            request_timeout: io_timeout,
            job_timeout: duration(args, "job-timeout")?,
            ..Default::default()
        };
        let driver = DriverOptions {
            config_file: path("config-file")?,
            secrets_dir: path("secrets-dir")?,
            cacert_dir: path("cacert-dir")?,
            rest,
            symlink_dir_path: optional(args, "symlink-dir-path"),
            node_mapping_prefix: optional(args, "node-mapping-prefix")
                .unwrap_or_else(|| utils::DEFAULT_NODE_MAPPING_PREFIX.to_string()),
            controller: ControllerOptions {
                skip_mount_unmount: args.get_flag("skip-mount-unmount"),
                cg_prefix: optional(args, "cg-prefix"),
                volume_name_prefix: optional(args, "volume-name-prefix"),
            },
        };

        CONFIG.get_or_init(|| Self {
            csi_socket,
            io_timeout,
            driver,
        });
        Ok(())
    }

    /// Get global instance of CSI controller config.
    pub(crate) fn get_config() -> &'static CsiControllerConfig {
        CONFIG
            .get()
            .expect("CSI Controller config is not initialized")
    }

    /// Get the CSI socket path.
    pub(crate) fn csi_socket(&self) -> &str {
        &self.csi_socket
    }

    /// Get the gRPC request timeout, long enough for a REST request followed by a job.
    pub(crate) fn request_timeout(&self) -> Duration {
        self.io_timeout + self.driver.rest.job_timeout + Duration::from_secs(3)
    }

    /// Get the driver initialisation options.
    pub(crate) fn driver_options(&self) -> DriverOptions {
        self.driver.clone()
    }
}
