//! Driver bootstrap: cluster configuration, connectors and the primary fileset.
use crate::{
    cluster_config::{ConfigError, PrimaryConfig, ScaleSettings},
    controller::{ControllerOptions, PrimaryInfo, ScaleController},
    csi::PluginCapability,
    node_mapping::NodeMapping,
    plugin_capabilities::plugin_capabilities,
    scale::{
        rest::{RestConnector, RestOptions},
        ConnectorError, ConnectorMap, CreateFilesetRequest, DirectoryOwner, InodeSpace,
        ScaleConnector,
    },
};
use snafu::{ResultExt, Snafu};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use utils::bytes::{convert_to_bytes, ParseSizeError};

/// Driver initialisation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum DriverError {
    #[snafu(display("Invalid cluster configuration: {}", source))]
    Configuration { source: ConfigError },
    #[snafu(display("Cluster {}: {}", cluster_id, source))]
    Cluster {
        cluster_id: String,
        source: ConnectorError,
    },
    #[snafu(display("No connector is configured for cluster {}", cluster_id))]
    MissingConnector { cluster_id: String },
    #[snafu(display(
        "The primary cluster reports id {} but is configured as {}",
        actual,
        configured
    ))]
    ClusterMismatch { configured: String, actual: String },
    #[snafu(display("Invalid primary inode limit '{}': {}", value, source))]
    PrimaryInodeLimit {
        value: String,
        source: ParseSizeError,
    },
    #[snafu(display(
        "Symlink directory {} is not inside the primary filesystem mounted at {}",
        path,
        mount_point
    ))]
    SymlinkDirOutsidePrimary { path: String, mount_point: String },
}

/// Where to find the cluster configuration and how to use it.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub config_file: PathBuf,
    pub secrets_dir: PathBuf,
    pub cacert_dir: PathBuf,
    pub rest: RestOptions,
    /// Overrides the directory holding the volume symlinks.
    pub symlink_dir_path: Option<String>,
    pub node_mapping_prefix: String,
    pub controller: ControllerOptions,
}

/// The initialised driver.
#[derive(Debug)]
pub struct ScaleDriver {
    controller: Arc<ScaleController>,
    capabilities: Vec<PluginCapability>,
}

impl ScaleDriver {
    /// Load the configuration, connect to every cluster and prepare the primary fileset.
    pub async fn initialize(options: DriverOptions) -> Result<Self, DriverError> {
        let settings = ScaleSettings::load(&options.config_file).context(Configuration)?;
        let (primary_cluster, primary_config) = settings
            .primary()
            .ok_or(ConfigError::PrimaryCount { count: 0 })
            .context(Configuration)?;

        let mut connectors = ConnectorMap::new();
        for cluster in &settings.clusters {
            let connector = RestConnector::new(
                cluster.endpoints().context(Configuration)?,
                cluster
                    .credentials(&options.secrets_dir)
                    .context(Configuration)?,
                cluster.tls(&options.cacert_dir).context(Configuration)?,
                options.rest.clone(),
            )
            .context(Cluster {
                cluster_id: &cluster.id,
            })?;
            let connector: Arc<dyn ScaleConnector> = Arc::new(connector);
            match cluster.primary.is_some() {
                true => connectors.insert_primary(&cluster.id, connector),
                false => connectors.insert(&cluster.id, connector),
            }
            debug!(cluster.id = %cluster.id, "Connector created");
        }

        let node_mapping = NodeMapping::from_env(&options.node_mapping_prefix);
        Self::bootstrap(
            connectors,
            &primary_cluster.id,
            primary_config,
            options.symlink_dir_path.as_deref(),
            node_mapping,
            options.controller,
        )
        .await
    }

    /// Check the primary cluster and prepare the primary fileset and symlink directory.
    pub async fn bootstrap(
        connectors: ConnectorMap,
        primary_cluster_id: &str,
        primary_config: &PrimaryConfig,
        symlink_dir_path: Option<&str>,
        node_mapping: NodeMapping,
        options: ControllerOptions,
    ) -> Result<Self, DriverError> {
        let primary = connectors.primary().ok_or_else(|| DriverError::MissingConnector {
            cluster_id: primary_cluster_id.to_string(),
        })?;

        let actual = primary
            .get_cluster_id()
            .await
            .context(Cluster { cluster_id: primary_cluster_id })?;
        if actual != primary_cluster_id {
            return ClusterMismatch {
                configured: primary_cluster_id,
                actual,
            }
            .fail();
        }

        let primary_fs = &primary_config.primary_fs;
        let local = primary
            .get_filesystem_mount_details(primary_fs)
            .await
            .context(Cluster { cluster_id: primary_cluster_id })?;

        // a remotely mounted primary filesystem has its fileset on the owning cluster
        let owning_cluster_id = primary_config.remote_cluster().unwrap_or(primary_cluster_id);
        let owner = match primary_config.remote_cluster() {
            Some(id) => connectors.get(id).ok_or_else(|| DriverError::MissingConnector {
                cluster_id: id.to_string(),
            })?,
            None => primary.clone(),
        };
        let owning_fs = local.owning_fs_name();
        let owning = owner
            .get_filesystem_mount_details(owning_fs)
            .await
            .context(Cluster { cluster_id: owning_cluster_id })?;

        let fileset = primary_config.fileset();
        let inode_limit = match primary_config.inode_limit.trim() {
            "" => utils::DEFAULT_INODE_LIMIT,
            value => convert_to_bytes(value).context(PrimaryInodeLimit { value })?,
        };
        let junction = match owner.list_fileset(owning_fs, fileset).await {
            Ok(info) => info.path,
            Err(error) if error.is_not_found() => {
                let mut request = CreateFilesetRequest::new(fileset, InodeSpace::New);
                request.max_num_inodes = Some(inode_limit);
                request.comment =
                    Some("Fileset created by IBM Container Storage Interface driver".into());
                match owner.create_fileset(owning_fs, &request).await {
                    Err(error) if !error.is_already_exists() => {
                        return Err(error).context(Cluster { cluster_id: owning_cluster_id })
                    }
                    _ => info!(fileset, fs = owning_fs, "Primary fileset created"),
                }
                None
            }
            Err(error) => return Err(error).context(Cluster { cluster_id: owning_cluster_id }),
        };
        let junction = match junction {
            Some(junction) => junction,
            None => {
                let junction = format!("{}/{fileset}", owning.mount_point.trim_end_matches('/'));
                owner
                    .link_fileset(owning_fs, fileset, &junction)
                    .await
                    .context(Cluster { cluster_id: owning_cluster_id })?;
                info!(fileset, %junction, "Primary fileset linked");
                junction
            }
        };
        // the junction as seen through the local mount point
        let relative_junction = junction
            .strip_prefix(owning.mount_point.trim_end_matches('/'))
            .unwrap_or(&junction)
            .trim_matches('/');
        let mount_point = local.mount_point.trim_end_matches('/').to_string();

        let symlink_dir = match symlink_dir_path {
            Some(path) => {
                let path = path.trim_end_matches('/');
                if !path.starts_with(&format!("{mount_point}/")) {
                    return SymlinkDirOutsidePrimary {
                        path,
                        mount_point: &mount_point,
                    }
                    .fail();
                }
                path.to_string()
            }
            None => format!(
                "{mount_point}/{relative_junction}/{}",
                utils::SYMLINK_DIR_NAME
            ),
        };
        let primary_info = PrimaryInfo {
            cluster_id: primary_cluster_id.to_string(),
            fs: primary_fs.clone(),
            mount_point,
            fileset: fileset.to_string(),
            symlink_dir,
        };

        let symlink_dir_relative = primary_info.symlink_dir_relative().to_string();
        let exists = primary
            .path_exists(primary_fs, &symlink_dir_relative)
            .await
            .context(Cluster { cluster_id: primary_cluster_id })?;
        if !exists {
            match primary
                .make_directory(primary_fs, &symlink_dir_relative, &DirectoryOwner::default())
                .await
            {
                Err(error) if !error.is_already_exists() => {
                    return Err(error).context(Cluster { cluster_id: primary_cluster_id })
                }
                _ => info!(path = %primary_info.symlink_dir, "Symlink directory created"),
            }
        }
        info!(
            cluster.id = %primary_cluster_id,
            fs = %primary_fs,
            symlink_dir = %primary_info.symlink_dir,
            "Primary cluster ready"
        );

        let controller = ScaleController::new(connectors, primary_info, node_mapping, options);
        Ok(Self {
            controller: Arc::new(controller),
            capabilities: plugin_capabilities(),
        })
    }

    /// The controller core.
    pub fn controller(&self) -> Arc<ScaleController> {
        self.controller.clone()
    }

    /// The plugin capabilities advertised by the identity service.
    pub fn capabilities(&self) -> &[PluginCapability] {
        &self.capabilities
    }
}
