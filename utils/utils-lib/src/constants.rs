/// Various common constants used by the csi driver.

/// The product domain name.
pub const PRODUCT_DOMAIN_NAME: &str = "csi.ibm.com";

/// The product name.
pub const PRODUCT_NAME: &str = "spectrumscale";

/// The CSI plugin's name.
pub fn csi_plugin_name() -> String {
    format!("{PRODUCT_NAME}.{PRODUCT_DOMAIN_NAME}")
}

/// Default unix socket the CSI services listen on.
pub const DEFAULT_CSI_SOCKET: &str = "/var/tmp/csi.sock";

/// Default cluster configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/var/lib/ibm/config/spectrum-scale-config.json";
/// Default directory holding one sub-directory of REST credentials per cluster.
pub const DEFAULT_SECRETS_DIR: &str = "/var/lib/ibm";
/// Default directory holding the CA certificates of the REST endpoints.
pub const DEFAULT_CACERT_DIR: &str = "/var/lib/ibm/ssl/public";

/// Default timeout for a single REST request.
pub const DEFAULT_REST_TIMEOUT: &str = "60s";
/// Default timeout for an asynchronous REST job to complete.
pub const DEFAULT_JOB_TIMEOUT: &str = "10m";

/// Initial wait between two polls of an asynchronous REST job.
pub const JOB_POLL_INITIAL: std::time::Duration = std::time::Duration::from_secs(2);
/// Maximum wait between two polls of an asynchronous REST job.
pub const JOB_POLL_MAX: std::time::Duration = std::time::Duration::from_secs(16);

/// Prefix of the REST management API.
pub const SCALE_REST_PREFIX: &str = "scalemgmt/v2";

/// Default prefix used when a Kubernetes node name starts with a digit.
pub const DEFAULT_NODE_MAPPING_PREFIX: &str = "K8sNodePrefix_";

/// Name of the directory, under the primary fileset, holding the volume symlinks.
pub const SYMLINK_DIR_NAME: &str = ".volumes";

/// Key of the primary cluster in the connector map.
pub const PRIMARY_CONNECTOR_KEY: &str = "primary";

/// Smallest size of a fileset based volume.
pub const MIN_FILESET_VOLUME_SIZE: u64 = 1024 * 1024 * 1024;

/// Default inode limit of a new independent fileset.
pub const DEFAULT_INODE_LIMIT: u64 = 100_000;

/// Smallest accepted inode limit.
pub const MIN_INODE_LIMIT: u64 = 1024;

/// Suffix of the data directory created inside a fileset volume.
pub const FILESET_DATA_DIR_SUFFIX: &str = "-data";
