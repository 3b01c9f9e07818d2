//! The cluster connection settings mounted into the driver pods.
use crate::scale::rest::{RestConnector, RestCredentials, TlsOptions};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

/// Default name of the fileset holding the volume symlinks.
pub const DEFAULT_PRIMARY_FILESET: &str = "spectrum-scale-csi-volume-store";
const DEFAULT_GUI_PORT: u16 = 443;
const USERNAME_FILE: &str = "username";
const PASSWORD_FILE: &str = "password";

/// Cluster configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ConfigError {
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse '{}': {}", path.display(), source))]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("No cluster is configured"))]
    NoClusters {},
    #[snafu(display("Exactly one cluster must have a primary section, found {}", count))]
    PrimaryCount { count: usize },
    #[snafu(display("Cluster '{}' is configured more than once", id))]
    DuplicateCluster { id: String },
    #[snafu(display("Cluster '{}' is missing '{}'", id, field))]
    MissingField { id: String, field: &'static str },
    #[snafu(display("Cluster '{}' has an invalid REST endpoint '{}': {}", id, host, source))]
    InvalidEndpoint {
        id: String,
        host: String,
        source: url::ParseError,
    },
    #[snafu(display("Credential file '{}' is empty", path.display()))]
    EmptyCredential { path: PathBuf },
}

impl From<ConfigError> for tonic::Status {
    fn from(error: ConfigError) -> Self {
        tonic::Status::failed_precondition(error.to_string())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSettings {
    pub clusters: Vec<ClusterConfig>,
}

/// Connection settings of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<PrimaryConfig>,
    #[serde(default)]
    pub secure_ssl_mode: bool,
    /// CA certificate file name, under the CA certificate directory.
    #[serde(default)]
    pub cacert: String,
    /// Directory name, under the secrets directory, holding the REST credentials.
    #[serde(default)]
    pub secrets: String,
    #[serde(default)]
    pub rest_api: Vec<RestApiConfig>,
}

/// The primary cluster hosts the symlinks of every volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryConfig {
    pub primary_fs: String,
    #[serde(default)]
    pub primary_fset: String,
    #[serde(default)]
    pub inode_limit: String,
    /// Id of the cluster owning the primary filesystem, when it is remotely mounted.
    #[serde(default)]
    pub remote_cluster: String,
}

impl PrimaryConfig {
    /// The primary fileset name.
    pub fn fileset(&self) -> &str {
        match self.primary_fset.is_empty() {
            true => DEFAULT_PRIMARY_FILESET,
            false => &self.primary_fset,
        }
    }
    /// The owning cluster, when the primary filesystem is remotely mounted.
    pub fn remote_cluster(&self) -> Option<&str> {
        Some(self.remote_cluster.as_str()).filter(|id| !id.is_empty())
    }
}

/// A GUI server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestApiConfig {
    pub gui_host: String,
    #[serde(default = "default_gui_port")]
    pub gui_port: u16,
}

fn default_gui_port() -> u16 {
    DEFAULT_GUI_PORT
}

impl ScaleSettings {
    /// Load and validate the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read(path).context(ReadFile { path })?;
        let settings: Self = serde_json::from_slice(&contents).context(ParseFile { path })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the clusters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters.is_empty() {
            return NoClusters {}.fail();
        }
        let primaries = self.clusters.iter().filter(|c| c.primary.is_some()).count();
        if primaries != 1 {
            return PrimaryCount { count: primaries }.fail();
        }
        let mut ids = HashSet::new();
        for cluster in &self.clusters {
            let id = cluster.id.as_str();
            if id.is_empty() {
                return MissingField { id, field: "id" }.fail();
            }
            if !ids.insert(id) {
                return DuplicateCluster { id }.fail();
            }
            if cluster.secrets.is_empty() {
                return MissingField { id, field: "secrets" }.fail();
            }
            if cluster.rest_api.is_empty() {
                return MissingField { id, field: "restApi" }.fail();
            }
            if cluster.secure_ssl_mode && cluster.cacert.is_empty() {
                return MissingField { id, field: "cacert" }.fail();
            }
            if let Some(primary) = &cluster.primary {
                if primary.primary_fs.is_empty() {
                    return MissingField {
                        id,
                        field: "primary.primaryFs",
                    }
                    .fail();
                }
            }
            cluster.endpoints()?;
        }
        Ok(())
    }

    /// The primary cluster and its primary settings.
    pub fn primary(&self) -> Option<(&ClusterConfig, &PrimaryConfig)> {
        self.clusters
            .iter()
            .find_map(|cluster| cluster.primary.as_ref().map(|primary| (cluster, primary)))
    }
}

impl ClusterConfig {
    /// The base urls of the GUI servers.
    pub fn endpoints(&self) -> Result<Vec<url::Url>, ConfigError> {
        self.rest_api
            .iter()
            .map(|api| {
                RestConnector::endpoint_url(&api.gui_host, api.gui_port).context(InvalidEndpoint {
                    id: &self.id,
                    host: &api.gui_host,
                })
            })
            .collect()
    }

    /// Read the REST credentials from `<secrets_dir>/<secrets>/{username,password}`.
    pub fn credentials(
        &self,
        secrets_dir: impl AsRef<Path>,
    ) -> Result<RestCredentials, ConfigError> {
        let dir = secrets_dir.as_ref().join(&self.secrets);
        Ok(RestCredentials {
            username: read_credential(&dir.join(USERNAME_FILE))?,
            password: read_credential(&dir.join(PASSWORD_FILE))?,
        })
    }

    /// The certificate verification settings, reading `<cacert_dir>/<cacert>` when secure.
    pub fn tls(&self, cacert_dir: impl AsRef<Path>) -> Result<TlsOptions, ConfigError> {
        let ca_pem = match self.secure_ssl_mode && !self.cacert.is_empty() {
            true => {
                let path = cacert_dir.as_ref().join(&self.cacert);
                Some(std::fs::read(&path).context(ReadFile { path })?)
            }
            false => None,
        };
        Ok(TlsOptions {
            secure: self.secure_ssl_mode,
            ca_pem,
        })
    }
}

fn read_credential(path: &Path) -> Result<String, ConfigError> {
    let value = std::fs::read_to_string(path).context(ReadFile { path })?;
    let value = value.trim();
    if value.is_empty() {
        return EmptyCredential { path }.fail();
    }
    Ok(value.to_string())
}
