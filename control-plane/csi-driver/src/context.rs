//! Storage class parameters and the volume specification parsed from them.
use crate::volume_id::{StorageClassType, VolumeType};
use snafu::{ResultExt, Snafu};
use std::{collections::HashMap, str::FromStr};
use strum_macros::{AsRefStr, Display, EnumString};
use utils::bytes::{convert_to_bytes, ParseSizeError};

/// Compression algorithms accepted by the filesystem.
const COMPRESSION_ALGORITHMS: [&str; 5] = ["z", "lz4", "zfast", "alphae", "alphah"];
/// Algorithm used when compression is simply enabled.
const DEFAULT_COMPRESSION: &str = "z";
/// Permissions given to shared volumes.
const SHARED_PERMISSIONS: &str = "777";

/// Errors found while parsing the volume parameters.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ParseError {
    #[snafu(display("Missing parameter '{}'", name))]
    MissingParameter { name: Parameters },
    #[snafu(display("Invalid value '{}' for parameter '{}': {}", value, name, reason))]
    InvalidValue {
        name: Parameters,
        value: String,
        reason: String,
    },
    #[snafu(display("Invalid size '{}' for parameter '{}': {}", value, name, source))]
    InvalidSize {
        name: Parameters,
        value: String,
        source: ParseSizeError,
    },
    #[snafu(display("Parameters '{}' and '{}' are mutually exclusive", first, second))]
    Conflict {
        first: Parameters,
        second: Parameters,
    },
    #[snafu(display("Parameter '{}' is not allowed {}", name, reason))]
    NotAllowed {
        name: Parameters,
        reason: &'static str,
    },
    #[snafu(display("Cannot derive the consistency group: {}", reason))]
    ConsistencyGroup { reason: &'static str },
}

impl From<ParseError> for tonic::Status {
    fn from(error: ParseError) -> Self {
        tonic::Status::invalid_argument(error.to_string())
    }
}

/// The various storage class parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, Display)]
#[strum(serialize_all = "camelCase")]
pub enum Parameters {
    /// The filesystem hosting the volume.
    VolBackendFs,
    /// Base directory of lightweight volumes.
    VolDirBasePath,
    FilesetType,
    ParentFileset,
    InodeLimit,
    /// The cluster owning the filesystem.
    ClusterId,
    Uid,
    Gid,
    Permissions,
    Shared,
    Compression,
    Tier,
    NodeClass,
    /// Storage class flavour, `1` classic and `2` advanced.
    Version,
    /// Marks a pre-provisioned volume.
    ExistingVolume,
    ConsistencyGroup,
    VolumeType,
    CacheMode,
    Bucket,
    Endpoint,
    #[strum(serialize = "csi.storage.k8s.io/pvc/name")]
    PvcName,
    #[strum(serialize = "csi.storage.k8s.io/pvc/namespace")]
    PvcNamespace,
}

impl Parameters {
    fn get(self, args: &HashMap<String, String>) -> Option<&str> {
        args.get(self.as_ref())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn invalid(self, value: &str, reason: impl Into<String>) -> ParseError {
        ParseError::InvalidValue {
            name: self,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn parse_bool(self, value: Option<&str>) -> Result<Option<bool>, ParseError> {
        Ok(match value {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => return Err(self.invalid(value, "expected true or false")),
            },
            None => None,
        })
    }

    fn parse_id(self, value: Option<&str>) -> Result<Option<u32>, ParseError> {
        Ok(match value {
            Some(value) => value
                .parse::<u32>()
                .map(Some)
                .map_err(|error| self.invalid(value, error.to_string()))?,
            None => None,
        })
    }
}

/// The kind of fileset backing a fileset volume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FilesetType {
    #[default]
    Independent,
    Dependent,
}

/// AFM mode of a cache volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CacheMode {
    ReadOnly,
    Parallel,
    Exclusive,
    Detached,
}

impl CacheMode {
    /// The AFM mode understood by the filesystem.
    pub fn afm_mode(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::Parallel => "iw",
            Self::Exclusive => "sw",
            Self::Detached => "lu",
        }
    }
}

/// Settings of an AFM cache volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    pub mode: CacheMode,
    /// `<endpoint>/<bucket>`.
    pub afm_target: String,
}

/// A validated volume specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// The filesystem hosting the volume, as named on the local cluster.
    pub backend_fs: String,
    /// Base directory of a lightweight volume, relative to the filesystem mount.
    pub dir_base_path: Option<String>,
    /// Whether the volume is a fileset rather than a directory.
    pub fileset_based: bool,
    pub fileset_type: FilesetType,
    pub parent_fileset: Option<String>,
    pub inode_limit: Option<u64>,
    pub cluster_id: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<String>,
    pub compression: Option<String>,
    pub tier: Option<String>,
    pub node_class: Option<String>,
    pub storage_class: StorageClassType,
    /// The volume is pre-provisioned and only needs linking.
    pub existing_volume: bool,
    pub consistency_group: Option<String>,
    pub cache: Option<CacheSpec>,
    pub pvc_name: Option<String>,
    pub pvc_namespace: Option<String>,
}

impl VolumeSpec {
    /// Parse the storage class parameters. The consistency group of advanced volumes defaults to
    /// `<cg_prefix>-<pvc namespace>`.
    pub fn parse(
        args: &HashMap<String, String>,
        cg_prefix: Option<&str>,
    ) -> Result<Self, ParseError> {
        let backend_fs = Parameters::VolBackendFs
            .get(args)
            .ok_or(ParseError::MissingParameter {
                name: Parameters::VolBackendFs,
            })?
            .to_string();

        let storage_class = match Parameters::Version.get(args) {
            None | Some("1") => StorageClassType::Classic,
            Some("2") => StorageClassType::Advanced,
            Some(other) => return Err(Parameters::Version.invalid(other, "expected 1 or 2")),
        };
        let advanced = storage_class == StorageClassType::Advanced;

        let cache = Self::parse_cache(args)?;
        let explicit_fileset_type = match Parameters::FilesetType.get(args) {
            Some(value) => Some(FilesetType::from_str(value).map_err(|_| {
                Parameters::FilesetType.invalid(value, "expected independent or dependent")
            })?),
            None => None,
        };
        let fileset_type = match cache {
            Some(_) => FilesetType::Independent,
            None => explicit_fileset_type.unwrap_or_default(),
        };

        let existing_volume = match Parameters::ExistingVolume.get(args) {
            Some(value) => match value.to_lowercase().as_str() {
                "yes" => true,
                "no" => false,
                _ => return Err(Parameters::ExistingVolume.invalid(value, "expected yes or no")),
            },
            None => false,
        };
        if existing_volume {
            for name in [
                Parameters::Uid,
                Parameters::Gid,
                Parameters::InodeLimit,
                Parameters::Shared,
                Parameters::NodeClass,
                Parameters::Permissions,
                Parameters::VolDirBasePath,
                Parameters::Compression,
                Parameters::Tier,
            ] {
                if name.get(args).is_some() {
                    return NotAllowed {
                        name,
                        reason: "for existing volumes",
                    }
                    .fail();
                }
            }
        }

        let dir_base_path = Parameters::VolDirBasePath
            .get(args)
            .map(|path| path.trim_matches('/').to_string());
        let fileset_based = dir_base_path.is_none()
            || explicit_fileset_type.is_some()
            || advanced
            || cache.is_some();

        let inode_limit = match Parameters::InodeLimit.get(args) {
            Some(value) => {
                if !fileset_based {
                    return NotAllowed {
                        name: Parameters::InodeLimit,
                        reason: "for lightweight volumes",
                    }
                    .fail();
                }
                if dir_base_path.is_some() && !advanced {
                    return Conflict {
                        first: Parameters::InodeLimit,
                        second: Parameters::VolDirBasePath,
                    }
                    .fail();
                }
                if explicit_fileset_type == Some(FilesetType::Dependent) {
                    return NotAllowed {
                        name: Parameters::InodeLimit,
                        reason: "for dependent filesets",
                    }
                    .fail();
                }
                let limit = convert_to_bytes(value).context(InvalidSize {
                    name: Parameters::InodeLimit,
                    value,
                })?;
                if limit < utils::MIN_INODE_LIMIT {
                    return Err(Parameters::InodeLimit.invalid(
                        value,
                        format!("must be at least {}", utils::MIN_INODE_LIMIT),
                    ));
                }
                Some(limit)
            }
            None => None,
        };

        let parent_fileset = match Parameters::ParentFileset.get(args) {
            Some(parent) => {
                if advanced {
                    return NotAllowed {
                        name: Parameters::ParentFileset,
                        reason: "for advanced storage classes",
                    }
                    .fail();
                }
                if fileset_type == FilesetType::Independent {
                    return Conflict {
                        first: Parameters::ParentFileset,
                        second: Parameters::FilesetType,
                    }
                    .fail();
                }
                Some(parent.to_string())
            }
            None => None,
        };

        let compression = match Parameters::Compression.get(args) {
            Some(value) => {
                if !fileset_based {
                    return NotAllowed {
                        name: Parameters::Compression,
                        reason: "for lightweight volumes",
                    }
                    .fail();
                }
                let value = value.to_lowercase();
                match value.as_str() {
                    "true" => Some(DEFAULT_COMPRESSION.to_string()),
                    "false" => None,
                    algorithm if COMPRESSION_ALGORITHMS.contains(&algorithm) => Some(value),
                    _ => {
                        return Err(Parameters::Compression.invalid(
                            &value,
                            format!("expected true, false or one of {COMPRESSION_ALGORITHMS:?}"),
                        ))
                    }
                }
            }
            None => None,
        };
        let tier = match Parameters::Tier.get(args) {
            Some(_) if !fileset_based => {
                return NotAllowed {
                    name: Parameters::Tier,
                    reason: "for lightweight volumes",
                }
                .fail()
            }
            tier => tier.map(ToString::to_string),
        };

        let shared = Parameters::Shared
            .parse_bool(Parameters::Shared.get(args))?
            .unwrap_or_default();
        let permissions = match Parameters::Permissions.get(args) {
            Some(_) if shared => {
                return Conflict {
                    first: Parameters::Shared,
                    second: Parameters::Permissions,
                }
                .fail()
            }
            Some(value) => {
                let octal = value.len() == 3 && value.chars().all(|c| ('0' ..= '7').contains(&c));
                if !octal {
                    return Err(Parameters::Permissions.invalid(value, "expected 3 octal digits"));
                }
                Some(value.to_string())
            }
            None if shared => Some(SHARED_PERMISSIONS.to_string()),
            None => None,
        };

        let uid = Parameters::Uid.parse_id(Parameters::Uid.get(args))?;
        let gid = Parameters::Gid.parse_id(Parameters::Gid.get(args))?;

        let pvc_name = Parameters::PvcName.get(args).map(ToString::to_string);
        let pvc_namespace = Parameters::PvcNamespace.get(args).map(ToString::to_string);
        let consistency_group = match (advanced, Parameters::ConsistencyGroup.get(args)) {
            (false, _) => None,
            (true, Some(group)) => Some(group.to_string()),
            (true, None) => {
                let prefix = cg_prefix
                    .filter(|prefix| !prefix.is_empty())
                    .ok_or(ParseError::ConsistencyGroup {
                        reason: "no consistency group prefix is configured",
                    })?;
                let namespace = pvc_namespace.as_deref().ok_or(ParseError::ConsistencyGroup {
                    reason: "the pvc namespace is unknown",
                })?;
                Some(format!("{prefix}-{namespace}"))
            }
        };

        Ok(Self {
            backend_fs,
            dir_base_path: dir_base_path.filter(|_| !fileset_based),
            fileset_based,
            fileset_type,
            parent_fileset,
            inode_limit,
            cluster_id: Parameters::ClusterId.get(args).map(ToString::to_string),
            uid,
            gid,
            permissions,
            compression,
            tier,
            node_class: Parameters::NodeClass.get(args).map(ToString::to_string),
            storage_class,
            existing_volume,
            consistency_group,
            cache,
            pvc_name,
            pvc_namespace,
        })
    }

    fn parse_cache(args: &HashMap<String, String>) -> Result<Option<CacheSpec>, ParseError> {
        match Parameters::VolumeType.get(args) {
            None => Ok(None),
            Some(value) if value.eq_ignore_ascii_case("cache") => {
                for name in [
                    Parameters::Version,
                    Parameters::FilesetType,
                    Parameters::ParentFileset,
                ] {
                    if name.get(args).is_some() {
                        return Conflict {
                            first: Parameters::VolumeType,
                            second: name,
                        }
                        .fail();
                    }
                }
                let mode = Parameters::CacheMode.get(args).ok_or(ParseError::MissingParameter {
                    name: Parameters::CacheMode,
                })?;
                let mode = CacheMode::from_str(mode).map_err(|_| {
                    Parameters::CacheMode
                        .invalid(mode, "expected readonly, parallel, exclusive or detached")
                })?;
                let bucket = Parameters::Bucket.get(args).ok_or(ParseError::MissingParameter {
                    name: Parameters::Bucket,
                })?;
                let endpoint = Parameters::Endpoint.get(args).ok_or(ParseError::MissingParameter {
                    name: Parameters::Endpoint,
                })?;
                Ok(Some(CacheSpec {
                    mode,
                    afm_target: format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
                }))
            }
            Some(value) => Err(Parameters::VolumeType.invalid(value, "expected cache")),
        }
    }

    /// The type of volume to provision.
    pub fn volume_type(&self) -> VolumeType {
        if !self.fileset_based {
            VolumeType::Lightweight
        } else if self.cache.is_some() {
            VolumeType::CacheFileset
        } else if self.storage_class == StorageClassType::Advanced {
            VolumeType::DependentFileset
        } else {
            match self.fileset_type {
                FilesetType::Independent => VolumeType::IndependentFileset,
                FilesetType::Dependent => VolumeType::DependentFileset,
            }
        }
    }
}
