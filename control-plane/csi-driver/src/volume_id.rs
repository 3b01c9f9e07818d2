//! The volume id handed out to the container orchestrator.
//!
//! The id is a `;` separated string whose number of fields identifies its format:
//!
//! | fields | format |
//! |---|---|
//! | 3 | `<cluster>;<fs uuid>;path=<path>` |
//! | 4 | `<cluster>;<fs uuid>;fileset=<id>;path=<path>`, or `filesetName=<name>` for the id |
//! | 7 | `<sc type>;<volume type>;<cluster>;<fs uuid>;<consistency group>;<fileset>;<path>` |
//!
//! Only the 7 field format is produced for new volumes, the others are still accepted for
//! volumes created by older releases.
use snafu::Snafu;
use std::{fmt, path::Path, str::FromStr};

const SEPARATOR: char = ';';
const PATH_TAG: &str = "path";
const FILESET_ID_TAG: &str = "fileset";
const FILESET_NAME_TAG: &str = "filesetName";

/// Volume id decoding errors.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum VolumeIdError {
    #[snafu(display("Volume id '{}' has {} fields, expected 3, 4 or 7", id, count))]
    FieldCount { id: String, count: usize },
    #[snafu(display("Volume id '{}' has a malformed segment '{}'", id, segment))]
    MalformedSegment { id: String, segment: String },
    #[snafu(display("Volume id '{}' has an unexpected key '{}'", id, key))]
    UnexpectedKey { id: String, key: String },
    #[snafu(display("Volume id '{}' has an invalid storage class type '{}'", id, value))]
    InvalidStorageClass { id: String, value: String },
    #[snafu(display("Volume id '{}' has an invalid volume type '{}'", id, value))]
    InvalidVolumeType { id: String, value: String },
    #[snafu(display("Volume id '{}' has an empty {}", id, field))]
    EmptyField { id: String, field: &'static str },
}

impl From<VolumeIdError> for tonic::Status {
    fn from(error: VolumeIdError) -> Self {
        tonic::Status::internal(error.to_string())
    }
}

/// The flavour of storage class which created the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClassType {
    Classic,
    Advanced,
}

impl StorageClassType {
    fn code(self) -> u8 {
        match self {
            Self::Classic => 0,
            Self::Advanced => 1,
        }
    }
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Classic),
            "1" => Some(Self::Advanced),
            _ => None,
        }
    }
}

/// How the volume is backed on the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    /// A plain directory.
    Lightweight,
    /// A dependent fileset.
    DependentFileset,
    /// An independent fileset with its own inode space.
    IndependentFileset,
    /// An AFM cache fileset.
    CacheFileset,
}

impl VolumeType {
    fn code(self) -> u8 {
        match self {
            Self::Lightweight => 0,
            Self::DependentFileset => 1,
            Self::IndependentFileset => 2,
            Self::CacheFileset => 3,
        }
    }
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Lightweight),
            "1" => Some(Self::DependentFileset),
            "2" => Some(Self::IndependentFileset),
            "3" => Some(Self::CacheFileset),
            _ => None,
        }
    }
    /// Whether the volume owns an inode space.
    pub fn is_independent(self) -> bool {
        matches!(self, Self::IndependentFileset | Self::CacheFileset)
    }
}

/// Reference to the fileset of a legacy fileset volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesetRef {
    /// The numeric fileset id.
    Id(String),
    /// The fileset name.
    Name(String),
}

/// A decoded volume id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeId {
    LegacyLightweight {
        cluster_id: String,
        fs_uuid: String,
        path: String,
    },
    LegacyFileset {
        cluster_id: String,
        fs_uuid: String,
        fileset: FilesetRef,
        path: String,
    },
    Current {
        storage_class: StorageClassType,
        volume_type: VolumeType,
        cluster_id: String,
        fs_uuid: String,
        consistency_group: String,
        fileset_name: String,
        path: String,
    },
}

impl VolumeId {
    /// The id of the cluster owning the volume.
    pub fn cluster_id(&self) -> &str {
        match self {
            Self::LegacyLightweight { cluster_id, .. }
            | Self::LegacyFileset { cluster_id, .. }
            | Self::Current { cluster_id, .. } => cluster_id,
        }
    }
    /// The uuid of the local filesystem hosting the volume.
    pub fn fs_uuid(&self) -> &str {
        match self {
            Self::LegacyLightweight { fs_uuid, .. }
            | Self::LegacyFileset { fs_uuid, .. }
            | Self::Current { fs_uuid, .. } => fs_uuid,
        }
    }
    /// The path of the volume: the symlink for fileset volumes and the directory for
    /// lightweight volumes.
    pub fn path(&self) -> &str {
        match self {
            Self::LegacyLightweight { path, .. }
            | Self::LegacyFileset { path, .. }
            | Self::Current { path, .. } => path,
        }
    }
    /// Whether the volume is backed by a fileset.
    pub fn is_fileset_based(&self) -> bool {
        match self {
            Self::LegacyLightweight { .. } => false,
            Self::LegacyFileset { .. } => true,
            Self::Current { volume_type, .. } => *volume_type != VolumeType::Lightweight,
        }
    }
    /// The storage name of the volume, ie the last component of its path.
    pub fn volume_name(&self) -> &str {
        let path = self.path().trim_end_matches('/');
        Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path)
    }
    /// The fileset, if known.
    pub fn fileset(&self) -> Option<FilesetRef> {
        match self {
            Self::LegacyLightweight { .. } => None,
            Self::LegacyFileset { fileset, .. } => Some(fileset.clone()),
            Self::Current { fileset_name, .. } if fileset_name.is_empty() => None,
            Self::Current { fileset_name, .. } => Some(FilesetRef::Name(fileset_name.clone())),
        }
    }
    /// The consistency group of the volume, if any.
    pub fn consistency_group(&self) -> Option<&str> {
        match self {
            Self::Current {
                consistency_group, ..
            } if !consistency_group.is_empty() => Some(consistency_group),
            _ => None,
        }
    }
    /// The volume type, inferred for legacy ids.
    pub fn volume_type(&self) -> Option<VolumeType> {
        match self {
            Self::LegacyLightweight { .. } => Some(VolumeType::Lightweight),
            Self::LegacyFileset { .. } => None,
            Self::Current { volume_type, .. } => Some(*volume_type),
        }
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyLightweight {
                cluster_id,
                fs_uuid,
                path,
            } => write!(f, "{cluster_id};{fs_uuid};{PATH_TAG}={path}"),
            Self::LegacyFileset {
                cluster_id,
                fs_uuid,
                fileset,
                path,
            } => {
                let (tag, fileset) = match fileset {
                    FilesetRef::Id(id) => (FILESET_ID_TAG, id),
                    FilesetRef::Name(name) => (FILESET_NAME_TAG, name),
                };
                write!(f, "{cluster_id};{fs_uuid};{tag}={fileset};{PATH_TAG}={path}")
            }
            Self::Current {
                storage_class,
                volume_type,
                cluster_id,
                fs_uuid,
                consistency_group,
                fileset_name,
                path,
            } => write!(
                f,
                "{};{};{cluster_id};{fs_uuid};{consistency_group};{fileset_name};{path}",
                storage_class.code(),
                volume_type.code()
            ),
        }
    }
}

/// Split a `key=value` segment.
fn tagged<'a>(id: &str, segment: &'a str) -> Result<(&'a str, &'a str), VolumeIdError> {
    segment.split_once('=').ok_or_else(|| VolumeIdError::MalformedSegment {
        id: id.to_string(),
        segment: segment.to_string(),
    })
}

fn path_segment(id: &str, segment: &str) -> Result<String, VolumeIdError> {
    match tagged(id, segment)? {
        (PATH_TAG, "") => EmptyField { id, field: "path" }.fail(),
        (PATH_TAG, path) => Ok(path.to_string()),
        (key, _) => UnexpectedKey { id, key }.fail(),
    }
}

fn non_empty(id: &str, value: &str, field: &'static str) -> Result<String, VolumeIdError> {
    match value.is_empty() {
        true => EmptyField { id, field }.fail(),
        false => Ok(value.to_string()),
    }
}

impl FromStr for VolumeId {
    type Err = VolumeIdError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let fields = id.split(SEPARATOR).collect::<Vec<_>>();
        match fields.as_slice() {
            [cluster_id, fs_uuid, path] => Ok(Self::LegacyLightweight {
                cluster_id: non_empty(id, cluster_id, "cluster id")?,
                fs_uuid: non_empty(id, fs_uuid, "filesystem uuid")?,
                path: path_segment(id, path)?,
            }),
            [cluster_id, fs_uuid, fileset, path] => {
                let fileset = match tagged(id, fileset)? {
                    (_, "") => return EmptyField { id, field: "fileset" }.fail(),
                    (FILESET_ID_TAG, value) => FilesetRef::Id(value.to_string()),
                    (FILESET_NAME_TAG, value) => FilesetRef::Name(value.to_string()),
                    (key, _) => return UnexpectedKey { id, key }.fail(),
                };
                Ok(Self::LegacyFileset {
                    cluster_id: non_empty(id, cluster_id, "cluster id")?,
                    fs_uuid: non_empty(id, fs_uuid, "filesystem uuid")?,
                    fileset,
                    path: path_segment(id, path)?,
                })
            }
            [sc_type, vol_type, cluster_id, fs_uuid, consistency_group, fileset_name, path] => {
                let storage_class = StorageClassType::from_code(sc_type)
                    .ok_or_else(|| VolumeIdError::InvalidStorageClass {
                        id: id.to_string(),
                        value: sc_type.to_string(),
                    })?;
                let volume_type = VolumeType::from_code(vol_type).ok_or_else(|| {
                    VolumeIdError::InvalidVolumeType {
                        id: id.to_string(),
                        value: vol_type.to_string(),
                    }
                })?;
                if volume_type != VolumeType::Lightweight && fileset_name.is_empty() {
                    return EmptyField { id, field: "fileset" }.fail();
                }
                Ok(Self::Current {
                    storage_class,
                    volume_type,
                    cluster_id: non_empty(id, cluster_id, "cluster id")?,
                    fs_uuid: non_empty(id, fs_uuid, "filesystem uuid")?,
                    consistency_group: consistency_group.to_string(),
                    fileset_name: fileset_name.to_string(),
                    path: non_empty(id, path, "path")?,
                })
            }
            _ => FieldCount {
                id,
                count: fields.len(),
            }
            .fail(),
        }
    }
}
