/// The CSI plugin's name.
pub use utils::csi_plugin_name;

/// The csi driver components.
pub use rpc::csi;

/// Cluster connection settings.
pub mod cluster_config;
/// Storage class parameters.
pub mod context;
/// Volume lifecycle orchestration.
pub mod controller;
/// Driver bootstrap.
pub mod driver;
/// Volume concurrency limiter.
pub mod limiter;
/// CSI node id to admin node name mapping.
pub mod node_mapping;
/// Per path create/delete exclusion.
pub mod path_lock;
/// Contains tools to advertise the same set of capabilities across different
/// CSI microservices.
pub mod plugin_capabilities;
/// Storage Scale cluster access.
pub mod scale;
/// Key/value stores for the controller bookkeeping.
pub mod store;
/// Unix socket serving helpers.
pub mod transport;
/// The volume id codec.
pub mod volume_id;

/// Volume parameters parsed from the storage class.
pub use context::{Parameters, VolumeSpec};
