use scale_csi::{
    cluster_config::PrimaryConfig,
    controller::{ControllerOptions, PrimaryInfo, ScaleController},
    csi::{
        volume_capability::{access_mode::Mode, AccessMode, AccessType, BlockVolume, MountVolume},
        CapacityRange, ControllerPublishVolumeRequest, CreateVolumeRequest, DeleteVolumeRequest,
        VolumeCapability,
    },
    driver::ScaleDriver,
    limiter::{InflightEntry, InflightStore},
    node_mapping::NodeMapping,
    path_lock::OpKind,
    scale::{
        fake::{FakeConnector, Fault},
        ConnectorMap,
    },
    store::{MemStore, Store},
    volume_id::{FilesetRef, VolumeId},
};
use std::{collections::HashMap, sync::Arc};
use tonic::Code;

const GIB: i64 = 1024 * 1024 * 1024;
const CLUSTER: &str = "1001";
const FS_UUID: &str = "0A1B";
const OWNING_CLUSTER: &str = "2002";
const REMOTE_FS_UUID: &str = "0C1D";

struct Cluster {
    fake: Arc<FakeConnector>,
    controller: Arc<ScaleController>,
}

async fn primary_cluster_with(options: ControllerOptions) -> Cluster {
    let fake = Arc::new(FakeConnector::new(CLUSTER));
    fake.add_filesystem("fs1", FS_UUID, "/ibm/fs1", "");
    let mut connectors = ConnectorMap::new();
    connectors.insert_primary(CLUSTER, fake.clone());
    bootstrap(fake, connectors, options).await
}

async fn bootstrap(
    fake: Arc<FakeConnector>,
    connectors: ConnectorMap,
    options: ControllerOptions,
) -> Cluster {
    let mut table = HashMap::new();
    table.insert("worker-1".to_string(), "scale-node-1".to_string());
    let driver = ScaleDriver::bootstrap(
        connectors,
        CLUSTER,
        &PrimaryConfig {
            primary_fs: "fs1".into(),
            primary_fset: "store".into(),
            ..Default::default()
        },
        None,
        NodeMapping::new(table, "K8sNodePrefix_"),
        options,
    )
    .await
    .unwrap();
    Cluster {
        fake,
        controller: driver.controller(),
    }
}

async fn primary_cluster() -> Cluster {
    primary_cluster_with(ControllerOptions::default()).await
}

fn mount_capability() -> VolumeCapability {
    VolumeCapability {
        access_type: Some(AccessType::Mount(MountVolume::default())),
        access_mode: Some(AccessMode {
            mode: Mode::MultiNodeMultiWriter as i32,
        }),
    }
}

fn create_request(name: &str, size: i64, parameters: &[(&str, &str)]) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_string(),
        capacity_range: Some(CapacityRange {
            required_bytes: size,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![mount_capability()],
        parameters: parameters
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        ..Default::default()
    }
}

async fn create(cluster: &Cluster, name: &str, size: i64, parameters: &[(&str, &str)]) -> VolumeId {
    let volume = cluster
        .controller
        .create_volume(create_request(name, size, parameters))
        .await
        .unwrap()
        .volume
        .unwrap();
    volume.volume_id.parse().unwrap()
}

async fn delete(cluster: &Cluster, volume_id: &str) -> Result<(), tonic::Status> {
    cluster
        .controller
        .delete_volume(DeleteVolumeRequest {
            volume_id: volume_id.to_string(),
            ..Default::default()
        })
        .await
        .map(|_| ())
}

#[tokio::test]
async fn fileset_volume() {
    let cluster = primary_cluster().await;
    let fake = &cluster.fake;

    let response = cluster
        .controller
        .create_volume(create_request("pvc-1", 2 * GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap();
    let volume = response.volume.unwrap();
    assert_eq!(volume.capacity_bytes, 2 * GIB);
    assert_eq!(volume.volume_context.get("volBackendFs").map(String::as_str), Some("fs1"));

    let volume_id: VolumeId = volume.volume_id.parse().unwrap();
    assert!(volume_id.is_fileset_based());
    assert_eq!(volume_id.cluster_id(), CLUSTER);
    assert_eq!(volume_id.fs_uuid(), FS_UUID);
    assert_eq!(volume_id.path(), "/ibm/fs1/store/.volumes/pvc-1");

    let fileset = fake.fileset("fs1", "pvc-1").unwrap();
    assert!(fileset.independent);
    assert_eq!(fileset.path.as_deref(), Some("/ibm/fs1/pvc-1"));
    assert_eq!(fake.quota("fs1", "pvc-1"), Some(2 * GIB as u64));
    assert!(fake.has_directory("fs1", "pvc-1/pvc-1-data"));
    assert_eq!(
        fake.symlink("fs1", "store/.volumes/pvc-1"),
        Some(("fs1".to_string(), "pvc-1/pvc-1-data".to_string()))
    );
    assert!(cluster.controller.path_lock().is_empty());
}

#[tokio::test]
async fn create_is_idempotent() {
    let cluster = primary_cluster().await;
    let parameters = [("volBackendFs", "fs1")];
    let first = create(&cluster, "pvc-1", 2 * GIB, &parameters).await;
    let creates = cluster.fake.call_count("create_fileset");
    let links = cluster.fake.call_count("link_fileset");

    let second = create(&cluster, "pvc-1", 2 * GIB, &parameters).await;
    assert_eq!(first, second);
    assert_eq!(cluster.fake.call_count("create_fileset"), creates);
    assert_eq!(cluster.fake.call_count("link_fileset"), links);
    assert_eq!(cluster.fake.call_count("create_symlink"), 1);
}

#[tokio::test]
async fn create_resumes_a_partial_volume() {
    let cluster = primary_cluster().await;
    // A previous attempt created the fileset and died.
    cluster.fake.add_fileset("fs1", "pvc-1", true, None);

    create(&cluster, "pvc-1", 2 * GIB, &[("volBackendFs", "fs1")]).await;
    assert_eq!(cluster.fake.call_count("create_fileset"), 1);
    let fileset = cluster.fake.fileset("fs1", "pvc-1").unwrap();
    assert_eq!(fileset.path.as_deref(), Some("/ibm/fs1/pvc-1"));
    assert_eq!(cluster.fake.quota("fs1", "pvc-1"), Some(2 * GIB as u64));
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_some());
}

#[tokio::test]
async fn size_conflict() {
    let cluster = primary_cluster().await;
    let parameters = [("volBackendFs", "fs1")];
    create(&cluster, "pvc-1", 2 * GIB, &parameters).await;

    let status = cluster
        .controller
        .create_volume(create_request("pvc-1", 5 * GIB, &parameters))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
    assert_eq!(cluster.fake.quota("fs1", "pvc-1"), Some(2 * GIB as u64));
}

#[tokio::test]
async fn small_filesets_are_raised() {
    let cluster = primary_cluster().await;
    let volume = cluster
        .controller
        .create_volume(create_request("pvc-1", 1024 * 1024, &[("volBackendFs", "fs1")]))
        .await
        .unwrap()
        .volume
        .unwrap();
    assert_eq!(volume.capacity_bytes, GIB);
    assert_eq!(cluster.fake.quota("fs1", "pvc-1"), Some(GIB as u64));
}

#[tokio::test]
async fn lightweight_volume() {
    let cluster = primary_cluster().await;
    let parameters = [("volBackendFs", "fs1"), ("volDirBasePath", "lw")];

    let status = cluster
        .controller
        .create_volume(create_request("pvc-2", GIB, &parameters))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    cluster.fake.add_directory("fs1", "lw");
    let volume_id = create(&cluster, "pvc-2", GIB, &parameters).await;
    assert!(!volume_id.is_fileset_based());
    assert_eq!(volume_id.path(), "/ibm/fs1/lw/pvc-2");
    assert!(cluster.fake.has_directory("fs1", "lw/pvc-2"));
    assert_eq!(
        cluster.fake.symlink("fs1", "store/.volumes/pvc-2"),
        Some(("fs1".to_string(), "lw/pvc-2".to_string()))
    );
    assert_eq!(cluster.fake.call_count("create_fileset"), 1);

    create(&cluster, "pvc-2", GIB, &parameters).await;
    assert_eq!(cluster.fake.call_count("make_directory"), 2);

    delete(&cluster, &volume_id.to_string()).await.unwrap();
    assert!(!cluster.fake.has_directory("fs1", "lw/pvc-2"));
    assert!(cluster.fake.has_directory("fs1", "lw"));
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-2").is_none());
}

#[tokio::test]
async fn dependent_fileset_volume() {
    let cluster = primary_cluster().await;
    cluster.fake.add_fileset("fs1", "parent", true, Some("/ibm/fs1/parent"));
    cluster.fake.add_fileset("fs1", "plain", false, Some("/ibm/fs1/plain"));

    let parameters = [
        ("volBackendFs", "fs1"),
        ("filesetType", "dependent"),
        ("parentFileset", "parent"),
    ];
    create(&cluster, "pvc-3", GIB, &parameters).await;
    let fileset = cluster.fake.fileset("fs1", "pvc-3").unwrap();
    assert!(!fileset.independent);
    assert_eq!(fileset.path.as_deref(), Some("/ibm/fs1/parent/pvc-3"));
    assert!(cluster.fake.has_directory("fs1", "parent/pvc-3/pvc-3-data"));

    let parameters = [
        ("volBackendFs", "fs1"),
        ("filesetType", "dependent"),
        ("parentFileset", "plain"),
    ];
    let status = cluster
        .controller
        .create_volume(create_request("pvc-4", GIB, &parameters))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn consistency_group_volume() {
    let cluster = primary_cluster_with(ControllerOptions {
        cg_prefix: Some("cg".into()),
        ..Default::default()
    })
    .await;
    let parameters = [
        ("volBackendFs", "fs1"),
        ("version", "2"),
        ("csi.storage.k8s.io/pvc/namespace", "ns1"),
    ];

    let volume_id = create(&cluster, "pvc-5", GIB, &parameters).await;
    assert_eq!(volume_id.consistency_group(), Some("cg-ns1"));
    let group = cluster.fake.fileset("fs1", "cg-ns1").unwrap();
    assert!(group.independent);
    assert_eq!(group.path.as_deref(), Some("/ibm/fs1/cg-ns1"));
    let fileset = cluster.fake.fileset("fs1", "pvc-5").unwrap();
    assert!(!fileset.independent);
    assert_eq!(fileset.path.as_deref(), Some("/ibm/fs1/cg-ns1/pvc-5"));

    // The group is shared by the volumes of the namespace.
    create(&cluster, "pvc-6", GIB, &parameters).await;
    let creates: Vec<_> = cluster
        .fake
        .calls()
        .into_iter()
        .filter(|call| call == "create_fileset fs1 cg-ns1")
        .collect();
    assert_eq!(creates.len(), 1);

    // Without a prefix there is no default group.
    let cluster = primary_cluster().await;
    let status = cluster
        .controller
        .create_volume(create_request("pvc-5", GIB, &parameters))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn failed_create_is_undone() {
    let cluster = primary_cluster().await;
    cluster
        .fake
        .inject("create_symlink", Fault::Job("EFSSG0001C: internal error".into()));

    let status = cluster
        .controller
        .create_volume(create_request("pvc-1", GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_none());
    assert_eq!(cluster.fake.call_count("unlink_fileset"), 1);
    assert_eq!(cluster.fake.call_count("delete_fileset"), 1);

    cluster.fake.add_directory("fs1", "lw");
    let status = cluster
        .controller
        .create_volume(create_request(
            "pvc-2",
            GIB,
            &[("volBackendFs", "fs1"), ("volDirBasePath", "lw")],
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(!cluster.fake.has_directory("fs1", "lw/pvc-2"));

    // Once the fault clears the retry succeeds.
    cluster.fake.clear("create_symlink");
    create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_some());
}

#[tokio::test]
async fn remote_errors_keep_their_code() {
    let cluster = primary_cluster().await;
    cluster.fake.inject("list_fileset", Fault::Unauthenticated);
    let status = cluster
        .controller
        .create_volume(create_request("pvc-1", GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn static_volume() {
    let cluster = primary_cluster().await;
    let parameters = [("volBackendFs", "fs1"), ("existingVolume", "yes")];

    let status = cluster
        .controller
        .create_volume(create_request("pvc-7", GIB, &parameters))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    cluster.fake.add_fileset("fs1", "pvc-7", false, None);
    let response = cluster
        .controller
        .create_volume(create_request("pvc-7", GIB, &parameters))
        .await
        .unwrap();
    assert_eq!(response.volume.unwrap().capacity_bytes, GIB);
    assert_eq!(
        cluster.fake.fileset("fs1", "pvc-7").unwrap().path.as_deref(),
        Some("/ibm/fs1/pvc-7")
    );
    assert_eq!(
        cluster.fake.symlink("fs1", "store/.volumes/pvc-7"),
        Some(("fs1".to_string(), "pvc-7".to_string()))
    );
    assert_eq!(cluster.fake.call_count("create_fileset"), 1);
}

#[tokio::test]
async fn invalid_requests() {
    let cluster = primary_cluster().await;

    let mut request = create_request("pvc-1", GIB, &[("volBackendFs", "fs1")]);
    request.volume_capabilities = vec![VolumeCapability {
        access_type: Some(AccessType::Block(BlockVolume {})),
        access_mode: None,
    }];
    let status = cluster.controller.create_volume(request).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    for parameters in [
        vec![],
        vec![("volBackendFs", "fs2")],
        vec![("volBackendFs", "fs1"), ("clusterId", "9999")],
        vec![("volBackendFs", "fs1"), ("nodeClass", "missing")],
    ] {
        let status = cluster
            .controller
            .create_volume(create_request("pvc-1", GIB, &parameters))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument, "{parameters:?}");
    }
    assert_eq!(cluster.fake.call_count("create_fileset"), 1);
}

#[tokio::test]
async fn volume_name_prefix() {
    let cluster = primary_cluster_with(ControllerOptions {
        volume_name_prefix: Some("vol".into()),
        ..Default::default()
    })
    .await;
    let volume_id = create(&cluster, "pvc-1234", GIB, &[("volBackendFs", "fs1")]).await;
    assert_eq!(volume_id.volume_name(), "vol-1234");
    assert!(cluster.fake.fileset("fs1", "vol-1234").is_some());
}

#[tokio::test]
async fn delete_fileset_volume() {
    let cluster = primary_cluster().await;
    let volume_id = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;

    delete(&cluster, &volume_id.to_string()).await.unwrap();
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_none());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_none());
    assert!(cluster.fake.fileset("fs1", "store").is_some());

    // Deleting again is fine.
    delete(&cluster, &volume_id.to_string()).await.unwrap();
    assert!(cluster.controller.path_lock().is_empty());
}

#[tokio::test]
async fn delete_with_snapshots() {
    let cluster = primary_cluster().await;
    let volume_id = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;
    cluster.fake.add_snapshot("fs1", "pvc-1", "snap-1");

    let status = delete(&cluster, &volume_id.to_string()).await.unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert!(cluster.fake.fileset("fs1", "pvc-1").unwrap().path.is_some());
}

#[tokio::test]
async fn delete_unknown_volumes() {
    let cluster = primary_cluster().await;
    let status = delete(&cluster, "").await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    delete(&cluster, "not-a-volume-id").await.unwrap();
    // Filesystem no longer exists.
    delete(&cluster, "1001;FFFF;path=/ibm/gone/lw/pvc-1").await.unwrap();
    assert_eq!(cluster.fake.call_count("delete_directory"), 0);
}

#[tokio::test]
async fn create_and_delete_exclude_each_other() {
    let cluster = primary_cluster().await;
    let symlink = cluster.controller.primary().symlink_path("pvc-1");
    let lock = cluster
        .controller
        .path_lock()
        .try_acquire(&symlink, OpKind::DeleteVolume)
        .unwrap();

    let status = cluster
        .controller
        .create_volume(create_request("pvc-1", GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
    drop(lock);

    create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;
}

#[tokio::test]
async fn inflight_size_mismatch() {
    let fake = Arc::new(FakeConnector::new(CLUSTER));
    fake.add_filesystem("fs1", FS_UUID, "/ibm/fs1", "");
    fake.add_fileset("fs1", "store", true, Some("/ibm/fs1/store"));
    fake.add_directory("fs1", "store/.volumes");
    let mut connectors = ConnectorMap::new();
    connectors.insert_primary(CLUSTER, fake.clone());

    let store = Arc::new(MemStore::<String, InflightEntry>::new());
    store.put(
        "pvc-1".to_string(),
        InflightEntry {
            size: 5 * GIB as u64,
            holders: 1,
        },
    );
    let inflight: Arc<InflightStore> = store.clone();
    let controller = ScaleController::new(
        connectors,
        PrimaryInfo {
            cluster_id: CLUSTER.into(),
            fs: "fs1".into(),
            mount_point: "/ibm/fs1".into(),
            fileset: "store".into(),
            symlink_dir: "/ibm/fs1/store/.volumes".into(),
        },
        NodeMapping::default(),
        ControllerOptions::default(),
    )
    .with_inflight_store(inflight);

    let status = controller
        .create_volume(create_request("pvc-1", GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
    assert_eq!(fake.call_count("create_fileset"), 0);

    // The same size joins the request in flight and leaves its reservation alone.
    controller
        .create_volume(create_request("pvc-1", 5 * GIB, &[("volBackendFs", "fs1")]))
        .await
        .unwrap();
    assert_eq!(store.get(&"pvc-1".to_string()).map(|entry| entry.holders), Some(1));
}

fn publish_request(volume_id: &VolumeId, node_id: &str) -> ControllerPublishVolumeRequest {
    ControllerPublishVolumeRequest {
        volume_id: volume_id.to_string(),
        node_id: node_id.to_string(),
        volume_capability: Some(mount_capability()),
        ..Default::default()
    }
}

#[tokio::test]
async fn publish_mounts_the_filesystem() {
    let cluster = primary_cluster().await;
    let volume_id = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;

    cluster
        .controller
        .controller_publish_volume(publish_request(&volume_id, "worker-1"))
        .await
        .unwrap();
    assert!(cluster.fake.is_mounted("fs1", "scale-node-1"));
    assert_eq!(cluster.fake.call_count("mount_filesystem"), 1);

    cluster
        .controller
        .controller_publish_volume(publish_request(&volume_id, "worker-1"))
        .await
        .unwrap();
    assert_eq!(cluster.fake.call_count("mount_filesystem"), 1);

    let gone: VolumeId = "1001;FFFF;path=/ibm/gone/lw/pvc-1".parse().unwrap();
    let status = cluster
        .controller
        .controller_publish_volume(publish_request(&gone, "worker-1"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let mut request = publish_request(&volume_id, "");
    let status = cluster
        .controller
        .controller_publish_volume(request.clone())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    request.volume_id = "bogus".into();
    request.node_id = "worker-1".into();
    let status = cluster
        .controller
        .controller_publish_volume(request)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn publish_without_mount_management() {
    let cluster = primary_cluster_with(ControllerOptions {
        skip_mount_unmount: true,
        ..Default::default()
    })
    .await;
    let volume_id = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;

    let status = cluster
        .controller
        .controller_publish_volume(publish_request(&volume_id, "worker-2"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(cluster.fake.call_count("mount_filesystem"), 0);

    cluster.fake.set_mounted("fs1", "worker-2");
    cluster
        .controller
        .controller_publish_volume(publish_request(&volume_id, "worker-2"))
        .await
        .unwrap();
}

/// A primary cluster which also mounts `remote_fs1`, the filesystem `gpfs0` of another cluster.
async fn remote_mount() -> (Cluster, Arc<FakeConnector>) {
    let fake = Arc::new(FakeConnector::new(CLUSTER));
    fake.add_filesystem("fs1", FS_UUID, "/ibm/fs1", "");
    fake.add_filesystem(
        "remote_fs1",
        REMOTE_FS_UUID,
        "/ibm/remote_fs1",
        "owner.cluster:gpfs0",
    );
    let owner = Arc::new(FakeConnector::new(OWNING_CLUSTER));
    owner.add_filesystem("gpfs0", REMOTE_FS_UUID, "/gpfs/gpfs0", "");
    let mut connectors = ConnectorMap::new();
    connectors.insert_primary(CLUSTER, fake.clone());
    connectors.insert(OWNING_CLUSTER, owner.clone());
    let cluster = bootstrap(fake, connectors, ControllerOptions::default()).await;
    (cluster, owner)
}

#[tokio::test]
async fn lightweight_volume_on_a_remote_mount() {
    let (cluster, owner) = remote_mount().await;
    cluster.fake.add_directory("remote_fs1", "lw");
    let parameters = [("volBackendFs", "remote_fs1"), ("volDirBasePath", "lw")];

    let volume_id = create(&cluster, "pvc-2", GIB, &parameters).await;
    assert!(!volume_id.is_fileset_based());
    assert_eq!(volume_id.cluster_id(), CLUSTER);
    assert_eq!(volume_id.fs_uuid(), REMOTE_FS_UUID);
    assert_eq!(volume_id.path(), "/ibm/remote_fs1/lw/pvc-2");
    assert!(cluster.fake.has_directory("remote_fs1", "lw/pvc-2"));
    assert_eq!(
        cluster.fake.symlink("fs1", "store/.volumes/pvc-2"),
        Some(("remote_fs1".to_string(), "lw/pvc-2".to_string()))
    );
    assert!(owner.calls().is_empty());

    delete(&cluster, &volume_id.to_string()).await.unwrap();
    assert!(!cluster.fake.has_directory("remote_fs1", "lw/pvc-2"));
    assert!(cluster.fake.has_directory("remote_fs1", "lw"));
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-2").is_none());
    assert!(owner.calls().is_empty());
}

#[tokio::test]
async fn fileset_volume_on_the_owning_cluster() {
    let (cluster, owner) = remote_mount().await;
    let parameters = [("volBackendFs", "remote_fs1"), ("clusterId", OWNING_CLUSTER)];

    let volume_id = create(&cluster, "pvc-1", 2 * GIB, &parameters).await;
    assert!(volume_id.is_fileset_based());
    assert_eq!(volume_id.cluster_id(), OWNING_CLUSTER);
    assert_eq!(volume_id.fs_uuid(), REMOTE_FS_UUID);
    assert_eq!(volume_id.path(), "/ibm/fs1/store/.volumes/pvc-1");

    let fileset = owner.fileset("gpfs0", "pvc-1").unwrap();
    assert_eq!(fileset.path.as_deref(), Some("/gpfs/gpfs0/pvc-1"));
    assert_eq!(owner.quota("gpfs0", "pvc-1"), Some(2 * GIB as u64));
    assert!(owner.has_directory("gpfs0", "pvc-1/pvc-1-data"));
    assert!(cluster.fake.fileset("remote_fs1", "pvc-1").is_none());
    assert_eq!(
        cluster.fake.symlink("fs1", "store/.volumes/pvc-1"),
        Some(("remote_fs1".to_string(), "pvc-1/pvc-1-data".to_string()))
    );

    delete(&cluster, &volume_id.to_string()).await.unwrap();
    assert!(owner.fileset("gpfs0", "pvc-1").is_none());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_none());
}

#[tokio::test]
async fn delete_legacy_fileset_volume() {
    let cluster = primary_cluster().await;
    let current = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;
    let id = cluster.fake.fileset("fs1", "pvc-1").unwrap().id;
    let legacy = VolumeId::LegacyFileset {
        cluster_id: CLUSTER.to_string(),
        fs_uuid: FS_UUID.to_string(),
        fileset: FilesetRef::Id(id.to_string()),
        path: current.path().to_string(),
    };

    delete(&cluster, &legacy.to_string()).await.unwrap();
    assert_eq!(cluster.fake.call_count("get_fileset_name_from_id"), 1);
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_none());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_none());
}

#[tokio::test]
async fn delete_refuses_a_fileset_of_another_volume() {
    let cluster = primary_cluster().await;
    let current = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")]).await;
    cluster
        .fake
        .add_fileset("fs1", "other", true, Some("/ibm/fs1/other"));
    let other = cluster.fake.fileset("fs1", "other").unwrap().id;
    let drifted = VolumeId::LegacyFileset {
        cluster_id: CLUSTER.to_string(),
        fs_uuid: FS_UUID.to_string(),
        fileset: FilesetRef::Id(other.to_string()),
        path: current.path().to_string(),
    };

    let status = delete(&cluster, &drifted.to_string()).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(cluster.fake.fileset("fs1", "other").unwrap().path.is_some());
    assert!(cluster.fake.fileset("fs1", "pvc-1").unwrap().path.is_some());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_some());
    assert_eq!(cluster.fake.call_count("unlink_fileset"), 0);
    assert_eq!(cluster.fake.call_count("delete_fileset"), 0);
    assert_eq!(cluster.fake.call_count("delete_symlink"), 0);
}

#[tokio::test]
async fn delete_surfaces_remote_failures() {
    let cluster = primary_cluster().await;
    let volume_id = create(&cluster, "pvc-1", GIB, &[("volBackendFs", "fs1")])
        .await
        .to_string();

    // Mentions "not found" but is not about the fileset.
    cluster.fake.inject(
        "delete_fileset",
        Fault::Api("EFSSG0000C: quota entry not found for node class".into()),
    );
    let status = delete(&cluster, &volume_id).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_some());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_some());
    cluster.fake.clear("delete_fileset");

    cluster.fake.inject("list_fileset", Fault::Unauthenticated);
    let status = delete(&cluster, &volume_id).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_some());
    cluster.fake.clear("list_fileset");

    delete(&cluster, &volume_id).await.unwrap();
    assert!(cluster.fake.fileset("fs1", "pvc-1").is_none());
    assert!(cluster.fake.symlink("fs1", "store/.volumes/pvc-1").is_none());
}
