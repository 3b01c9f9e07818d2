use rpc::csi::{
    controller_service_capability::{self, rpc::Type as ControllerRpcType},
    node_service_capability::{self, rpc::Type as NodeRpcType},
    plugin_capability::{
        service::Type as PluginServiceType, Service, Type::Service as ServiceCapability,
    },
    ControllerServiceCapability, NodeServiceCapability, PluginCapability,
};

/// This returns the exhaustive set of plugin capabilities for this CSI driver.
pub fn plugin_capabilities() -> Vec<PluginCapability> {
    [PluginServiceType::ControllerService]
        .iter()
        .map(|c| PluginCapability {
            r#type: Some(ServiceCapability(Service { r#type: *c as i32 })),
        })
        .collect()
}

/// The RPCs implemented by the controller service.
pub fn controller_capabilities() -> Vec<ControllerServiceCapability> {
    [
        ControllerRpcType::CreateDeleteVolume,
        ControllerRpcType::PublishUnpublishVolume,
    ]
    .iter()
    .map(|c| ControllerServiceCapability {
        r#type: Some(controller_service_capability::Type::Rpc(
            controller_service_capability::Rpc { r#type: *c as i32 },
        )),
    })
    .collect()
}

/// The RPCs implemented by the node service.
pub fn node_capabilities() -> Vec<NodeServiceCapability> {
    [NodeRpcType::StageUnstageVolume]
        .iter()
        .map(|c| NodeServiceCapability {
            r#type: Some(node_service_capability::Type::Rpc(
                node_service_capability::Rpc { r#type: *c as i32 },
            )),
        })
        .collect()
}
