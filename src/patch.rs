use json_patch::{AddOperation, Patch, PatchOperation};
use serde_json::{json, Value};

pub const SIDECAR_CONTAINER_NAME: &str = "spire-sidecar";
pub const SIDECAR_MOUNT_PATH: &str = "/spire";
pub const SIDECAR_VOLUME_NAME: &str = "spire-wl-api";
pub const CONTAINERS_APPEND_PATH: &str = "/spec/containers/-";
pub const VOLUMES_APPEND_PATH: &str = "/spec/volumes/-";

/// The container and volume appended to admitted pods, built once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarPatch {
    container: Value,
    volume: Value,
}

impl SidecarPatch {
    pub fn new(sidecar_image: &str, host_mount: &str) -> Self {
        SidecarPatch {
            container: json!({
                "image": sidecar_image,
                "name": SIDECAR_CONTAINER_NAME,
                "volumeMounts": [
                    {
                        "mountPath": SIDECAR_MOUNT_PATH,
                        "name": SIDECAR_VOLUME_NAME,
                    },
                ],
            }),
            volume: json!({
                "hostPath": {
                    "path": host_mount,
                    "type": "Directory",
                },
                "name": SIDECAR_VOLUME_NAME,
            }),
        }
    }

    /// Container append first, then volume append.
    pub fn operations(&self) -> Patch {
        Patch(vec![
            PatchOperation::Add(AddOperation {
                path: CONTAINERS_APPEND_PATH.to_string(),
                value: self.container.clone(),
            }),
            PatchOperation::Add(AddOperation {
                path: VOLUMES_APPEND_PATH.to_string(),
                value: self.volume.clone(),
            }),
        ])
    }
}
