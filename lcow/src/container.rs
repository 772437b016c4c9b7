//! LCOW container creation.
//!
//! Builds the host-side container configuration (utility VM boot files and
//! mapped directories) and hands it to the host compute service. The
//! caller's OCI spec only sees its translated mounts once the container
//! object exists.

use std::path::PathBuf;

use async_trait::async_trait;
use lcow_shared::{LcowError, LcowResult};
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};

use crate::mounts::{MappedDir, translate_bind_mounts};
use crate::options::BootSettings;

/// Utility VM boot section of a container configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HvRuntime {
    pub image_path: PathBuf,
    pub linux_kernel_file: String,
    pub linux_initrd_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub linux_boot_parameters: String,
}

impl From<&BootSettings> for HvRuntime {
    fn from(boot: &BootSettings) -> Self {
        Self {
            image_path: boot.kird_path.clone(),
            linux_kernel_file: boot.kernel_file.clone(),
            linux_initrd_file: boot.initrd_file.clone(),
            linux_boot_parameters: boot.boot_parameters.clone(),
        }
    }
}

impl BootSettings {
    pub fn hv_runtime(&self) -> HvRuntime {
        HvRuntime::from(self)
    }
}

/// Host-side configuration for a Linux container in its own utility VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub system_type: String,
    pub name: String,
    pub owner: String,
    pub hv_partition: bool,
    pub container_type: String,
    pub terminate_on_last_handle_closed: bool,
    pub hv_runtime: HvRuntime,
    #[serde(default)]
    pub mapped_directories: Vec<MappedDir>,
}

impl ContainerConfig {
    pub fn new(id: &str, owner: &str, boot: &BootSettings) -> Self {
        Self {
            system_type: "container".to_string(),
            name: id.to_string(),
            owner: owner.to_string(),
            hv_partition: true,
            container_type: "linux".to_string(),
            terminate_on_last_handle_closed: true,
            hv_runtime: boot.hv_runtime(),
            mapped_directories: Vec::new(),
        }
    }

    /// JSON document in the host compute service's field naming.
    pub fn to_json(&self) -> LcowResult<String> {
        serde_json::to_string(self)
            .map_err(|e| LcowError::Config(format!("Failed to serialize container config: {}", e)))
    }
}

/// The host compute service's container factory.
#[async_trait]
pub trait ContainerCreator: Send + Sync {
    type Container: Send;

    async fn create_container(
        &self,
        id: &str,
        config: &ContainerConfig,
    ) -> LcowResult<Self::Container>;
}

/// Create a Linux container and rewrite `spec`'s mounts for the utility VM.
///
/// `spec` is only updated after the host compute service has created the
/// container; on any failure it is left exactly as it was.
pub async fn create_lcow_container<C: ContainerCreator + ?Sized>(
    creator: &C,
    id: &str,
    owner: &str,
    boot: &BootSettings,
    spec: &mut Spec,
) -> LcowResult<C::Container> {
    let had_mounts = spec.mounts().is_some();
    let mounts = spec.mounts().clone().unwrap_or_default();
    let translation = translate_bind_mounts(&mounts)?;

    let mut config = ContainerConfig::new(id, owner, boot);
    config.mapped_directories = translation.mapped_dirs;

    tracing::debug!(
        container_id = %id,
        mapped_directories = config.mapped_directories.len(),
        "Creating LCOW container"
    );

    let container = creator
        .create_container(id, &config)
        .await
        .map_err(|e| LcowError::ContainerCreateFailed {
            id: id.to_string(),
            source: Box::new(e),
        })?;

    if had_mounts {
        spec.set_mounts(Some(translation.mounts));
    }

    tracing::debug!(container_id = %id, "LCOW container created");
    Ok(container)
}
