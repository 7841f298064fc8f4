use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const DEFAULT_LOCATION: &str = "westus2";
pub const DEFAULT_RBAC_FILE: &str = "rbac.json";
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

pub const VNET_PREFIX: &str = "192.168.0.0/16";
pub const SUBNET_NAME: &str = "MemSQLBackEnd";
pub const SUBNET_PREFIX: &str = "192.168.1.0/24";
pub const PRIVATE_IP: &str = "192.168.1.101";

pub const ADMIN_USER: &str = "memsqladmin";
pub const VM_PREFIX: &str = "memsql-vm";
pub const VM_SIZE: &str = "Standard_F4";
pub const STORAGE_SKU: &str = "Standard_LRS";
pub const VM_IMAGE: &str = "Canonical:UbuntuServer:16.04-LTS:latest";

pub const CONFIG_SCRIPT_FILE: &str = "config-script.json";
pub const PREP_DISKS_URI: &str =
    "https://sademodata.blob.core.windows.net/scripts/bash/prep-data-disks.sh";

/// How to bridge the gap between creating the network resources and the
/// first `az vm create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Sleep unconditionally.
    Fixed(Duration),
    /// Ask Azure for resources that aren't `Succeeded` yet until there are none.
    Poll { interval: Duration, attempts: usize },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Fixed(DEFAULT_WAIT)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub subscription_id: String,
    pub name: String,
    pub vm_count: usize,
    /// Relative to the output directory.
    pub rbac_file: PathBuf,
    pub disk_count: usize,
    pub disk_size_gb: u32,
    pub location: String,
    pub root: PathBuf,
    pub az_binary: String,
    pub wait: WaitStrategy,
    /// Tries per VM step, 1 means no retry.
    pub attempts: usize,
    pub retry_delay: Duration,
    pub parallel: bool,
    pub verify_credentials: bool,
}

impl ClusterConfig {
    pub fn new(subscription_id: &str, name: &str) -> ClusterConfig {
        ClusterConfig {
            subscription_id: subscription_id.to_string(),
            name: name.to_string(),
            vm_count: 1,
            rbac_file: PathBuf::from(DEFAULT_RBAC_FILE),
            disk_count: 2,
            disk_size_gb: 1024,
            location: DEFAULT_LOCATION.to_string(),
            root: PathBuf::from("."),
            az_binary: "az".to_string(),
            wait: WaitStrategy::default(),
            attempts: 1,
            retry_delay: Duration::from_secs(10),
            parallel: false,
            verify_credentials: false,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn rbac_path(&self) -> PathBuf {
        self.output_dir().join(&self.rbac_file)
    }

    pub fn ssh_key_path(&self) -> PathBuf {
        self.output_dir().join("id_rsa")
    }

    pub fn config_script_path(&self) -> PathBuf {
        self.output_dir().join(CONFIG_SCRIPT_FILE)
    }

    pub fn resource_names(&self) -> ResourceNames {
        ResourceNames::new(&self.name)
    }

    pub fn vm_names(&self) -> Vec<String> {
        (1..=self.vm_count).map(vm_name).collect()
    }
}

pub fn vm_name(index: usize) -> String {
    format!("{}-{}", VM_PREFIX, index)
}

pub fn disk_name(vm_name: &str, index: usize) -> String {
    format!("{}-disk{}", vm_name, index)
}

/// Expands `~` so the output root can be given as `~/clusters`.
pub fn expand_root(root: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(root).into_owned())
}

/// The cluster name doubles as the public IP's DNS label, so it has to be a
/// valid one.
pub fn validate_cluster_name(name: &str) -> Result<String, Error> {
    let re = Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("invalid cluster name regex");
    if re.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNames {
    pub resource_group: String,
    pub public_ip: String,
    pub dns_label: String,
    pub vnet: String,
    pub subnet: String,
    pub nsg: String,
    pub nic: String,
    pub availability_set: String,
}

impl ResourceNames {
    pub fn new(cluster: &str) -> ResourceNames {
        ResourceNames {
            resource_group: format!("{}-rg", cluster),
            public_ip: format!("{}-pip", cluster),
            dns_label: cluster.to_string(),
            vnet: format!("{}-vnet", cluster),
            subnet: SUBNET_NAME.to_string(),
            nsg: format!("{}-nsg", cluster),
            nic: format!("{}-nic", cluster),
            availability_set: format!("{}-avs", cluster),
        }
    }
}

/// Settings handed to the custom script extension; partitions and mounts the
/// data disks on first boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigScript {
    pub file_uris: Vec<String>,
    pub command_to_execute: String,
}

impl ConfigScript {
    pub fn for_disks(disk_count: usize) -> ConfigScript {
        ConfigScript {
            file_uris: vec![PREP_DISKS_URI.to_string()],
            command_to_execute: format!("bash prep-data-disks.sh {}", disk_count),
        }
    }
}

/// Output of `az ad sp create-for-rbac`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    pub app_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub password: String,
    pub tenant: String,
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("app_id", &self.app_id)
            .field("display_name", &self.display_name)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// The parts of `az vm create` output we report back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDetails {
    #[serde(default)]
    pub private_ip_address: String,
    #[serde(default)]
    pub public_ip_address: String,
    #[serde(default)]
    pub fqdns: String,
    #[serde(default)]
    pub power_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVm {
    pub name: String,
    pub details: VmDetails,
    pub output: PathBuf,
}

impl ProvisionedVm {
    pub fn new(name: &str, details: VmDetails, output: &Path) -> ProvisionedVm {
        ProvisionedVm {
            name: name.to_string(),
            details,
            output: output.to_path_buf(),
        }
    }
}
