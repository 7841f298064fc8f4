//! The ordered list of `az` invocations that builds a cluster.
//!
//! Building a [`Plan`] is pure: nothing is executed and nothing touches the
//! filesystem, which is what makes `--print-plan` and the tests possible.

use std::path::Path;

use serde::Serialize;

use crate::{
    executor::Invocation,
    types::{
        disk_name, ClusterConfig, ResourceNames, ADMIN_USER, PRIVATE_IP, STORAGE_SKU,
        SUBNET_PREFIX, VM_IMAGE, VM_SIZE, VNET_PREFIX,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: String,
    pub invocation: Invocation,
}

impl Step {
    fn new(name: &str, invocation: Invocation) -> Step {
        Step {
            name: name.to_string(),
            invocation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmPlan {
    pub name: String,
    pub create: Step,
    pub disks: Vec<Step>,
    pub extension: Step,
}

impl VmPlan {
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        std::iter::once(&self.create)
            .chain(self.disks.iter())
            .chain(std::iter::once(&self.extension))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub account: Step,
    /// Only run when the credential cache is missing.
    pub credentials: Step,
    pub resources: Vec<Step>,
    pub vms: Vec<VmPlan>,
}

impl Plan {
    pub fn build(config: &ClusterConfig, ssh_public_key: &Path, config_script: &Path) -> Plan {
        let az = Az::new(config);
        let names = config.resource_names();

        let vms = config
            .vm_names()
            .iter()
            .enumerate()
            .map(|(i, vm)| VmPlan {
                name: vm.clone(),
                create: Step::new(
                    &format!("create {}", vm),
                    az.vm_create(&names, vm, i == 0, ssh_public_key),
                ),
                disks: (1..=config.disk_count)
                    .map(|j| {
                        let disk = disk_name(vm, j);
                        Step::new(
                            &format!("attach {}", disk),
                            az.disk_attach(&names, vm, &disk, config.disk_size_gb),
                        )
                    })
                    .collect(),
                extension: Step::new(
                    &format!("prepare disks on {}", vm),
                    az.extension(&names, vm, config_script),
                ),
            })
            .collect();

        Plan {
            account: Step::new("select subscription", az.account_set(&config.subscription_id)),
            credentials: Step::new(
                "create service principal",
                az.create_for_rbac(&config.subscription_id),
            ),
            resources: vec![
                Step::new("create resource group", az.group_create(&names)),
                Step::new("create public ip", az.public_ip_create(&names)),
                Step::new("create vnet", az.vnet_create(&names)),
                Step::new("create nsg", az.nsg_create(&names)),
                Step::new(
                    "allow ssh",
                    az.nsg_rule(&names, "MemSQLSecurityGroupRuleSSH", 1000, 22),
                ),
                Step::new(
                    "allow dashboard",
                    az.nsg_rule(&names, "memSQLDashboardRule", 1001, 9000),
                ),
                Step::new("create nic", az.nic_create(&names)),
                Step::new("create availability set", az.availability_set_create(&names)),
            ],
            vms,
        }
    }

    /// Every step in execution order, credentials included.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        std::iter::once(&self.account)
            .chain(std::iter::once(&self.credentials))
            .chain(self.resources.iter())
            .chain(self.vms.iter().flat_map(VmPlan::steps))
    }
}

/// Lists resources in the group that haven't finished provisioning, one name
/// per line. Empty output means everything is ready.
pub fn readiness_probe(config: &ClusterConfig) -> Invocation {
    Az::new(config)
        .cmd(&["resource", "list"])
        .flag("--resource-group", config.resource_names().resource_group)
        .flag("--query", "[?provisioningState!='Succeeded'].name")
        .flag("--output", "tsv")
}

/// Checks that a cached service principal still exists.
pub fn service_principal_show(config: &ClusterConfig, app_id: &str) -> Invocation {
    Az::new(config)
        .cmd(&["ad", "sp", "show"])
        .flag("--id", app_id)
}

struct Az<'a> {
    binary: &'a str,
    location: &'a str,
}

impl<'a> Az<'a> {
    fn new(config: &'a ClusterConfig) -> Az<'a> {
        Az {
            binary: &config.az_binary,
            location: &config.location,
        }
    }

    fn cmd(&self, subcommand: &[&str]) -> Invocation {
        Invocation::new(self.binary).args(subcommand.iter().copied())
    }

    fn account_set(&self, subscription: &str) -> Invocation {
        self.cmd(&["account", "set"]).flag("-s", subscription)
    }

    fn create_for_rbac(&self, subscription: &str) -> Invocation {
        self.cmd(&["ad", "sp", "create-for-rbac"])
            .arg(format!("--scopes=/subscriptions/{}", subscription))
            .arg("--role=Contributor")
    }

    fn group_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["group", "create"])
            .flag("--name", &names.resource_group)
            .flag("--location", self.location)
    }

    fn public_ip_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["network", "public-ip", "create"])
            .flag("--name", &names.public_ip)
            .flag("--resource-group", &names.resource_group)
            .flag("--location", self.location)
            .flag("--allocation-method", "Static")
            .flag("--dns-name", &names.dns_label)
    }

    fn vnet_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["network", "vnet", "create"])
            .flag("--name", &names.vnet)
            .flag("--resource-group", &names.resource_group)
            .flag("--location", self.location)
            .flag("--address-prefix", VNET_PREFIX)
            .flag("--subnet-name", &names.subnet)
            .flag("--subnet-prefix", SUBNET_PREFIX)
    }

    fn nsg_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["network", "nsg", "create"])
            .flag("--resource-group", &names.resource_group)
            .flag("--name", &names.nsg)
    }

    fn nsg_rule(&self, names: &ResourceNames, rule: &str, priority: u32, port: u16) -> Invocation {
        self.cmd(&["network", "nsg", "rule", "create"])
            .flag("--resource-group", &names.resource_group)
            .flag("--nsg-name", &names.nsg)
            .flag("--name", rule)
            .flag("--protocol", "tcp")
            .flag("--priority", priority.to_string())
            .flag("--destination-port-range", port.to_string())
            .flag("--access", "allow")
    }

    fn nic_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["network", "nic", "create"])
            .flag("--name", &names.nic)
            .flag("--resource-group", &names.resource_group)
            .flag("--location", self.location)
            .flag("--subnet", &names.subnet)
            .flag("--vnet-name", &names.vnet)
            .flag("--private-ip-address", PRIVATE_IP)
            .flag("--public-ip-address", &names.public_ip)
            .flag("--network-security-group", &names.nsg)
    }

    fn availability_set_create(&self, names: &ResourceNames) -> Invocation {
        self.cmd(&["vm", "availability-set", "create"])
            .flag("--name", &names.availability_set)
            .flag("--resource-group", &names.resource_group)
    }

    /// The first VM takes the public NIC, the rest join the subnet directly
    /// without a public IP.
    fn vm_create(
        &self,
        names: &ResourceNames,
        vm: &str,
        public: bool,
        ssh_public_key: &Path,
    ) -> Invocation {
        let inv = self
            .cmd(&["vm", "create"])
            .flag("-n", vm)
            .flag("--admin-username", ADMIN_USER)
            .flag("--resource-group", &names.resource_group)
            .flag("--ssh-key-value", ssh_public_key.display().to_string())
            .flag("--size", VM_SIZE)
            .flag("--storage-sku", STORAGE_SKU);

        let inv = if public {
            inv.flag("--location", self.location)
                .flag("--availability-set", &names.availability_set)
                .flag("--nics", &names.nic)
        } else {
            inv.flag("--vnet-name", &names.vnet)
                .flag("--subnet", &names.subnet)
                .flag("--location", self.location)
                .flag("--availability-set", &names.availability_set)
                .flag("--public-ip-address", "")
        };

        inv.flag("--image", VM_IMAGE)
    }

    fn disk_attach(&self, names: &ResourceNames, vm: &str, disk: &str, size_gb: u32) -> Invocation {
        self.cmd(&["vm", "disk", "attach"])
            .arg("--new")
            .flag("--disk", disk)
            .flag("--resource-group", &names.resource_group)
            .flag("--vm-name", vm)
            .flag("--size-gb", size_gb.to_string())
            .flag("--sku", STORAGE_SKU)
    }

    fn extension(&self, names: &ResourceNames, vm: &str, config_script: &Path) -> Invocation {
        self.cmd(&["vm", "extension", "set"])
            .flag("--resource-group", &names.resource_group)
            .flag("--vm-name", vm)
            .flag("--name", "customScript")
            .flag("--publisher", "Microsoft.Azure.Extensions")
            .flag("--settings", config_script.display().to_string())
    }
}
