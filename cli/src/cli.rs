use std::{io, sync::Arc};

use anyhow::Result;
use azdeploy_lib::{
    ssh::public_key_path,
    types::{ClusterConfig, ProvisionedVm, ADMIN_USER},
    CommandExecutor, Plan, Provisioner,
};
use colored::*;
use log::info;
use prettytable::{row, Table};

use crate::opts::Opts;

pub(crate) async fn run(opts: Opts) -> Result<()> {
    let config = opts.config();

    if opts.print_plan {
        return print_plan(&config, opts.json);
    }

    info!(
        "provisioning {} ({} VMs, {} x {}GB disks each) in {}",
        config.name, config.vm_count, config.disk_count, config.disk_size_gb, config.location
    );
    let provisioner = Provisioner::new(config, Arc::new(CommandExecutor));
    let vms = provisioner.run().await?;
    print_summary(provisioner.config(), &vms);
    Ok(())
}

/// Shows what a run would execute. Nothing is run and nothing is written.
fn print_plan(config: &ClusterConfig, json: bool) -> Result<()> {
    let plan = Plan::build(
        config,
        &public_key_path(&config.ssh_key_path()),
        &config.config_script_path(),
    );

    if json {
        let stdout = io::stdout();
        let handle = stdout.lock();
        serde_json::to_writer_pretty(handle, &plan)?;
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["#", "Step", "Command"]);
    for (i, step) in plan.steps().enumerate() {
        let index = i + 1;
        table.add_row(row![index, step.name, step.invocation]);
    }
    table.printstd();
    Ok(())
}

fn summary_table(vms: &[ProvisionedVm]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Name", "Private IP", "Public IP", "FQDN"]);
    for vm in vms.iter() {
        table.add_row(row![
            vm.name,
            vm.details.private_ip_address,
            vm.details.public_ip_address,
            vm.details.fqdns
        ]);
    }
    table
}

fn print_summary(config: &ClusterConfig, vms: &[ProvisionedVm]) {
    summary_table(vms).printstd();

    println!(
        "{} {} VMs in {}",
        "provisioned".green(),
        vms.len(),
        config.resource_names().resource_group
    );
    if !vms.is_empty() {
        println!(
            "ssh -i {} {}@{}.{}.cloudapp.azure.com",
            config.ssh_key_path().display(),
            ADMIN_USER,
            config.name,
            config.location
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azdeploy_lib::types::VmDetails;
    use std::path::Path;

    #[test]
    fn summary_has_one_row_per_vm() {
        let details = VmDetails {
            private_ip_address: "192.168.1.4".into(),
            public_ip_address: "20.1.2.3".into(),
            fqdns: "demo.westus2.cloudapp.azure.com".into(),
            power_state: None,
        };
        let vm = ProvisionedVm::new("memsql-vm-1", details, Path::new("demo/memsql-vm-1.json"));
        let table = summary_table(&[vm]);

        assert_eq!(table.len(), 2);
        let header: Vec<String> = table
            .get_row(0)
            .unwrap()
            .iter()
            .map(|cell| cell.get_content())
            .collect();
        assert_eq!(header, vec!["Name", "Private IP", "Public IP", "FQDN"]);
        assert_eq!(table.get_row(1).unwrap().len(), 4);
        assert_eq!(
            table.get_row(1).unwrap().get_cell(2).unwrap().get_content(),
            "20.1.2.3"
        );
    }
}
