use std::{path::PathBuf, time::Duration};

use azdeploy_lib::{
    types::{expand_root, validate_cluster_name},
    ClusterConfig, WaitStrategy,
};
use clap::{ArgEnum, Parser};

#[derive(ArgEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    Fixed,
    Poll,
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Opts {
    #[clap(
        short = 's',
        long = "subscription",
        help = "Azure subscription id",
        env = "AZURE_SUBSCRIPTION_ID",
        value_name = "ID"
    )]
    pub subscription_id: String,
    #[clap(
        short = 'n',
        long,
        help = "Cluster name, also used as output directory and DNS label",
        value_name = "NAME",
        parse(try_from_str = validate_cluster_name)
    )]
    pub name: String,
    #[clap(
        short = 'c',
        long = "vms",
        help = "Virtual machine count",
        default_value = "1",
        value_name = "COUNT"
    )]
    pub vms: usize,
    #[clap(
        short = 'r',
        long,
        help = "Service principal file, relative to the output dir; created if it does not exist",
        default_value = "rbac.json",
        value_name = "FILE"
    )]
    pub rbac: PathBuf,
    #[clap(
        short = 'd',
        long,
        help = "Data disk count per VM",
        default_value = "2",
        value_name = "COUNT"
    )]
    pub disks: usize,
    #[clap(
        short = 'D',
        long,
        help = "Data disk size",
        default_value = "1024",
        value_name = "GB"
    )]
    pub disk_size: u32,
    #[clap(
        short = 'l',
        long,
        help = "Azure region",
        env = "AZURE_DEFAULTS_LOCATION",
        default_value = "westus2",
        value_name = "REGION"
    )]
    pub location: String,
    #[clap(
        long,
        help = "Directory the cluster's output directory is created in",
        default_value = ".",
        value_name = "DIR",
        parse(from_str = expand_root)
    )]
    pub root: PathBuf,
    #[clap(
        long,
        help = "Azure CLI binary",
        env = "AZ_BINARY",
        default_value = "az",
        value_name = "PATH"
    )]
    pub az: String,
    #[clap(
        long,
        arg_enum,
        help = "How to wait for network resources before creating VMs",
        default_value = "fixed"
    )]
    pub wait: Wait,
    #[clap(
        long,
        help = "fixed: seconds to sleep; poll: seconds between checks",
        default_value = "30",
        value_name = "SECONDS"
    )]
    pub wait_secs: u64,
    #[clap(
        long,
        help = "poll: checks before giving up",
        default_value = "20",
        value_name = "N"
    )]
    pub poll_attempts: usize,
    #[clap(
        long,
        help = "Tries per VM step before giving up",
        default_value = "1",
        value_name = "N"
    )]
    pub attempts: usize,
    #[clap(long, help = "Provision VMs concurrently")]
    pub parallel: bool,
    #[clap(
        long,
        help = "Check that a cached service principal still exists before using it"
    )]
    pub verify_credentials: bool,
    #[clap(long, help = "Print the ordered steps and exit without running anything")]
    pub print_plan: bool,
    #[clap(long, help = "With --print-plan, print JSON instead of a table")]
    pub json: bool,
}

impl Opts {
    pub fn config(&self) -> ClusterConfig {
        let mut config = ClusterConfig::new(&self.subscription_id, &self.name);
        config.vm_count = self.vms;
        config.rbac_file = self.rbac.clone();
        config.disk_count = self.disks;
        config.disk_size_gb = self.disk_size;
        config.location = self.location.clone();
        config.root = self.root.clone();
        config.az_binary = self.az.clone();
        config.wait = match self.wait {
            Wait::Fixed => WaitStrategy::Fixed(Duration::from_secs(self.wait_secs)),
            Wait::Poll => WaitStrategy::Poll {
                interval: Duration::from_secs(self.wait_secs),
                attempts: self.poll_attempts,
            },
        };
        config.attempts = self.attempts;
        config.parallel = self.parallel;
        config.verify_credentials = self.verify_credentials;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::try_parse_from(std::iter::once("azdeploy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_ones() {
        let config = parse(&["-s", "sub", "-n", "demo"]).config();
        assert_eq!(config.vm_count, 1);
        assert_eq!(config.disk_count, 2);
        assert_eq!(config.disk_size_gb, 1024);
        assert_eq!(config.rbac_file, PathBuf::from("rbac.json"));
        assert_eq!(config.wait, WaitStrategy::Fixed(Duration::from_secs(30)));
        assert_eq!(config.attempts, 1);
        assert!(!config.parallel);
    }

    #[test]
    fn short_flags() {
        let config = parse(&[
            "-s", "sub", "-n", "demo", "-c", "3", "-r", "sp.json", "-d", "4", "-D", "512",
        ])
        .config();
        assert_eq!(config.vm_count, 3);
        assert_eq!(config.rbac_file, PathBuf::from("sp.json"));
        assert_eq!(config.disk_count, 4);
        assert_eq!(config.disk_size_gb, 512);
    }

    #[test]
    fn poll_wait() {
        let config = parse(&[
            "-s",
            "sub",
            "-n",
            "demo",
            "--wait",
            "poll",
            "--wait-secs",
            "5",
            "--poll-attempts",
            "7",
        ])
        .config();
        assert_eq!(
            config.wait,
            WaitStrategy::Poll {
                interval: Duration::from_secs(5),
                attempts: 7
            }
        );
    }

    #[test]
    fn rejects_invalid_cluster_name() {
        let args = ["azdeploy", "-s", "sub", "-n", "Not_Valid"];
        assert!(Opts::try_parse_from(args.iter()).is_err());
    }
}
