use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Serializer, Value};
use tokio::task::JoinHandle;

use crate::{
    credentials,
    error::Error,
    executor::Executor,
    plan::{self, Plan, Step, VmPlan},
    ssh,
    types::{ClusterConfig, ConfigScript, ProvisionedVm, VmDetails, WaitStrategy},
};

pub struct Provisioner {
    config: ClusterConfig,
    executor: Arc<dyn Executor>,
}

impl Provisioner {
    pub fn new(config: ClusterConfig, executor: Arc<dyn Executor>) -> Provisioner {
        Provisioner { config, executor }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Runs the whole sequence top to bottom. The first failing step aborts
    /// the run and whatever was created on Azure so far is left in place.
    pub async fn run(&self) -> Result<Vec<ProvisionedVm>> {
        let dir = prepare_output_dir(&self.config.output_dir())?;
        let keys = ssh::ensure_keypair(&self.config.ssh_key_path(), self.executor.as_ref())?;
        let config_script = self.config.config_script_path();
        let plan = Plan::build(&self.config, &keys.public_key, &config_script);

        self.step(&plan.account)?;

        let sp = credentials::load_or_create(
            &self.config.rbac_path(),
            &plan.credentials,
            self.executor.as_ref(),
        )?;
        if self.config.verify_credentials {
            let show = plan::service_principal_show(&self.config, &sp.app_id);
            credentials::verify(&sp, &show, self.executor.as_ref())?;
        }

        write_config_script(&config_script, self.config.disk_count)?;

        for step in plan.resources.iter() {
            self.step(step)?;
        }

        self.wait_for_resources().await?;

        let vms = VmProvisioner {
            executor: Arc::clone(&self.executor),
            dir,
            attempts: self.config.attempts.max(1),
            retry_delay: self.config.retry_delay,
        };
        vms.provision_all(plan.vms, self.config.parallel).await
    }

    fn step(&self, step: &Step) -> Result<String> {
        info!("{}", step.name);
        self.executor
            .run(&step.invocation)
            .with_context(|| format!("failed to {}", step.name))
    }

    async fn wait_for_resources(&self) -> Result<()> {
        match self.config.wait {
            WaitStrategy::Fixed(duration) => {
                info!("waiting {:?} for resources to settle", duration);
                tokio::time::sleep(duration).await;
                Ok(())
            }
            WaitStrategy::Poll { interval, attempts } => {
                let probe = plan::readiness_probe(&self.config);
                for attempt in 1..=attempts {
                    let out = self.executor.run(&probe)?;
                    let pending: Vec<&str> = out
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .collect();
                    if pending.is_empty() {
                        return Ok(());
                    }
                    info!(
                        "waiting for {} ({}/{})",
                        pending.join(", "),
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(interval).await;
                }
                Err(Error::ExhaustedAttempts(attempts).into())
            }
        }
    }
}

#[derive(Clone)]
struct VmProvisioner {
    executor: Arc<dyn Executor>,
    dir: PathBuf,
    attempts: usize,
    retry_delay: Duration,
}

impl VmProvisioner {
    /// VM work runs on blocking workers since `retry` sleeps between tries.
    /// Sequential runs stop at the first failed VM; parallel runs let every
    /// started VM finish before reporting the first failure.
    async fn provision_all(&self, vms: Vec<VmPlan>, parallel: bool) -> Result<Vec<ProvisionedVm>> {
        if !parallel {
            let mut provisioned = Vec::with_capacity(vms.len());
            for vm in vms.into_iter() {
                provisioned.push(self.spawn(vm).await??);
            }
            return Ok(provisioned);
        }

        let handles: Vec<JoinHandle<Result<ProvisionedVm>>> =
            vms.into_iter().map(|vm| self.spawn(vm)).collect();

        let mut provisioned = Vec::with_capacity(handles.len());
        let mut first_err = None;
        for handle in handles.into_iter() {
            match handle.await.map_err(anyhow::Error::from).and_then(|res| res) {
                Ok(vm) => provisioned.push(vm),
                Err(err) => {
                    warn!("{:#}", err);
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(provisioned),
        }
    }

    fn spawn(&self, vm: VmPlan) -> JoinHandle<Result<ProvisionedVm>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.provision(&vm))
    }

    fn provision(&self, vm: &VmPlan) -> Result<ProvisionedVm> {
        info!("provision {}", vm.name);
        let created = self.retry(&vm.create)?;
        let output = self.dir.join(format!("{}.json", vm.name));
        let details = write_vm_output(&output, &created)?;

        for disk in vm.disks.iter() {
            self.retry(disk)?;
        }
        self.retry(&vm.extension)?;

        Ok(ProvisionedVm::new(&vm.name, details, &output))
    }

    fn retry(&self, step: &Step) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.executor.run(&step.invocation) {
                Ok(out) => return Ok(out),
                Err(err) if attempt < self.attempts => {
                    warn!(
                        "{} failed (try {} of {}): {:#}",
                        step.name, attempt, self.attempts, err
                    );
                    thread::sleep(self.retry_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err.context(format!("failed to {}", step.name))),
            }
        }
    }
}

/// Creates the cluster's output directory, reusing it if it's already there.
pub fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        info!("created {}", dir.display());
    } else if !dir.is_dir() {
        return Err(Error::NotADirectory(dir.to_path_buf()).into());
    }
    Ok(dir.to_path_buf())
}

pub fn write_config_script(path: &Path, disk_count: usize) -> Result<()> {
    let json = serde_json::to_string(&ConfigScript::for_disks(disk_count))?;
    fs::write(path, json).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Persists `az vm create` output and picks out the addresses.
pub fn write_vm_output(path: &Path, stdout: &str) -> Result<VmDetails> {
    let value: Value = serde_json::from_str(stdout)
        .with_context(|| format!("az vm create returned invalid JSON for {}", path.display()))?;
    write_json(path, &value)?;
    // Only used for the summary, so an unexpected shape isn't fatal.
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Four-space indented JSON.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    data.serialize(&mut ser)?;
    fs::write(path, buf).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_is_created_once_and_reused() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("demo");
        prepare_output_dir(&dir).unwrap();
        assert!(dir.is_dir());
        fs::write(dir.join("marker"), "x").unwrap();
        prepare_output_dir(&dir).unwrap();
        assert!(dir.join("marker").exists());
    }

    #[test]
    fn file_in_the_way_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("demo");
        fs::write(&dir, "").unwrap();
        let err = prepare_output_dir(&dir).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NotADirectory(_))
        ));
    }

    #[test]
    fn vm_output_is_indented_json() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("memsql-vm-1.json");
        let details = write_vm_output(
            &path,
            r#"{"privateIpAddress":"192.168.1.101","publicIpAddress":"1.2.3.4","fqdns":"demo.westus2.cloudapp.azure.com","powerState":"VM running"}"#,
        )
        .unwrap();

        assert_eq!(details.private_ip_address, "192.168.1.101");
        assert_eq!(details.public_ip_address, "1.2.3.4");
        assert_eq!(details.power_state.as_deref(), Some("VM running"));
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n    \"fqdns\""));
    }

    #[test]
    fn config_script_written_compact() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("config-script.json");
        write_config_script(&path, 3).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains('\n'));
        let script: ConfigScript = serde_json::from_str(&written).unwrap();
        assert!(script.command_to_execute.ends_with('3'));
    }
}
