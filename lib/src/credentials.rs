use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::info;

use crate::{
    error::Error,
    executor::{Executor, Invocation},
    plan::Step,
    types::ServicePrincipal,
};

/// Returns the cached service principal at `cache`, creating and caching a
/// new one with `create` when the file doesn't exist yet.
///
/// The raw `az` output is written as-is, so the file is parsed the same way
/// whether it was just created or left over from an earlier run.
pub fn load_or_create(
    cache: &Path,
    create: &Step,
    executor: &dyn Executor,
) -> Result<ServicePrincipal> {
    let raw = if cache.exists() {
        info!("reusing service principal from {}", cache.display());
        fs::read_to_string(cache).map_err(|source| Error::Io {
            path: cache.to_path_buf(),
            source,
        })?
    } else {
        let raw = executor
            .run(&create.invocation)
            .with_context(|| format!("failed to {}", create.name))?;
        fs::write(cache, &raw).map_err(|source| Error::Io {
            path: cache.to_path_buf(),
            source,
        })?;
        raw
    };

    parse(cache, &raw)
}

fn parse(cache: &Path, raw: &str) -> Result<ServicePrincipal> {
    let sp = serde_json::from_str(raw).map_err(|source| Error::Credentials {
        path: cache.to_path_buf(),
        source,
    })?;
    Ok(sp)
}

/// Makes sure the principal behind a cached file still exists; a cache file
/// on its own says nothing about the cloud side.
pub fn verify(sp: &ServicePrincipal, show: &Invocation, executor: &dyn Executor) -> Result<()> {
    executor.run(show).with_context(|| {
        format!(
            "cached service principal {} no longer exists, delete the cache file to create a new one",
            sp.app_id
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{plan::Plan, types::ClusterConfig};
    use std::{path::PathBuf, sync::Mutex};

    const SP: &str = r#"{
  "appId": "11111111-2222-3333-4444-555555555555",
  "displayName": "azure-cli-2017-06-01-00-00-00",
  "name": "http://azure-cli-2017-06-01-00-00-00",
  "password": "secret",
  "tenant": "66666666-7777-8888-9999-000000000000"
}"#;

    struct Canned {
        out: String,
        calls: Mutex<usize>,
    }

    impl Canned {
        fn new(out: &str) -> Canned {
            Canned {
                out: out.to_string(),
                calls: Mutex::new(0),
            }
        }
    }

    impl Executor for Canned {
        fn run(&self, _invocation: &Invocation) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.out.clone())
        }
    }

    fn create_step() -> Step {
        let config = ClusterConfig::new("sub", "demo");
        Plan::build(&config, &PathBuf::from("k.pub"), &PathBuf::from("c.json")).credentials
    }

    #[test]
    fn creates_and_caches_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("rbac.json");
        let executor = Canned::new(SP);

        let sp = load_or_create(&cache, &create_step(), &executor).unwrap();

        assert_eq!(sp.app_id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(fs::read_to_string(&cache).unwrap(), SP);
        assert_eq!(*executor.calls.lock().unwrap(), 1);
    }

    #[test]
    fn cached_file_skips_creation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("rbac.json");
        fs::write(&cache, SP).unwrap();
        let executor = Canned::new("not json");

        let sp = load_or_create(&cache, &create_step(), &executor).unwrap();

        assert_eq!(sp.tenant, "66666666-7777-8888-9999-000000000000");
        assert_eq!(*executor.calls.lock().unwrap(), 0);
    }

    #[test]
    fn malformed_cache_is_a_credentials_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("rbac.json");
        fs::write(&cache, "{ truncated").unwrap();

        let err = load_or_create(&cache, &create_step(), &Canned::new(SP)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Credentials { .. })
        ));
    }
}
