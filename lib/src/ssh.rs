use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;

use crate::{
    error::Error,
    executor::{Executor, Invocation},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub public_key_text: String,
}

pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

pub fn keygen(private_key: &Path) -> Invocation {
    Invocation::new("ssh-keygen")
        .flag("-t", "rsa")
        .flag("-N", "")
        .flag("-f", private_key.display().to_string())
}

/// Generates an RSA keypair at `private_key` unless one is already there.
pub fn ensure_keypair(private_key: &Path, executor: &dyn Executor) -> Result<KeyPair> {
    if private_key.exists() {
        info!("reusing ssh key {}", private_key.display());
    } else {
        executor
            .run(&keygen(private_key))
            .context("ssh-keygen failed")?;
    }

    let public_key = public_key_path(private_key);
    if !public_key.is_file() {
        return Err(Error::MissingPublicKey(public_key).into());
    }
    let public_key_text = fs::read_to_string(&public_key).map_err(|source| Error::Io {
        path: public_key.clone(),
        source,
    })?;

    Ok(KeyPair {
        private_key: private_key.to_path_buf(),
        public_key,
        public_key_text: public_key_text.trim().to_string(),
    })
}
