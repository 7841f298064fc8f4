pub mod credentials;
pub mod error;
pub mod executor;
pub mod plan;
pub mod provision;
pub mod ssh;
pub mod types;

pub use error::Error;
pub use executor::{CommandExecutor, Executor, Invocation};
pub use plan::{Plan, Step, VmPlan};
pub use provision::Provisioner;
pub use types::{ClusterConfig, ProvisionedVm, WaitStrategy};

/// Finds the typed error behind an `anyhow` chain, if any.
pub fn root_error(err: &anyhow::Error) -> Option<&Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<Error>())
}
