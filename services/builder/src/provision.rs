//! Provisioning hook run between "instance ready" and "create image".

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use smith_id::InstanceId;
use smith_reconcile::{CallContext, Interrupted};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::compute::InstanceCredentials;

pub const ENV_HOST: &str = "IMAGESMITH_HOST";
pub const ENV_INSTANCE_ID: &str = "IMAGESMITH_INSTANCE_ID";
pub const ENV_USERNAME: &str = "IMAGESMITH_WINDOWS_USERNAME";
pub const ENV_PASSWORD: &str = "IMAGESMITH_WINDOWS_PASSWORD";

/// The running build instance, reachable at `host`.
#[derive(Debug, Clone)]
pub struct ProvisionTarget {
    pub instance_id: InstanceId,
    pub host: String,
    pub credentials: Option<InstanceCredentials>,
}

impl ProvisionTarget {
    /// Environment handed to provisioning commands.
    pub fn env(&self) -> BTreeMap<&'static str, String> {
        let mut env = BTreeMap::new();
        env.insert(ENV_HOST, self.host.clone());
        env.insert(ENV_INSTANCE_ID, self.instance_id.to_string());
        if let Some(credentials) = &self.credentials {
            env.insert(ENV_USERNAME, credentials.username.clone());
            env.insert(ENV_PASSWORD, credentials.password.clone());
        }
        env
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to start provisioning command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("provisioning command {command:?} failed with exit code {code:?}")]
    Failed { command: String, code: Option<i32> },

    #[error("provisioning interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

/// Prepares the running instance before it is imaged.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        ctx: &CallContext,
        target: &ProvisionTarget,
    ) -> Result<(), ProvisionError>;
}

/// Leaves the instance as launched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision(
        &self,
        _ctx: &CallContext,
        target: &ProvisionTarget,
    ) -> Result<(), ProvisionError> {
        info!(instance_id = %target.instance_id, host = %target.host, "No provisioning configured");
        Ok(())
    }
}

/// Runs a local shell command with the target in its environment.
///
/// The command's stdout is forwarded to stderr so it never mixes with the
/// build artifact. It is killed if the run is interrupted.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    command: String,
}

impl CommandProvisioner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision(
        &self,
        ctx: &CallContext,
        target: &ProvisionTarget,
    ) -> Result<(), ProvisionError> {
        ctx.check()?;

        info!(
            instance_id = %target.instance_id,
            host = %target.host,
            command = %self.command,
            "Running provisioning command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .envs(target.env())
            .stdin(Stdio::null())
            .stdout(std::io::stderr())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProvisionError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let status = ctx
            .run(child.wait())
            .await?
            .map_err(|source| ProvisionError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ProvisionError::Failed {
                command: self.command.clone(),
                code: status.code(),
            });
        }

        info!(instance_id = %target.instance_id, "Provisioning command finished");
        Ok(())
    }
}
