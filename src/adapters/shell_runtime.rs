use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::service_runtime::{
    RuntimeError, RuntimeResult, ServiceDescriptor, ServiceRuntime,
};

pub const DEFAULT_BUILD_COMMAND: &str = r#"docker build -t "$CANOPY_SERVICE_TAG" ."#;
pub const DEFAULT_START_COMMAND: &str = r#"docker start "$CANOPY_SERVICE_TAG" >/dev/null 2>&1 || docker run -d --rm --name "$CANOPY_SERVICE_TAG" "$CANOPY_SERVICE_TAG""#;
pub const DEFAULT_STOP_COMMAND: &str = r#"docker stop "$CANOPY_SERVICE_TAG""#;

/// ServiceRuntime adapter running each step as `sh -c <command>` inside the
/// service's checkout folder.
///
/// Steps without a configured command fall back to the docker defaults
/// above. Every step sees `CANOPY_SERVICE_ID` and `CANOPY_SERVICE_TAG`.
#[derive(Debug, Clone)]
pub struct ShellRuntime {
    shell: String,
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRuntime {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Image and container name used for `id`.
    pub fn service_tag(id: &str) -> String {
        format!("canopy-{id}").to_ascii_lowercase()
    }

    async fn run_step(
        &self,
        service: &ServiceDescriptor,
        step: &'static str,
        command: &str,
    ) -> RuntimeResult<()> {
        tracing::info!(service = %service.id, step, "Running service step");
        tracing::debug!(service = %service.id, step, command, "Service step command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&service.folder)
            .env("CANOPY_SERVICE_ID", &service.id)
            .env("CANOPY_SERVICE_TAG", Self::service_tag(&service.id))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(service = %service.id, step, %stderr, "Service step failed");
            return Err(RuntimeError::StepFailed {
                service: service.id.clone(),
                step,
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRuntime for ShellRuntime {
    async fn build(&self, service: &ServiceDescriptor) -> RuntimeResult<()> {
        let command = service
            .build_command
            .as_deref()
            .unwrap_or(DEFAULT_BUILD_COMMAND);
        self.run_step(service, "build", command).await
    }

    async fn start(&self, service: &ServiceDescriptor) -> RuntimeResult<()> {
        let command = service
            .start_command
            .as_deref()
            .unwrap_or(DEFAULT_START_COMMAND);
        self.run_step(service, "start", command).await
    }

    async fn stop(&self, service: &ServiceDescriptor) -> RuntimeResult<()> {
        let command = service.stop_command.as_deref().unwrap_or(DEFAULT_STOP_COMMAND);
        self.run_step(service, "stop", command).await
    }
}
