use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::source_control::{SourceControl, SourceControlError, SourceControlResult};

/// SourceControl adapter driving the `git` executable.
///
/// A checkout is a shallow fetch of exactly one commit into a fresh
/// repository, so `folder` never carries history beyond the pinned commit.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a different git executable, e.g. an absolute path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, folder: &Path, args: &[&str]) -> SourceControlResult<String> {
        tracing::debug!(folder = %folder.display(), args = ?args, "Running git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(folder)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SourceControlError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    async fn output_is(&self, folder: &Path, args: &[&str], expected: &str) -> bool {
        matches!(self.run(folder, args).await, Ok(out) if out == expected)
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn is_checked_out(&self, folder: &Path, remote: &str, commit: &str) -> bool {
        if !tokio::fs::metadata(folder)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return false;
        }

        self.output_is(folder, &["rev-parse", "--is-inside-work-tree"], "true")
            .await
            && self
                .output_is(folder, &["remote", "get-url", "origin"], remote)
                .await
            && self.output_is(folder, &["rev-parse", "HEAD"], commit).await
    }

    async fn checkout(&self, folder: &Path, remote: &str, commit: &str) -> SourceControlResult<()> {
        tracing::info!(
            folder = %folder.display(),
            remote,
            commit,
            "Checking out service source"
        );

        match tokio::fs::remove_dir_all(folder).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(folder).await?;

        self.run(folder, &["init", "."]).await?;
        self.run(folder, &["remote", "add", "origin", remote]).await?;
        self.run(folder, &["fetch", "origin", commit, "--depth", "1"])
            .await?;
        self.run(folder, &["reset", "--hard", "FETCH_HEAD"]).await?;
        Ok(())
    }
}
