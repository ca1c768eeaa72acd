//! Thin wrapper over the `docker` CLI for building and pushing images

use crate::command::{CommandConfig, CommandError, run_command};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    config: CommandConfig,
}

impl DockerCli {
    pub fn new(build_timeout_secs: u64) -> Self {
        Self {
            program: "docker".to_string(),
            config: CommandConfig::for_build(build_timeout_secs),
        }
    }

    /// Use a different binary (e.g. `podman`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Log in to a registry; the password goes over stdin
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
    ) -> Result<(), CommandError> {
        info!(registry = %registry, "Logging in to registry");
        run_command(
            &self.program,
            &["login", "--username", username, "--password-stdin", registry],
            Some(password),
            &CommandConfig::with_timeout_secs(120),
        )
        .await?;
        Ok(())
    }

    pub async fn build(
        &self,
        context: &Path,
        dockerfile: Option<&Path>,
        platform: &str,
        tag: &str,
    ) -> Result<(), CommandError> {
        let context = context.to_string_lossy();
        let dockerfile = dockerfile.map(|p| p.to_string_lossy().into_owned());

        let mut args = vec!["build", "--platform", platform, "-t", tag];
        if let Some(dockerfile) = &dockerfile {
            args.extend(["-f", dockerfile.as_str()]);
        }
        args.push(&context);

        info!(tag = %tag, platform = %platform, context = %context, "Building image");
        run_command(&self.program, &args, None, &self.config).await?;
        Ok(())
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<(), CommandError> {
        run_command(
            &self.program,
            &["tag", source, target],
            None,
            &CommandConfig::with_timeout_secs(60),
        )
        .await?;
        Ok(())
    }

    pub async fn push(&self, reference: &str) -> Result<(), CommandError> {
        info!(reference = %reference, "Pushing image");
        run_command(&self.program, &["push", reference], None, &self.config).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_command_reports_program() {
        // `false` ignores its arguments and exits 1
        let docker = DockerCli::new(10).with_program("false");
        let err = docker.push("repo:tag").await.unwrap_err();
        assert!(matches!(err, CommandError::Failed { code: Some(1), .. }));
        assert_eq!(err.command(), "false push");
    }
}
