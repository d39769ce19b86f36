//! Compose binary detection and invocation.

use anyhow::{bail, Result};
use std::path::Path;

use crate::process::{self, Cmd};

/// Which compose implementation the host has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeBinary {
    /// `docker compose` (v2 plugin)
    Plugin,
    /// `docker-compose` (standalone v1/v2 binary)
    Standalone,
}

impl ComposeBinary {
    /// Prefer the plugin, fall back to the standalone binary.
    pub fn detect() -> Result<Self> {
        if process::exists("docker") {
            let plugin = Cmd::new("docker")
                .args(["compose", "version"])
                .allow_fail()
                .run()?;
            if plugin.success() {
                return Ok(Self::Plugin);
            }
        }
        if process::exists("docker-compose") {
            return Ok(Self::Standalone);
        }
        bail!(
            "Neither 'docker compose' nor 'docker-compose' is available.\n\
             Install docker-compose-plugin (or docker-compose) first."
        );
    }

    /// Base command for a project, before the subcommand.
    pub fn command(self, project_dir: &Path, compose_file: &Path, env_file: &Path) -> Cmd {
        let cmd = match self {
            Self::Plugin => Cmd::new("docker").arg("compose"),
            Self::Standalone => Cmd::new("docker-compose"),
        };
        cmd.dir(project_dir)
            .arg("--project-directory")
            .arg_path(project_dir)
            .arg("-f")
            .arg_path(compose_file)
            .arg("--env-file")
            .arg_path(env_file)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Plugin => "docker compose",
            Self::Standalone => "docker-compose",
        }
    }
}
