//! Shared test utilities for homelab tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use homelab::config::{Config, HostRoot, Secrets};

pub const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
alice:x:1000:1000:Alice:/home/alice:/bin/bash\n";

/// Test environment: a scratch host root plus project directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Stands in for `/`
    pub host_root: PathBuf,
    pub secrets_dir: PathBuf,
    pub stack_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Project root simulation
    pub base_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();

        let env = Self {
            host_root: base.join("root"),
            secrets_dir: base.join("secrets"),
            stack_dir: base.join("docker-compose"),
            output_dir: base.join("output"),
            backup_dir: base.join("backups"),
            base_dir: base,
            _temp_dir: temp_dir,
        };
        for dir in [&env.host_root, &env.secrets_dir, &env.stack_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }
        fs::create_dir_all(env.host_root.join("etc")).expect("Failed to create etc");
        fs::write(env.host_root.join("etc/passwd"), PASSWD).expect("Failed to write passwd");
        env
    }

    /// Host path inside the scratch root.
    pub fn host(&self, path: &str) -> PathBuf {
        HostRoot::new(&self.host_root).path(path)
    }

    pub fn write_secret_file(&self, name: &str, content: &str) {
        fs::write(self.secrets_dir.join(name), content).expect("Failed to write secrets file");
    }

    /// Config pointing every directory into the temp dir.
    pub fn config(&self) -> Config {
        Config {
            secrets_dir: self.secrets_dir.clone(),
            stack_dir: self.stack_dir.clone(),
            output_dir: self.output_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            host_root: HostRoot::new(&self.host_root),
            secrets: Secrets::load_dir(&self.secrets_dir).expect("Failed to load secrets"),
        }
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

pub fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).expect("stat").permissions().mode() & 0o777
}

/// Run a test body with `SUDO_USER` pointing at the passwd fixture's admin.
pub fn with_admin<T>(f: impl FnOnce() -> T) -> T {
    let previous = std::env::var("SUDO_USER").ok();
    std::env::set_var("SUDO_USER", "alice");
    let result = f();
    match previous {
        Some(v) => std::env::set_var("SUDO_USER", v),
        None => std::env::remove_var("SUDO_USER"),
    }
    result
}
