//! Single-use execution environments and the processes run inside them.

mod monitor;
mod output;
mod process;

pub use monitor::{UsageSampler, UsageSummary};
pub use output::{capture, Captured};
pub use process::{run_process, ProcessGroup, ProcessOutcome, ProcessSpec};

use nix::sys::resource::{setrlimit, Resource};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::{fs, process::Command};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{error::Error, languages::validate_file_name};

/// How a run is isolated from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationBackend {
    /// Fresh workspace, cleared environment, dedicated process group
    #[default]
    Process,
    /// `Process` plus kernel resource limits applied before exec
    Rlimit,
}

impl FromStr for IsolationBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(IsolationBackend::Process),
            "rlimit" => Ok(IsolationBackend::Rlimit),
            _ => Err(Error::Config(format!("unknown isolation backend: {}", s))),
        }
    }
}

/// Kernel limits applied by the `Rlimit` backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLimits {
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
}

impl IsolationBackend {
    pub fn configure(&self, command: &mut Command, limits: KernelLimits) {
        match self {
            IsolationBackend::Process => {}
            IsolationBackend::Rlimit => {
                let KernelLimits {
                    cpu_seconds,
                    file_size_bytes,
                } = limits;
                // Only async-signal-safe work between fork and exec.
                unsafe {
                    command.pre_exec(move || {
                        let to_io = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);
                        setrlimit(Resource::RLIMIT_CPU, cpu_seconds, cpu_seconds + 1).map_err(to_io)?;
                        setrlimit(Resource::RLIMIT_FSIZE, file_size_bytes, file_size_bytes).map_err(to_io)?;
                        setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(to_io)?;
                        Ok(())
                    });
                }
            }
        }
    }
}

/// A fresh directory owned by exactly one run, removed on drop
pub struct Workspace {
    /// Root directory for the workspace
    pub root_dir: PathBuf,
    id: String,
}

impl Workspace {
    pub async fn create(base: &Path) -> Result<Self, Error> {
        let id = Uuid::new_v4().to_string();
        let root_dir = base.join(format!("sandbox-{}", id));

        fs::create_dir_all(&root_dir)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;

        // From here on Drop owns the cleanup
        let workspace = Workspace { root_dir, id };

        for dir in &["home", "tmp"] {
            fs::create_dir_all(workspace.root_dir.join(dir))
                .await
                .map_err(|e| Error::Sandbox(format!("Failed to create {} directory: {}", dir, e)))?;
        }

        debug!(id = %workspace.id, root = ?workspace.root_dir, "Created sandbox workspace");
        Ok(workspace)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn home(&self) -> PathBuf {
        self.root_dir.join("home")
    }

    pub fn tmp(&self) -> PathBuf {
        self.root_dir.join("tmp")
    }

    pub async fn write_source(&self, file_name: &str, contents: &str) -> Result<PathBuf, Error> {
        validate_file_name(file_name)?;
        let path = self.root_dir.join(file_name);
        fs::write(&path, contents)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to write source file: {}", e)))?;
        Ok(path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root_dir) {
            error!("Failed to clean up sandbox directory: {}", e);
        }
    }
}
