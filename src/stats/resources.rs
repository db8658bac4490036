//! Process and host figures read at snapshot time.

use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessResources {
    pub resident_bytes: Option<u64>,
    /// OS threads of this process, where the platform lists them
    pub threads: Option<u64>,
    pub live_tasks: Option<usize>,
}

/// Reads this process's figures through `sysinfo`.
///
/// Holds one `System` so a snapshot only refreshes our own pid instead of
/// rebuilding the whole process table.
pub struct ResourceProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ResourceProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve own pid, process figures disabled");
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Live tasks require a Tokio runtime
    pub fn collect(&self) -> ProcessResources {
        let live_tasks = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.metrics().num_alive_tasks());

        let Some(pid) = self.pid else {
            return ProcessResources {
                live_tasks,
                ..ProcessResources::default()
            };
        };

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system.process(pid) {
            Some(process) => ProcessResources {
                resident_bytes: Some(process.memory()),
                threads: process.tasks().map(|tasks| tasks.len() as u64),
                live_tasks,
            },
            None => ProcessResources {
                live_tasks,
                ..ProcessResources::default()
            },
        }
    }
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Static facts about the build and host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub version: String,
    pub rust_version: String,
    pub kernel_version: String,
}

impl SystemInfo {
    pub fn detect() -> Self {
        let rust_version = match env!("CARGO_PKG_RUST_VERSION") {
            "" => "unknown".to_string(),
            v => v.to_string(),
        };

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            rust_version,
            kernel_version: describe_kernel(System::name(), System::kernel_version()),
        }
    }
}

/// "Linux 6.8.0", or whichever half the platform reports
fn describe_kernel(name: Option<String>, release: Option<String>) -> String {
    match (name, release) {
        (Some(name), Some(release)) => format!("{} {}", name, release),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => "unknown".to_string(),
    }
}
