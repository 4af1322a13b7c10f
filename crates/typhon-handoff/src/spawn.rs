//! Successor process spawning.
//!
//! The successor is launched from the currently running executable's own
//! path with the inherited environment and no extra arguments. Once started
//! it is independent and unsupervised; it acquires its own port-shared
//! listener and the two processes overlap until the predecessor drains.

use std::process::{Command, Stdio};

use tracing::info;

/// Seam for starting the successor process, so the orchestrator can be
/// exercised without forking real processes.
pub trait SpawnSuccessor: Send + Sync {
    /// Start the successor. Returns its pid on success.
    fn spawn_successor(&self) -> std::io::Result<u32>;
}

/// Production spawner: re-executes the current binary.
#[derive(Debug, Default)]
pub struct SelfSpawner;

impl SpawnSuccessor for SelfSpawner {
    fn spawn_successor(&self) -> std::io::Result<u32> {
        let exe = std::env::current_exe()?;
        let child = Command::new(&exe).stdin(Stdio::null()).spawn()?;
        let pid = child.id();
        info!(exe = %exe.display(), pid, "successor process started");
        // Deliberately not waited on: the successor outlives this process.
        drop(child);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A spawner whose target does not exist reports the failure instead of
    /// panicking; the orchestrator depends on getting the Err back.
    struct Unspawnable;

    impl SpawnSuccessor for Unspawnable {
        fn spawn_successor(&self) -> std::io::Result<u32> {
            Command::new("/nonexistent/typhon-successor")
                .spawn()
                .map(|c| c.id())
        }
    }

    #[test]
    fn missing_executable_surfaces_as_error() {
        let err = Unspawnable.spawn_successor().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
