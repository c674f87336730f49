//! Single-instance handover through a process-identity file.
//!
//! A newly started controller signals whichever process the file names and
//! then records itself. This converges to one survivor when instances are
//! started one after another; it is not a lock and simultaneous starts can
//! still race between the read and the overwrite.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{AppConfig, Result};

/// Outcome of dealing with a previously recorded instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handover {
    /// No identity file existed.
    NoPredecessor,
    /// The recorded process was sent SIGTERM.
    Signalled(i32),
    /// The recorded process no longer exists.
    AlreadyGone(i32),
    /// The file was unreadable or did not name another process.
    Stale,
    /// Signalling failed for another reason (typically EPERM).
    SignalFailed(i32),
}

#[derive(Debug, Clone)]
pub struct InstanceGuard {
    pid_file: PathBuf,
    pid: u32,
}

impl InstanceGuard {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            pid_file: config.paths.pid_file.clone(),
            pid: std::process::id(),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Terminates any recorded predecessor, then records this process.
    ///
    /// Every predecessor outcome is non-fatal; only failing to write our own
    /// record is reported as an error.
    pub fn ensure_single_instance(&self) -> Result<Handover> {
        let handover = self.terminate_predecessor();
        match handover {
            Handover::Signalled(pid) => tracing::info!(pid, "terminated previous instance"),
            Handover::AlreadyGone(pid) => tracing::debug!(pid, "previous instance already exited"),
            Handover::Stale => tracing::debug!(path = %self.pid_file.display(), "ignoring stale process-identity file"),
            Handover::SignalFailed(_) | Handover::NoPredecessor => {}
        }

        self.claim()?;
        tracing::debug!(pid = self.pid, path = %self.pid_file.display(), "recorded instance");
        Ok(handover)
    }

    /// Removes the identity file if it still names this process. Errors are
    /// swallowed; a leftover file is treated as stale by the next start.
    pub fn cleanup(&self) {
        match fs::read_to_string(&self.pid_file) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Ok(contents) => {
                if let Ok(owner) = contents.trim().parse::<u32>() {
                    if owner != self.pid {
                        tracing::debug!(owner, "identity file belongs to a newer instance, leaving it");
                        return;
                    }
                }
            }
            Err(_) => {}
        }

        if let Err(err) = fs::remove_file(&self.pid_file) {
            tracing::debug!(path = %self.pid_file.display(), error = %err, "could not remove process-identity file");
        }
    }

    fn terminate_predecessor(&self) -> Handover {
        let contents = match fs::read_to_string(&self.pid_file) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Handover::NoPredecessor,
            Err(_) => return Handover::Stale,
        };

        let pid = match contents.trim().parse::<i32>() {
            Ok(pid) if pid > 0 && pid as u32 != self.pid => pid,
            // Zero and negative ids address process groups.
            _ => return Handover::Stale,
        };

        match send_terminate(pid) {
            Ok(()) => Handover::Signalled(pid),
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => Handover::AlreadyGone(pid),
            Err(err) => {
                tracing::warn!(pid, error = %err, "failed to signal previous instance");
                Handover::SignalFailed(pid)
            }
        }
    }

    fn claim(&self) -> Result<()> {
        if let Some(dir) = self.pid_file.parent() {
            fs::create_dir_all(dir)?;
        }
        // Rename keeps readers from ever seeing a partially written id.
        let staging = self.pid_file.with_extension(format!("pid.{}.tmp", self.pid));
        fs::write(&staging, self.pid.to_string())?;
        fs::rename(&staging, &self.pid_file).inspect_err(|_| {
            let _ = fs::remove_file(&staging);
        })?;
        Ok(())
    }
}

fn send_terminate(pid: i32) -> io::Result<()> {
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    use tempfile::TempDir;

    use super::*;

    fn guard() -> (TempDir, InstanceGuard) {
        let dir = tempfile::tempdir().unwrap();
        let guard = InstanceGuard::new(&AppConfig::with_config_dir(dir.path().join("cfg")));
        (dir, guard)
    }

    fn recorded(guard: &InstanceGuard) -> String {
        fs::read_to_string(guard.pid_file()).unwrap()
    }

    fn write_record(guard: &InstanceGuard, contents: &str) {
        fs::create_dir_all(guard.pid_file().parent().unwrap()).unwrap();
        fs::write(guard.pid_file(), contents).unwrap();
    }

    #[test]
    fn first_start_records_own_pid() {
        let (_dir, guard) = guard();

        assert_eq!(guard.ensure_single_instance().unwrap(), Handover::NoPredecessor);
        assert_eq!(recorded(&guard), std::process::id().to_string());
    }

    #[test]
    fn previous_instance_is_terminated_and_replaced() {
        let (_dir, guard) = guard();
        let mut previous = Command::new("sleep").arg("30").spawn().unwrap();
        let previous_pid = previous.id() as i32;
        write_record(&guard, &format!("{previous_pid}\n"));

        let handover = guard.ensure_single_instance().unwrap();

        assert_eq!(handover, Handover::Signalled(previous_pid));
        let status = previous.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
        assert_eq!(recorded(&guard), std::process::id().to_string());
    }

    #[test]
    fn vanished_predecessor_is_not_an_error() {
        let (_dir, guard) = guard();
        write_record(&guard, &i32::MAX.to_string());

        assert_eq!(
            guard.ensure_single_instance().unwrap(),
            Handover::AlreadyGone(i32::MAX)
        );
        assert_eq!(recorded(&guard), std::process::id().to_string());
    }

    #[test]
    fn garbage_and_unsafe_ids_are_stale() {
        let (_dir, guard) = guard();
        let own = std::process::id().to_string();
        for contents in ["not-a-pid", "", "0", "-1", own.as_str()] {
            write_record(&guard, contents);
            assert_eq!(guard.ensure_single_instance().unwrap(), Handover::Stale);
            assert_eq!(recorded(&guard), own);
        }
    }

    #[test]
    fn cleanup_removes_own_record() {
        let (_dir, guard) = guard();
        guard.ensure_single_instance().unwrap();

        guard.cleanup();
        assert!(!guard.pid_file().exists());

        // Nothing left to remove.
        guard.cleanup();
    }

    #[test]
    fn cleanup_leaves_successor_record_alone() {
        let (_dir, guard) = guard();
        guard.ensure_single_instance().unwrap();
        write_record(&guard, "4242");

        guard.cleanup();
        assert_eq!(recorded(&guard), "4242");
    }

    #[test]
    fn cleanup_removes_corrupt_record() {
        let (_dir, guard) = guard();
        write_record(&guard, "garbage");

        guard.cleanup();
        assert!(!guard.pid_file().exists());
    }
}
