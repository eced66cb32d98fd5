use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

/// Where the PID file lives by default.
pub fn default_pid_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".optchain-capture")
        .join("capture.pid")
}

/// Result of a start/stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Transition {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    Stopped { pid: u32 },
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Owns at most one capture daemon child process plus its PID side file.
pub struct ProcessManager {
    program: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
    child: Option<Child>,
}

impl ProcessManager {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, pid_file: impl Into<PathBuf>) -> Self {
        ProcessManager {
            program: program.into(),
            args,
            pid_file: pid_file.into(),
            child: None,
        }
    }

    /// Manager that launches `<current exe> --config <path> run`.
    pub fn for_capture(config_path: &Path, pid_file: PathBuf) -> Result<Self> {
        let exe = std::env::current_exe().context("locating current executable")?;
        let args = vec![
            "--config".to_string(),
            config_path.display().to_string(),
            "run".to_string(),
        ];
        Ok(Self::new(exe, args, pid_file))
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn start(&mut self) -> Result<Transition> {
        if let Some(pid) = self.running_pid() {
            return Ok(Transition::AlreadyRunning { pid });
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", self.program.display()))?;
        let pid = child.id();
        self.child = Some(child);

        self.write_pid(pid);
        info!(pid, program = %self.program.display(), "capture daemon started");
        Ok(Transition::Started { pid })
    }

    pub fn stop(&mut self) -> Result<Transition> {
        let Some(pid) = self.running_pid() else {
            self.child = None;
            self.clear_pid();
            return Ok(Transition::NotRunning);
        };

        // SIGTERM first, SIGKILL if it is still around after 10s.
        signal(pid, libc::SIGTERM);
        let mut exited = false;
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(500));
            if !self.is_running() {
                exited = true;
                break;
            }
        }
        if !exited {
            warn!(pid, "daemon did not exit after SIGTERM, sending SIGKILL");
            signal(pid, libc::SIGKILL);
            if let Some(child) = self.child.as_mut() {
                let _ = child.wait();
            }
        }

        self.child = None;
        self.clear_pid();
        info!(pid, "capture daemon stopped");
        Ok(Transition::Stopped { pid })
    }

    pub fn status(&mut self) -> DaemonStatus {
        let pid = self.running_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
        }
    }

    /// PID of the live child, falling back to the PID file for a daemon
    /// started by an earlier server instance.
    fn running_pid(&mut self) -> Option<u32> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return Some(child.id()),
                Ok(Some(status)) => {
                    info!(pid = child.id(), %status, "capture daemon exited");
                    self.child = None;
                    self.clear_pid();
                    return None;
                }
                Err(e) => warn!(error = %e, "polling capture daemon"),
            }
        }
        self.read_pid().filter(|&pid| is_pid_alive(pid))
    }

    fn is_running(&mut self) -> bool {
        self.running_pid().is_some()
    }

    fn read_pid(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.pid_file).ok()?;
        raw.trim().parse().ok()
    }

    // PID-file problems never block start/stop.

    fn write_pid(&self, pid: u32) {
        if let Some(parent) = self.pid_file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "cannot create PID directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.pid_file, pid.to_string()) {
            warn!(path = %self.pid_file.display(), error = %e, "cannot write PID file");
        }
    }

    fn clear_pid(&self) {
        match std::fs::remove_file(&self.pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.pid_file.display(), error = %e, "cannot remove PID file"),
        }
    }
}

/// Check if a PID is alive.
pub fn is_pid_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

fn signal(pid: u32, sig: libc::c_int) {
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper(dir: &Path) -> ProcessManager {
        ProcessManager::new("sleep", vec!["30".to_string()], dir.join("run/capture.pid"))
    }

    #[test]
    fn test_start_stop_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = sleeper(dir.path());

        assert_eq!(manager.stop().unwrap(), Transition::NotRunning);

        let Transition::Started { pid } = manager.start().unwrap() else {
            panic!("expected Started");
        };
        assert!(is_pid_alive(pid));
        assert_eq!(std::fs::read_to_string(manager.pid_file()).unwrap(), pid.to_string());
        assert_eq!(manager.start().unwrap(), Transition::AlreadyRunning { pid });
        assert_eq!(
            manager.status(),
            DaemonStatus {
                running: true,
                pid: Some(pid)
            }
        );

        assert_eq!(manager.stop().unwrap(), Transition::Stopped { pid });
        assert!(!manager.pid_file().exists());
        assert!(!manager.status().running);
        assert_eq!(manager.stop().unwrap(), Transition::NotRunning);
    }

    #[test]
    fn test_exited_child_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProcessManager::new("true", Vec::new(), dir.path().join("capture.pid"));
        manager.start().unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(!manager.status().running);
        assert!(!manager.pid_file().exists());
    }

    #[test]
    fn test_stale_pid_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("capture.pid");
        std::fs::write(&pid_file, "not-a-pid").unwrap();
        let mut manager = ProcessManager::new("sleep", vec!["30".to_string()], pid_file);
        assert!(!manager.status().running);
        assert!(matches!(manager.start().unwrap(), Transition::Started { .. }));
        manager.stop().unwrap();
    }
}
