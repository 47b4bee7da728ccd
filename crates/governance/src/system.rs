//! Process state capture for failure records.

use chrono::Utc;
use sysinfo::{get_current_pid, ProcessesToUpdate, System};

use bastion_core::types::SystemSnapshot;

/// Capture the current process state. Fields the platform cannot report
/// stay `None`.
pub fn capture_snapshot() -> SystemSnapshot {
    let mut snapshot = SystemSnapshot {
        captured_at: Some(Utc::now()),
        pid: Some(std::process::id()),
        ..Default::default()
    };

    let Ok(pid) = get_current_pid() else {
        return snapshot;
    };

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    if let Some(process) = sys.process(pid) {
        snapshot.rss_bytes = Some(process.memory());
        snapshot.uptime_ms = Some(process.run_time().saturating_mul(1000));
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_identifies_process() {
        let snapshot = capture_snapshot();
        assert_eq!(snapshot.pid, Some(std::process::id()));
        assert!(snapshot.captured_at.is_some());
    }
}
