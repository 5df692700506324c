use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Pid, RefreshKind, System};

#[derive(Debug, Clone)]
pub struct StageStats {
    pub memory_usage_mb: u64,
    pub peak_memory_mb: u64,
    pub elapsed_secs: f64,
}

/// Process-level resource monitor for long identification runs.
pub struct SystemMonitor {
    system: Arc<Mutex<System>>,
    pid: Pid,
    start_time: Instant,
    peak_memory: Arc<Mutex<u64>>,
    enabled: bool,
}

impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let mut system = System::new_with_specifics(RefreshKind::everything());
        system.refresh_all();

        let pid = sysinfo::get_current_pid().unwrap_or(Pid::from_u32(0));

        Self {
            system: Arc::new(Mutex::new(system)),
            pid,
            start_time: Instant::now(),
            peak_memory: Arc::new(Mutex::new(0)),
            enabled,
        }
    }

    pub fn stats(&self) -> Option<StageStats> {
        if !self.enabled {
            return None;
        }

        let mut system = self.system.lock().ok()?;
        system.refresh_all();

        let process = system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;

        let peak = {
            let mut peak = self.peak_memory.lock().ok()?;
            if memory_mb > *peak {
                *peak = memory_mb;
            }
            *peak
        };

        Some(StageStats {
            memory_usage_mb: memory_mb,
            peak_memory_mb: peak,
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        })
    }

    /// Log a snapshot tagged with the pipeline stage that just finished.
    pub fn log_stage(&self, stage: &str) {
        if let Some(stats) = self.stats() {
            tracing::info!(
                "stage '{}' done: {:.1}s elapsed, {} MB resident (peak {} MB)",
                stage,
                stats.elapsed_secs,
                stats.memory_usage_mb,
                stats.peak_memory_mb
            );
        }
    }
}
