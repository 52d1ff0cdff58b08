//! Process resource sampler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentlink_client::{Reporter, stopped};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{MonitorError, MonitorResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Data id samples are reported to; `<= 0` disables the sampler.
    pub target_id: i32,
    pub period: Duration,
    /// Window the CPU percentage is measured over.
    pub cpu_window: Duration,
}

impl SamplerConfig {
    pub const fn new(target_id: i32) -> Self {
        Self {
            target_id,
            period: Duration::from_secs(60),
            cpu_window: Duration::from_secs(3),
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.target_id > 0
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// One resource record, as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Percent of one core over the sampling window
    pub cpu: f32,
    pub mem: MemorySample,
    /// Open descriptors; `None` where the platform does not expose them.
    pub fd: Option<usize>,
}

/// Memory usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub rss: u64,
    pub vms: u64,
}

/// Reports this process's resource usage once per period.
pub struct ResourceSampler {
    config: SamplerConfig,
    reporter: Arc<dyn Reporter>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ResourceSampler {
    pub fn new(config: SamplerConfig, reporter: Arc<dyn Reporter>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            reporter,
            stop,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Launch the sampling task. A disabled sampler never launches one.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> MonitorResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::AlreadyStarted);
        }

        if !self.config.is_enabled() {
            info!(target_id = self.config.target_id, "resource sampler disabled");
            return Ok(());
        }

        info!(target_id = self.config.target_id, "resource sampler started");
        let handle = tokio::spawn(sample_loop(
            self.config.clone(),
            Arc::clone(&self.reporter),
            self.stop.subscribe(),
        ));
        match self.task.lock() {
            Ok(mut task) => *task = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|t| !t.is_finished()),
        }
    }

    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "resource sampler task ended abnormally");
            }
            info!("resource sampler stopped");
        }
    }
}

async fn sample_loop(
    config: SamplerConfig,
    reporter: Arc<dyn Reporter>,
    mut stop: watch::Receiver<bool>,
) {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            error!(error = e, "cannot resolve own pid, resource sampler exiting");
            return;
        }
    };
    let mut system = System::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + config.period, config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stopped(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        // CPU usage is the delta between two refreshes
        refresh(&mut system, pid);
        tokio::select! {
            biased;
            () = stopped(&mut stop) => break,
            () = tokio::time::sleep(config.cpu_window) => {}
        }
        refresh(&mut system, pid);

        let Some(sample) = sample(&system, pid) else {
            warn!(%pid, "own process missing from process table");
            continue;
        };
        debug!(cpu = sample.cpu, rss = sample.mem.rss, fd = ?sample.fd, "resource sample");

        match serde_json::to_value(&sample) {
            Ok(payload) => {
                if let Err(e) = reporter.report(config.target_id, payload).await {
                    warn!(target_id = config.target_id, error = %e, "resource report rejected");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize resource sample"),
        }
    }
}

fn refresh(system: &mut System, pid: Pid) {
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
}

fn sample(system: &System, pid: Pid) -> Option<ResourceSample> {
    let process = system.process(pid)?;
    Some(ResourceSample {
        cpu: process.cpu_usage(),
        mem: MemorySample {
            rss: process.memory(),
            vms: process.virtual_memory(),
        },
        fd: open_fd_count(),
    })
}

#[cfg(target_os = "linux")]
fn open_fd_count() -> Option<usize> {
    std::fs::read_dir("/proc/self/fd")
        .ok()
        .map(|entries| entries.count())
}

#[cfg(not(target_os = "linux"))]
fn open_fd_count() -> Option<usize> {
    None
}
