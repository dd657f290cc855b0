// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Resource supervision of sandboxed units.
//!
//! The monitor samples wall-clock time, resident memory and CPU of a running
//! unit at a fixed interval. On a limit breach it cancels the shared
//! termination token; the executor then kills the unit with SIGKILL. The
//! supervised unit never observes the monitor except through that signal —
//! termination is not cooperative.
//!
//! A breach is a successful detection, not a monitor error: the report says
//! what was breached and what was consumed, and the caller decides how to
//! surface it.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::policy::ResourceLimits;
use crate::domain::sandbox::ResourceUsage;

const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Which limit was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitBreach {
    WallClock,
    Memory,
    Cpu,
}

impl std::fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LimitBreach::WallClock => "wall_clock",
            LimitBreach::Memory => "memory",
            LimitBreach::Cpu => "cpu",
        };
        f.write_str(s)
    }
}

/// Outcome of one supervision run.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    /// `None` when the unit finished on its own.
    pub breach: Option<LimitBreach>,
    pub usage: ResourceUsage,
}

/// Samples a running unit and triggers forced termination on breach.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    sample_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    pub fn with_interval(sample_interval: Duration) -> Self {
        Self { sample_interval }
    }

    /// Supervise `pid` until it exits (the caller cancels `token`) or a
    /// limit is breached (the monitor cancels `token`).
    ///
    /// On non-Linux targets memory/CPU sampling is unavailable and
    /// enforcement degrades to wall-clock only.
    pub async fn supervise(
        &self,
        pid: u32,
        limits: ResourceLimits,
        token: CancellationToken,
    ) -> MonitorReport {
        let start = Instant::now();
        let mut peak_memory: u64 = 0;
        let mut cpu_time = Duration::ZERO;
        let mut last_cpu: Option<Duration> = None;
        let mut last_sample = start;

        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    // Unit finished; report what was observed.
                    return MonitorReport {
                        breach: None,
                        usage: ResourceUsage {
                            elapsed: start.elapsed(),
                            peak_memory_bytes: peak_memory,
                            cpu_time,
                        },
                    };
                }
                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            if elapsed > limits.max_execution_time {
                return self.breach(LimitBreach::WallClock, elapsed, peak_memory, cpu_time, &token);
            }

            if let Some(sample) = sample_process(pid) {
                peak_memory = peak_memory.max(sample.rss_bytes);
                if sample.rss_bytes > limits.max_memory_bytes {
                    return self.breach(LimitBreach::Memory, elapsed, peak_memory, sample.cpu_time, &token);
                }

                // CPU utilization over the sampling window; the first window
                // has no baseline and is skipped.
                if let Some(previous) = last_cpu {
                    let window = last_sample.elapsed();
                    if !window.is_zero() && sample.cpu_time > previous {
                        let busy = sample.cpu_time - previous;
                        let percent = busy.as_secs_f64() / window.as_secs_f64() * 100.0;
                        if percent > limits.max_cpu_percent {
                            return self.breach(
                                LimitBreach::Cpu,
                                elapsed,
                                peak_memory,
                                sample.cpu_time,
                                &token,
                            );
                        }
                    }
                }
                last_cpu = Some(sample.cpu_time);
                last_sample = Instant::now();
                cpu_time = sample.cpu_time;
            }
        }
    }

    fn breach(
        &self,
        kind: LimitBreach,
        elapsed: Duration,
        peak_memory: u64,
        cpu_time: Duration,
        token: &CancellationToken,
    ) -> MonitorReport {
        warn!(breach = %kind, elapsed_ms = elapsed.as_millis() as u64, "resource limit breached, terminating unit");
        token.cancel();
        MonitorReport {
            breach: Some(kind),
            usage: ResourceUsage {
                elapsed,
                peak_memory_bytes: peak_memory,
                cpu_time,
            },
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

struct ProcessSample {
    rss_bytes: u64,
    cpu_time: Duration,
}

/// Read RSS and cumulative CPU time of `pid` from `/proc`.
#[cfg(target_os = "linux")]
fn sample_process(pid: u32) -> Option<ProcessSample> {
    let statm = std::fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }

    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces; fields of interest follow the closing paren.
    let after_comm = stat.rsplit(')').next()?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Overall fields 14 (utime) and 15 (stime); the slice starts at field 3.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec <= 0 {
        return None;
    }

    Some(ProcessSample {
        rss_bytes: rss_pages * page_size as u64,
        cpu_time: Duration::from_millis((utime + stime) * 1000 / ticks_per_sec as u64),
    })
}

#[cfg(not(target_os = "linux"))]
fn sample_process(_pid: u32) -> Option<ProcessSample> {
    tracing::debug!("process sampling unavailable on this target; wall-clock enforcement only");
    None
}
