//! Host load sampling and the availability score published for the
//! external load balancer.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::System;
use tracing::debug;

/// 0–100 score from weighted penalties: memory above 80 % penalizes
/// linearly, uptime under one hour earns no bonus, more than 10 active
/// locks penalizes, an uninitialized cross-instance plane subtracts 20.
pub fn availability_score(
    memory_percent: f64,
    uptime_seconds: u64,
    active_locks: usize,
    cross_instance_initialized: bool,
) -> u8 {
    let mut score: f64 = 90.0;
    if uptime_seconds >= 3600 {
        score += 10.0;
    }
    if memory_percent > 80.0 {
        score -= ((memory_percent - 80.0) / 20.0).min(1.0) * 50.0;
    }
    if active_locks > 10 {
        score -= (((active_locks - 10) as f64) * 2.0).min(30.0);
    }
    if !cross_instance_initialized {
        score -= 20.0;
    }
    score.clamp(0.0, 100.0).round() as u8
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadMetrics {
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: u64,
    #[serde(rename = "memoryUsedBytes")]
    pub memory_used_bytes: u64,
    #[serde(rename = "memoryTotalBytes")]
    pub memory_total_bytes: u64,
    #[serde(rename = "memoryPercent")]
    pub memory_percent: f64,
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    #[serde(rename = "loadAverage")]
    pub load_average: [f64; 3],
    #[serde(rename = "activeSockets")]
    pub active_sockets: usize,
    #[serde(rename = "activeLocks")]
    pub active_locks: usize,
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
    #[serde(rename = "availabilityScore")]
    pub availability_score: u8,
}

/// Samples host memory and CPU. `sysinfo` wants a persistent `System` so
/// CPU deltas mean something between calls.
pub struct LoadMonitor {
    system: Mutex<System>,
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new_all()) }
    }

    pub fn sample(
        &self,
        uptime_seconds: u64,
        active_sockets: usize,
        active_locks: usize,
        peer_count: usize,
        cross_instance_initialized: bool,
    ) -> LoadMetrics {
        let (memory_used, memory_total, cpu_percent) = {
            let mut system = match self.system.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            system.refresh_memory();
            system.refresh_cpu_usage();
            (
                system.used_memory(),
                system.total_memory(),
                system.global_cpu_usage() as f64,
            )
        };
        let memory_percent = if memory_total == 0 {
            0.0
        } else {
            memory_used as f64 / memory_total as f64 * 100.0
        };
        let load = System::load_average();
        let score = availability_score(
            memory_percent,
            uptime_seconds,
            active_locks,
            cross_instance_initialized,
        );
        debug!(score, memory_percent, "load sampled");
        LoadMetrics {
            uptime_seconds,
            memory_used_bytes: memory_used,
            memory_total_bytes: memory_total,
            memory_percent,
            cpu_percent,
            load_average: [load.one, load.five, load.fifteen],
            active_sockets,
            active_locks,
            peer_count,
            availability_score: score,
        }
    }
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_long_running_instance_scores_full() {
        assert_eq!(availability_score(50.0, 7200, 0, true), 100);
    }

    #[test]
    fn fresh_instance_gets_no_uptime_bonus() {
        assert_eq!(availability_score(50.0, 60, 0, true), 90);
    }

    #[test]
    fn memory_pressure_penalizes_linearly() {
        let at_85 = availability_score(85.0, 7200, 0, true);
        let at_95 = availability_score(95.0, 7200, 0, true);
        assert!(at_85 > at_95);
        assert_eq!(at_85, 88); // 100 - (5/20)*50
        assert_eq!(at_95, 63); // 100 - (15/20)*50
    }

    #[test]
    fn lock_hoarding_and_missing_bus_penalize() {
        assert_eq!(availability_score(50.0, 7200, 15, true), 90);
        assert_eq!(availability_score(50.0, 7200, 0, false), 80);
    }

    #[test]
    fn score_never_escapes_its_bounds() {
        assert_eq!(availability_score(100.0, 0, 1000, false), 0);
        assert_eq!(availability_score(0.0, u64::MAX, 0, true), 100);
    }
}
