//! Monotonic counters for bus masters and the filesystem engine

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-bus statistics, one counter each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusStat {
    Reconnects,
    ReconnectErrors,
    Locks,
    Unlocks,
    Errors,
    Resets,
    ResetErrors,
    ShortErrors,
    ProgramErrors,
    PullupErrors,
    Timeouts,
    ReadErrors,
    WriteErrors,
    DetectErrors,
    OpenErrors,
    CloseErrors,
    SearchErrors1,
    SearchErrors2,
    SearchErrors3,
    StatusErrors,
    SelectErrors,
    TryOverdrive,
    FailedOverdrive,
}

impl BusStat {
    pub const ALL: [BusStat; 23] = [
        BusStat::Reconnects,
        BusStat::ReconnectErrors,
        BusStat::Locks,
        BusStat::Unlocks,
        BusStat::Errors,
        BusStat::Resets,
        BusStat::ResetErrors,
        BusStat::ShortErrors,
        BusStat::ProgramErrors,
        BusStat::PullupErrors,
        BusStat::Timeouts,
        BusStat::ReadErrors,
        BusStat::WriteErrors,
        BusStat::DetectErrors,
        BusStat::OpenErrors,
        BusStat::CloseErrors,
        BusStat::SearchErrors1,
        BusStat::SearchErrors2,
        BusStat::SearchErrors3,
        BusStat::StatusErrors,
        BusStat::SelectErrors,
        BusStat::TryOverdrive,
        BusStat::FailedOverdrive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BusStat::Reconnects => "reconnects",
            BusStat::ReconnectErrors => "reconnect_errors",
            BusStat::Locks => "locks",
            BusStat::Unlocks => "unlocks",
            BusStat::Errors => "errors",
            BusStat::Resets => "resets",
            BusStat::ResetErrors => "reset_errors",
            BusStat::ShortErrors => "short_errors",
            BusStat::ProgramErrors => "program_errors",
            BusStat::PullupErrors => "pullup_errors",
            BusStat::Timeouts => "timeouts",
            BusStat::ReadErrors => "read_errors",
            BusStat::WriteErrors => "write_errors",
            BusStat::DetectErrors => "detect_errors",
            BusStat::OpenErrors => "open_errors",
            BusStat::CloseErrors => "close_errors",
            BusStat::SearchErrors1 => "search_errors1",
            BusStat::SearchErrors2 => "search_errors2",
            BusStat::SearchErrors3 => "search_errors3",
            BusStat::StatusErrors => "status_errors",
            BusStat::SelectErrors => "select_errors",
            BusStat::TryOverdrive => "try_overdrive",
            BusStat::FailedOverdrive => "failed_overdrive",
        }
    }

    /// Search error counter for the given attempt (0-based, clamped to the third)
    pub fn search_attempt(attempt: usize) -> BusStat {
        match attempt {
            0 => BusStat::SearchErrors1,
            1 => BusStat::SearchErrors2,
            _ => BusStat::SearchErrors3,
        }
    }
}

/// Engine-wide statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStat {
    CacheHits,
    CacheMisses,
    Reads,
    ReadErrors,
    ReadBytes,
    Writes,
    WriteErrors,
    WriteBytes,
    WriteRetries,
    Relocations,
    DirectoryScans,
}

impl EngineStat {
    pub const ALL: [EngineStat; 11] = [
        EngineStat::CacheHits,
        EngineStat::CacheMisses,
        EngineStat::Reads,
        EngineStat::ReadErrors,
        EngineStat::ReadBytes,
        EngineStat::Writes,
        EngineStat::WriteErrors,
        EngineStat::WriteBytes,
        EngineStat::WriteRetries,
        EngineStat::Relocations,
        EngineStat::DirectoryScans,
    ];
}

/// A fixed vector of atomic counters indexed by a stat enum
#[derive(Debug)]
pub struct Counters {
    values: Vec<AtomicU64>,
}

impl Counters {
    pub fn new(len: usize) -> Self {
        Self {
            values: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn add(&self, index: usize, amount: u64) {
        if let Some(counter) = self.values.get(index) {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    pub fn get(&self, index: usize) -> u64 {
        self.values
            .get(index)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Counters for one bus master
#[derive(Debug)]
pub struct BusStats(Counters);

impl Default for BusStats {
    fn default() -> Self {
        Self(Counters::new(BusStat::ALL.len()))
    }
}

impl BusStats {
    pub fn incr(&self, stat: BusStat) {
        self.0.add(stat as usize, 1);
    }

    pub fn get(&self, stat: BusStat) -> u64 {
        self.0.get(stat as usize)
    }
}

/// Counters for the read/write engine
#[derive(Debug)]
pub struct EngineStats(Counters);

impl Default for EngineStats {
    fn default() -> Self {
        Self(Counters::new(EngineStat::ALL.len()))
    }
}

impl EngineStats {
    pub fn incr(&self, stat: EngineStat) {
        self.0.add(stat as usize, 1);
    }

    pub fn add(&self, stat: EngineStat, amount: u64) {
        self.0.add(stat as usize, amount);
    }

    pub fn get(&self, stat: EngineStat) -> u64 {
        self.0.get(stat as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_stats_are_independent() {
        let stats = BusStats::default();
        stats.incr(BusStat::Resets);
        stats.incr(BusStat::Resets);
        stats.incr(BusStat::FailedOverdrive);
        assert_eq!(stats.get(BusStat::Resets), 2);
        assert_eq!(stats.get(BusStat::FailedOverdrive), 1);
        assert_eq!(stats.get(BusStat::Errors), 0);
    }

    #[test]
    fn test_stat_tables_are_complete() {
        for (i, stat) in BusStat::ALL.iter().enumerate() {
            assert_eq!(*stat as usize, i);
        }
        for (i, stat) in EngineStat::ALL.iter().enumerate() {
            assert_eq!(*stat as usize, i);
        }
        assert_eq!(BusStat::search_attempt(7), BusStat::SearchErrors3);
    }
}
