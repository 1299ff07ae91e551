//! Disk Trim Planning
//!
//! Pure two-phase planner shared by every disk tier:
//!
//! 1. Age: drop entries whose governing timestamp is at or before the cut-off
//! 2. Size: if the survivors still exceed the size budget, drop the oldest
//!    first until the total fits
//!
//! The planner does no I/O; callers gather candidates and apply the plan.

use std::time::SystemTime;

/// One entry considered for trimming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimCandidate<K> {
    /// Identifier handed back in the plan
    pub id: K,
    /// Governing timestamp (per expire type)
    pub timestamp: SystemTime,
    /// Size in bytes
    pub size: u64,
}

impl<K> TrimCandidate<K> {
    /// Create a candidate
    pub fn new(id: K, timestamp: SystemTime, size: u64) -> Self {
        Self {
            id,
            timestamp,
            size,
        }
    }
}

/// Result of trim planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimPlan<K> {
    /// Removed by the age phase
    pub expired: Vec<K>,
    /// Removed by the size phase, oldest first
    pub oversize: Vec<K>,
    /// Bytes left after applying the plan
    pub retained_size: u64,
    /// Entries left after applying the plan
    pub retained_count: usize,
}

impl<K> TrimPlan<K> {
    /// Every id to remove, age phase first
    pub fn removals(&self) -> impl Iterator<Item = &K> {
        self.expired.iter().chain(self.oversize.iter())
    }

    /// Number of ids to remove
    pub fn len(&self) -> usize {
        self.expired.len() + self.oversize.len()
    }

    /// True if nothing is removed
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.oversize.is_empty()
    }
}

/// Plan a trim.
///
/// `cutoff` of `None` disables the age phase; `max_size` of 0 disables the size phase.
pub fn plan_trim<K>(
    candidates: Vec<TrimCandidate<K>>,
    cutoff: Option<SystemTime>,
    max_size: u64,
) -> TrimPlan<K> {
    let mut expired = Vec::new();
    let mut survivors = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match cutoff {
            Some(cutoff) if candidate.timestamp <= cutoff => expired.push(candidate.id),
            _ => survivors.push(candidate),
        }
    }

    let mut retained_size: u64 = survivors.iter().map(|c| c.size).sum();
    let mut oversize = Vec::new();

    if max_size > 0 && retained_size > max_size {
        survivors.sort_by_key(|c| c.timestamp);
        let mut remaining = Vec::with_capacity(survivors.len());
        for candidate in survivors {
            if retained_size > max_size {
                retained_size -= candidate.size;
                oversize.push(candidate.id);
            } else {
                remaining.push(candidate);
            }
        }
        survivors = remaining;
    }

    TrimPlan {
        expired,
        oversize,
        retained_size,
        retained_count: survivors.len(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_age_phase_boundary_is_inclusive() {
        let candidates = vec![
            TrimCandidate::new("old", at(100), 1),
            TrimCandidate::new("edge", at(200), 1),
            TrimCandidate::new("new", at(201), 1),
        ];
        let plan = plan_trim(candidates, Some(at(200)), 0);
        assert_eq!(plan.expired, vec!["old", "edge"]);
        assert!(plan.oversize.is_empty());
        assert_eq!(plan.retained_count, 1);
    }

    #[test]
    fn test_no_cutoff_keeps_everything() {
        let candidates = vec![TrimCandidate::new(1, at(0), 10)];
        let plan = plan_trim(candidates, None, 0);
        assert!(plan.is_empty());
        assert_eq!(plan.retained_size, 10);
    }

    #[test]
    fn test_size_phase_removes_oldest_first() {
        let candidates = vec![
            TrimCandidate::new("c", at(30), 40),
            TrimCandidate::new("a", at(10), 40),
            TrimCandidate::new("b", at(20), 40),
        ];
        let plan = plan_trim(candidates, None, 100);
        assert_eq!(plan.oversize, vec!["a"]);
        assert_eq!(plan.retained_size, 80);
        assert_eq!(plan.retained_count, 2);
    }

    #[test]
    fn test_size_phase_runs_after_age_phase() {
        let candidates = vec![
            TrimCandidate::new("expired", at(1), 500),
            TrimCandidate::new("a", at(10), 60),
            TrimCandidate::new("b", at(20), 60),
        ];
        let plan = plan_trim(candidates, Some(at(5)), 100);
        assert_eq!(plan.expired, vec!["expired"]);
        assert_eq!(plan.oversize, vec!["a"]);
        assert_eq!(plan.removals().count(), 2);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_within_budget_untouched() {
        let candidates = vec![
            TrimCandidate::new("a", at(10), 50),
            TrimCandidate::new("b", at(20), 50),
        ];
        let plan = plan_trim(candidates, None, 100);
        assert!(plan.is_empty());
    }
}
