//! Fan-out Policies
//!
//! How one logical operation is distributed across a manager's backends.

use std::fmt;

/// Fan-out rule for one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPolicy {
    /// Highest to lowest priority; lookups stop at the first hit
    Serial,
    /// All backends at once; completes after the last one reports
    Concurrent,
    /// Only the highest-priority backend
    HighestOnly,
    /// Only the lowest-priority backend
    LowestOnly,
}

impl fmt::Display for OperationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationPolicy::Serial => write!(f, "serial"),
            OperationPolicy::Concurrent => write!(f, "concurrent"),
            OperationPolicy::HighestOnly => write!(f, "highest-only"),
            OperationPolicy::LowestOnly => write!(f, "lowest-only"),
        }
    }
}

/// Per-operation policies of a `CachesManager`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerPolicies {
    pub query: OperationPolicy,
    pub store: OperationPolicy,
    pub remove: OperationPolicy,
    pub contains: OperationPolicy,
    pub clear: OperationPolicy,
}

impl Default for ManagerPolicies {
    fn default() -> Self {
        Self {
            query: OperationPolicy::Serial,
            store: OperationPolicy::HighestOnly,
            remove: OperationPolicy::Concurrent,
            contains: OperationPolicy::Serial,
            clear: OperationPolicy::Concurrent,
        }
    }
}

impl ManagerPolicies {
    /// Same policy for every operation
    pub fn uniform(policy: OperationPolicy) -> Self {
        Self {
            query: policy,
            store: policy,
            remove: policy,
            contains: policy,
            clear: policy,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policies = ManagerPolicies::default();
        assert_eq!(policies.query, OperationPolicy::Serial);
        assert_eq!(policies.store, OperationPolicy::HighestOnly);
        assert_eq!(policies.remove, OperationPolicy::Concurrent);
        assert_eq!(policies.contains, OperationPolicy::Serial);
        assert_eq!(policies.clear, OperationPolicy::Concurrent);
    }

    #[test]
    fn test_display() {
        assert_eq!(OperationPolicy::HighestOnly.to_string(), "highest-only");
        assert_eq!(
            ManagerPolicies::uniform(OperationPolicy::LowestOnly).clear,
            OperationPolicy::LowestOnly
        );
    }
}
