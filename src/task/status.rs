use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a FileTask.
///
/// Transitions only move forward: `Waiting -> Running -> {Optimized, NoSavings, Failed}`.
/// Any of the last three is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Status {
    Waiting,
    Running,
    Optimized { tool: String },
    NoSavings,
    Failed { reason: String },
}

impl Status {
    /// Short machine label (also the icon name a UI would use)
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "wait",
            Self::Running => "progress",
            Self::NoSavings => "noopt",
            Self::Optimized { .. } => "ok",
            Self::Failed { .. } => "err",
        }
    }

    /// Sort key for lists of many files
    pub fn order(&self) -> i64 {
        match self {
            Self::Waiting => 0,
            Self::Running => 1,
            Self::NoSavings => 3,
            Self::Optimized { .. } => 4,
            Self::Failed { .. } => 5,
        }
    }

    /// Human readable description
    pub fn text(&self) -> String {
        match self {
            Self::Waiting => "Waiting to be optimized".to_string(),
            Self::Running => "Optimizing".to_string(),
            Self::NoSavings => "File cannot be optimized any further".to_string(),
            Self::Optimized { tool } => format!("Optimized successfully with {}", tool),
            Self::Failed { reason } => format!("Optimization failed: {}", reason),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage() == 2
    }

    fn stage(&self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Running => 1,
            _ => 2,
        }
    }

    /// Whether moving from `self` to `next` goes forward in the lifecycle
    pub(crate) fn can_advance_to(&self, next: &Status) -> bool {
        next.stage() > self.stage()
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::Waiting
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let done = Status::NoSavings;
        assert!(Status::Waiting.can_advance_to(&Status::Running));
        assert!(Status::Waiting.can_advance_to(&done));
        assert!(Status::Running.can_advance_to(&Status::Failed { reason: "x".into() }));
        assert!(!Status::Running.can_advance_to(&Status::Waiting));
        assert!(!done.can_advance_to(&Status::Optimized { tool: "oxipng".into() }));
        assert!(done.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn test_order_sorts_terminal_states_last() {
        let mut statuses = vec![
            Status::Failed { reason: "x".into() },
            Status::Waiting,
            Status::Optimized { tool: "jpegtran".into() },
            Status::Running,
        ];
        statuses.sort_by_key(|s| s.order());
        assert_eq!(statuses[0], Status::Waiting);
        assert_eq!(statuses[3].label(), "err");
        assert_eq!(statuses[2].text(), "Optimized successfully with jpegtran");
    }
}
