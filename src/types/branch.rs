//! Branch classification and risk heuristics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of the branch a change landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Main,
    Staging,
    Feature,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Main => "main",
            BranchType::Staging => "staging",
            BranchType::Feature => "feature",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size-based risk classification of a merge.
///
/// Variants are ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Classifies a change by its size.
    ///
    /// `High` if more than 50 files or more than 1000 changed lines,
    /// `Medium` if more than 20 files or more than 500 changed lines,
    /// `Low` otherwise. Boundaries are exclusive.
    pub fn assess(changed_files_count: u64, additions: u64, deletions: u64) -> Self {
        let total = additions.saturating_add(deletions);

        if changed_files_count > 50 || total > 1000 {
            RiskLevel::High
        } else if changed_files_count > 20 || total > 500 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured main and staging branch name sets.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSets {
    pub main: Vec<String>,
    pub staging: Vec<String>,
}

impl Default for BranchSets {
    fn default() -> Self {
        BranchSets {
            main: vec!["main".to_string(), "master".to_string()],
            staging: vec![
                "staging".to_string(),
                "develop".to_string(),
                "dev".to_string(),
            ],
        }
    }
}

impl BranchSets {
    /// Classifies a branch: main set first, then staging set, else feature.
    pub fn branch_type(&self, branch: &str) -> BranchType {
        if self.main.iter().any(|b| b == branch) {
            BranchType::Main
        } else if self.staging.iter().any(|b| b == branch) {
            BranchType::Staging
        } else {
            BranchType::Feature
        }
    }

    /// Returns true if events for this branch should be processed.
    pub fn is_eligible(&self, branch: &str) -> bool {
        self.branch_type(branch) != BranchType::Feature
    }

    /// Branch names that appear in both sets.
    pub fn overlapping(&self) -> Vec<&str> {
        self.main
            .iter()
            .filter(|b| self.staging.contains(b))
            .map(String::as_str)
            .collect()
    }
}
