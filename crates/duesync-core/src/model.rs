//! Domain types shared across the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two independently connected calendar identities per student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Guardian,
    Student,
}

impl AccountRole {
    /// Both roles, in the order sync runs process them.
    pub const ALL: [AccountRole; 2] = [AccountRole::Guardian, AccountRole::Student];

    /// Stable code used in database rows and OAuth state strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Guardian => "guardian",
            AccountRole::Student => "student",
        }
    }

    pub fn from_str(s: &str) -> Option<AccountRole> {
        match s {
            "guardian" => Some(AccountRole::Guardian),
            "student" => Some(AccountRole::Student),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assignment category inferred from the item title.
///
/// Best-effort heuristic, not authoritative upstream data; used only for
/// the exclude-list filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Quiz,
    Exam,
    Discussion,
    Homework,
    Project,
    Lab,
    Other,
}

impl AssignmentType {
    /// Classify a work item by title keywords. First match wins.
    pub fn infer(title: &str) -> AssignmentType {
        let t = title.to_lowercase();
        if t.contains("quiz") {
            AssignmentType::Quiz
        } else if t.contains("exam") || t.contains("midterm") || t.contains("final") || t.contains("test") {
            AssignmentType::Exam
        } else if t.contains("discussion") {
            AssignmentType::Discussion
        } else if t.contains("homework") || t.contains("hw ") || t.starts_with("hw") {
            AssignmentType::Homework
        } else if t.contains("project") {
            AssignmentType::Project
        } else if t.contains("lab") {
            AssignmentType::Lab
        } else {
            AssignmentType::Other
        }
    }
}

/// A due-dated academic task mirrored from the upstream source-of-record.
///
/// Produced by the upstream fetch/merge layer; read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Student the item belongs to.
    pub student_id: i64,
    /// Upstream plannable identifier; with `student_id` this is the item identity.
    pub plannable_id: i64,
    pub title: String,
    pub course_name: String,
    /// Items without a due timestamp are never synced.
    pub due_at: Option<DateTime<Utc>>,
    pub points_possible: Option<f64>,
    pub grade: Option<String>,
    pub submitted: bool,
    pub missing: bool,
    pub late: bool,
    pub graded: bool,
    /// Last change seen upstream; drives incremental sync.
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn assignment_type(&self) -> AssignmentType {
        AssignmentType::infer(&self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_known_types() {
        assert_eq!(AssignmentType::infer("Chapter 4 Quiz"), AssignmentType::Quiz);
        assert_eq!(AssignmentType::infer("Midterm Exam"), AssignmentType::Exam);
        assert_eq!(AssignmentType::infer("Unit Test: Fractions"), AssignmentType::Exam);
        assert_eq!(
            AssignmentType::infer("Week 3 Discussion Post"),
            AssignmentType::Discussion
        );
        assert_eq!(AssignmentType::infer("Homework 12"), AssignmentType::Homework);
        assert_eq!(AssignmentType::infer("Science Fair Project"), AssignmentType::Project);
        assert_eq!(AssignmentType::infer("Lab Report: Density"), AssignmentType::Lab);
    }

    #[test]
    fn infer_falls_back_to_other() {
        assert_eq!(AssignmentType::infer("Read pages 10-30"), AssignmentType::Other);
        assert_eq!(AssignmentType::infer(""), AssignmentType::Other);
    }

    #[test]
    fn quiz_wins_over_later_keywords() {
        // "Lab quiz" mentions both; quiz is checked first.
        assert_eq!(AssignmentType::infer("Lab Quiz 2"), AssignmentType::Quiz);
    }

    #[test]
    fn role_round_trips_through_code() {
        for role in AccountRole::ALL {
            assert_eq!(AccountRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(AccountRole::from_str("parent"), None);
    }
}
