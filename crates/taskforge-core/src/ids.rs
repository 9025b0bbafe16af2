//! Opaque nominal identifier types.
//!
//! Each id wraps a `String` but deliberately does not implement `From`
//! conversions between the different id kinds, so a `TaskId` can never be
//! passed where a `RunId` is expected without an explicit `.as_str()` +
//! re-wrap at the call site.

use std::fmt;
use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(TaskId, "Identifier for a Task, unique within a store.");
opaque_id!(RunId, "Identifier for a Run record.");
opaque_id!(CheckId, "Identifier for a Check record.");
opaque_id!(WorkerId, "Identifier for an in-flight task owner.");
opaque_id!(BranchName, "A VCS branch name.");
opaque_id!(RepoPath, "Filesystem path to a repository checkout.");
opaque_id!(WorktreePath, "Filesystem path to an isolated worktree.");
opaque_id!(SessionId, "Identifier for any session family.");
opaque_id!(EscalationId, "Identifier for an escalation record.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_through_json() {
        let id = TaskId::new("task-abc1-task-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"task-abc1-task-1\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn ids_display_matches_inner_value() {
        let id = RunId::new("run-42");
        assert_eq!(id.to_string(), "run-42");
        assert_eq!(id.as_str(), "run-42");
    }

    #[test]
    fn distinct_id_types_do_not_compare_equal_by_accident() {
        // Compile-time guarantee: TaskId and RunId are distinct types, so
        // this test only asserts the string payload comparison people
        // might reach for accidentally still requires explicit unwrap.
        let t = TaskId::new("x");
        let r = RunId::new("x");
        assert_eq!(t.as_str(), r.as_str());
    }
}
