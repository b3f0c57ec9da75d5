//! Expression identity, lifecycle status and result types.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identifier of an expression, unique within its session.
///
/// Ids are handed out in submission order, so comparing two ids of the same
/// session compares their position in the evaluation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ExpressionId(u64);

impl ExpressionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Evaluation status of an expression.
///
/// ```text
/// Queued -> Computing -> Done | Error
///    \__________\______-> Interrupted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ExpressionStatus {
    /// Waiting in the session queue
    Queued,
    /// Written to the interpreter, output not yet framed
    Computing,
    /// Finished without error
    Done,
    /// Finished with an error message
    Error,
    /// Cancelled by interrupt or logout
    Interrupted,
}

impl ExpressionStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExpressionStatus::Done | ExpressionStatus::Error | ExpressionStatus::Interrupted
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ExpressionStatus) -> bool {
        use ExpressionStatus::*;
        match (self, next) {
            (Queued, Computing) => true,
            (Computing, Done) | (Computing, Error) => true,
            (Queued, Interrupted) | (Computing, Interrupted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExpressionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExpressionStatus::Queued => "queued",
            ExpressionStatus::Computing => "computing",
            ExpressionStatus::Done => "done",
            ExpressionStatus::Error => "error",
            ExpressionStatus::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// What happens to an expression once it reaches a terminal status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum FinishingBehavior {
    /// Keep it; the consumer owns it from now on
    #[default]
    DoNotDelete,
    /// Release it from the session as soon as it finishes
    DeleteOnFinish,
}

/// One result produced by an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExpressionResult {
    /// Plain text output
    Text(String),
    /// Output of a help command
    Help(String),
    /// Image files written by the interpreter (plots)
    Images(Vec<PathBuf>),
}

impl ExpressionResult {
    /// Text content of a textual result.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExpressionResult::Text(text) | ExpressionResult::Help(text) => Some(text),
            ExpressionResult::Images(_) => None,
        }
    }
}

/// Point-in-time view of an expression, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionSnapshot {
    /// Expression identifier
    pub id: ExpressionId,
    /// Command as submitted
    pub command: String,
    /// Command as written to the interpreter (after backend rewriting)
    pub internal_command: String,
    /// Current status
    pub status: ExpressionStatus,
    /// Results gathered so far
    pub results: Vec<ExpressionResult>,
    /// Error message, set when status is `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether the expression was submitted by the session itself
    pub internal: bool,
    /// Finishing behavior
    pub finishing_behavior: FinishingBehavior,
}

impl ExpressionSnapshot {
    /// First text result, if any.
    pub fn text(&self) -> Option<&str> {
        self.results.iter().find_map(ExpressionResult::as_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExpressionStatus::Queued.is_terminal());
        assert!(!ExpressionStatus::Computing.is_terminal());
        assert!(ExpressionStatus::Done.is_terminal());
        assert!(ExpressionStatus::Error.is_terminal());
        assert!(ExpressionStatus::Interrupted.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        use ExpressionStatus::*;
        assert!(Queued.can_transition_to(Computing));
        assert!(Computing.can_transition_to(Done));
        assert!(Computing.can_transition_to(Error));
        assert!(Queued.can_transition_to(Interrupted));
        assert!(Computing.can_transition_to(Interrupted));
    }

    #[test]
    fn test_rejected_transitions() {
        use ExpressionStatus::*;
        assert!(!Queued.can_transition_to(Done));
        assert!(!Computing.can_transition_to(Queued));
        for terminal in [Done, Error, Interrupted] {
            for next in [Queued, Computing, Done, Error, Interrupted] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_expression_id_ordering() {
        assert!(ExpressionId::new(1) < ExpressionId::new(2));
        assert_eq!(ExpressionId::new(3).get(), 3);
        assert_eq!(ExpressionId::new(3).to_string(), "3");
    }

    #[test]
    fn test_result_serialization() {
        let result = ExpressionResult::Text("2".to_string());
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"type":"text","data":"2"}"#);

        let images = ExpressionResult::Images(vec![PathBuf::from("/tmp/c-ob-1.png")]);
        assert_eq!(images.as_text(), None);
    }

    #[test]
    fn test_snapshot_text() {
        let snapshot = ExpressionSnapshot {
            id: ExpressionId::new(0),
            command: "help sin".to_string(),
            internal_command: "help sin".to_string(),
            status: ExpressionStatus::Done,
            results: vec![ExpressionResult::Help("sin (x)".to_string())],
            error_message: None,
            internal: false,
            finishing_behavior: FinishingBehavior::DoNotDelete,
        };
        assert_eq!(snapshot.text(), Some("sin (x)"));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("error_message"));
    }
}
