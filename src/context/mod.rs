//! Per-request context for the guardrail pipeline.
//!
//! Every line the user types becomes a [`Request`]. The request carries the
//! untouched original text, the current (possibly rewritten) text, and a
//! [`RequestContext`] describing who typed it and where.

mod cwd;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cwd::CurrentDir;

/// Who issued a request, from where, and when.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestContext {
    pub working_directory: String,
    pub user: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        working_directory: impl Into<String>,
        user: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            user: user.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A single line of user input travelling through the pipeline.
#[derive(Clone, Debug)]
pub struct Request {
    original: String,
    /// Text as rewritten by the stages that already ran.
    pub current: String,
    pub context: RequestContext,
}

impl Request {
    pub fn new(text: impl Into<String>, context: RequestContext) -> Self {
        let original = text.into();
        Self {
            current: original.clone(),
            original,
            context,
        }
    }

    /// The text exactly as the user typed it.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Replace the current text. The original is never touched.
    pub fn rewrite(&mut self, text: String) {
        self.current = text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_keeps_original() {
        let ctx = RequestContext::new("/tmp", "alice", "abc123");
        let mut req = Request::new("echo password=hunter2hunter2", ctx);
        req.rewrite("echo [REDACTED PASSWORD]".to_string());

        assert_eq!(req.original(), "echo password=hunter2hunter2");
        assert_eq!(req.current, "echo [REDACTED PASSWORD]");
    }
}
