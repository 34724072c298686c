//! The last agent in the pipeline: decides shell or model, runs builtins.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{Agent, AgentError, AgentOutcome};
use crate::context::{CurrentDir, RequestContext};
use crate::router::{Builtin, CommandRouter, Route};

pub struct CommandRouterAgent {
    router: Arc<CommandRouter>,
    cwd: Arc<Mutex<CurrentDir>>,
}

impl CommandRouterAgent {
    pub const NAME: &'static str = "Command Router Agent";
    pub const PRIORITY: i32 = 100;

    /// `cwd` is shared with the session so `cd` moves both.
    pub fn new(router: Arc<CommandRouter>, cwd: Arc<Mutex<CurrentDir>>) -> Self {
        Self { router, cwd }
    }

    fn run_builtin(&self, builtin: Builtin, line: &str) -> AgentOutcome {
        let outcome = match builtin {
            Builtin::Cd => {
                let target = line.split_whitespace().nth(1).unwrap_or("~");
                let mut cwd = self.cwd.lock().unwrap_or_else(PoisonError::into_inner);
                match cwd.change_to(target) {
                    Ok(path) => AgentOutcome::handled(format!("Changed directory to: {}", path))
                        .with_metadata("directory", path),
                    Err(e) => AgentOutcome::handled(format!("{:#}", e))
                        .with_metadata("error", e.to_string()),
                }
            }
            Builtin::Pwd => {
                let cwd = self.cwd.lock().unwrap_or_else(PoisonError::into_inner);
                AgentOutcome::handled(cwd.path.clone()).with_metadata("directory", cwd.path.clone())
            }
            Builtin::Exit => AgentOutcome::handled("Goodbye!").with_metadata("exit", true),
        };
        outcome
            .with_metadata("routing", Route::Builtin(builtin).label())
            .with_metadata("command", builtin.name())
    }
}

#[async_trait]
impl Agent for CommandRouterAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, text: &str, _ctx: &RequestContext) -> Result<AgentOutcome, AgentError> {
        let line = text.trim();
        let route = self.router.route(line);
        let outcome = match route {
            Route::Builtin(builtin) => self.run_builtin(builtin, line),
            Route::Shell | Route::Model => {
                AgentOutcome::pass(line).with_metadata("routing", route.label())
            }
        };
        Ok(outcome)
    }
}
