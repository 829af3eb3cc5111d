//! Step-graph engine driving multi-screen workflows.
//!
//! A [`Flow`] holds steps and the edges between them. Each call to
//! [`Flow::execute_session`] runs the session's current step once and moves the
//! session pointer according to the step's [`NextAction`]; only
//! `ContinueAndExecute` chains straight into the next step.
//!
//! [`FlowRunner`] wraps the usual load, execute, save round trip for callers
//! that keep sessions in a [`SessionStorage`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use crate::{
    context::Context,
    error::{Result, TriageError},
    models::FocusHint,
    session::{Session, SessionStorage},
};

/// Defines what should happen after a step completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Move to the next step but wait for the caller before running it
    Continue,
    /// Move to the next step and run it immediately
    ContinueAndExecute,
    /// Stay on this step until more input arrives
    WaitForInput,
    /// Jump to a specific step by id
    GoTo(String),
    /// The flow is done
    End,
}

/// Result of a step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Response to show the user
    pub response: Option<String>,
    pub next_action: NextAction,
    pub status_message: Option<String>,
    pub focus: Option<FocusHint>,
}

impl StepResult {
    pub fn new(response: Option<String>, next_action: NextAction) -> Self {
        Self {
            response,
            next_action,
            status_message: None,
            focus: None,
        }
    }

    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_focus(mut self, focus: FocusHint) -> Self {
        self.focus = Some(focus);
        self
    }
}

/// Core trait that all steps implement
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique identifier for this step
    fn id(&self) -> &str;

    async fn run(&self, session: &Session) -> Result<StepResult>;
}

/// Edge condition, evaluated against the session context
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Waiting for user input to continue
    WaitingForInput,
    Completed,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
    /// Step that produced the response
    pub step_id: String,
    pub focus: Option<FocusHint>,
}

pub struct Flow {
    pub id: String,
    steps: HashMap<String, Arc<dyn Step>>,
    edges: Vec<Edge>,
    start_step: Option<String>,
}

impl Flow {
    pub fn start_step(&self) -> Option<&str> {
        self.start_step.as_deref()
    }

    pub fn get_step(&self, step_id: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(step_id).cloned()
    }

    /// First edge out of `step_id` whose condition holds; unconditional edges always hold.
    pub fn find_next_step(&self, step_id: &str, context: &Context) -> Option<String> {
        self.edges
            .iter()
            .filter(|edge| edge.from == step_id)
            .find(|edge| edge.condition.as_ref().is_none_or(|condition| condition(context)))
            .map(|edge| edge.to.clone())
    }

    /// Runs the session's current step and advances the session pointer.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let step_id = session.current_step.clone();
        let step = self
            .get_step(&step_id)
            .ok_or_else(|| TriageError::StepNotFound(step_id.clone()))?;

        let result = step.run(session).await?;
        debug!(
            flow_id = %self.id,
            session_id = %session.id,
            step_id = %step_id,
            next_action = ?result.next_action,
            "Step executed"
        );
        session.status_message = result.status_message.clone();

        let waiting = |step_id: String| ExecutionResult {
            response: result.response.clone(),
            status: ExecutionStatus::WaitingForInput,
            step_id,
            focus: result.focus.clone(),
        };

        match &result.next_action {
            NextAction::Continue => {
                if let Some(next) = self.find_next_step(&step_id, &session.context) {
                    session.current_step = next;
                }
                Ok(waiting(step_id))
            }
            NextAction::ContinueAndExecute => {
                match self.find_next_step(&step_id, &session.context) {
                    Some(next) => {
                        session.current_step = next;
                        Box::pin(self.execute_session(session)).await
                    }
                    None => Ok(waiting(step_id)),
                }
            }
            NextAction::WaitForInput => Ok(waiting(step_id)),
            NextAction::GoTo(target) => {
                if !self.steps.contains_key(target) {
                    return Err(TriageError::StepNotFound(target.clone()));
                }
                session.current_step = target.clone();
                Ok(waiting(step_id))
            }
            NextAction::End => Ok(ExecutionResult {
                response: result.response.clone(),
                status: ExecutionStatus::Completed,
                step_id,
                focus: result.focus.clone(),
            }),
        }
    }
}

/// Builder for creating flows
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            flow: Flow {
                id: id.into(),
                steps: HashMap::new(),
                edges: Vec::new(),
                start_step: None,
            },
        }
    }

    /// The first step added becomes the start step.
    pub fn add_step(mut self, step: Arc<dyn Step>) -> Self {
        let step_id = step.id().to_string();
        if self.flow.start_step.is_none() {
            self.flow.start_step = Some(step_id.clone());
        }
        self.flow.steps.insert(step_id, step);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.flow.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.flow.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    pub fn set_start_step(mut self, step_id: impl Into<String>) -> Self {
        let step_id = step_id.into();
        if self.flow.steps.contains_key(&step_id) {
            self.flow.start_step = Some(step_id);
        }
        self
    }

    pub fn build(self) -> Flow {
        self.flow
    }
}

/// Load session, execute one step, save session.
#[derive(Clone)]
pub struct FlowRunner {
    flow: Arc<Flow>,
    storage: Arc<dyn SessionStorage>,
}

impl FlowRunner {
    pub fn new(flow: Arc<Flow>, storage: Arc<dyn SessionStorage>) -> Self {
        Self { flow, storage }
    }

    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| TriageError::SessionNotFound(session_id.to_string()))?;

        let result = self.flow.execute_session(&mut session).await?;

        self.storage.save(session).await?;
        Ok(result)
    }
}
