//! Planning ledger: named multi-step plans with per-step status.
//!
//! Plans live only in memory and belong to one [`PlanningLedger`]. At most
//! one plan is active; commands that omit `plan_id` act on it.

use agentloop_core::error::{PlanningError, ToolError};
use agentloop_core::tool::{Tool, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            other => Err(PlanningError::InvalidStatus(other.to_string())),
        }
    }
}

/// An ordered checklist. `steps`, `step_statuses` and `step_notes` always
/// have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    steps: Vec<String>,
    step_statuses: Vec<StepStatus>,
    step_notes: Vec<String>,
}

impl Plan {
    fn new(plan_id: &str, title: &str, steps: Vec<String>) -> Self {
        let len = steps.len();
        Self {
            plan_id: plan_id.to_string(),
            title: title.to_string(),
            steps,
            step_statuses: vec![StepStatus::NotStarted; len],
            step_notes: vec![String::new(); len],
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn step_statuses(&self) -> &[StepStatus] {
        &self.step_statuses
    }

    pub fn step_notes(&self) -> &[String] {
        &self.step_notes
    }

    /// Replace the steps; trailing status and notes are padded or dropped.
    fn replace_steps(&mut self, steps: Vec<String>) {
        let len = steps.len();
        self.steps = steps;
        self.step_statuses.resize(len, StepStatus::NotStarted);
        self.step_notes.resize(len, String::new());
    }

    /// `(completed, total)`
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .step_statuses
            .iter()
            .filter(|s| **s == StepStatus::Completed)
            .count();
        (completed, self.steps.len())
    }

    fn render(&self, active: bool) -> String {
        let (completed, total) = self.progress();
        let mut out = vec![format!("Plan: {} (ID: {})", self.title, self.plan_id)];
        if active {
            out.push("Status: active plan".into());
        }
        out.push(format!("Progress: {completed}/{total} steps completed"));
        out.push("\nSteps:".into());

        for (i, ((step, status), notes)) in self
            .steps
            .iter()
            .zip(&self.step_statuses)
            .zip(&self.step_notes)
            .enumerate()
        {
            let mut line = format!("{i}. {step} [{}]", status.as_str());
            if !notes.is_empty() {
                line.push_str(&format!("\n   Notes: {notes}"));
            }
            out.push(line);
        }
        out.join("\n")
    }
}

/// The in-memory plan store.
#[derive(Debug, Default)]
pub struct PlanningLedger {
    plans: Vec<Plan>,
    active: Option<String>,
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, PlanningError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(PlanningError::MissingField(field))
}

impl PlanningLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    fn position(&self, plan_id: &str) -> Result<usize, PlanningError> {
        self.plans
            .iter()
            .position(|p| p.plan_id == plan_id)
            .ok_or_else(|| PlanningError::NotFound(plan_id.to_string()))
    }

    /// Resolve an optional id to a stored plan, defaulting to the active one.
    fn resolve(&self, plan_id: Option<&str>) -> Result<usize, PlanningError> {
        match plan_id.filter(|id| !id.is_empty()) {
            Some(id) => self.position(id),
            None => {
                let active = self.active.as_deref().ok_or(PlanningError::NoActivePlan)?;
                self.position(active)
            }
        }
    }

    /// Create a plan and make it active.
    pub fn create(
        &mut self,
        plan_id: Option<&str>,
        title: Option<&str>,
        steps: Option<Vec<String>>,
    ) -> Result<&Plan, PlanningError> {
        let plan_id = required(plan_id, "plan_id")?;
        let title = required(title, "title")?;
        let steps = steps
            .filter(|s| !s.is_empty())
            .ok_or(PlanningError::MissingField("steps"))?;

        if self.position(plan_id).is_ok() {
            return Err(PlanningError::DuplicateId(plan_id.to_string()));
        }

        self.plans.push(Plan::new(plan_id, title, steps));
        self.active = Some(plan_id.to_string());
        debug!(plan_id = %plan_id, "Plan created");
        Ok(&self.plans[self.plans.len() - 1])
    }

    /// Change a plan's title and/or steps. Empty values leave fields untouched.
    pub fn update(
        &mut self,
        plan_id: Option<&str>,
        title: Option<&str>,
        steps: Option<Vec<String>>,
    ) -> Result<&Plan, PlanningError> {
        let slot = self.position(required(plan_id, "plan_id")?)?;
        let plan = &mut self.plans[slot];

        if let Some(title) = title.filter(|t| !t.is_empty()) {
            plan.title = title.to_string();
        }
        if let Some(steps) = steps.filter(|s| !s.is_empty()) {
            plan.replace_steps(steps);
        }
        Ok(&self.plans[slot])
    }

    pub fn get(&self, plan_id: Option<&str>) -> Result<&Plan, PlanningError> {
        self.resolve(plan_id).map(|slot| &self.plans[slot])
    }

    pub fn set_active(&mut self, plan_id: Option<&str>) -> Result<&Plan, PlanningError> {
        let slot = self.position(required(plan_id, "plan_id")?)?;
        self.active = Some(self.plans[slot].plan_id.clone());
        Ok(&self.plans[slot])
    }

    /// Set the status and/or notes of one step.
    pub fn mark_step(
        &mut self,
        plan_id: Option<&str>,
        step_index: Option<i64>,
        status: Option<StepStatus>,
        notes: Option<&str>,
    ) -> Result<&Plan, PlanningError> {
        let slot = self.resolve(plan_id)?;
        let index = step_index.ok_or(PlanningError::MissingField("step_index"))?;
        let plan = &mut self.plans[slot];

        let len = plan.steps.len();
        let i = usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or(PlanningError::IndexOutOfRange { index, len })?;

        if let Some(status) = status {
            plan.step_statuses[i] = status;
        }
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            plan.step_notes[i] = notes.to_string();
        }
        Ok(&self.plans[slot])
    }

    /// Remove a plan, clearing the active pointer if it was active.
    pub fn delete(&mut self, plan_id: Option<&str>) -> Result<Plan, PlanningError> {
        let slot = self.position(required(plan_id, "plan_id")?)?;
        let plan = self.plans.remove(slot);
        if self.active.as_deref() == Some(plan.plan_id.as_str()) {
            self.active = None;
        }
        Ok(plan)
    }

    /// Detailed view of one plan.
    pub fn render(&self, plan: &Plan) -> String {
        plan.render(self.active_id() == Some(plan.plan_id.as_str()))
    }

    /// One summary line per plan.
    pub fn render_list(&self) -> String {
        if self.plans.is_empty() {
            return "No plans available. Create a plan with the 'create' command.".into();
        }
        let mut out = vec!["Available plans:".to_string()];
        for plan in &self.plans {
            let (completed, total) = plan.progress();
            let marker = if self.active_id() == Some(plan.plan_id.as_str()) {
                " (active)"
            } else {
                ""
            };
            out.push(format!(
                "- {} (ID: {}) - {completed}/{total} steps completed{marker}",
                plan.title, plan.plan_id
            ));
        }
        out.join("\n")
    }

    /// Apply one command and describe the result.
    pub fn apply(&mut self, command: PlanningCommand) -> Result<String, PlanningError> {
        let output = match command {
            PlanningCommand::Create { plan_id, title, steps } => {
                let plan = self.create(plan_id.as_deref(), title.as_deref(), steps)?.clone();
                format!(
                    "Plan created successfully with ID: {}\n\n{}",
                    plan.plan_id,
                    self.render(&plan)
                )
            }
            PlanningCommand::Update { plan_id, title, steps } => {
                let plan = self.update(plan_id.as_deref(), title.as_deref(), steps)?.clone();
                format!("Plan updated successfully: {}\n\n{}", plan.plan_id, self.render(&plan))
            }
            PlanningCommand::List {} => self.render_list(),
            PlanningCommand::Get { plan_id } => {
                let plan = self.get(plan_id.as_deref())?;
                self.render(plan)
            }
            PlanningCommand::SetActive { plan_id } => {
                let plan = self.set_active(plan_id.as_deref())?.clone();
                format!("Plan '{}' is now the active plan.\n\n{}", plan.plan_id, self.render(&plan))
            }
            PlanningCommand::MarkStep { plan_id, step_index, step_status, step_notes } => {
                let status = match step_status.as_deref().filter(|s| !s.is_empty()) {
                    Some(raw) => Some(raw.parse::<StepStatus>()?),
                    None => None,
                };
                let plan = self
                    .mark_step(plan_id.as_deref(), step_index, status, step_notes.as_deref())?
                    .clone();
                format!(
                    "Step {} updated in plan '{}'.\n\n{}",
                    step_index.unwrap_or_default(),
                    plan.plan_id,
                    self.render(&plan)
                )
            }
            PlanningCommand::Delete { plan_id } => {
                let plan = self.delete(plan_id.as_deref())?;
                format!("Plan '{}' has been deleted.", plan.plan_id)
            }
        };
        Ok(output)
    }
}

/// A planning command as sent by the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlanningCommand {
    Create {
        plan_id: Option<String>,
        title: Option<String>,
        steps: Option<Vec<String>>,
    },
    Update {
        plan_id: Option<String>,
        title: Option<String>,
        steps: Option<Vec<String>>,
    },
    List {},
    Get {
        plan_id: Option<String>,
    },
    SetActive {
        plan_id: Option<String>,
    },
    MarkStep {
        plan_id: Option<String>,
        step_index: Option<i64>,
        step_status: Option<String>,
        step_notes: Option<String>,
    },
    Delete {
        plan_id: Option<String>,
    },
}

const DESCRIPTION: &str = "A planning tool that allows the agent to create and manage plans for solving complex tasks. \
The tool provides functionality for creating plans, updating plan steps, and tracking progress.";

/// Exposes a [`PlanningLedger`] to the model.
#[derive(Default)]
pub struct PlanningTool {
    ledger: Mutex<PlanningLedger>,
}

impl PlanningTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the underlying ledger.
    pub async fn ledger(&self) -> tokio::sync::MutexGuard<'_, PlanningLedger> {
        self.ledger.lock().await
    }
}

#[async_trait]
impl Tool for PlanningTool {
    fn name(&self) -> &str {
        "planning"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "description": "The command to execute. Available commands: create, update, list, get, set_active, mark_step, delete.",
                    "enum": ["create", "update", "list", "get", "set_active", "mark_step", "delete"],
                    "type": "string"
                },
                "plan_id": {
                    "description": "Unique identifier for the plan. Required for create, update, set_active, and delete commands. Optional for get and mark_step (uses active plan if not specified).",
                    "type": "string"
                },
                "title": {
                    "description": "Title for the plan. Required for create command, optional for update command.",
                    "type": "string"
                },
                "steps": {
                    "description": "List of plan steps. Required for create command, optional for update command.",
                    "type": "array",
                    "items": { "type": "string" }
                },
                "step_index": {
                    "description": "Index of the step to update (0-based). Required for mark_step command.",
                    "type": "integer"
                },
                "step_status": {
                    "description": "Status to set for a step. Used with mark_step command.",
                    "enum": ["not_started", "in_progress", "completed", "blocked"],
                    "type": "string"
                },
                "step_notes": {
                    "description": "Additional notes for a step. Optional for mark_step command.",
                    "type": "string"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command: PlanningCommand = serde_json::from_value(arguments).map_err(|e| {
            ToolError::InvalidArguments(format!(
                "{e}. Allowed commands are: create, update, list, get, set_active, mark_step, delete"
            ))
        })?;

        let mut ledger = self.ledger.lock().await;
        let output = ledger.apply(command)?;
        Ok(ToolResult::success(output))
    }
}
