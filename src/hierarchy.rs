//! Executive over departments, built from nested supervisors

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::context::{AgentContext, ContextSharing};
use crate::descriptor::{DepartmentDescriptor, Descriptor};
use crate::error::AgentError;
use crate::interactable::Interactable;
use crate::orchestrator::Member;
use crate::result::AgentResult;
use crate::stream::AgentStream;
use crate::supervisor::SupervisorAgent;

/// A manager and the workers it coordinates.
#[derive(Clone)]
pub struct Department {
    name: String,
    manager: Agent,
    workers: Vec<Member>,
}

impl Department {
    pub fn new(name: impl Into<String>, manager: Agent) -> Self {
        Self {
            name: name.into(),
            manager,
            workers: Vec::new(),
        }
    }

    pub fn worker(mut self, worker: impl Interactable + 'static) -> Self {
        self.workers.push(Arc::new(worker));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Agent {
        &self.manager
    }

    pub fn workers(&self) -> &[Member] {
        &self.workers
    }

    fn manager_instructions(&self) -> String {
        let mut text = String::new();
        if let Some(base) = self.manager.instructions() {
            text.push_str(base);
            text.push_str("\n\n");
        }
        text.push_str("You manage the following team:\n\n");
        for worker in &self.workers {
            text.push_str(&format!("- **{}**\n", worker.name()));
        }
        text.push_str(
            "\nDelegate subtasks to your team members. \
             Coordinate their outputs into a cohesive result.",
        );
        text
    }

    /// How the executive sees this department.
    fn summary(&self) -> String {
        match self.manager.instructions() {
            Some(instructions) => format!("{} department - {instructions}", self.name),
            None => format!("{} department", self.name),
        }
    }
}

/// Built department: its definition and the supervisor running it.
#[derive(Clone)]
struct Unit {
    department: Department,
    supervisor: Arc<SupervisorAgent>,
}

/// An executive supervising one supervisor per department.
///
/// Construction only: at runtime this is supervisors calling supervisors.
#[derive(Clone)]
pub struct HierarchicalAgents {
    name: String,
    executive: Agent,
    units: Vec<Unit>,
    root: SupervisorAgent,
}

/// Builder for [`HierarchicalAgents`]
pub struct HierarchyBuilder {
    executive: Option<Agent>,
    departments: Vec<Department>,
    max_turns: u32,
    sharing: ContextSharing,
}

impl Default for HierarchyBuilder {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            executive: None,
            departments: Vec::new(),
            max_turns: config.max_turns,
            sharing: config.context_sharing,
        }
    }
}

impl HierarchyBuilder {
    pub fn executive(mut self, executive: Agent) -> Self {
        self.executive = Some(executive);
        self
    }

    pub fn department(mut self, department: Department) -> Self {
        self.departments.push(department);
        self
    }

    /// Turn limit for every generated supervisor
    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn context_sharing(mut self, sharing: ContextSharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.max_turns = config.max_turns;
        self.sharing = config.context_sharing;
        self
    }

    pub fn build(self) -> Result<HierarchicalAgents, AgentError> {
        let executive = self
            .executive
            .ok_or_else(|| AgentError::Configuration("a hierarchy needs an executive".into()))?;
        if self.departments.is_empty() {
            return Err(AgentError::Configuration(
                "a hierarchy needs at least one department".into(),
            ));
        }

        let mut units: Vec<Unit> = Vec::with_capacity(self.departments.len());
        for department in self.departments {
            if department.workers.is_empty() {
                return Err(AgentError::Configuration(format!(
                    "department '{}' needs at least one worker",
                    department.name
                )));
            }
            if units.iter().any(|u| u.department.name == department.name) {
                return Err(AgentError::Configuration(format!(
                    "duplicate department '{}'",
                    department.name
                )));
            }

            let manager = &department.manager;
            if units
                .iter()
                .any(|u| u.department.manager.name() == manager.name())
            {
                return Err(AgentError::Configuration(format!(
                    "department '{}' reuses manager '{}'; supervisor names must be unique",
                    department.name,
                    manager.name()
                )));
            }
            let builder = department.workers.iter().fold(
                SupervisorAgent::builder()
                    .name(format!("{}_Supervisor", manager.name()))
                    .model(manager.model())
                    .instructions(department.manager_instructions())
                    .responder(Arc::clone(manager.responder()))
                    .max_turns(self.max_turns)
                    .context_sharing(self.sharing),
                |builder, worker| {
                    builder.shared_worker(
                        Arc::clone(worker),
                        format!("Worker in {} department", department.name),
                    )
                },
            );
            let supervisor = Arc::new(builder.build()?);
            debug!(department = %department.name, supervisor = %supervisor.name(), "Built department");
            units.push(Unit {
                department,
                supervisor,
            });
        }

        let root = units
            .iter()
            .fold(
                SupervisorAgent::builder()
                    .name(format!("{}_Executive", executive.name()))
                    .model(executive.model())
                    .instructions(executive_instructions(&executive, &units))
                    .responder(Arc::clone(executive.responder()))
                    .max_turns(self.max_turns)
                    .context_sharing(self.sharing),
                |builder, unit| {
                    let supervisor: Member = unit.supervisor.clone();
                    builder.shared_worker(supervisor, unit.department.summary())
                },
            )
            .build()?;

        Ok(HierarchicalAgents {
            name: format!("{}_Hierarchy", executive.name()),
            executive,
            units,
            root,
        })
    }
}

fn executive_instructions(executive: &Agent, units: &[Unit]) -> String {
    let mut text = String::new();
    if let Some(base) = executive.instructions() {
        text.push_str(base);
        text.push_str("\n\n");
    }
    text.push_str("You are the executive overseeing the following departments:\n\n");
    for unit in units {
        text.push_str(&format!(
            "- **{}**: Managed by {} with {} workers\n",
            unit.department.name,
            unit.department.manager.name(),
            unit.department.workers.len()
        ));
    }
    text.push_str(
        "\nDelegate tasks to appropriate departments. \
         Aggregate their results for final response.",
    );
    text
}

impl HierarchicalAgents {
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::default()
    }

    pub fn executive(&self) -> &Agent {
        &self.executive
    }

    pub fn departments(&self) -> impl Iterator<Item = &Department> {
        self.units.iter().map(|u| &u.department)
    }

    /// Supervisor the executive delegates to
    pub fn root(&self) -> &SupervisorAgent {
        &self.root
    }

    pub fn department_supervisor(&self, name: &str) -> Option<&SupervisorAgent> {
        self.units
            .iter()
            .find(|u| u.department.name == name)
            .map(|u| u.supervisor.as_ref())
    }

    /// Give `task` straight to a department, skipping the executive.
    #[instrument(skip(self, task), fields(hierarchy = %self.name))]
    pub async fn send_to_department(&self, department: &str, task: &str) -> AgentResult {
        match self.department_supervisor(department) {
            Some(supervisor) => {
                info!("Sending task directly to department");
                supervisor.interact_text(task).await
            }
            None => {
                warn!("Unknown department");
                AgentResult::failed(AgentError::DepartmentNotFound(department.to_string()))
            }
        }
    }
}

#[async_trait]
impl Interactable for HierarchicalAgents {
    fn name(&self) -> &str {
        &self.name
    }

    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        context.ensure_trace_context();
        self.root.interact(context).await
    }

    fn interact_stream(&self, mut context: AgentContext) -> AgentStream {
        context.ensure_trace_context();
        self.root.interact_stream(context)
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Hierarchical {
            name: self.name.clone(),
            executive: Box::new(self.executive.descriptor()),
            departments: self
                .units
                .iter()
                .map(|u| DepartmentDescriptor {
                    name: u.department.name.clone(),
                    manager: u.department.manager.descriptor(),
                    workers: u.department.workers.iter().map(|w| w.descriptor()).collect(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for HierarchicalAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalAgents")
            .field("name", &self.name)
            .field(
                "departments",
                &self.units.iter().map(|u| &u.department.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
