//! Scoped executions
//!
//! An execution is created RUNNING and attached to the current run. Closing
//! the scope explicitly marks it COMPLETE; dropping it without closing marks
//! it FAILED, so a panic or early return inside the scope never leaves an
//! execution dangling in RUNNING.

use std::sync::Arc;

use tracing::error;

use crate::api::metadata::{
    Artifact, Execution, ExecutionState, LineageEvent, LineageKind, LineageSubgraph,
    MetadataService,
};
use crate::error::Result;
use crate::names::{ContextName, ExecutionName};

/// An execution bound to the lifetime of a scope.
pub struct ExecutionScope {
    metadata: Arc<dyn MetadataService>,
    execution: Execution,
    finished: bool,
}

impl ExecutionScope {
    /// Create the execution in RUNNING state and attach it to `run_context`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`](crate::Error::AlreadyExists) when the id is
    /// taken; service errors unchanged.
    pub(crate) fn start(
        metadata: Arc<dyn MetadataService>,
        name: ExecutionName,
        schema_title: &str,
        display_name: &str,
        run_context: &ContextName,
    ) -> Result<Self> {
        let mut execution = Execution::new(name, schema_title);
        execution.display_name = display_name.to_string();
        execution.state = ExecutionState::Running;
        let execution = metadata.create_execution(execution)?;
        metadata.add_context_artifacts_and_executions(
            run_context,
            &[],
            &[execution.name.clone()],
        )?;
        Ok(Self {
            metadata,
            execution,
            finished: false,
        })
    }

    /// The execution's resource name.
    #[must_use]
    pub const fn name(&self) -> &ExecutionName {
        &self.execution.name
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ExecutionState {
        self.execution.state
    }

    /// Record `artifacts` as inputs of this execution.
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn assign_input_artifacts(&self, artifacts: &[Artifact]) -> Result<()> {
        self.assign(artifacts, LineageKind::Input)
    }

    /// Record `artifacts` as outputs of this execution.
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn assign_output_artifacts(&self, artifacts: &[Artifact]) -> Result<()> {
        self.assign(artifacts, LineageKind::Output)
    }

    fn assign(&self, artifacts: &[Artifact], kind: LineageKind) -> Result<()> {
        let events: Vec<LineageEvent> = artifacts
            .iter()
            .map(|artifact| LineageEvent {
                execution: self.execution.name.clone(),
                artifact: artifact.name.clone(),
                kind,
            })
            .collect();
        self.metadata.add_execution_events(&events)
    }

    /// Resolve this execution's lineage, delegated to the service.
    ///
    /// # Errors
    ///
    /// Service errors unchanged.
    pub fn inputs_and_outputs(&self) -> Result<LineageSubgraph> {
        self.metadata
            .query_execution_inputs_and_outputs(&self.execution.name)
    }

    /// Close the scope, marking the execution COMPLETE.
    ///
    /// # Errors
    ///
    /// Service errors unchanged; the scope is consumed either way.
    pub fn complete(mut self) -> Result<()> {
        self.transition(ExecutionState::Complete)
    }

    /// Close the scope, marking the execution FAILED.
    ///
    /// # Errors
    ///
    /// Service errors unchanged; the scope is consumed either way.
    pub fn fail(mut self) -> Result<()> {
        self.transition(ExecutionState::Failed)
    }

    fn transition(&mut self, state: ExecutionState) -> Result<()> {
        self.finished = true;
        self.execution.state = state;
        self.metadata.update_execution(self.execution.clone())?;
        Ok(())
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.execution.state = ExecutionState::Failed;
        if let Err(err) = self.metadata.update_execution(self.execution.clone()) {
            error!(execution = %self.execution.name, %err, "failed to mark abandoned execution FAILED");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::{schema, Context, InMemoryMetadataService};

    fn setup() -> (Arc<dyn MetadataService>, ContextName) {
        let metadata: Arc<dyn MetadataService> = Arc::new(InMemoryMetadataService::new());
        let run = metadata
            .create_context(Context::new(
                ContextName::new("p", "l", "exp-r1"),
                schema::EXPERIMENT_RUN,
            ))
            .unwrap();
        (metadata, run.name)
    }

    #[test]
    fn test_complete_on_explicit_close() {
        let (metadata, run) = setup();
        let scope = ExecutionScope::start(
            metadata.clone(),
            ExecutionName::new("p", "l", "preprocess"),
            schema::CONTAINER_EXECUTION,
            "preprocess",
            &run,
        )
        .unwrap();
        assert_eq!(scope.state(), ExecutionState::Running);
        let name = scope.name().clone();
        scope.complete().unwrap();

        let stored = metadata.get_execution(&name).unwrap();
        assert_eq!(stored.state, ExecutionState::Complete);
    }

    #[test]
    fn test_failed_on_drop() {
        let (metadata, run) = setup();
        let name = ExecutionName::new("p", "l", "flaky");
        {
            let _scope = ExecutionScope::start(
                metadata.clone(),
                name.clone(),
                schema::CONTAINER_EXECUTION,
                "flaky",
                &run,
            )
            .unwrap();
            // Scope dropped without complete(): simulates an early return.
        }
        let stored = metadata.get_execution(&name).unwrap();
        assert_eq!(stored.state, ExecutionState::Failed);
    }

    #[test]
    fn test_lineage_edges() {
        let (metadata, run) = setup();
        let input = metadata
            .create_artifact(Artifact::new(
                crate::names::ArtifactName::new("p", "l", "dataset"),
                schema::EXPERIMENT_MODEL,
            ))
            .unwrap();
        let output = metadata
            .create_artifact(Artifact::new(
                crate::names::ArtifactName::new("p", "l", "model"),
                schema::EXPERIMENT_MODEL,
            ))
            .unwrap();

        let scope = ExecutionScope::start(
            metadata.clone(),
            ExecutionName::new("p", "l", "train"),
            schema::CONTAINER_EXECUTION,
            "train",
            &run,
        )
        .unwrap();
        scope.assign_input_artifacts(&[input.clone()]).unwrap();
        scope.assign_output_artifacts(&[output.clone()]).unwrap();

        let lineage = scope.inputs_and_outputs().unwrap();
        assert_eq!(lineage.inputs[0].name, input.name);
        assert_eq!(lineage.outputs[0].name, output.name);
        scope.complete().unwrap();
    }
}
