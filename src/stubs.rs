//! Stub generation capability.
//!
//! Stubbing replaces the bodies of methods the solution patch touches with
//! minimal placeholders, so the pre-phase run measures the tests rather
//! than unrelated compilation breakage. The heuristic itself lives outside
//! this crate; the engine only consumes the capability through this trait
//! and treats both outcomes as valid — `Skipped` is not an error.

use crate::container::{ContainerHandle, ContainerManager};
use crate::errors::StubError;

#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)] // Applied is produced by real generator implementations
pub enum StubOutcome {
    /// Stubs were generated and applied to the workspace.
    Applied { files_changed: usize },
    /// The capability chose not to run; the pipeline continues unchanged.
    Skipped { reason: String },
}

pub trait StubGenerator {
    fn name(&self) -> &str;

    /// Apply stubs derived from the solution patch to the container
    /// workspace at `workdir`. An `Err` makes the orchestrator revert the
    /// workspace to the test-patch-applied state and continue without
    /// stubs; it never fails the instance.
    fn apply_and_stub(
        &self,
        containers: &ContainerManager,
        handle: &ContainerHandle,
        build_log: &str,
        test_patch: &str,
        solution_patch: &str,
        workdir: &str,
    ) -> Result<StubOutcome, StubError>;
}

/// Default capability: stubbing disabled, always skips.
pub struct DisabledStubGenerator;

impl StubGenerator for DisabledStubGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    fn apply_and_stub(
        &self,
        _containers: &ContainerManager,
        _handle: &ContainerHandle,
        _build_log: &str,
        _test_patch: &str,
        _solution_patch: &str,
        _workdir: &str,
    ) -> Result<StubOutcome, StubError> {
        Ok(StubOutcome::Skipped {
            reason: "stub generation not configured".to_string(),
        })
    }
}
