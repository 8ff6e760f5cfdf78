//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions over a finished run.

use e2e_runner::errors::Severity;
use e2e_runner::models::{Phase, PhaseOutcome};
use e2e_runner::orchestrator::state::{RunResult, RunStage};

/// Custom assertions for run results
///
/// # Example
/// ```rust,ignore
/// result
///     .assert_passed()
///     .assert_cleaned_up_once()
///     .assert_phase_completed(Phase::Install);
/// ```
pub trait RunAssertions {
    /// Assert the run did not fail
    fn assert_passed(&self) -> &Self;

    /// Assert the run failed
    fn assert_failed(&self) -> &Self;

    /// Assert cleanup was entered exactly once and the run ended in `Done`
    fn assert_cleaned_up_once(&self) -> &Self;

    /// Assert the run never entered `stage`
    fn assert_not_reached(&self, stage: RunStage) -> &Self;

    /// Assert the phase ran to completion and produced a summary
    fn assert_phase_completed(&self, phase: Phase) -> &Self;

    /// Assert the phase was recorded as skipped
    fn assert_phase_skipped(&self, phase: Phase) -> &Self;

    /// Assert the phase was recorded as failed to run
    fn assert_phase_failed(&self, phase: Phase) -> &Self;

    /// Assert the number of errors recorded with `severity`
    fn assert_error_count(&self, severity: Severity, expected: usize) -> &Self;
}

impl RunAssertions for RunResult {
    fn assert_passed(&self) -> &Self {
        assert!(!self.failed, "Expected run to pass, errors: {:?}", self.errors);
        self
    }

    fn assert_failed(&self) -> &Self {
        assert!(self.failed, "Expected run to fail, stages: {:?}", self.stages);
        self
    }

    fn assert_cleaned_up_once(&self) -> &Self {
        assert_eq!(
            self.stage_count(RunStage::CleanedUp),
            1,
            "Cleanup must be entered exactly once, stages: {:?}",
            self.stages
        );
        assert_eq!(
            self.stages.last(),
            Some(&RunStage::Done),
            "Run must end in Done, stages: {:?}",
            self.stages
        );
        self
    }

    fn assert_not_reached(&self, stage: RunStage) -> &Self {
        assert!(
            !self.reached(stage),
            "Run should not have reached {}, stages: {:?}",
            stage,
            self.stages
        );
        self
    }

    fn assert_phase_completed(&self, phase: Phase) -> &Self {
        assert!(
            matches!(self.phase(phase), Some(PhaseOutcome::Completed(_))),
            "Expected {} phase to complete, got {:?}",
            phase,
            self.phase(phase)
        );
        self
    }

    fn assert_phase_skipped(&self, phase: Phase) -> &Self {
        assert!(
            matches!(self.phase(phase), Some(PhaseOutcome::Skipped { .. })),
            "Expected {} phase to be skipped, got {:?}",
            phase,
            self.phase(phase)
        );
        self
    }

    fn assert_phase_failed(&self, phase: Phase) -> &Self {
        assert!(
            matches!(self.phase(phase), Some(PhaseOutcome::Failed { .. })),
            "Expected {} phase to fail, got {:?}",
            phase,
            self.phase(phase)
        );
        self
    }

    fn assert_error_count(&self, severity: Severity, expected: usize) -> &Self {
        let actual = self.errors_with(severity).count();
        assert_eq!(
            actual, expected,
            "Expected {} {:?} errors, got {:?}",
            expected, severity, self.errors
        );
        self
    }
}
