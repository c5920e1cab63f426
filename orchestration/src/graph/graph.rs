//! Node declarations and the edge map.
//!
//! The node names are contracts: they appear verbatim in step rows,
//! checkpoints and events. The graph itself is a pure transition function;
//! the engine owns execution, timeouts and persistence.

use serde::{Deserialize, Serialize};

use super::routing::{
    route_after_assisted_debug, route_after_tests, route_after_validation, AssistedDebugRoute,
    TestRoute, ValidationRoute,
};
use super::state::WorkflowState;
use crate::config::OrchestratorConfig;

/// The twelve workflow nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    PrepareEnvironment,
    AnalyzeRequirements,
    ImplementTask,
    RunTests,
    DebugCode,
    QualityAssuranceAutomation,
    BrowserQualityAssurance,
    FinalizePr,
    MondayValidation,
    OpenaiDebug,
    MergeAfterValidation,
    UpdateMonday,
}

impl NodeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrepareEnvironment => "prepare_environment",
            Self::AnalyzeRequirements => "analyze_requirements",
            Self::ImplementTask => "implement_task",
            Self::RunTests => "run_tests",
            Self::DebugCode => "debug_code",
            Self::QualityAssuranceAutomation => "quality_assurance_automation",
            Self::BrowserQualityAssurance => "browser_quality_assurance",
            Self::FinalizePr => "finalize_pr",
            Self::MondayValidation => "monday_validation",
            Self::OpenaiDebug => "openai_debug",
            Self::MergeAfterValidation => "merge_after_validation",
            Self::UpdateMonday => "update_monday",
        }
    }

    /// Canonical linear order used for recovery resume points.
    pub fn canonical_order() -> &'static [NodeName] {
        &[
            Self::PrepareEnvironment,
            Self::AnalyzeRequirements,
            Self::ImplementTask,
            Self::RunTests,
            Self::DebugCode,
            Self::QualityAssuranceAutomation,
            Self::BrowserQualityAssurance,
            Self::FinalizePr,
            Self::MondayValidation,
            Self::OpenaiDebug,
            Self::MergeAfterValidation,
            Self::UpdateMonday,
        ]
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::canonical_order()
            .iter()
            .find(|n| n.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown node: {}", s))
    }
}

/// Where the graph goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(NodeName),
    End,
}

/// The declared graph: entry point, static edges, conditional routers.
#[derive(Debug, Default)]
pub struct WorkflowGraph;

impl WorkflowGraph {
    pub fn new() -> Self {
        Self
    }

    pub fn entry_point(&self) -> NodeName {
        NodeName::PrepareEnvironment
    }

    /// Transition function. Routing predicates may repair state in place.
    pub fn next(
        &self,
        current: NodeName,
        state: &mut WorkflowState,
        config: &OrchestratorConfig,
    ) -> Transition {
        use NodeName::*;
        match current {
            PrepareEnvironment => Transition::To(AnalyzeRequirements),
            AnalyzeRequirements => Transition::To(ImplementTask),
            ImplementTask => Transition::To(RunTests),
            RunTests => match route_after_tests(state, config) {
                TestRoute::Debug => Transition::To(DebugCode),
                TestRoute::Continue => Transition::To(QualityAssuranceAutomation),
                TestRoute::End => Transition::End,
            },
            DebugCode => Transition::To(RunTests),
            QualityAssuranceAutomation => Transition::To(BrowserQualityAssurance),
            BrowserQualityAssurance => Transition::To(FinalizePr),
            FinalizePr => Transition::To(MondayValidation),
            MondayValidation => match route_after_validation(state) {
                ValidationRoute::Merge => Transition::To(MergeAfterValidation),
                ValidationRoute::Debug => Transition::To(OpenaiDebug),
                ValidationRoute::Implement => Transition::To(ImplementTask),
                ValidationRoute::UpdateOnly => Transition::To(UpdateMonday),
                ValidationRoute::End => Transition::End,
            },
            OpenaiDebug => match route_after_assisted_debug(state) {
                AssistedDebugRoute::Implement => Transition::To(ImplementTask),
                AssistedDebugRoute::Retest => Transition::To(RunTests),
                AssistedDebugRoute::UpdateOnly => Transition::To(UpdateMonday),
                AssistedDebugRoute::End => Transition::End,
            },
            MergeAfterValidation => Transition::To(UpdateMonday),
            UpdateMonday => Transition::End,
        }
    }

    /// First incomplete node in canonical order, for recovery resumes.
    pub fn resume_point(&self, state: &WorkflowState) -> NodeName {
        NodeName::canonical_order()
            .iter()
            .find(|n| !state.is_node_completed(n.as_str()))
            .copied()
            .unwrap_or(NodeName::UpdateMonday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskRequest, TestReport};

    fn state() -> WorkflowState {
        WorkflowState::new(TaskRequest::new("1", "Test"), "wf", Some(1), Some(1), None)
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
    }

    #[test]
    fn test_node_name_roundtrip() {
        for node in NodeName::canonical_order() {
            let parsed: NodeName = node.as_str().parse().unwrap();
            assert_eq!(parsed, *node);
        }
        assert!("made_up_node".parse::<NodeName>().is_err());
    }

    #[test]
    fn test_linear_spine() {
        let graph = WorkflowGraph::new();
        let mut s = state();
        let cfg = config();

        assert_eq!(
            graph.next(NodeName::PrepareEnvironment, &mut s, &cfg),
            Transition::To(NodeName::AnalyzeRequirements)
        );
        assert_eq!(
            graph.next(NodeName::AnalyzeRequirements, &mut s, &cfg),
            Transition::To(NodeName::ImplementTask)
        );
        assert_eq!(
            graph.next(NodeName::QualityAssuranceAutomation, &mut s, &cfg),
            Transition::To(NodeName::BrowserQualityAssurance)
        );
        assert_eq!(
            graph.next(NodeName::UpdateMonday, &mut s, &cfg),
            Transition::End
        );
    }

    #[test]
    fn test_debug_loop_edge() {
        let graph = WorkflowGraph::new();
        let cfg = config();
        let mut s = state();
        let mut failing = TestReport::no_tests("cargo");
        failing.success = false;
        failing.no_tests_found = false;
        failing.total_tests = 5;
        failing.failed_tests = 2;
        s.results.push_test_report(&failing);

        assert_eq!(
            graph.next(NodeName::RunTests, &mut s, &cfg),
            Transition::To(NodeName::DebugCode)
        );
        assert_eq!(
            graph.next(NodeName::DebugCode, &mut s, &cfg),
            Transition::To(NodeName::RunTests)
        );
    }

    #[test]
    fn test_validation_edges() {
        let graph = WorkflowGraph::new();
        let cfg = config();

        let mut s = state();
        s.results.set("human_decision", "approved");
        s.results.set("should_merge", true);
        s.results.set("pr_url", "x");
        assert_eq!(
            graph.next(NodeName::MondayValidation, &mut s, &cfg),
            Transition::To(NodeName::MergeAfterValidation)
        );

        let mut s = state();
        s.results.set("human_decision", "debug");
        assert_eq!(
            graph.next(NodeName::MondayValidation, &mut s, &cfg),
            Transition::To(NodeName::OpenaiDebug)
        );

        let mut s = state();
        s.results.set("human_decision", "rejected_with_retry");
        s.results.set("rejection_count", 1);
        assert_eq!(
            graph.next(NodeName::MondayValidation, &mut s, &cfg),
            Transition::To(NodeName::ImplementTask)
        );
    }

    #[test]
    fn test_resume_point_skips_completed() {
        let graph = WorkflowGraph::new();
        let mut s = state();
        s.mark_node_completed("prepare_environment");
        s.mark_node_completed("analyze_requirements");
        assert_eq!(graph.resume_point(&s), NodeName::ImplementTask);
    }
}
