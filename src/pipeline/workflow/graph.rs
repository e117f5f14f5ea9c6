use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{Checkpoint, Checkpointer, StepState, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub max_steps: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { max_steps: 50 }
    }
}

/// A named unit of work. Steps never fail: they record problems in the
/// state's error slot and let the graph route on it.
#[async_trait]
pub trait Step<S: StepState>: Send + Sync {
    async fn run(&self, state: S) -> S;
}

type Router<S> = Box<dyn Fn(&S) -> String + Send + Sync>;

enum Transition<S> {
    Direct { to: String, is_loop: bool },
    Conditional {
        router: Router<S>,
        routes: BTreeMap<String, String>,
    },
}

impl<S> Transition<S> {
    /// (target, is_loop) pairs.
    fn targets(&self) -> Vec<(&str, bool)> {
        match self {
            Self::Direct { to, is_loop } => vec![(to.as_str(), *is_loop)],
            Self::Conditional { routes, .. } => routes.values().map(|t| (t.as_str(), false)).collect(),
        }
    }
}

/// Collects steps and transitions; `compile` validates the graph.
pub struct WorkflowBuilder<S: StepState> {
    name: String,
    steps: HashMap<String, Box<dyn Step<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry: Option<String>,
    error_step: Option<String>,
    config: ExecutionConfig,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    problems: Vec<WorkflowError>,
}

impl<S: StepState> WorkflowBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: HashMap::new(),
            transitions: HashMap::new(),
            entry: None,
            error_step: None,
            config: ExecutionConfig::default(),
            checkpointer: None,
            problems: Vec::new(),
        }
    }

    pub fn register_step(mut self, name: &str, step: impl Step<S> + 'static) -> Self {
        if self.steps.insert(name.to_string(), Box::new(step)).is_some() {
            self.problems.push(WorkflowError::DuplicateStep(name.to_string()));
        }
        self
    }

    pub fn register_edge(self, from: &str, to: &str) -> Self {
        self.add_transition(
            from,
            Transition::Direct {
                to: to.to_string(),
                is_loop: false,
            },
        )
    }

    /// An edge allowed to close a cycle. Traversing it starts a new iteration.
    pub fn register_loop_edge(self, from: &str, to: &str) -> Self {
        self.add_transition(
            from,
            Transition::Direct {
                to: to.to_string(),
                is_loop: true,
            },
        )
    }

    /// Routes on the label `router` computes from the state after `from` runs.
    pub fn register_conditional<F>(self, from: &str, router: F, routes: &[(&str, &str)]) -> Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        let routes = routes
            .iter()
            .map(|(label, target)| (label.to_string(), target.to_string()))
            .collect();
        self.add_transition(
            from,
            Transition::Conditional {
                router: Box::new(router),
                routes,
            },
        )
    }

    pub fn set_entry(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    /// Step that receives the run whenever a step followed by a direct edge
    /// leaves the error slot filled.
    pub fn set_error_step(mut self, name: &str) -> Self {
        self.error_step = Some(name.to_string());
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer<S>>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    fn add_transition(mut self, from: &str, transition: Transition<S>) -> Self {
        if self.transitions.insert(from.to_string(), transition).is_some() {
            self.problems
                .push(WorkflowError::DuplicateTransition(from.to_string()));
        }
        self
    }

    pub fn compile(mut self) -> Result<CompiledWorkflow<S>, WorkflowError> {
        if !self.problems.is_empty() {
            return Err(self.problems.remove(0));
        }

        let entry = self
            .entry
            .clone()
            .ok_or_else(|| WorkflowError::MissingEntry(self.name.clone()))?;
        if !self.steps.contains_key(&entry) {
            return Err(WorkflowError::MissingStep(entry));
        }
        if let Some(error_step) = &self.error_step {
            if !self.steps.contains_key(error_step) {
                return Err(WorkflowError::MissingStep(error_step.clone()));
            }
        }

        let mut sources: Vec<&String> = self.transitions.keys().collect();
        sources.sort();
        for from in sources {
            if !self.steps.contains_key(from) {
                return Err(WorkflowError::MissingStep(from.clone()));
            }
            let transition = &self.transitions[from];
            if let Transition::Conditional { routes, .. } = transition {
                if routes.is_empty() {
                    return Err(WorkflowError::EmptyRouteMap(from.clone()));
                }
            }
            for (to, _) in transition.targets() {
                if !self.steps.contains_key(to) {
                    return Err(WorkflowError::InvalidEdge {
                        from: from.clone(),
                        to: to.to_string(),
                    });
                }
            }
        }

        self.check_reachability(&entry)?;
        self.check_cycles()?;

        Ok(CompiledWorkflow {
            name: self.name,
            steps: self.steps,
            transitions: self.transitions,
            entry,
            error_step: self.error_step,
            config: self.config,
            checkpointer: self.checkpointer,
        })
    }

    fn check_reachability(&self, entry: &str) -> Result<(), WorkflowError> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(entry);
        if let Some(error_step) = &self.error_step {
            queue.push_back(error_step.as_str());
        }

        while let Some(step) = queue.pop_front() {
            if !reached.insert(step) {
                continue;
            }
            if let Some(transition) = self.transitions.get(step) {
                queue.extend(transition.targets().into_iter().map(|(to, _)| to));
            }
        }

        let unreachable: BTreeSet<&String> = self
            .steps
            .keys()
            .filter(|name| !reached.contains(name.as_str()))
            .collect();
        match unreachable.into_iter().next() {
            Some(name) => Err(WorkflowError::UnreachableStep(name.clone())),
            None => Ok(()),
        }
    }

    /// Depth-first search over non-loop edges.
    fn check_cycles(&self) -> Result<(), WorkflowError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a, S>(
            node: &'a str,
            transitions: &'a HashMap<String, Transition<S>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), WorkflowError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(WorkflowError::CycleDetected(node.to_string())),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(transition) = transitions.get(node) {
                for (to, is_loop) in transition.targets() {
                    if !is_loop {
                        visit(to, transitions, marks)?;
                    }
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut names: Vec<&String> = self.steps.keys().collect();
        names.sort();
        let mut marks = HashMap::new();
        for name in names {
            visit(name.as_str(), &self.transitions, &mut marks)?;
        }
        Ok(())
    }
}

/// A validated, runnable step graph.
pub struct CompiledWorkflow<S: StepState> {
    name: String,
    steps: HashMap<String, Box<dyn Step<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry: String,
    error_step: Option<String>,
    config: ExecutionConfig,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S: StepState> CompiledWorkflow<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, state: S) -> Result<S, WorkflowError> {
        self.execute(self.entry.clone(), state).await
    }

    /// Continues an interrupted run from its last checkpoint.
    pub async fn resume(&self, request_id: &str) -> Result<S, WorkflowError> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| WorkflowError::CheckpointNotFound(request_id.to_string()))?;
        let checkpoint = checkpointer
            .load(request_id)
            .await?
            .ok_or_else(|| WorkflowError::CheckpointNotFound(request_id.to_string()))?;

        tracing::info!(
            workflow = %self.name,
            request_id,
            next_step = ?checkpoint.next_step,
            "Resuming workflow from checkpoint"
        );
        match checkpoint.next_step {
            Some(next) => self.execute(next, checkpoint.state).await,
            None => Ok(checkpoint.state),
        }
    }

    async fn execute(&self, start: String, mut state: S) -> Result<S, WorkflowError> {
        let request_id = state.meta().request_id.to_string();
        let mut current = Some(start);
        let mut visited: HashSet<String> = HashSet::new();
        let mut steps_taken = 0usize;

        while let Some(step_name) = current.take() {
            steps_taken += 1;
            if steps_taken > self.config.max_steps {
                return Err(WorkflowError::MaxStepsExceeded {
                    max: self.config.max_steps,
                    reached: steps_taken,
                });
            }
            if !visited.insert(step_name.clone()) {
                return Err(WorkflowError::Reentry(step_name));
            }

            let step = self
                .steps
                .get(&step_name)
                .ok_or_else(|| WorkflowError::MissingStep(step_name.clone()))?;

            tracing::debug!(workflow = %self.name, step = %step_name, %request_id, "Entering step");
            let started = Instant::now();
            state = step.run(state).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            state.meta_mut().record_step_time(&step_name, elapsed_ms);
            tracing::debug!(workflow = %self.name, step = %step_name, elapsed_ms, "Step finished");

            let (next, via_loop) = self.next_step(&step_name, &state)?;
            if via_loop {
                visited.clear();
            }
            self.save_checkpoint(&request_id, next.clone(), &state).await;
            current = next;
        }

        if let Some(checkpointer) = &self.checkpointer {
            if let Err(e) = checkpointer.clear(&request_id).await {
                tracing::warn!(workflow = %self.name, %request_id, error = %e, "Failed to clear checkpoint");
            }
        }

        tracing::info!(
            workflow = %self.name,
            %request_id,
            steps = steps_taken,
            failed = state.meta().has_error(),
            "Workflow finished"
        );
        Ok(state)
    }

    fn next_step(&self, current: &str, state: &S) -> Result<(Option<String>, bool), WorkflowError> {
        match self.transitions.get(current) {
            None => Ok((None, false)),
            Some(Transition::Direct { to, is_loop }) => {
                if state.meta().has_error() {
                    if let Some(error_step) = &self.error_step {
                        if error_step != current {
                            return Ok((Some(error_step.clone()), false));
                        }
                    }
                }
                Ok((Some(to.clone()), *is_loop))
            }
            Some(Transition::Conditional { router, routes }) => {
                let label = router(state);
                match routes.get(&label) {
                    Some(target) => Ok((Some(target.clone()), false)),
                    None => {
                        tracing::error!(
                            workflow = %self.name,
                            step = current,
                            label = %label,
                            "Route label has no mapped target"
                        );
                        Err(WorkflowError::Routing {
                            step: current.to_string(),
                            label,
                        })
                    }
                }
            }
        }
    }

    async fn save_checkpoint(&self, request_id: &str, next_step: Option<String>, state: &S) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        let checkpoint = Checkpoint::new(request_id.to_string(), next_step, state.clone());
        if let Err(e) = checkpointer.save(&checkpoint).await {
            tracing::warn!(workflow = %self.name, request_id, error = %e, "Checkpoint save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workflow::{ErrorKind, InMemoryCheckpointer, RunMeta, WorkflowFailure};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestState {
        meta: RunMeta,
        trail: Vec<String>,
        counter: u32,
        label: String,
    }

    impl TestState {
        fn new(label: &str) -> Self {
            Self {
                meta: RunMeta::new("tester", None),
                trail: Vec::new(),
                counter: 0,
                label: label.to_string(),
            }
        }
    }

    impl StepState for TestState {
        fn meta(&self) -> &RunMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut RunMeta {
            &mut self.meta
        }
    }

    struct Push(&'static str);

    #[async_trait]
    impl Step<TestState> for Push {
        async fn run(&self, mut state: TestState) -> TestState {
            state.trail.push(self.0.to_string());
            state
        }
    }

    struct Fail(&'static str);

    #[async_trait]
    impl Step<TestState> for Fail {
        async fn run(&self, mut state: TestState) -> TestState {
            state.trail.push(self.0.to_string());
            state.meta.set_error(WorkflowFailure::new(ErrorKind::ProcessingFailure, self.0, "boom"));
            state
        }
    }

    struct Bump;

    #[async_trait]
    impl Step<TestState> for Bump {
        async fn run(&self, mut state: TestState) -> TestState {
            state.counter += 1;
            state.trail.push("bump".into());
            state
        }
    }

    fn by_label(state: &TestState) -> String {
        if state.meta.has_error() {
            "error".into()
        } else {
            state.label.clone()
        }
    }

    #[tokio::test]
    async fn linear_run_records_timings() {
        let workflow = WorkflowBuilder::new("linear")
            .register_step("a", Push("a"))
            .register_step("b", Push("b"))
            .register_edge("a", "b")
            .set_entry("a")
            .compile()
            .unwrap();

        let state = workflow.run(TestState::new("")).await.unwrap();
        assert_eq!(state.trail, vec!["a", "b"]);
        assert!(state.meta.step_timings.contains_key("a"));
        assert!(state.meta.step_timings.contains_key("b"));
    }

    fn branching() -> CompiledWorkflow<TestState> {
        WorkflowBuilder::new("branching")
            .register_step("start", Push("start"))
            .register_step("left", Push("left"))
            .register_step("right", Push("right"))
            .register_step("handle_error", Push("handle_error"))
            .register_conditional(
                "start",
                by_label,
                &[("left", "left"), ("right", "right"), ("error", "handle_error")],
            )
            .set_entry("start")
            .set_error_step("handle_error")
            .compile()
            .unwrap()
    }

    #[tokio::test]
    async fn conditional_routes_by_label() {
        let workflow = branching();
        let state = workflow.run(TestState::new("right")).await.unwrap();
        assert_eq!(state.trail, vec!["start", "right"]);
    }

    #[tokio::test]
    async fn unmapped_label_is_routing_error() {
        let workflow = branching();
        let err = workflow.run(TestState::new("sideways")).await.unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Routing {
                step: "start".into(),
                label: "sideways".into()
            }
        );
    }

    #[tokio::test]
    async fn error_on_direct_edge_diverts_to_error_step() {
        let workflow = WorkflowBuilder::new("divert")
            .register_step("a", Fail("a"))
            .register_step("b", Push("b"))
            .register_step("handle_error", Push("handle_error"))
            .register_edge("a", "b")
            .set_entry("a")
            .set_error_step("handle_error")
            .compile()
            .unwrap();

        let state = workflow.run(TestState::new("")).await.unwrap();
        assert_eq!(state.trail, vec!["a", "handle_error"]);
        assert_eq!(state.meta.error.unwrap().step, "a");
    }

    #[tokio::test]
    async fn loop_edge_allows_iteration_until_exit() {
        let workflow = WorkflowBuilder::new("loop")
            .register_step("check", Push("check"))
            .register_step("bump", Bump)
            .register_step("done", Push("done"))
            .register_conditional(
                "check",
                |s: &TestState| if s.counter < 3 { "again".into() } else { "exit".into() },
                &[("again", "bump"), ("exit", "done")],
            )
            .register_loop_edge("bump", "check")
            .set_entry("check")
            .compile()
            .unwrap();

        let state = workflow.run(TestState::new("")).await.unwrap();
        assert_eq!(state.counter, 3);
        assert_eq!(state.trail.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn runaway_loop_hits_step_limit() {
        let workflow = WorkflowBuilder::new("runaway")
            .register_step("a", Bump)
            .register_loop_edge("a", "a")
            .set_entry("a")
            .with_config(ExecutionConfig { max_steps: 5 })
            .compile()
            .unwrap();

        let err = workflow.run(TestState::new("")).await.unwrap_err();
        assert_eq!(err, WorkflowError::MaxStepsExceeded { max: 5, reached: 6 });
    }

    #[test]
    fn compile_rejects_missing_entry() {
        let result = WorkflowBuilder::<TestState>::new("empty")
            .register_step("a", Push("a"))
            .compile();
        assert!(matches!(result, Err(WorkflowError::MissingEntry(_))));
    }

    #[test]
    fn compile_rejects_unknown_target() {
        let result = WorkflowBuilder::new("bad")
            .register_step("a", Push("a"))
            .register_edge("a", "ghost")
            .set_entry("a")
            .compile();
        assert!(matches!(result, Err(WorkflowError::InvalidEdge { .. })));
    }

    #[test]
    fn compile_rejects_two_transitions_from_one_step() {
        let result = WorkflowBuilder::new("double")
            .register_step("a", Push("a"))
            .register_step("b", Push("b"))
            .register_edge("a", "b")
            .register_edge("a", "b")
            .set_entry("a")
            .compile();
        assert_eq!(result.err(), Some(WorkflowError::DuplicateTransition("a".into())));
    }

    #[test]
    fn compile_rejects_unreachable_step() {
        let result = WorkflowBuilder::new("island")
            .register_step("a", Push("a"))
            .register_step("island", Push("island"))
            .set_entry("a")
            .compile();
        assert_eq!(result.err(), Some(WorkflowError::UnreachableStep("island".into())));
    }

    #[test]
    fn compile_rejects_cycle_without_loop_edge() {
        let result = WorkflowBuilder::new("cycle")
            .register_step("a", Push("a"))
            .register_step("b", Push("b"))
            .register_edge("a", "b")
            .register_edge("b", "a")
            .set_entry("a")
            .compile();
        assert!(matches!(result, Err(WorkflowError::CycleDetected(_))));
    }

    #[test]
    fn compile_rejects_empty_route_map() {
        let result = WorkflowBuilder::new("empty-routes")
            .register_step("a", Push("a"))
            .register_conditional("a", by_label, &[])
            .set_entry("a")
            .compile();
        assert_eq!(result.err(), Some(WorkflowError::EmptyRouteMap("a".into())));
    }

    #[tokio::test]
    async fn checkpoints_are_cleared_after_completion() {
        let checkpointer = Arc::new(InMemoryCheckpointer::<TestState>::default());
        let workflow = WorkflowBuilder::new("checkpointed")
            .register_step("a", Push("a"))
            .register_step("b", Push("b"))
            .register_edge("a", "b")
            .set_entry("a")
            .with_checkpointer(checkpointer.clone())
            .compile()
            .unwrap();

        workflow.run(TestState::new("")).await.unwrap();
        assert!(checkpointer.is_empty());
    }

    #[tokio::test]
    async fn resume_continues_from_saved_step() {
        let checkpointer = Arc::new(InMemoryCheckpointer::<TestState>::default());
        let workflow = WorkflowBuilder::new("resumable")
            .register_step("a", Push("a"))
            .register_step("b", Push("b"))
            .register_edge("a", "b")
            .set_entry("a")
            .with_checkpointer(checkpointer.clone())
            .compile()
            .unwrap();

        let mut interrupted = TestState::new("");
        interrupted.trail.push("a".into());
        let request_id = interrupted.meta.request_id.to_string();
        checkpointer
            .save(&Checkpoint::new(request_id.clone(), Some("b".into()), interrupted))
            .await
            .unwrap();

        let state = workflow.resume(&request_id).await.unwrap();
        assert_eq!(state.trail, vec!["a", "b"]);

        let err = workflow.resume(&request_id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::CheckpointNotFound(_)));
    }
}
