use crate::{EngineConfig, ExecutionPlan, ExecutorRegistry};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use leycore::{
    DataFlow, Edge, EventBus, EventData, EventKind, ExecutionContext, ExecutionError,
    ExecutionEvent, ExecutionId, ExecutionOptions, ExecutionResult, ExecutionStatus, NodeContext,
    NodeError, NodeExecutionState, NodeExecutor, NodeId, NodeInputs, NodeSpec, OutputSink,
    PlanError, SkipReason, SubscriptionToken, Value, Workflow, WorkflowId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

type NodeTask = BoxFuture<'static, (NodeId, Result<Value, NodeError>)>;

/// Runs workflow graphs against a registry of executors.
///
/// Nodes are scheduled in rounds: every node whose dependencies have all
/// completed is eligible, eligible nodes are launched in batches of
/// `max_concurrent_nodes`, and each batch settles completely before the next
/// one starts. A failing node never aborts its siblings; nodes that depend on
/// it are skipped.
pub struct ExecutionEngine {
    registry: Arc<ExecutorRegistry>,
    events: Arc<EventBus>,
    config: EngineConfig,
    active: RwLock<HashMap<ExecutionId, ActiveExecution>>,
}

struct ActiveExecution {
    context: Arc<Mutex<ExecutionContext>>,
    cancel: CancellationToken,
}

/// Per-run bookkeeping owned by the coordinating loop.
struct RunState {
    execution_id: ExecutionId,
    workflow_id: WorkflowId,
    context: Arc<Mutex<ExecutionContext>>,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    options: ExecutionOptions,
    variables: Arc<HashMap<String, Value>>,
    sink: OutputSink,
    cancel: CancellationToken,
    states: HashMap<NodeId, NodeExecutionState>,
    /// Results of completed nodes, read when gathering downstream inputs
    results: HashMap<NodeId, Value>,
    /// Inputs of in-flight nodes, moved into their state once they settle
    inputs: HashMap<NodeId, Value>,
}

impl RunState {
    fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    fn event(&self, kind: EventKind) -> ExecutionEvent {
        ExecutionEvent::new(kind, self.execution_id)
    }
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ExecutorRegistry>, config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        Self::with_event_bus(registry, events, config)
    }

    /// Use an existing bus, e.g. one shared with other engines
    pub fn with_event_bus(
        registry: Arc<ExecutorRegistry>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            events,
            config,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> SubscriptionToken
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe_all(listener)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.events.unsubscribe(token)
    }

    pub fn subscribe_stream(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe_stream()
    }

    /// Snapshots of every run still in progress
    pub fn active_executions(&self) -> Vec<ExecutionContext> {
        self.active
            .read()
            .values()
            .map(|a| a.context.lock().clone())
            .collect()
    }

    /// Snapshot of one run in progress
    pub fn execution(&self, execution_id: ExecutionId) -> Option<ExecutionContext> {
        self.active
            .read()
            .get(&execution_id)
            .map(|a| a.context.lock().clone())
    }

    /// Request cancellation of a run in progress.
    ///
    /// Returns false when the id is unknown or the run already finished.
    /// In-flight nodes are interrupted and nothing further is launched.
    pub fn cancel(&self, execution_id: ExecutionId) -> bool {
        let Some((context, cancel)) = self
            .active
            .read()
            .get(&execution_id)
            .map(|a| (Arc::clone(&a.context), a.cancel.clone()))
        else {
            return false;
        };

        {
            let mut ctx = context.lock();
            if ctx.status.is_terminal() {
                return false;
            }
            ctx.status = ExecutionStatus::Cancelled;
        }
        cancel.cancel();

        tracing::info!(%execution_id, "Execution cancelled");
        self.events
            .emit(ExecutionEvent::new(EventKind::ExecutionCancelled, execution_id));
        true
    }

    /// Run a workflow document. Its id is used unless the options name one.
    pub async fn run_workflow(&self, workflow: &Workflow, mut options: ExecutionOptions) -> ExecutionResult {
        if options.workflow_id.is_none() {
            options.workflow_id = Some(workflow.id.clone());
        }
        self.run(workflow.nodes.clone(), workflow.edges.clone(), options).await
    }

    /// Run a node/edge graph to completion.
    ///
    /// Node failures are recorded in the result rather than returned;
    /// planning failures end the run as FAILED with a system error.
    pub async fn run(
        &self,
        nodes: Vec<NodeSpec>,
        edges: Vec<Edge>,
        options: ExecutionOptions,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();
        let workflow_id = options.resolve_workflow_id();
        let cancel = CancellationToken::new();

        let context = ExecutionContext::new(
            workflow_id.clone(),
            execution_id,
            nodes.clone(),
            edges.clone(),
            options.variables.clone(),
        );
        let states = nodes
            .iter()
            .map(|n| (n.id.clone(), NodeExecutionState::pending(n.id.clone())))
            .collect();
        let context = Arc::new(Mutex::new(context));

        let mut run = RunState {
            execution_id,
            workflow_id,
            context: Arc::clone(&context),
            variables: Arc::new(options.variables.clone()),
            nodes,
            edges,
            options,
            sink: OutputSink::default(),
            cancel: cancel.clone(),
            states,
            results: HashMap::new(),
            inputs: HashMap::new(),
        };

        self.active.write().insert(
            execution_id,
            ActiveExecution {
                context,
                cancel: cancel.clone(),
            },
        );
        // Dropping this future before it finishes cancels every node it launched.
        let guard = cancel.drop_guard();

        tracing::info!(
            %execution_id,
            workflow_id = %run.workflow_id,
            nodes = run.nodes.len(),
            edges = run.edges.len(),
            "Starting workflow execution"
        );

        match self.plan(&run) {
            Ok(plan) => {
                self.start(&run, &plan);
                self.execute_plan(&mut run, &plan).await;
                self.finish(&run, started);
            }
            Err(err) => self.abort(&run, err, started),
        }

        let _ = guard.disarm();
        self.active.write().remove(&execution_id);

        let RunState { context, states, .. } = run;
        let context = Arc::try_unwrap(context)
            .map(Mutex::into_inner)
            .unwrap_or_else(|shared| {
                let snapshot = shared.lock().clone();
                snapshot
            });

        ExecutionResult {
            success: context.status == ExecutionStatus::Completed,
            final_outputs: context.outputs.clone(),
            execution_time_ms: started.elapsed().as_millis() as u64,
            node_states: states,
            context,
        }
    }

    fn plan(&self, run: &RunState) -> Result<ExecutionPlan, PlanError> {
        let plan = ExecutionPlan::build(&run.nodes, &run.edges)?;
        if !plan.validate(&run.nodes) {
            return Err(PlanError::InvalidPlan);
        }
        Ok(plan)
    }

    fn start(&self, run: &RunState, plan: &ExecutionPlan) {
        let started = {
            let mut ctx = run.context.lock();
            // duplicate ids collapse into one planned node
            ctx.metadata.total_nodes = plan.execution_order.len();
            if ctx.status == ExecutionStatus::Pending {
                ctx.status = ExecutionStatus::Running;
                true
            } else {
                false
            }
        };
        if !started {
            return;
        }

        self.events.emit(
            run.event(EventKind::ExecutionStarted)
                .with_data(EventData::Plan {
                    execution_order: plan.execution_order.clone(),
                    parallel_groups: plan.parallel_groups.clone(),
                    entry_points: plan.entry_points.clone(),
                    exit_points: plan.exit_points.clone(),
                }),
        );
    }

    async fn execute_plan(&self, run: &mut RunState, plan: &ExecutionPlan) {
        let total = plan.execution_order.len();
        let batch_size = self.config.batch_size();
        // `succeeded` gates eligibility; `settled` also holds failed nodes.
        let mut succeeded: HashSet<NodeId> = HashSet::new();
        let mut settled: HashSet<NodeId> = HashSet::new();

        while settled.len() < total {
            if run.cancel.is_cancelled() {
                self.skip_remaining(run, plan, &mut settled, SkipReason::Cancelled);
                break;
            }

            let executable: Vec<NodeId> = plan
                .executable_nodes(&succeeded)
                .into_iter()
                .filter(|id| !settled.contains(id))
                .collect();

            if executable.is_empty() {
                self.skip_remaining(run, plan, &mut settled, SkipReason::UpstreamFailure);
                break;
            }

            for batch in executable.chunks(batch_size) {
                if run.cancel.is_cancelled() {
                    break;
                }
                self.execute_batch(run, batch, &mut succeeded, &mut settled)
                    .await;
                self.report_breakpoints(run, batch);
            }
        }
    }

    async fn execute_batch(
        &self,
        run: &mut RunState,
        batch: &[NodeId],
        succeeded: &mut HashSet<NodeId>,
        settled: &mut HashSet<NodeId>,
    ) {
        tracing::debug!(execution_id = %run.execution_id, batch = ?batch, "Launching batch");

        let mut running: FuturesUnordered<NodeTask> =
            batch.iter().map(|id| self.launch_node(run, id)).collect();

        while let Some((node_id, outcome)) = running.next().await {
            settled.insert(node_id.clone());
            match outcome {
                Ok(output) => {
                    self.record_success(run, &node_id, output);
                    succeeded.insert(node_id);
                }
                Err(error) => self.record_failure(run, &node_id, error),
            }
            self.collect_outputs(run);
        }
    }

    /// Mark the node running and start it on its own task. Failures that
    /// happen before the executor is called still come back as a task.
    fn launch_node(&self, run: &mut RunState, node_id: &NodeId) -> NodeTask {
        let Some(node) = run.node(node_id).cloned() else {
            let error = NodeError::ExecutionFailed(format!("Node {} not found", node_id));
            let id = node_id.clone();
            return async move { (id, Err(error)) }.boxed();
        };

        if let Some(state) = run.states.get_mut(node_id) {
            state.start();
        }
        tracing::debug!(
            execution_id = %run.execution_id,
            node_id = %node.id,
            node_type = %node.node_type,
            "Node started"
        );
        self.events.emit(
            run.event(EventKind::NodeStarted)
                .for_node(node.id.clone())
                .with_data(EventData::NodeStarted {
                    node_type: node.node_type.clone(),
                    label: node.label().to_string(),
                }),
        );

        let (executor, inputs, timeout) = match self.prepare(run, &node) {
            Ok(prepared) => prepared,
            Err(error) => {
                let id = node.id.clone();
                return async move { (id, Err(error)) }.boxed();
            }
        };

        let ctx = NodeContext {
            execution_id: run.execution_id,
            workflow_id: run.workflow_id.clone(),
            node_id: node.id.clone(),
            variables: Arc::clone(&run.variables),
            outputs: run.sink.clone(),
            cancellation: run.cancel.child_token(),
        };
        let cancel = run.cancel.clone();
        let timeout_ms = timeout.as_millis() as u64;
        let id = node.id.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(NodeError::Cancelled),
                result = tokio::time::timeout(timeout, executor.execute(&node, inputs, &ctx)) => {
                    result.unwrap_or(Err(NodeError::Timeout { ms: timeout_ms }))
                }
            }
        });

        async move {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(NodeError::Panicked(e.to_string())));
            (id, outcome)
        }
        .boxed()
    }

    /// Resolve the executor, validate the node and gather its inputs.
    fn prepare(
        &self,
        run: &mut RunState,
        node: &NodeSpec,
    ) -> Result<(Arc<dyn NodeExecutor>, NodeInputs, Duration), NodeError> {
        let executor = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| NodeError::UnknownNodeType(node.node_type.clone()))?;

        executor
            .validate(node)
            .map_err(|e| NodeError::ValidationFailed {
                node_id: node.id.clone(),
                reason: e.to_string(),
            })?;

        let mut inputs = NodeInputs::new();
        for edge in run.edges.iter().filter(|e| e.target == node.id) {
            if let Some(value) = run.results.get(&edge.source) {
                inputs.insert(edge.target_handle().to_string(), value.clone());
            }
        }
        let recorded: BTreeMap<String, Value> =
            inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        run.inputs.insert(node.id.clone(), Value::from(recorded));

        let timeout = run
            .options
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| executor.timeout())
            .unwrap_or_else(|| self.config.default_node_timeout());

        Ok((executor, inputs, timeout))
    }

    fn record_success(&self, run: &mut RunState, node_id: &NodeId, output: Value) {
        let input = run.inputs.remove(node_id).unwrap_or_default();
        let duration_ms = match run.states.get_mut(node_id) {
            Some(state) => {
                state.complete(input, output.clone());
                state.duration_ms.unwrap_or(0)
            }
            None => 0,
        };
        run.results.insert(node_id.clone(), output.clone());
        run.context.lock().metadata.executed_nodes += 1;

        tracing::info!(
            execution_id = %run.execution_id,
            node_id = %node_id,
            duration_ms,
            "Node completed"
        );
        self.events.emit(
            run.event(EventKind::NodeCompleted)
                .for_node(node_id.clone())
                .with_data(EventData::NodeCompleted {
                    result: output.clone(),
                    duration_ms,
                }),
        );

        for edge in run.edges.iter().filter(|e| &e.source == node_id) {
            if run.options.debug {
                tracing::info!(
                    "Data flow {}.{} -> {}.{}",
                    edge.source,
                    edge.source_handle(),
                    edge.target,
                    edge.target_handle()
                );
            }
            self.events.emit(
                run.event(EventKind::DataFlow)
                    .for_node(node_id.clone())
                    .with_data(EventData::DataFlow(DataFlow {
                        from_node_id: edge.source.clone(),
                        to_node_id: edge.target.clone(),
                        from_handle: edge.source_handle().to_string(),
                        to_handle: edge.target_handle().to_string(),
                        data: output.clone(),
                        timestamp: Utc::now(),
                    })),
            );
        }
    }

    fn record_failure(&self, run: &mut RunState, node_id: &NodeId, error: NodeError) {
        let record = ExecutionError::for_node(node_id, &error);
        let input = run.inputs.remove(node_id);
        if let Some(state) = run.states.get_mut(node_id) {
            state.fail(input, record.clone());
        }
        {
            let mut ctx = run.context.lock();
            ctx.metadata.failed_nodes += 1;
            ctx.errors.push(record.clone());
        }

        tracing::error!(
            execution_id = %run.execution_id,
            node_id = %node_id,
            kind = ?record.kind,
            "Node failed: {}",
            record.message
        );
        self.events.emit(
            run.event(EventKind::NodeFailed)
                .for_node(node_id.clone())
                .with_data(EventData::Failure { error: record }),
        );
    }

    fn skip_remaining(
        &self,
        run: &mut RunState,
        plan: &ExecutionPlan,
        settled: &mut HashSet<NodeId>,
        reason: SkipReason,
    ) {
        for node_id in &plan.execution_order {
            if !settled.insert(node_id.clone()) {
                continue;
            }
            if let Some(state) = run.states.get_mut(node_id) {
                state.skip();
            }
            run.context.lock().metadata.skipped_nodes += 1;

            tracing::warn!(
                execution_id = %run.execution_id,
                node_id = %node_id,
                reason = ?reason,
                "Node skipped"
            );
            self.events.emit(
                run.event(EventKind::NodeSkipped)
                    .for_node(node_id.clone())
                    .with_data(EventData::Skipped { reason }),
            );
        }
    }

    /// Move anything sink nodes wrote into the run's named outputs.
    fn collect_outputs(&self, run: &RunState) {
        let written = run.sink.drain();
        if written.is_empty() {
            return;
        }
        let mut ctx = run.context.lock();
        for (name, value) in written {
            ctx.outputs.insert(name, value);
        }
    }

    /// Breakpoints and step mode are reported once the batch has settled;
    /// the run itself keeps going.
    fn report_breakpoints(&self, run: &RunState, batch: &[NodeId]) {
        let hits: Vec<NodeId> = batch
            .iter()
            .filter(|id| run.options.breakpoints.contains(id))
            .cloned()
            .collect();
        if hits.is_empty() && !run.options.step_mode {
            return;
        }

        tracing::warn!(
            execution_id = %run.execution_id,
            nodes = ?hits,
            step_mode = run.options.step_mode,
            "Breakpoint reached; pausing is not supported, execution continues"
        );
        let mut event = run
            .event(EventKind::BreakpointHit)
            .with_data(EventData::Breakpoint {
                node_ids: hits.clone(),
                step_mode: run.options.step_mode,
            });
        if let Some(first) = hits.into_iter().next() {
            event = event.for_node(first);
        }
        self.events.emit(event);
    }

    fn finish(&self, run: &RunState, started: Instant) {
        let execution_time_ms = started.elapsed().as_millis() as u64;
        let (status, errors, outputs) = {
            let mut ctx = run.context.lock();
            ctx.metadata.duration_ms = Some(execution_time_ms);
            if ctx.status != ExecutionStatus::Cancelled {
                ctx.status = if ctx.has_errors() {
                    ExecutionStatus::Failed
                } else {
                    ExecutionStatus::Completed
                };
            }
            (ctx.status, ctx.errors.clone(), ctx.outputs.clone())
        };

        let kind = match status {
            ExecutionStatus::Completed => EventKind::ExecutionCompleted,
            ExecutionStatus::Failed => EventKind::ExecutionFailed,
            // already announced by `cancel`
            _ => {
                tracing::info!(
                    execution_id = %run.execution_id,
                    execution_time_ms,
                    "Execution ended after cancellation"
                );
                return;
            }
        };

        tracing::info!(
            execution_id = %run.execution_id,
            execution_time_ms,
            errors = errors.len(),
            "Workflow execution finished: {:?}",
            status
        );
        self.events.emit(run.event(kind).with_data(EventData::Summary {
            execution_time_ms,
            errors,
            outputs,
        }));
    }

    /// Planning failed: record a system error and end the run.
    fn abort(&self, run: &RunState, err: PlanError, started: Instant) {
        let error = ExecutionError::system(run.execution_id, err.to_string());
        {
            let mut ctx = run.context.lock();
            if ctx.status != ExecutionStatus::Cancelled {
                ctx.status = ExecutionStatus::Failed;
            }
            ctx.errors.push(error.clone());
            ctx.metadata.duration_ms = Some(started.elapsed().as_millis() as u64);
        }

        tracing::error!(execution_id = %run.execution_id, "Workflow execution failed: {}", err);
        self.events.emit(
            run.event(EventKind::ExecutionFailed)
                .with_data(EventData::Failure { error }),
        );
    }
}
