use crate::executor::{failure_detail, NodeExecutor};
use crate::registry::ToolRegistry;
use crate::RunHandle;
use graphcore::{Fields, Graph, LoopSpec, NodeId, Phase, RunError, RunFailure};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// How the walker reached a node. Written into the node's `started` entry,
/// so the log records every edge the walker took.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Arrival {
    Entry,
    Edge {
        from: NodeId,
    },
    Conditional {
        from: NodeId,
        index: usize,
    },
    LoopBody {
        #[serde(rename = "loop")]
        loop_node: NodeId,
        iteration: u32,
    },
    LoopExit {
        from: NodeId,
    },
}

/// Where a walk stopped and why
struct Halt {
    node: NodeId,
    error: RunError,
    /// The executor already wrote the `failed` entry
    logged: bool,
}

impl Halt {
    fn new(node: &str, error: RunError) -> Self {
        Self {
            node: node.to_string(),
            error,
            logged: false,
        }
    }

    fn from_executor(node: &str, error: RunError) -> Self {
        Self {
            logged: true,
            ..Self::new(node, error)
        }
    }
}

/// Drives one run from the entry node until termination.
///
/// A walk is strictly sequential: a node starts only after the previous
/// node's terminal entry is in the log. Cancellation and the step ceiling
/// are checked before every node invocation, so a walk never stops mid-node.
pub struct GraphWalker {
    executor: NodeExecutor,
    max_steps: usize,
}

impl GraphWalker {
    pub fn new(registry: Arc<ToolRegistry>, max_steps: usize) -> Self {
        Self {
            executor: NodeExecutor::new(registry),
            max_steps,
        }
    }

    /// Walk the graph. On failure the `failed` entry is already in the log.
    pub async fn walk(&self, graph: &Graph, run: &RunHandle) -> Result<(), RunFailure> {
        match self.drive(graph, run).await {
            Ok(steps) => {
                tracing::info!("Run {} reached a terminal node after {} steps", run.id(), steps);
                Ok(())
            }
            Err(halt) => {
                if !halt.logged {
                    if let Err(e) = run
                        .record(&halt.node, Phase::Failed, failure_detail(&halt.error))
                        .await
                    {
                        tracing::warn!("Run {}: could not log failure: {}", run.id(), e);
                    }
                }
                tracing::error!("Run {} failed at {}: {}", run.id(), halt.node, halt.error);
                Err(RunFailure::from_error(&halt.error, Some(halt.node)))
            }
        }
    }

    async fn drive(&self, graph: &Graph, run: &RunHandle) -> Result<usize, Halt> {
        let mut steps = 0;
        let mut current = graph.entry().clone();
        let mut arrival = Arrival::Entry;

        loop {
            self.invoke(graph, run, &current, &arrival, &mut steps).await?;

            let mut next = None;
            if let Some(spec) = graph.loop_at(&current) {
                self.run_loop(graph, spec, run, &mut steps).await?;
                next = spec.exit.as_ref().map(|exit| {
                    (
                        exit.clone(),
                        Arrival::LoopExit {
                            from: current.clone(),
                        },
                    )
                });
            }

            if next.is_none() {
                let fields = run.fields().await;
                next = resolve_next(graph, &current, &fields).map_err(|e| Halt::new(&current, e))?;
            }

            match next {
                Some((to, via)) => {
                    tracing::debug!("Run {}: {} -> {} ({:?})", run.id(), current, to, via);
                    current = to;
                    arrival = via;
                }
                None => return Ok(steps),
            }
        }
    }

    /// Check the run's stop conditions, then execute one node
    async fn invoke(
        &self,
        graph: &Graph,
        run: &RunHandle,
        node_id: &str,
        arrival: &Arrival,
        steps: &mut usize,
    ) -> Result<(), Halt> {
        if run.cancellation().is_cancelled() {
            return Err(Halt::new(node_id, RunError::Cancelled));
        }

        *steps += 1;
        if *steps > self.max_steps {
            return Err(Halt::new(
                node_id,
                RunError::StepLimitExceeded {
                    limit: self.max_steps,
                },
            ));
        }

        let node = graph
            .node(node_id)
            .ok_or_else(|| Halt::new(node_id, RunError::NodeNotFound(node_id.to_string())))?;

        self.executor
            .execute(node, run, arrival)
            .await
            .map_err(|e| Halt::from_executor(node_id, e))
    }

    /// Run a loop body as a do-while, bounded by `max_iterations`
    async fn run_loop(
        &self,
        graph: &Graph,
        spec: &LoopSpec,
        run: &RunHandle,
        steps: &mut usize,
    ) -> Result<(), Halt> {
        let record = |phase: Phase, detail: serde_json::Value| async move {
            run.record(&spec.node, phase, detail)
                .await
                .map_err(|e| Halt::new(&spec.node, e))
        };

        for iteration in 1..=spec.max_iterations {
            record(
                Phase::LoopIteration,
                json!({ "iteration": iteration, "max_iterations": spec.max_iterations }),
            )
            .await?;

            for body in spec.body.nodes() {
                let via = Arrival::LoopBody {
                    loop_node: spec.node.clone(),
                    iteration,
                };
                self.invoke(graph, run, body, &via, steps).await?;
            }

            let fields = run.fields().await;
            if !spec.continue_while.evaluate(&fields) {
                tracing::debug!("Run {}: loop {} exited after {} iterations", run.id(), spec.node, iteration);
                return record(
                    Phase::LoopExit,
                    json!({ "reason": "predicate", "iterations": iteration }),
                )
                .await;
            }

            if iteration == spec.max_iterations {
                tracing::info!(
                    "Run {}: loop {} reached max iterations ({}) with its predicate still true",
                    run.id(),
                    spec.node,
                    spec.max_iterations
                );
                return record(
                    Phase::LoopExit,
                    json!({ "reason": "max_iterations", "iterations": iteration }),
                )
                .await;
            }
        }

        Ok(())
    }
}

/// Pick the node after `current` from the post-execution fields.
///
/// Conditional edges are tried in declaration order and the first match
/// wins. The unconditional edge is the fallback. `Ok(None)` means `current`
/// is terminal.
pub fn resolve_next(
    graph: &Graph,
    current: &str,
    fields: &Fields,
) -> Result<Option<(NodeId, Arrival)>, RunError> {
    let conditional = graph.conditional_edges(current);

    if let Some((index, (_, to))) = conditional
        .iter()
        .enumerate()
        .find(|(_, (predicate, _))| predicate.evaluate(fields))
    {
        return Ok(Some((
            to.clone(),
            Arrival::Conditional {
                from: current.to_string(),
                index,
            },
        )));
    }

    if let Some(to) = graph.edge(current) {
        return Ok(Some((
            to.clone(),
            Arrival::Edge {
                from: current.to_string(),
            },
        )));
    }

    if conditional.is_empty() {
        Ok(None)
    } else {
        Err(RunError::NoMatchingEdge(current.to_string()))
    }
}
