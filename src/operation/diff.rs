use crate::{
    config::FencePolicy,
    dependence::{DependenceOracle, DependenceType},
    operation::{
        LogicalEdges, LogicalMarks, MappingDependence, Operation, OperationGraph, OperationKind,
    },
    region_tree::RegionTreeModel,
    types::{HashSet, OpId},
};
use rayon::prelude::*;
use tracing::debug;

/// Outcome of comparing the claimed and required dependences of one context.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependenceDiff {
    /// Required dependences with no claimed path from consumer to producer.
    pub missing: Vec<MappingDependence>,
    /// Claimed dependences that are not required.
    pub unnecessary: Vec<MappingDependence>,
}

impl DependenceDiff {
    /// Whether the claimed dependences match the required ones exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unnecessary.is_empty()
    }
}

fn barrier(context: OpId, producer: OpId, consumer: OpId) -> MappingDependence {
    MappingDependence {
        context,
        producer,
        producer_req: 0,
        consumer,
        consumer_req: 0,
        kind: DependenceType::True,
    }
}

impl OperationGraph {
    /// Tasks with at least one child, in recording order.
    pub fn contexts(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops.values().filter_map(|op| {
            op.task_context()
                .filter(|ctx| !ctx.children.is_empty())
                .map(|_| op.id)
        })
    }

    /// Dependences `later` must have on `earlier`, appended to `out`.
    fn find_dependences(
        context: OpId,
        earlier: &Operation,
        later: &Operation,
        oracle: &DependenceOracle<'_>,
        policy: FencePolicy,
        out: &mut Vec<MappingDependence>,
    ) {
        use OperationKind::{Deletion, Fence};
        match (&earlier.kind, &later.kind) {
            (Deletion, _) | (_, Deletion) => {}
            (Fence, _) | (_, Fence) if policy == FencePolicy::EventGraphOnly => {}
            (Fence, _) | (_, Fence) => out.push(barrier(context, earlier.id, later.id)),
            _ => {
                for prev in earlier.requirements.values() {
                    for next in later.requirements.values() {
                        let kind = oracle.compute(prev, next);
                        if kind.is_mapping_dependence() {
                            out.push(MappingDependence {
                                context,
                                producer: earlier.id,
                                producer_req: prev.index(),
                                consumer: later.id,
                                consumer_req: next.index(),
                                kind,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Dependences between the children of `context` implied by their
    /// requirements, scanning every earlier/later pair in launch order.
    #[must_use]
    pub fn compute_required(
        &self,
        context: OpId,
        oracle: &DependenceOracle<'_>,
        policy: FencePolicy,
    ) -> Vec<MappingDependence> {
        let Some(ctx) = self.ops.get(&context).and_then(Operation::task_context) else {
            return Vec::new();
        };
        let children: Vec<&Operation> = ctx.children.iter().map(|id| &self.ops[id]).collect();
        let mut required = Vec::new();
        for (j, later) in children.iter().enumerate() {
            for earlier in &children[..j] {
                Self::find_dependences(context, earlier, later, oracle, policy, &mut required);
            }
        }
        required
    }

    /// Recompute the required dependences of every context.
    ///
    /// Contexts are independent, so they are computed in parallel; the
    /// results replace the previous required sets and required adjacency.
    pub fn compute_all_required(&mut self, regions: &RegionTreeModel, policy: FencePolicy) {
        let oracle = DependenceOracle::new(regions);
        let contexts: Vec<OpId> = self.contexts().collect();
        let graph = &*self;
        let results: Vec<(OpId, Vec<MappingDependence>)> = contexts
            .par_iter()
            .map(|&context| (context, graph.compute_required(context, &oracle, policy)))
            .collect();
        for (context, required) in results {
            debug!(%context, required = required.len(), "computed required dependences");
            let children: Vec<OpId> = self.ops[&context]
                .task_context()
                .expect("OperationGraph::compute_all_required: [1]")
                .children
                .iter()
                .copied()
                .collect();
            for child in children {
                self.ops[&child].required = LogicalEdges::default();
            }
            for dep in &required {
                LogicalEdges::link(&mut self.ops, |op| &mut op.required, dep);
            }
            self.ops[&context]
                .task_context_mut()
                .expect("OperationGraph::compute_all_required: [2]")
                .required = required;
        }
    }

    /// Compare the claimed dependences of `context` with the required ones
    /// computed by the last [`OperationGraph::compute_all_required`].
    ///
    /// A required dependence is satisfied by any chain of claimed
    /// dependences from its consumer back to its producer. A claimed
    /// dependence is unnecessary when it is not itself required, unless its
    /// consumer is a deletion.
    pub fn dependence_diff(&self, context: OpId) -> DependenceDiff {
        let Some(ctx) = self.ops.get(&context).and_then(Operation::task_context) else {
            return DependenceDiff::default();
        };
        let mut diff = DependenceDiff::default();
        let mut marks = LogicalMarks::new();
        for dep in &ctx.required {
            marks.unmark_all();
            if !self.has_logical_path(dep.consumer, dep.producer, &mut marks) {
                diff.missing.push(*dep);
            }
        }
        let required: HashSet<&MappingDependence> = ctx.required.iter().collect();
        diff.unnecessary = ctx
            .claimed
            .iter()
            .filter(|dep| !required.contains(dep))
            .filter(|dep| !matches!(self.ops[&dep.consumer].kind, OperationKind::Deletion))
            .copied()
            .collect();
        diff
    }
}
