use crate::{
    config::VerifierConfig,
    dependence::DependenceType,
    event::{CopyRef, EventNode, EventVisitor, NodeRef, Traversal},
    operation::{MappingDependence, OperationGraph, OperationKind},
    state::TraceState,
    types::{FieldId, HashMap, HashSet, InstanceKey, OpId},
    verifier::{Report, Severity, describe},
};
use core::ops::ControlFlow;
use tracing::{debug, warn};

/// Backward search for the producer of one (instance, field).
///
/// The stack holds the (instance, field) currently sought: copies into it
/// push their source, and pop it again once their predecessors are done. A
/// node is revisited only when sought through a different instance.
struct DataFlowSearch<'a> {
    ops: &'a OperationGraph,
    target: OpId,
    stack: Vec<(InstanceKey, FieldId)>,
    visited: HashMap<NodeRef, HashSet<InstanceKey>>,
    found: bool,
}

impl<'a> DataFlowSearch<'a> {
    fn new(ops: &'a OperationGraph, target: OpId, sought: (InstanceKey, FieldId)) -> Self {
        Self {
            ops,
            target,
            stack: vec![sought],
            visited: HashMap::default(),
            found: false,
        }
    }

    fn sought(&self) -> (InstanceKey, FieldId) {
        *self.stack.last().expect("DataFlowSearch::sought: [1]")
    }

    fn first_visit(&mut self, node: NodeRef) -> bool {
        let (instance, _) = self.sought();
        self.visited.entry(node).or_default().insert(instance)
    }

    fn reach(&mut self, op: OpId) -> ControlFlow<()> {
        self.found |= op == self.target;
        if self.found {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Source of the sought (instance, field) if `copy` writes it.
    fn copy_source(&self, copy: CopyRef<'_>) -> Option<(InstanceKey, FieldId)> {
        let (instance, field) = self.sought();
        match copy {
            CopyRef::Realm(node) => {
                (node.dst() == instance && node.fields().contains(&field))
                    .then_some((node.src(), field))
            }
            CopyRef::Op(op) => {
                if self.ops.instance(op, 1) != Some(instance) {
                    return None;
                }
                let position = self.ops.requirement(op, 1)?.field_position(field)?;
                let src_field = *self.ops.requirement(op, 0)?.fields().get(position)?;
                Some((self.ops.instance(op, 0)?, src_field))
            }
        }
    }
}

impl EventVisitor for DataFlowSearch<'_> {
    fn visit_event(&mut self, event: &EventNode) -> ControlFlow<()> {
        if !self.first_visit(NodeRef::Event(event.handle())) || self.found {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn visit_operation(&mut self, op: OpId) -> ControlFlow<()> {
        if !self.first_visit(NodeRef::Op(op)) {
            return ControlFlow::Break(());
        }
        self.reach(op)
    }

    fn visit_copy(&mut self, copy: CopyRef<'_>) -> ControlFlow<()> {
        let node = match copy {
            CopyRef::Op(op) => NodeRef::Op(op),
            CopyRef::Realm(node) => NodeRef::Copy(node.id()),
        };
        if !self.first_visit(node) || self.found {
            return ControlFlow::Break(());
        }
        let Some(source) = self.copy_source(copy) else {
            return ControlFlow::Break(());
        };
        if let CopyRef::Op(op) = copy {
            self.reach(op)?;
        }
        self.stack.push(source);
        ControlFlow::Continue(())
    }

    fn post_visit_copy(&mut self, _copy: CopyRef<'_>) {
        self.stack.pop();
    }

    fn visit_acquire(&mut self, op: OpId) -> ControlFlow<()> {
        if !self.first_visit(NodeRef::Op(op)) {
            return ControlFlow::Break(());
        }
        self.found |= op == self.target;
        if self.ops.instance(op, 0) != Some(self.sought().0) {
            return ControlFlow::Break(());
        }
        self.reach(op)
    }
}

/// Instance and field the search for `consumer` starts from.
///
/// A copy operation reading the sought instance is looked through: the
/// search starts from what it wrote.
fn starting_point(
    ops: &OperationGraph,
    consumer: OpId,
    instance: InstanceKey,
    field: FieldId,
) -> (InstanceKey, FieldId) {
    let is_copy = ops
        .get(consumer)
        .is_some_and(|op| matches!(op.kind(), OperationKind::Copy));
    if !is_copy || ops.instance(consumer, 0) != Some(instance) {
        return (instance, field);
    }
    let retargeted = (|| {
        let position = ops.requirement(consumer, 0)?.field_position(field)?;
        let dst_field = *ops.requirement(consumer, 1)?.fields().get(position)?;
        Some((ops.instance(consumer, 1)?, dst_field))
    })();
    retargeted.unwrap_or((instance, field))
}

pub(super) fn check(state: &TraceState, config: VerifierConfig, report: &mut Report) {
    let ops = &state.ops;
    for context in ops.iter().filter_map(|op| op.task_context()) {
        for dep in context.claimed() {
            if dep.kind != DependenceType::True {
                continue;
            }
            for producer in ops.participants(dep.producer) {
                for consumer in ops.participants(dep.consumer) {
                    check_pair(state, config, dep, producer, consumer, report);
                }
            }
        }
    }
}

fn check_pair(
    state: &TraceState,
    config: VerifierConfig,
    dep: &MappingDependence,
    producer: OpId,
    consumer: OpId,
    report: &mut Report,
) {
    let ops = &state.ops;
    let (Some(first), Some(second)) = (
        ops.requirement(producer, dep.producer_req),
        ops.requirement(consumer, dep.consumer_req),
    ) else {
        debug!(%producer, %consumer, "requirement missing, data flow not checked");
        return;
    };
    // A reduction or a write-only access needs nothing from the producer.
    if second.privilege().reduction().is_some() || second.privilege().is_write_only() {
        return;
    }
    if first.tree() != second.tree() || !state.regions.is_aliased(first.node(), second.node()) {
        return;
    }
    let Some(instance) = ops.instance(consumer, dep.consumer_req) else {
        warn!(
            %consumer,
            requirement = dep.consumer_req,
            "no instance mapped, data flow not checked"
        );
        return;
    };
    for field in first.shared_fields(second) {
        let sought = starting_point(ops, consumer, instance, field);
        let mut search = DataFlowSearch::new(ops, producer, sought);
        state.events.traverse(
            NodeRef::Op(consumer),
            Traversal::backward().unmemoized(),
            &mut search,
        );
        debug_assert_eq!(search.stack.len(), 1, "data flow search left copies on the stack");
        if !search.found {
            report.push(
                Severity::Error,
                format!(
                    "unable to find data flow path between requirement {} of {} and requirement {} of {} for field {field}",
                    dep.producer_req,
                    describe(ops, producer),
                    dep.consumer_req,
                    describe(ops, consumer)
                ),
                config
                    .verbose()
                    .then(|| format!("First Requirement:\n{first}\nSecond Requirement:\n{second}")),
            );
        }
    }
}
