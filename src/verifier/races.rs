use crate::{
    config::VerifierConfig,
    dependence::{DependenceOracle, DependenceType},
    event::{EventGraph, EventNode, EventVisitor, NodeRef, Traversal},
    requirement::Requirement,
    state::TraceState,
    types::{HashMap, OpId},
    verifier::{Report, Severity, describe},
};
use core::ops::ControlFlow;
use tracing::debug;

/// Stops as soon as `target` is reached.
struct Reach {
    target: OpId,
    found: bool,
}

impl Reach {
    fn flow(&self) -> ControlFlow<()> {
        if self.found {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

impl EventVisitor for Reach {
    fn visit_event(&mut self, _event: &EventNode) -> ControlFlow<()> {
        self.flow()
    }

    fn visit_operation(&mut self, op: OpId) -> ControlFlow<()> {
        self.found |= op == self.target;
        self.flow()
    }
}

/// Whether `to` happens before `from` or `from` before `to`, counting
/// implicit edges.
fn ordered(events: &EventGraph, from: OpId, to: OpId) -> bool {
    let traversal = Traversal::backward().with_implicit();
    let mut reach = Reach {
        target: to,
        found: false,
    };
    events.traverse(NodeRef::Op(from), traversal, &mut reach);
    if reach.found {
        return true;
    }
    let mut reach = Reach {
        target: from,
        found: false,
    };
    events.traverse(NodeRef::Op(to), traversal, &mut reach);
    reach.found
}

pub(super) fn check(state: &TraceState, config: VerifierConfig, report: &mut Report) {
    let oracle = DependenceOracle::new(&state.regions);
    let mut cache: HashMap<(OpId, OpId), bool> = HashMap::default();
    for instance in state.instances.iter() {
        debug!(instance = %instance.key(), "checking instance");
        for (&field, users) in instance.users() {
            let accesses: Vec<(OpId, u32)> = users
                .iter()
                .flat_map(|(&op, indices)| indices.iter().map(move |&index| (op, index)))
                .collect();
            for (i, &(op1, index1)) in accesses.iter().enumerate() {
                for &(op2, index2) in &accesses[i + 1..] {
                    if op1 == op2 {
                        continue;
                    }
                    let (Some(req1), Some(req2)) = (
                        state.ops.requirement(op1, index1),
                        state.ops.requirement(op2, index2),
                    ) else {
                        continue;
                    };
                    // Either access may have run first.
                    let conflicts = |a: &Requirement, b: &Requirement| {
                        matches!(
                            oracle.compute(a, b),
                            DependenceType::True | DependenceType::Anti
                        )
                    };
                    if !conflicts(req1, req2) && !conflicts(req2, req1) {
                        continue;
                    }
                    let key = (op1.min(op2), op1.max(op2));
                    let is_ordered = *cache
                        .entry(key)
                        .or_insert_with(|| ordered(&state.events, op2, op1));
                    if is_ordered {
                        continue;
                    }
                    report.push(
                        Severity::Error,
                        format!(
                            "potential data race between requirement {index1} of {} and requirement {index2} of {} for field {field} of instance {}",
                            describe(&state.ops, op1),
                            describe(&state.ops, op2),
                            instance.key()
                        ),
                        config
                            .verbose()
                            .then(|| format!("First Requirement:\n{req1}\nSecond Requirement:\n{req2}")),
                    );
                }
            }
        }
    }
}
