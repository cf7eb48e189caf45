use crate::{
    event::{CopyNode, EventGraph, EventNode, GenerationSource, NodeRef, PhysicalKind},
    types::OpId,
};
use core::ops::ControlFlow;

/// Direction in which edges are followed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// From an event to what waits on it.
    Forward,
    /// From an event to what it waits on.
    Backward,
}

/// Parameters of one walk over the event graph.
///
/// A memoized traversal draws a fresh generation from
/// [`GenerationSource::global`] and visits every node at most once: a node
/// whose stamp equals the current generation is skipped. An unmemoized
/// traversal ignores stamps entirely and leaves it to the visitor to prune
/// revisits, which lets a node be revisited in a different visitor state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Traversal {
    direction: Direction,
    implicit: bool,
    memoized: bool,
}

impl Traversal {
    /// Memoized walk along physical edges towards later nodes.
    #[must_use]
    pub const fn forward() -> Self {
        Self {
            direction: Direction::Forward,
            implicit: false,
            memoized: true,
        }
    }

    /// Memoized walk along physical edges towards earlier nodes.
    #[must_use]
    pub const fn backward() -> Self {
        Self {
            direction: Direction::Backward,
            implicit: false,
            memoized: true,
        }
    }

    /// Also follow implicit event-to-event edges.
    #[must_use]
    pub const fn with_implicit(self) -> Self {
        Self {
            implicit: true,
            ..self
        }
    }

    /// Do not consult or update generation stamps.
    #[must_use]
    pub const fn unmemoized(self) -> Self {
        Self {
            memoized: false,
            ..self
        }
    }

    /// Direction of the walk.
    #[must_use]
    pub const fn direction(self) -> Direction {
        self.direction
    }
}

/// A copy as presented to [`EventVisitor::visit_copy`].
#[derive(Debug, Copy, Clone)]
pub enum CopyRef<'g> {
    /// An explicit copy operation.
    Op(OpId),
    /// A low-level copy.
    Realm(&'g CopyNode),
}

/// Callbacks invoked by [`EventGraph::traverse`], one per node kind.
///
/// A pre-visit returning `Break` prunes the node: its neighbors are not
/// explored and its post-visit is not called. Post-visits run once every
/// node reachable through the visited node has been handled, so state pushed
/// in a pre-visit can be popped in the matching post-visit.
///
/// Every operation kind falls back to [`EventVisitor::visit_operation`] and
/// [`EventVisitor::post_visit_operation`].
pub trait EventVisitor {
    /// An event or phase-barrier generation.
    fn visit_event(&mut self, _event: &EventNode) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Fallback for every operation kind.
    fn visit_operation(&mut self, _op: OpId) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// A single task or point task.
    fn visit_task(&mut self, op: OpId) -> ControlFlow<()> {
        self.visit_operation(op)
    }

    /// An inline mapping.
    fn visit_mapping(&mut self, op: OpId) -> ControlFlow<()> {
        self.visit_operation(op)
    }

    /// A close operation.
    fn visit_close(&mut self, op: OpId) -> ControlFlow<()> {
        self.visit_operation(op)
    }

    /// A copy operation or a low-level copy.
    fn visit_copy(&mut self, copy: CopyRef<'_>) -> ControlFlow<()> {
        match copy {
            CopyRef::Op(op) => self.visit_operation(op),
            CopyRef::Realm(_) => ControlFlow::Continue(()),
        }
    }

    /// An acquire.
    fn visit_acquire(&mut self, op: OpId) -> ControlFlow<()> {
        self.visit_operation(op)
    }

    /// A release.
    fn visit_release(&mut self, op: OpId) -> ControlFlow<()> {
        self.visit_operation(op)
    }

    /// After an event's neighbors.
    fn post_visit_event(&mut self, _event: &EventNode) {}

    /// Fallback for every operation kind.
    fn post_visit_operation(&mut self, _op: OpId) {}

    /// After a task's neighbors.
    fn post_visit_task(&mut self, op: OpId) {
        self.post_visit_operation(op);
    }

    /// After a mapping's neighbors.
    fn post_visit_mapping(&mut self, op: OpId) {
        self.post_visit_operation(op);
    }

    /// After a close's neighbors.
    fn post_visit_close(&mut self, op: OpId) {
        self.post_visit_operation(op);
    }

    /// After a copy's neighbors.
    fn post_visit_copy(&mut self, copy: CopyRef<'_>) {
        if let CopyRef::Op(op) = copy {
            self.post_visit_operation(op);
        }
    }

    /// After an acquire's neighbors.
    fn post_visit_acquire(&mut self, op: OpId) {
        self.post_visit_operation(op);
    }

    /// After a release's neighbors.
    fn post_visit_release(&mut self, op: OpId) {
        self.post_visit_operation(op);
    }
}

enum Frame {
    Enter(NodeRef),
    Exit(NodeRef),
}

impl EventGraph {
    /// Depth-first walk from `from`, calling `visitor` on every node reached.
    ///
    /// Nodes that were never recorded, such as an operation without events,
    /// are not visited.
    pub fn traverse<V>(&self, from: NodeRef, traversal: Traversal, visitor: &mut V)
    where
        V: EventVisitor + ?Sized,
    {
        let generation = traversal
            .memoized
            .then(|| GenerationSource::global().next().get());
        let mut stack = vec![Frame::Enter(from)];
        let mut next = Vec::new();
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(node) => {
                    let Some(stamp) = self.stamp(node) else {
                        continue;
                    };
                    if let Some(generation) = generation {
                        if stamp.get() == generation {
                            continue;
                        }
                        stamp.set(generation);
                    }
                    if self.pre_visit(node, visitor).is_break() {
                        continue;
                    }
                    stack.push(Frame::Exit(node));
                    self.neighbors(node, traversal, &mut next);
                    // Reversed so that neighbors are entered in edge order.
                    stack.extend(next.drain(..).rev().map(Frame::Enter));
                }
                Frame::Exit(node) => self.post_visit(node, visitor),
            }
        }
    }

    fn pre_visit<V>(&self, node: NodeRef, visitor: &mut V) -> ControlFlow<()>
    where
        V: EventVisitor + ?Sized,
    {
        match node {
            NodeRef::Event(handle) => visitor.visit_event(&self.events[&handle]),
            NodeRef::Op(op) => match self.ops[&op].kind {
                PhysicalKind::Task => visitor.visit_task(op),
                PhysicalKind::Mapping => visitor.visit_mapping(op),
                PhysicalKind::Close => visitor.visit_close(op),
                PhysicalKind::Copy => visitor.visit_copy(CopyRef::Op(op)),
                PhysicalKind::Acquire => visitor.visit_acquire(op),
                PhysicalKind::Release => visitor.visit_release(op),
            },
            NodeRef::Copy(id) => {
                let copy = self.copy(id).expect("EventGraph::pre_visit: [1]");
                visitor.visit_copy(CopyRef::Realm(copy))
            }
        }
    }

    fn post_visit<V>(&self, node: NodeRef, visitor: &mut V)
    where
        V: EventVisitor + ?Sized,
    {
        match node {
            NodeRef::Event(handle) => visitor.post_visit_event(&self.events[&handle]),
            NodeRef::Op(op) => match self.ops[&op].kind {
                PhysicalKind::Task => visitor.post_visit_task(op),
                PhysicalKind::Mapping => visitor.post_visit_mapping(op),
                PhysicalKind::Close => visitor.post_visit_close(op),
                PhysicalKind::Copy => visitor.post_visit_copy(CopyRef::Op(op)),
                PhysicalKind::Acquire => visitor.post_visit_acquire(op),
                PhysicalKind::Release => visitor.post_visit_release(op),
            },
            NodeRef::Copy(id) => {
                let copy = self.copy(id).expect("EventGraph::post_visit: [1]");
                visitor.post_visit_copy(CopyRef::Realm(copy));
            }
        }
    }

    fn neighbors(&self, node: NodeRef, traversal: Traversal, out: &mut Vec<NodeRef>) {
        let forward = traversal.direction == Direction::Forward;
        match node {
            NodeRef::Event(handle) => {
                let event = &self.events[&handle];
                if forward {
                    out.extend(event.physical_outgoing.iter().copied());
                    if traversal.implicit {
                        out.extend(event.implicit_outgoing.iter().copied().map(NodeRef::Event));
                    }
                } else {
                    out.extend(event.physical_incoming.iter().copied());
                    if traversal.implicit {
                        out.extend(event.implicit_incoming.iter().copied().map(NodeRef::Event));
                    }
                }
            }
            NodeRef::Op(op) => {
                let op = &self.ops[&op];
                out.push(NodeRef::Event(if forward { op.term } else { op.start }));
            }
            NodeRef::Copy(id) => {
                let copy = self.copy(id).expect("EventGraph::neighbors: [1]");
                out.push(NodeRef::Event(if forward { copy.term } else { copy.start }));
            }
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{
        event::EventHandle,
        types::{IndexNodeId, IndexSpaceId, InstId, InstanceKey, TreeId, TreeNodeKey},
    };

    fn ev(id: u64) -> EventHandle {
        EventHandle::Event { id, generation: 0 }
    }

    #[derive(Default)]
    struct Recorder {
        pre: Vec<NodeRef>,
        post: Vec<NodeRef>,
        stop_at: Option<OpId>,
    }

    impl EventVisitor for Recorder {
        fn visit_event(&mut self, event: &EventNode) -> ControlFlow<()> {
            self.pre.push(NodeRef::Event(event.handle()));
            ControlFlow::Continue(())
        }

        fn visit_operation(&mut self, op: OpId) -> ControlFlow<()> {
            self.pre.push(NodeRef::Op(op));
            if self.stop_at == Some(op) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn visit_copy(&mut self, copy: CopyRef<'_>) -> ControlFlow<()> {
            match copy {
                CopyRef::Op(op) => self.visit_operation(op),
                CopyRef::Realm(copy) => {
                    self.pre.push(NodeRef::Copy(copy.id()));
                    ControlFlow::Continue(())
                }
            }
        }

        fn post_visit_event(&mut self, event: &EventNode) {
            self.post.push(NodeRef::Event(event.handle()));
        }

        fn post_visit_operation(&mut self, op: OpId) {
            self.post.push(NodeRef::Op(op));
        }
    }

    /// Diamond: op 1 terminates at e2; e2 fans out to e3 and e4, both of
    /// which precede e5, the start of op 2.
    fn diamond() -> EventGraph {
        let mut g = EventGraph::new();
        g.add_op_events(OpId(1), PhysicalKind::Task, ev(1), ev(2)).unwrap();
        g.add_event_dependence(ev(2), ev(3)).unwrap();
        g.add_event_dependence(ev(2), ev(4)).unwrap();
        g.add_event_dependence(ev(3), ev(5)).unwrap();
        g.add_event_dependence(ev(4), ev(5)).unwrap();
        g.add_op_events(OpId(2), PhysicalKind::Mapping, ev(5), ev(6)).unwrap();
        g
    }

    #[test]
    fn memoized_traversal_visits_each_node_once() {
        let g = diamond();
        let mut rec = Recorder::default();
        g.traverse(NodeRef::Op(OpId(2)), Traversal::backward(), &mut rec);
        assert_eq!(rec.pre.iter().filter(|&&n| n == NodeRef::Event(ev(2))).count(), 1);
        assert!(rec.pre.contains(&NodeRef::Op(OpId(1))));
        assert_eq!(rec.pre.len(), 7);
        assert_eq!(rec.pre.len(), rec.post.len());
        // Post-visits unwind in reverse nesting: the start node finishes last.
        assert_eq!(rec.post.last(), Some(&NodeRef::Op(OpId(2))));
    }

    #[test]
    fn unmemoized_traversal_revisits_shared_nodes() {
        let g = diamond();
        let mut rec = Recorder::default();
        g.traverse(
            NodeRef::Op(OpId(2)),
            Traversal::backward().unmemoized(),
            &mut rec,
        );
        assert_eq!(rec.pre.iter().filter(|&&n| n == NodeRef::Op(OpId(1))).count(), 2);
    }

    #[test]
    fn consecutive_traversals_do_not_interfere() {
        let g = diamond();
        for _ in 0..3 {
            let mut rec = Recorder::default();
            g.traverse(NodeRef::Op(OpId(1)), Traversal::forward(), &mut rec);
            assert!(rec.pre.contains(&NodeRef::Op(OpId(2))));
        }
    }

    #[test]
    fn break_prunes_and_skips_post_visit() {
        let g = diamond();
        let mut rec = Recorder {
            stop_at: Some(OpId(2)),
            ..Recorder::default()
        };
        g.traverse(NodeRef::Op(OpId(2)), Traversal::backward(), &mut rec);
        assert_eq!(rec.pre, vec![NodeRef::Op(OpId(2))]);
        assert!(rec.post.is_empty());
    }

    #[test]
    fn implicit_edges_are_opt_in() {
        let mut g = EventGraph::new();
        g.add_op_events(OpId(1), PhysicalKind::Task, ev(1), ev(2)).unwrap();
        g.add_op_events(OpId(2), PhysicalKind::Task, ev(3), ev(4)).unwrap();
        g.add_implicit_dependence(ev(2), ev(3)).unwrap();

        let mut rec = Recorder::default();
        g.traverse(NodeRef::Op(OpId(2)), Traversal::backward(), &mut rec);
        assert!(!rec.pre.contains(&NodeRef::Op(OpId(1))));

        let mut rec = Recorder::default();
        g.traverse(
            NodeRef::Op(OpId(2)),
            Traversal::backward().with_implicit(),
            &mut rec,
        );
        assert!(rec.pre.contains(&NodeRef::Op(OpId(1))));
    }

    #[test]
    fn copies_are_visited_between_their_events() {
        let mut g = EventGraph::new();
        let region = TreeNodeKey {
            index: IndexNodeId::Space(IndexSpaceId(1)),
            tree: TreeId(1),
        };
        let inst = |id| InstanceKey {
            id: InstId(id),
            version: 0,
        };
        let copy = g.add_copy(inst(1), inst(2), region, None, ev(1), ev(2));
        g.add_op_events(OpId(5), PhysicalKind::Copy, ev(2), ev(3)).unwrap();
        let mut rec = Recorder::default();
        g.traverse(NodeRef::Event(ev(3)), Traversal::backward(), &mut rec);
        assert_eq!(
            rec.pre,
            vec![
                NodeRef::Event(ev(3)),
                NodeRef::Op(OpId(5)),
                NodeRef::Event(ev(2)),
                NodeRef::Copy(copy),
                NodeRef::Event(ev(1)),
            ]
        );
    }

    #[test]
    fn unrecorded_start_is_not_visited() {
        let g = diamond();
        let mut rec = Recorder::default();
        g.traverse(NodeRef::Op(OpId(99)), Traversal::backward(), &mut rec);
        assert!(rec.pre.is_empty());
    }
}
