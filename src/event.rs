mod component;
mod generation;
mod traverse;

pub use crate::event::{
    component::Component,
    generation::{Generation, GenerationSource},
    traverse::{CopyRef, Direction, EventVisitor, Traversal},
};
use crate::{
    error::{Entity, RecordError, RecordResult},
    types::{
        CopyId, FieldId, HashSet, IndexMap, IndexSet, InstanceKey, OpId, ReductionOpId,
        TreeNodeKey,
    },
};
use core::cell::Cell;
use derive_more::Display;
use tracing::trace;

/// Identity of a node of the event graph.
///
/// Two records naming the same handle refer to the same node. A handle with
/// id zero is the null event: it is recorded like any other event but never
/// takes part in a connected component.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventHandle {
    /// One generation of an ordinary event.
    #[display("event ({id:#x}, {generation})")]
    Event {
        /// Event id.
        id: u64,
        /// Generation of the id.
        generation: u32,
    },
    /// One generation of a phase barrier.
    #[display("phase barrier ({id:#x}, {generation})")]
    PhaseBarrier {
        /// Barrier id.
        id: u64,
        /// Generation of the barrier.
        generation: u32,
    },
}

impl EventHandle {
    /// Raw id of the event or barrier.
    #[must_use]
    pub const fn id(self) -> u64 {
        match self {
            Self::Event { id, .. } | Self::PhaseBarrier { id, .. } => id,
        }
    }

    /// Whether this is the null event.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.id() == 0
    }

    /// Whether this is a phase-barrier generation.
    #[must_use]
    pub const fn is_phase_barrier(self) -> bool {
        matches!(self, Self::PhaseBarrier { .. })
    }
}

/// A node of the event graph as seen from its edges.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// An event or phase barrier.
    #[display("{_0}")]
    Event(EventHandle),
    /// The physical execution of an operation.
    #[display("operation {_0}")]
    Op(OpId),
    /// A low-level copy.
    #[display("copy {_0}")]
    Copy(CopyId),
}

/// How an operation takes part in the event graph; selects the visitor
/// method that sees it.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PhysicalKind {
    /// A single task or a point of an index launch.
    #[display("task")]
    Task,
    /// An inline mapping.
    #[display("mapping")]
    Mapping,
    /// A close operation.
    #[display("close")]
    Close,
    /// An explicit copy operation.
    #[display("copy")]
    Copy,
    /// An acquire.
    #[display("acquire")]
    Acquire,
    /// A release.
    #[display("release")]
    Release,
}

/// An event or phase-barrier generation with its ordering edges.
#[derive(Debug)]
pub struct EventNode {
    handle: EventHandle,
    physical_incoming: IndexSet<NodeRef>,
    physical_outgoing: IndexSet<NodeRef>,
    implicit_incoming: IndexSet<EventHandle>,
    implicit_outgoing: IndexSet<EventHandle>,
    generation: Cell<u64>,
}

impl EventNode {
    fn new(handle: EventHandle) -> Self {
        Self {
            handle,
            physical_incoming: IndexSet::default(),
            physical_outgoing: IndexSet::default(),
            implicit_incoming: IndexSet::default(),
            implicit_outgoing: IndexSet::default(),
            generation: Cell::new(0),
        }
    }

    /// Identity of the node.
    #[must_use]
    pub const fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Nodes that must complete before this event triggers.
    #[must_use]
    pub const fn physical_incoming(&self) -> &IndexSet<NodeRef> {
        &self.physical_incoming
    }

    /// Nodes that wait on this event.
    #[must_use]
    pub const fn physical_outgoing(&self) -> &IndexSet<NodeRef> {
        &self.physical_outgoing
    }

    /// Events implicitly ordered before this one.
    #[must_use]
    pub const fn implicit_incoming(&self) -> &IndexSet<EventHandle> {
        &self.implicit_incoming
    }

    /// Events implicitly ordered after this one.
    #[must_use]
    pub const fn implicit_outgoing(&self) -> &IndexSet<EventHandle> {
        &self.implicit_outgoing
    }
}

/// Start and terminate events of an operation.
#[derive(Debug)]
pub struct OpNode {
    kind: PhysicalKind,
    start: EventHandle,
    term: EventHandle,
    generation: Cell<u64>,
}

impl OpNode {
    /// Visitor dispatch kind.
    #[must_use]
    pub const fn kind(&self) -> PhysicalKind {
        self.kind
    }

    /// Event the operation waits on.
    #[must_use]
    pub const fn start(&self) -> EventHandle {
        self.start
    }

    /// Event triggered when the operation completes.
    #[must_use]
    pub const fn term(&self) -> EventHandle {
        self.term
    }
}

/// A low-level copy between two instance versions.
#[derive(Debug)]
pub struct CopyNode {
    id: CopyId,
    src: InstanceKey,
    dst: InstanceKey,
    region: TreeNodeKey,
    redop: Option<ReductionOpId>,
    fields: Vec<FieldId>,
    start: EventHandle,
    term: EventHandle,
    generation: Cell<u64>,
}

impl CopyNode {
    /// Sequence number of the copy.
    #[must_use]
    pub const fn id(&self) -> CopyId {
        self.id
    }

    /// Instance read by the copy.
    #[must_use]
    pub const fn src(&self) -> InstanceKey {
        self.src
    }

    /// Instance written by the copy.
    #[must_use]
    pub const fn dst(&self) -> InstanceKey {
        self.dst
    }

    /// Region the copy moves data for.
    #[must_use]
    pub const fn region(&self) -> TreeNodeKey {
        self.region
    }

    /// Reduction operator applied at the destination, if any.
    #[must_use]
    pub const fn redop(&self) -> Option<ReductionOpId> {
        self.redop
    }

    /// Copied fields; source and destination fields coincide.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Event the copy waits on.
    #[must_use]
    pub const fn start(&self) -> EventHandle {
        self.start
    }

    /// Event triggered when the copy completes.
    #[must_use]
    pub const fn term(&self) -> EventHandle {
        self.term
    }
}

/// Low-level ordering graph: events, phase barriers, the physical execution
/// of operations and low-level copies.
///
/// Nodes are created once and never removed. Visited state lives on the
/// nodes as generation stamps, see [`Traversal`].
#[must_use]
#[derive(Debug, Default)]
pub struct EventGraph {
    events: IndexMap<EventHandle, EventNode>,
    phase_barriers: HashSet<u64>,
    ops: IndexMap<OpId, OpNode>,
    copies: Vec<CopyNode>,
}

impl EventGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a raw `(id, generation)` pair, taking recorded phase
    /// barriers into account.
    #[must_use]
    pub fn handle(&self, id: u64, generation: u32) -> EventHandle {
        if self.phase_barriers.contains(&id) {
            EventHandle::PhaseBarrier { id, generation }
        } else {
            EventHandle::Event { id, generation }
        }
    }

    fn node_mut(&mut self, handle: EventHandle) -> &mut EventNode {
        self.events
            .entry(handle)
            .or_insert_with(|| EventNode::new(handle))
    }

    /// Record a phase barrier and its first generation.
    ///
    /// # Errors
    /// `Duplicate` if the barrier id is already known.
    pub fn add_phase_barrier(&mut self, id: u64) -> RecordResult {
        if !self.phase_barriers.insert(id) {
            return Err(RecordError::Duplicate(Entity::PhaseBarrier(id)));
        }
        self.node_mut(EventHandle::PhaseBarrier { id, generation: 0 });
        Ok(())
    }

    /// Record the start and terminate events of an operation.
    ///
    /// # Errors
    /// `Duplicate` if the operation already has events.
    pub fn add_op_events(
        &mut self,
        op: OpId,
        kind: PhysicalKind,
        start: EventHandle,
        term: EventHandle,
    ) -> RecordResult {
        if self.ops.contains_key(&op) {
            return Err(RecordError::Duplicate(Entity::OperationEvents(op)));
        }
        self.node_mut(start).physical_outgoing.insert(NodeRef::Op(op));
        self.node_mut(term).physical_incoming.insert(NodeRef::Op(op));
        self.ops.insert(
            op,
            OpNode {
                kind,
                start,
                term,
                generation: Cell::new(0),
            },
        );
        trace!(%op, %kind, %start, %term, "recorded operation events");
        Ok(())
    }

    /// Record a low-level copy with no fields yet and return its id. Ids are
    /// assigned in recording order, starting from one.
    pub fn add_copy(
        &mut self,
        src: InstanceKey,
        dst: InstanceKey,
        region: TreeNodeKey,
        redop: Option<ReductionOpId>,
        start: EventHandle,
        term: EventHandle,
    ) -> CopyId {
        let id = CopyId(
            u32::try_from(self.copies.len() + 1).expect("EventGraph::add_copy: [1]"),
        );
        self.node_mut(start).physical_outgoing.insert(NodeRef::Copy(id));
        self.node_mut(term).physical_incoming.insert(NodeRef::Copy(id));
        self.copies.push(CopyNode {
            id,
            src,
            dst,
            region,
            redop,
            fields: Vec::new(),
            start,
            term,
            generation: Cell::new(0),
        });
        trace!(%id, %src, %dst, "recorded copy");
        id
    }

    /// Add a field to the first copy terminating at `term`.
    ///
    /// # Errors
    /// `Unknown` if no copy terminates at `term`.
    pub fn add_copy_field(&mut self, term: EventHandle, field: FieldId) -> RecordResult {
        let id = self.events.get(&term).and_then(|node| {
            node.physical_incoming.iter().find_map(|node| match node {
                NodeRef::Copy(id) => Some(*id),
                _ => None,
            })
        });
        let copy = id
            .and_then(|id| self.copy_mut(id))
            .ok_or(RecordError::Unknown(Entity::CopyByTerminator(term)))?;
        copy.fields.push(field);
        Ok(())
    }

    /// Record that `later` cannot trigger before `earlier`.
    ///
    /// # Errors
    /// `Malformed` for a self-loop.
    pub fn add_event_dependence(&mut self, earlier: EventHandle, later: EventHandle) -> RecordResult {
        if earlier == later {
            return Err(RecordError::Malformed {
                entity: Entity::Event(earlier),
                reason: "event depends on itself",
            });
        }
        self.node_mut(earlier)
            .physical_outgoing
            .insert(NodeRef::Event(later));
        self.node_mut(later)
            .physical_incoming
            .insert(NodeRef::Event(earlier));
        Ok(())
    }

    /// Record an implicit ordering hypothesis used only by race detection.
    ///
    /// # Errors
    /// `Malformed` for a self-loop.
    pub fn add_implicit_dependence(
        &mut self,
        earlier: EventHandle,
        later: EventHandle,
    ) -> RecordResult {
        if earlier == later {
            return Err(RecordError::Malformed {
                entity: Entity::Event(earlier),
                reason: "event depends on itself",
            });
        }
        self.node_mut(earlier).implicit_outgoing.insert(later);
        self.node_mut(later).implicit_incoming.insert(earlier);
        Ok(())
    }

    /// Look up an event node.
    #[must_use]
    pub fn event(&self, handle: EventHandle) -> Option<&EventNode> {
        self.events.get(&handle)
    }

    /// All event nodes in recording order.
    pub fn events(&self) -> impl Iterator<Item = &EventNode> + '_ {
        self.events.values()
    }

    /// Physical node of an operation, if its events were recorded.
    #[must_use]
    pub fn op(&self, op: OpId) -> Option<&OpNode> {
        self.ops.get(&op)
    }

    /// Look up a copy.
    #[must_use]
    pub fn copy(&self, id: CopyId) -> Option<&CopyNode> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.copies.get(index)
    }

    fn copy_mut(&mut self, id: CopyId) -> Option<&mut CopyNode> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.copies.get_mut(index)
    }

    /// All copies in recording order.
    pub fn copies(&self) -> impl Iterator<Item = &CopyNode> + '_ {
        self.copies.iter()
    }

    /// Generation stamp cell of a node, `None` for nodes that were never
    /// recorded.
    fn stamp(&self, node: NodeRef) -> Option<&Cell<u64>> {
        match node {
            NodeRef::Event(handle) => self.events.get(&handle).map(|n| &n.generation),
            NodeRef::Op(op) => self.ops.get(&op).map(|n| &n.generation),
            NodeRef::Copy(id) => self.copy(id).map(|n| &n.generation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexNodeId, IndexSpaceId, InstId, TreeId};

    fn ev(id: u64) -> EventHandle {
        EventHandle::Event { id, generation: 0 }
    }

    fn key(id: u64) -> InstanceKey {
        InstanceKey {
            id: InstId(id),
            version: 0,
        }
    }

    #[test]
    fn events_are_deduplicated_by_identity() {
        let mut g = EventGraph::new();
        g.add_event_dependence(ev(1), ev(2)).unwrap();
        g.add_event_dependence(ev(1), ev(3)).unwrap();
        assert_eq!(g.events().count(), 3);
        let node = g.event(ev(1)).unwrap();
        assert_eq!(node.physical_outgoing().len(), 2);
        assert!(g.event(ev(2)).unwrap().physical_incoming().contains(&NodeRef::Event(ev(1))));
    }

    #[test]
    fn self_loops_are_rejected() {
        let mut g = EventGraph::new();
        assert!(matches!(
            g.add_event_dependence(ev(4), ev(4)),
            Err(RecordError::Malformed { .. })
        ));
        assert!(g.add_implicit_dependence(ev(4), ev(4)).is_err());
        assert!(g.event(ev(4)).is_none());
    }

    #[test]
    fn phase_barriers_change_handle_kind() {
        let mut g = EventGraph::new();
        assert_eq!(
            g.handle(9, 2),
            EventHandle::Event {
                id: 9,
                generation: 2
            }
        );
        g.add_phase_barrier(9).unwrap();
        assert_eq!(
            g.handle(9, 2),
            EventHandle::PhaseBarrier {
                id: 9,
                generation: 2
            }
        );
        assert_eq!(
            g.add_phase_barrier(9),
            Err(RecordError::Duplicate(Entity::PhaseBarrier(9)))
        );
    }

    #[test]
    fn operations_record_events_once() {
        let mut g = EventGraph::new();
        g.add_op_events(OpId(1), PhysicalKind::Task, ev(1), ev(2)).unwrap();
        assert_eq!(
            g.add_op_events(OpId(1), PhysicalKind::Task, ev(3), ev(4)),
            Err(RecordError::Duplicate(Entity::OperationEvents(OpId(1))))
        );
        let op = g.op(OpId(1)).unwrap();
        assert_eq!((op.start(), op.term()), (ev(1), ev(2)));
    }

    #[test]
    fn copy_fields_attach_through_the_terminate_event() {
        let mut g = EventGraph::new();
        let region = TreeNodeKey {
            index: IndexNodeId::Space(IndexSpaceId(1)),
            tree: TreeId(1),
        };
        let first = g.add_copy(key(1), key(2), region, None, ev(1), ev(2));
        let second = g.add_copy(key(2), key(3), region, None, ev(2), ev(3));
        assert_eq!((first, second), (CopyId(1), CopyId(2)));
        g.add_copy_field(ev(3), FieldId(7)).unwrap();
        assert_eq!(g.copy(second).unwrap().fields(), &[FieldId(7)]);
        assert!(g.copy(first).unwrap().fields().is_empty());
        assert_eq!(
            g.add_copy_field(ev(1), FieldId(7)),
            Err(RecordError::Unknown(Entity::CopyByTerminator(ev(1))))
        );
        assert!(g.copy(CopyId(0)).is_none());
    }

    #[test]
    fn copy_ids_outside_the_recorded_range_are_rejected() {
        let mut g = EventGraph::new();
        let region = TreeNodeKey {
            index: IndexNodeId::Space(IndexSpaceId(1)),
            tree: TreeId(1),
        };
        let id = g.add_copy(key(1), key(2), region, None, ev(1), ev(2));
        assert!(g.copy_mut(id).is_some());
        assert!(g.copy_mut(CopyId(0)).is_none());
        assert!(g.copy_mut(CopyId(2)).is_none());
        assert!(g.copy(CopyId(u32::MAX)).is_none());
    }
}
