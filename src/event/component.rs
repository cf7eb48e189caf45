use crate::{
    event::{EventGraph, EventHandle, GenerationSource, NodeRef},
    types::{CopyId, OpId},
};

/// A maximal set of event-graph nodes connected by ordering edges, taken as
/// undirected.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    events: Vec<EventHandle>,
    phase_barriers: Vec<EventHandle>,
    ops: Vec<OpId>,
    copies: Vec<CopyId>,
}

impl Component {
    /// Events and phase-barrier generations, in discovery order.
    #[must_use]
    pub fn events(&self) -> &[EventHandle] {
        &self.events
    }

    /// Phase-barrier generations among [`Component::events`].
    #[must_use]
    pub fn phase_barriers(&self) -> &[EventHandle] {
        &self.phase_barriers
    }

    /// Operations, in discovery order.
    #[must_use]
    pub fn ops(&self) -> &[OpId] {
        &self.ops
    }

    /// Low-level copies, in discovery order.
    #[must_use]
    pub fn copies(&self) -> &[CopyId] {
        &self.copies
    }

    /// Operations plus low-level copies.
    #[must_use]
    pub fn num_ops(&self) -> usize {
        self.ops.len() + self.copies.len()
    }
}

impl EventGraph {
    /// Split the graph into connected components.
    ///
    /// Physical edges, plus implicit ones when `implicit` is set, are taken
    /// as undirected. Every recorded event seeds a component unless an
    /// earlier component already claimed it. The null event is never part
    /// of a component and does not connect its neighbors. Components with
    /// fewer than two operations are dropped.
    pub fn connected_components(&self, implicit: bool) -> Vec<Component> {
        let generation = GenerationSource::global().next().get();
        let mut components = Vec::new();
        let mut pending = Vec::new();
        for seed in self.events.values() {
            if seed.handle.is_null() || seed.generation.get() == generation {
                continue;
            }
            let mut component = Component::default();
            pending.push(NodeRef::Event(seed.handle));
            while let Some(node) = pending.pop() {
                let stamp = self
                    .stamp(node)
                    .expect("EventGraph::connected_components: [1]");
                if stamp.get() == generation {
                    continue;
                }
                match node {
                    NodeRef::Event(handle) => {
                        if handle.is_null() {
                            continue;
                        }
                        stamp.set(generation);
                        let event = &self.events[&handle];
                        component.events.push(handle);
                        if handle.is_phase_barrier() {
                            component.phase_barriers.push(handle);
                        }
                        pending.extend(event.physical_incoming.iter().copied());
                        pending.extend(event.physical_outgoing.iter().copied());
                        if implicit {
                            pending.extend(
                                event
                                    .implicit_incoming
                                    .iter()
                                    .chain(&event.implicit_outgoing)
                                    .copied()
                                    .map(NodeRef::Event),
                            );
                        }
                    }
                    NodeRef::Op(op) => {
                        stamp.set(generation);
                        let node = &self.ops[&op];
                        component.ops.push(op);
                        pending.push(NodeRef::Event(node.start));
                        pending.push(NodeRef::Event(node.term));
                    }
                    NodeRef::Copy(id) => {
                        stamp.set(generation);
                        let copy = self
                            .copy(id)
                            .expect("EventGraph::connected_components: [2]");
                        component.copies.push(id);
                        pending.push(NodeRef::Event(copy.start));
                        pending.push(NodeRef::Event(copy.term));
                    }
                }
            }
            if component.num_ops() >= 2 {
                components.push(component);
            }
        }
        components
    }
}
