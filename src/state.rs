use crate::{
    dependence::DependenceType,
    error::{Entity, RecordError, RecordResult},
    event::{EventGraph, EventHandle},
    instance::{InstanceKind, InstanceRegistry},
    machine::{Affinity, Machine, ProcessorKind},
    operation::{MappingDependence, OperationGraph, OperationKind, Point},
    region_tree::RegionTreeModel,
    requirement::{Coherence, Privilege, Requirement},
    types::{
        CopyId, FieldId, FieldSpaceId, HashMap, HashSet, IndexNodeId, IndexPartId, IndexSpaceId,
        InstId, MemId, OpId, ProcId, ReductionOpId, SliceId, TaskFnId, TreeId, TreeNodeKey,
    },
};
use tracing::{debug, error};

/// A region-tree node as named by a trace record: an index node, viewed
/// through a field space, in one tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegionRef {
    /// Index space or partition.
    pub node: IndexNodeId,
    /// Field space of the tree.
    pub field_space: FieldSpaceId,
    /// Tree id.
    pub tree: TreeId,
}

/// Everything recorded from one trace.
///
/// Each method ingests one trace fact. A recoverable failure leaves the
/// state untouched; the record may be retried once whatever it references
/// has been recorded. A fatal failure halts the state: every later record
/// fails with [`RecordError::Halted`] and no verifier can be built over it.
#[derive(Debug, Default)]
pub struct TraceState {
    pub(crate) machine: Machine,
    pub(crate) regions: RegionTreeModel,
    pub(crate) ops: OperationGraph,
    pub(crate) events: EventGraph,
    pub(crate) instances: InstanceRegistry,
    slice_index: HashMap<SliceId, OpId>,
    slice_slice: HashMap<SliceId, SliceId>,
    point_slice: HashMap<OpId, SliceId>,
    top_level: Option<OpId>,
    halted: bool,
}

impl TraceState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record<T>(
        &mut self,
        what: &'static str,
        f: impl FnOnce(&mut Self) -> RecordResult<T>,
    ) -> RecordResult<T> {
        if self.halted {
            return Err(RecordError::Halted);
        }
        let result = f(self);
        match &result {
            Err(err) if err.is_fatal() => {
                error!(record = what, %err, "fatal trace record, halting ingestion");
                self.halted = true;
            }
            Err(err) => debug!(record = what, %err, "trace record references unknown entity"),
            Ok(_) => {}
        }
        result
    }

    /// Whether a fatal record stopped ingestion.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Recorded processors and memories.
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Recorded index spaces, field spaces and region trees.
    #[must_use]
    pub const fn regions(&self) -> &RegionTreeModel {
        &self.regions
    }

    /// Recorded operations.
    #[must_use]
    pub const fn operations(&self) -> &OperationGraph {
        &self.ops
    }

    /// Recorded events.
    #[must_use]
    pub const fn events(&self) -> &EventGraph {
        &self.events
    }

    /// Recorded instances.
    #[must_use]
    pub const fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    /// The top-level task, once recorded.
    #[must_use]
    pub const fn top_level(&self) -> Option<OpId> {
        self.top_level
    }

    /// Slice a point task was attached to.
    #[must_use]
    pub fn point_slice(&self, point: OpId) -> Option<SliceId> {
        self.point_slice.get(&point).copied()
    }

    /// Handle for a raw `(id, generation)` event pair, taking recorded phase
    /// barriers into account.
    #[must_use]
    pub fn event_handle(&self, id: u64, generation: u32) -> EventHandle {
        self.events.handle(id, generation)
    }

    // Machine.

    /// Record a processor.
    ///
    /// # Errors
    /// Fatal on a duplicate id.
    pub fn add_processor(&mut self, id: ProcId, kind: ProcessorKind) -> RecordResult {
        self.record("processor", |s| s.machine.add_processor(id, kind))
    }

    /// Record a utility processor.
    ///
    /// # Errors
    /// Fatal on a duplicate id.
    pub fn add_utility(&mut self, id: ProcId) -> RecordResult {
        self.record("utility processor", |s| s.machine.add_utility(id))
    }

    /// Record a memory.
    ///
    /// # Errors
    /// Fatal on a duplicate id.
    pub fn add_memory(&mut self, id: MemId, capacity: u64) -> RecordResult {
        self.record("memory", |s| s.machine.add_memory(id, capacity))
    }

    /// Record a processor-memory affinity.
    ///
    /// # Errors
    /// Recoverable for unknown endpoints, fatal when recorded twice.
    pub fn add_proc_mem_affinity(
        &mut self,
        proc: ProcId,
        mem: MemId,
        affinity: Affinity,
    ) -> RecordResult {
        self.record("processor-memory affinity", |s| {
            s.machine.set_proc_mem(proc, mem, affinity)
        })
    }

    /// Record a memory-memory affinity.
    ///
    /// # Errors
    /// Recoverable for unknown endpoints, fatal when recorded twice or for a
    /// memory paired with itself.
    pub fn add_mem_mem_affinity(&mut self, a: MemId, b: MemId, affinity: Affinity) -> RecordResult {
        self.record("memory-memory affinity", |s| {
            s.machine.set_mem_mem(a, b, affinity)
        })
    }

    // Region trees.

    /// Record a root index space.
    ///
    /// # Errors
    /// Fatal on a duplicate id.
    pub fn add_index_space(&mut self, id: IndexSpaceId) -> RecordResult {
        self.record("index space", |s| s.regions.create_index_space(id))
    }

    /// Record a partition of `parent`.
    ///
    /// # Errors
    /// Recoverable for an unknown parent, fatal for a duplicate id or color.
    pub fn add_index_partition(
        &mut self,
        parent: IndexSpaceId,
        id: IndexPartId,
        disjoint: bool,
        color: u64,
    ) -> RecordResult {
        self.record("index partition", |s| {
            s.regions
                .create_index_partition(parent, id, disjoint, color)
        })
    }

    /// Record a subspace of partition `parent`.
    ///
    /// # Errors
    /// Recoverable for an unknown parent, fatal for a duplicate id or color.
    pub fn add_index_subspace(
        &mut self,
        parent: IndexPartId,
        id: IndexSpaceId,
        color: u64,
    ) -> RecordResult {
        self.record("index subspace", |s| {
            s.regions.create_index_subspace(parent, id, color)
        })
    }

    /// Record a field space.
    ///
    /// # Errors
    /// Fatal on a duplicate id.
    pub fn add_field_space(&mut self, id: FieldSpaceId) -> RecordResult {
        self.record("field space", |s| s.regions.create_field_space(id))
    }

    /// Record a field of `space`.
    ///
    /// # Errors
    /// Recoverable for an unknown field space, fatal for a duplicate field.
    pub fn add_field(&mut self, space: FieldSpaceId, field: FieldId) -> RecordResult {
        self.record("field", |s| s.regions.create_field(space, field))
    }

    /// Record region tree `tree` over index space `root` and `field_space`.
    ///
    /// # Errors
    /// Recoverable for an unknown root or field space, fatal for a duplicate
    /// tree id.
    pub fn add_region(
        &mut self,
        root: IndexSpaceId,
        field_space: FieldSpaceId,
        tree: TreeId,
    ) -> RecordResult {
        self.record("region", |s| {
            s.regions.create_region(root, field_space, tree)
        })
    }

    /// Name an index space.
    ///
    /// # Errors
    /// Recoverable for an unknown index space.
    pub fn name_index_space(&mut self, id: IndexSpaceId, name: &str) -> RecordResult {
        self.record("index space name", |s| s.regions.name_index_space(id, name))
    }

    /// Name an index partition.
    ///
    /// # Errors
    /// Recoverable for an unknown partition.
    pub fn name_index_partition(&mut self, id: IndexPartId, name: &str) -> RecordResult {
        self.record("index partition name", |s| {
            s.regions.name_index_partition(id, name)
        })
    }

    /// Name a field space.
    ///
    /// # Errors
    /// Recoverable for an unknown field space.
    pub fn name_field_space(&mut self, id: FieldSpaceId, name: &str) -> RecordResult {
        self.record("field space name", |s| s.regions.name_field_space(id, name))
    }

    /// Name a field.
    ///
    /// # Errors
    /// Recoverable for an unknown field space or field.
    pub fn name_field(&mut self, space: FieldSpaceId, field: FieldId, name: &str) -> RecordResult {
        self.record("field name", |s| s.regions.name_field(space, field, name))
    }

    /// Name a region or partition of a region tree.
    ///
    /// # Errors
    /// Recoverable when the tree holds no such node.
    pub fn name_tree_node(&mut self, region: RegionRef, name: &str) -> RecordResult {
        self.record("region name", |s| {
            s.regions
                .name_tree_node(region.tree, region.node, region.field_space, name)
        })
    }

    // Operations.

    /// Record the top-level task. A later single-task record for the same id
    /// is accepted and ignored.
    ///
    /// # Errors
    /// Fatal if an operation with the id exists.
    pub fn add_top_task(&mut self, id: OpId, name: &str, task_fn: TaskFnId) -> RecordResult {
        self.record("top-level task", |s| {
            s.ops
                .begin_operation(None, id, OperationKind::single_task(name, task_fn))?;
            s.top_level = Some(id);
            Ok(())
        })
    }

    /// Record a single task launched in `context`.
    ///
    /// # Errors
    /// Recoverable for an unknown context, fatal for a duplicate id or a
    /// context that is not a task.
    pub fn add_single_task(
        &mut self,
        context: OpId,
        id: OpId,
        name: &str,
        task_fn: TaskFnId,
    ) -> RecordResult {
        if self.top_level == Some(id) {
            return if self.halted { Err(RecordError::Halted) } else { Ok(()) };
        }
        self.begin(context, id, OperationKind::single_task(name, task_fn))
    }

    /// Record an index launch in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_index_task(
        &mut self,
        context: OpId,
        id: OpId,
        name: &str,
        task_fn: TaskFnId,
    ) -> RecordResult {
        self.begin(context, id, OperationKind::index_task(name, task_fn))
    }

    /// Record an inline mapping in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_mapping(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Mapping)
    }

    /// Record a close operation in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_close(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Close)
    }

    /// Record a fence in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_fence(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Fence)
    }

    /// Record a copy operation in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_copy_op(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Copy)
    }

    /// Record an acquire in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_acquire_op(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Acquire)
    }

    /// Record a release in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_release_op(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Release)
    }

    /// Record a deletion in `context`.
    ///
    /// # Errors
    /// As [`TraceState::add_single_task`].
    pub fn add_deletion(&mut self, context: OpId, id: OpId) -> RecordResult {
        self.begin(context, id, OperationKind::Deletion)
    }

    fn begin(&mut self, context: OpId, id: OpId, kind: OperationKind) -> RecordResult {
        self.record("operation", |s| s.ops.begin_operation(Some(context), id, kind))
    }

    // Index launches.

    /// Record that `slice` is a top-level slice of index launch `index`.
    ///
    /// # Errors
    /// Recoverable for an unknown launch, fatal for a slice recorded twice.
    pub fn add_index_slice(&mut self, index: OpId, slice: SliceId) -> RecordResult {
        self.record("index slice", |s| {
            s.ensure_fresh_slice(slice)?;
            let index = s.ops.resolve(index)?;
            s.slice_index.insert(slice, index);
            Ok(())
        })
    }

    /// Record that `child` was split off `parent`.
    ///
    /// # Errors
    /// Fatal for a slice recorded twice.
    pub fn add_slice_slice(&mut self, parent: SliceId, child: SliceId) -> RecordResult {
        self.record("slice split", |s| {
            s.ensure_fresh_slice(child)?;
            s.slice_slice.insert(child, parent);
            Ok(())
        })
    }

    fn ensure_fresh_slice(&self, slice: SliceId) -> RecordResult {
        if self.slice_index.contains_key(&slice) || self.slice_slice.contains_key(&slice) {
            return Err(RecordError::Duplicate(Entity::Slice(slice)));
        }
        Ok(())
    }

    /// Record point task `id` at `point` of the launch `slice` belongs to.
    ///
    /// # Errors
    /// Recoverable while the slice chain does not reach a launch, fatal for
    /// a cyclic chain or a duplicate id.
    pub fn add_slice_point(&mut self, slice: SliceId, id: OpId, point: Point) -> RecordResult {
        self.record("slice point", |s| {
            let index = s.find_enclosing_index_id(slice)?;
            s.ops.add_point(index, id, point)?;
            s.point_slice.insert(id, slice);
            Ok(())
        })
    }

    /// Record that point task `alias` is the same point as `existing`.
    ///
    /// # Errors
    /// Recoverable for an unknown point, fatal if `alias` names another
    /// operation.
    pub fn add_point_point(&mut self, existing: OpId, alias: OpId) -> RecordResult {
        self.record("point alias", |s| s.ops.add_alias(existing, alias))
    }

    /// Follow the chain of slice splits from `slice` up to its index launch.
    ///
    /// # Errors
    /// `Unknown` if the chain ends before reaching a launch, `Malformed` if
    /// it loops.
    pub fn find_enclosing_index_id(&self, slice: SliceId) -> RecordResult<OpId> {
        let mut seen = HashSet::default();
        let mut current = slice;
        loop {
            if let Some(&index) = self.slice_index.get(&current) {
                return Ok(index);
            }
            if !seen.insert(current) {
                return Err(RecordError::Malformed {
                    entity: Entity::Slice(slice),
                    reason: "slice chain contains a cycle",
                });
            }
            current = *self
                .slice_slice
                .get(&current)
                .ok_or(RecordError::Unknown(Entity::Slice(current)))?;
        }
    }

    // Requirements and dependences.

    /// Record requirement `index` of `op` on `region`, with no fields yet.
    ///
    /// # Errors
    /// Recoverable for an unknown operation, index node, field space or
    /// tree; fatal for an occupied slot or a slot the operation kind does
    /// not have.
    pub fn add_requirement(
        &mut self,
        op: OpId,
        index: u32,
        region: RegionRef,
        privilege: Privilege,
        coherence: Coherence,
    ) -> RecordResult {
        self.record("requirement", |s| {
            s.ensure_region(region)?;
            let tree_node = s
                .regions
                .find_node(region.tree, region.node, region.field_space);
            let req = Requirement::new(
                index,
                region.node,
                region.field_space,
                region.tree,
                tree_node,
                privilege,
                coherence,
            );
            s.ops.add_requirement(op, req)
        })
    }

    fn ensure_index_node(&self, node: IndexNodeId) -> RecordResult {
        if self.regions.contains(node) {
            return Ok(());
        }
        Err(RecordError::Unknown(match node {
            IndexNodeId::Space(id) => Entity::IndexSpace(id),
            IndexNodeId::Partition(id) => Entity::IndexPartition(id),
        }))
    }

    fn ensure_region(&self, region: RegionRef) -> RecordResult {
        self.ensure_index_node(region.node)?;
        if self.regions.field_space(region.field_space).is_none() {
            return Err(RecordError::Unknown(Entity::FieldSpace(region.field_space)));
        }
        if self.regions.tree(region.tree).is_none() {
            return Err(RecordError::Unknown(Entity::RegionTree(region.tree)));
        }
        Ok(())
    }

    /// Add `field` to requirement `index` of `op`.
    ///
    /// # Errors
    /// Recoverable for an unknown requirement or a field its field space
    /// does not define, fatal for a field listed twice.
    pub fn add_req_field(&mut self, op: OpId, index: u32, field: FieldId) -> RecordResult {
        self.record("requirement field", |s| {
            let op = s.ops.resolve(op)?;
            let space = s
                .ops
                .requirement(op, index)
                .ok_or(RecordError::Unknown(Entity::Requirement { op, index }))?
                .field_space();
            let known = s
                .regions
                .field_space(space)
                .is_some_and(|fs| fs.fields().contains(&field));
            if !known {
                return Err(RecordError::Unknown(Entity::Field { space, field }));
            }
            s.ops.add_requirement_field(op, index, field)
        })
    }

    /// Record the subregion requirement `index` of point task `op` resolved
    /// to.
    ///
    /// # Errors
    /// Recoverable for an unknown operation, node or launch requirement,
    /// fatal for a requirement recorded twice.
    pub fn add_instance_requirement(
        &mut self,
        op: OpId,
        index: u32,
        node: IndexNodeId,
    ) -> RecordResult {
        self.record("instance requirement", |s| {
            s.ensure_index_node(node)?;
            let op = s.ops.resolve(op)?;
            let source = match s.ops.get(op).map(|o| o.kind()) {
                Some(OperationKind::SingleTask(task)) => match task.enclosing() {
                    Some((launch, _)) => s.ops.requirement(launch, index),
                    None => s.ops.requirement(op, index),
                },
                _ => None,
            };
            let tree_node =
                source.and_then(|req| s.regions.find_node(req.tree(), node, req.field_space()));
            s.ops.add_point_requirement(op, index, node, tree_node)
        })
    }

    /// Record a dependence the runtime enforced between two children of
    /// `dep.context`.
    ///
    /// # Errors
    /// Recoverable for unknown operations, fatal for operations outside the
    /// context or a deletion producer.
    pub fn add_mapping_dependence(&mut self, dep: MappingDependence) -> RecordResult {
        self.record("mapping dependence", |s| s.ops.add_mapping_dependence(dep))
    }

    /// Record a mapping dependence from its raw fields.
    ///
    /// # Errors
    /// Fatal for an unknown dependence code, otherwise as
    /// [`TraceState::add_mapping_dependence`].
    pub fn add_raw_mapping_dependence(
        &mut self,
        context: OpId,
        (producer, producer_req): (OpId, u32),
        (consumer, consumer_req): (OpId, u32),
        code: u32,
    ) -> RecordResult {
        self.record("mapping dependence", |s| {
            let kind = DependenceType::from_raw(code).ok_or(RecordError::Malformed {
                entity: Entity::Operation(consumer),
                reason: "unknown dependence code",
            })?;
            s.ops.add_mapping_dependence(MappingDependence {
                context,
                producer,
                producer_req,
                consumer,
                consumer_req,
                kind,
            })
        })
    }

    // Events.

    /// Record a phase barrier.
    ///
    /// # Errors
    /// Fatal for a barrier recorded twice.
    pub fn add_phase_barrier(&mut self, id: u64) -> RecordResult {
        self.record("phase barrier", |s| s.events.add_phase_barrier(id))
    }

    /// Record the start and terminate events of `op`.
    ///
    /// # Errors
    /// Recoverable for an unknown operation, fatal for events recorded twice
    /// or an operation kind that does not execute.
    pub fn add_op_events(&mut self, op: OpId, start: EventHandle, term: EventHandle) -> RecordResult {
        self.record("operation events", |s| {
            let op = s.ops.resolve(op)?;
            let kind = s
                .ops
                .get(op)
                .and_then(|o| o.kind().physical_kind())
                .ok_or(RecordError::Malformed {
                    entity: Entity::OperationEvents(op),
                    reason: "operation kind has no events",
                })?;
            s.events.add_op_events(op, kind, start, term)
        })
    }

    /// Record a low-level copy from the latest version of `src` to the
    /// latest version of `dst` over `region`, and return its id.
    ///
    /// # Errors
    /// Recoverable for unknown instances or a region the tree does not
    /// hold.
    pub fn add_copy_events(
        &mut self,
        (src, dst): (InstId, InstId),
        region: RegionRef,
        redop: Option<ReductionOpId>,
        start: EventHandle,
        term: EventHandle,
    ) -> RecordResult<CopyId> {
        self.record("copy events", |s| {
            let src = s.instances.latest(src)?;
            let dst = s.instances.latest(dst)?;
            s.ensure_region(region)?;
            let region = s
                .regions
                .find_node(region.tree, region.node, region.field_space)
                .ok_or(RecordError::Unknown(Entity::TreeNode {
                    index: region.node,
                    tree: region.tree,
                }))?;
            Ok(s.events.add_copy(src, dst, region, redop, start, term))
        })
    }

    /// Add `field` to the copy terminating at `term`.
    ///
    /// # Errors
    /// Recoverable if no copy terminates at `term`.
    pub fn add_copy_field(&mut self, term: EventHandle, field: FieldId) -> RecordResult {
        self.record("copy field", |s| s.events.add_copy_field(term, field))
    }

    /// Record that `later` cannot trigger before `earlier`.
    ///
    /// # Errors
    /// Fatal for an event depending on itself.
    pub fn add_event_dependence(&mut self, earlier: EventHandle, later: EventHandle) -> RecordResult {
        self.record("event dependence", |s| {
            s.events.add_event_dependence(earlier, later)
        })
    }

    /// Record an implicit ordering hypothesis between two events.
    ///
    /// # Errors
    /// Fatal for an event depending on itself.
    pub fn add_implicit_dependence(
        &mut self,
        earlier: EventHandle,
        later: EventHandle,
    ) -> RecordResult {
        self.record("implicit dependence", |s| {
            s.events.add_implicit_dependence(earlier, later)
        })
    }

    // Instances.

    /// Record a new version of physical instance `id` in `mem`, created for
    /// index space `region` of `tree`.
    ///
    /// # Errors
    /// Recoverable for an unknown memory or region.
    pub fn add_physical_instance(
        &mut self,
        id: InstId,
        mem: MemId,
        region: IndexSpaceId,
        tree: TreeId,
    ) -> RecordResult {
        self.record("physical instance", |s| {
            s.create_instance(id, mem, region, tree, InstanceKind::Physical)
        })
    }

    /// Record a new version of reduction instance `id`.
    ///
    /// # Errors
    /// As [`TraceState::add_physical_instance`].
    pub fn add_reduction_instance(
        &mut self,
        id: InstId,
        mem: MemId,
        (region, tree): (IndexSpaceId, TreeId),
        fold: bool,
        indirect: bool,
    ) -> RecordResult {
        self.record("reduction instance", |s| {
            s.create_instance(id, mem, region, tree, InstanceKind::Reduction { fold, indirect })
        })
    }

    fn create_instance(
        &mut self,
        id: InstId,
        mem: MemId,
        region: IndexSpaceId,
        tree: TreeId,
        kind: InstanceKind,
    ) -> RecordResult {
        if !self.machine.contains_memory(mem) {
            return Err(RecordError::Unknown(Entity::Memory(mem)));
        }
        let region = TreeNodeKey {
            index: IndexNodeId::Space(region),
            tree,
        };
        if self.regions.tree_node(region).is_none() {
            return Err(RecordError::Unknown(Entity::TreeNode {
                index: region.index,
                tree,
            }));
        }
        let key = self.instances.create(id, mem, region, kind);
        self.machine.add_instance(mem, key)
    }

    /// Record that requirement `index` of `op` used the latest version of
    /// instance `inst`.
    ///
    /// # Errors
    /// Recoverable for an unknown operation, requirement or instance, fatal
    /// for a slot mapped twice.
    pub fn add_op_user(&mut self, op: OpId, index: u32, inst: InstId) -> RecordResult {
        self.record("operation instance", |s| {
            let op = s.ops.resolve(op)?;
            let key = s.instances.latest(inst)?;
            if s.ops.requirement(op, index).is_none() {
                return Err(RecordError::Unknown(Entity::Requirement { op, index }));
            }
            s.ops.add_instance(op, index, key)?;
            let req = s
                .ops
                .requirement(op, index)
                .expect("TraceState::add_op_user: [1]");
            s.instances.add_user(key, op, req);
            Ok(())
        })
    }

    /// Record that `op` executed on `proc`.
    ///
    /// # Errors
    /// Recoverable for an unknown operation or processor.
    pub fn add_op_proc_user(&mut self, op: OpId, proc: ProcId) -> RecordResult {
        self.record("operation processor", |s| {
            let op = s.ops.resolve(op)?;
            s.machine.add_executed(proc, op)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP: OpId = OpId(1);

    fn ev(id: u64) -> EventHandle {
        EventHandle::Event { id, generation: 0 }
    }

    fn region(space: u64) -> RegionRef {
        RegionRef {
            node: IndexNodeId::Space(IndexSpaceId(space)),
            field_space: FieldSpaceId(1),
            tree: TreeId(1),
        }
    }

    fn base() -> TraceState {
        let mut s = TraceState::new();
        s.add_memory(MemId(1), 1 << 20).unwrap();
        s.add_index_space(IndexSpaceId(1)).unwrap();
        s.add_index_partition(IndexSpaceId(1), IndexPartId(2), true, 0)
            .unwrap();
        s.add_index_subspace(IndexPartId(2), IndexSpaceId(3), 0)
            .unwrap();
        s.add_field_space(FieldSpaceId(1)).unwrap();
        s.add_field(FieldSpaceId(1), FieldId(1)).unwrap();
        s.add_region(IndexSpaceId(1), FieldSpaceId(1), TreeId(1))
            .unwrap();
        s.add_top_task(TOP, "top", TaskFnId(1)).unwrap();
        s
    }

    #[test]
    fn fatal_errors_halt_ingestion() {
        let mut s = base();
        s.add_index_space(IndexSpaceId(9)).unwrap();
        assert!(s.add_index_space(IndexSpaceId(9)).unwrap_err().is_fatal());
        assert!(s.is_halted());
        assert_eq!(s.add_memory(MemId(2), 0), Err(RecordError::Halted));
    }

    #[test]
    fn unknown_references_are_recoverable() {
        let mut s = base();
        assert_eq!(
            s.add_mapping(OpId(50), OpId(2)),
            Err(RecordError::Unknown(Entity::Operation(OpId(50))))
        );
        assert!(!s.is_halted());
        s.add_mapping(TOP, OpId(2)).unwrap();
        assert_eq!(
            s.add_requirement(OpId(2), 0, region(77), Privilege::ReadOnly, Coherence::Exclusive),
            Err(RecordError::Unknown(Entity::IndexSpace(IndexSpaceId(77))))
        );
        s.add_op_events(OpId(2), ev(1), ev(2)).unwrap();
        assert!(!s.is_halted());
    }

    #[test]
    fn top_level_task_is_recorded_once() {
        let mut s = base();
        s.add_single_task(OpId(99), TOP, "top", TaskFnId(1)).unwrap();
        assert_eq!(s.top_level(), Some(TOP));
        assert_eq!(s.operations().len(), 1);
    }

    #[test]
    fn slices_resolve_to_their_launch() {
        let mut s = base();
        s.add_index_task(TOP, OpId(2), "launch", TaskFnId(2)).unwrap();
        s.add_index_slice(OpId(2), SliceId(10)).unwrap();
        s.add_slice_slice(SliceId(10), SliceId(11)).unwrap();
        s.add_slice_point(SliceId(11), OpId(3), Point::new(&[4]).unwrap())
            .unwrap();
        assert_eq!(s.find_enclosing_index_id(SliceId(11)), Ok(OpId(2)));
        assert_eq!(s.point_slice(OpId(3)), Some(SliceId(11)));
        assert_eq!(s.operations().participants(OpId(2)), vec![OpId(3)]);

        assert_eq!(
            s.add_slice_point(SliceId(40), OpId(4), Point::new(&[5]).unwrap()),
            Err(RecordError::Unknown(Entity::Slice(SliceId(40))))
        );
    }

    #[test]
    fn slice_cycles_are_detected() {
        let mut s = base();
        s.add_slice_slice(SliceId(1), SliceId(2)).unwrap();
        s.add_slice_slice(SliceId(2), SliceId(1)).unwrap();
        assert!(matches!(
            s.find_enclosing_index_id(SliceId(1)),
            Err(RecordError::Malformed { .. })
        ));
    }

    #[test]
    fn points_inherit_launch_requirements() {
        let mut s = base();
        s.add_index_task(TOP, OpId(2), "launch", TaskFnId(2)).unwrap();
        s.add_requirement(OpId(2), 0, region(1), Privilege::ReadWrite, Coherence::Exclusive)
            .unwrap();
        s.add_req_field(OpId(2), 0, FieldId(1)).unwrap();
        assert_eq!(
            s.add_req_field(OpId(2), 0, FieldId(5)),
            Err(RecordError::Unknown(Entity::Field {
                space: FieldSpaceId(1),
                field: FieldId(5)
            }))
        );
        s.add_index_slice(OpId(2), SliceId(1)).unwrap();
        s.add_slice_point(SliceId(1), OpId(3), Point::new(&[0]).unwrap())
            .unwrap();
        s.add_point_point(OpId(3), OpId(4)).unwrap();
        s.add_instance_requirement(OpId(4), 0, IndexNodeId::Space(IndexSpaceId(3)))
            .unwrap();

        let req = s.operations().requirement(OpId(3), 0).unwrap();
        assert_eq!(req.node(), IndexNodeId::Space(IndexSpaceId(3)));
        assert_eq!(
            req.tree_node(),
            Some(TreeNodeKey {
                index: IndexNodeId::Space(IndexSpaceId(3)),
                tree: TreeId(1)
            })
        );
        assert_eq!(req.fields(), &[FieldId(1)]);
    }

    #[test]
    fn instance_users_follow_the_latest_version() {
        let mut s = base();
        s.add_mapping(TOP, OpId(2)).unwrap();
        s.add_requirement(OpId(2), 0, region(1), Privilege::ReadOnly, Coherence::Exclusive)
            .unwrap();
        s.add_req_field(OpId(2), 0, FieldId(1)).unwrap();
        s.add_physical_instance(InstId(5), MemId(1), IndexSpaceId(1), TreeId(1))
            .unwrap();
        s.add_reduction_instance(InstId(5), MemId(1), (IndexSpaceId(3), TreeId(1)), true, false)
            .unwrap();
        s.add_op_user(OpId(2), 0, InstId(5)).unwrap();

        let key = s.operations().instance(OpId(2), 0).unwrap();
        assert_eq!(key.version, 1);
        let inst = s.instances().get(key).unwrap();
        assert_eq!(inst.users()[&FieldId(1)][&OpId(2)], vec![0]);
        assert_eq!(s.machine().memory(MemId(1)).unwrap().instances().len(), 2);
        assert!(s.add_op_user(OpId(2), 0, InstId(5)).unwrap_err().is_fatal());
    }

    #[test]
    fn events_need_an_executing_operation() {
        let mut s = base();
        s.add_fence(TOP, OpId(2)).unwrap();
        assert!(s.add_op_events(OpId(2), ev(1), ev(2)).unwrap_err().is_fatal());
    }

    #[test]
    fn copies_resolve_instances_and_regions() {
        let mut s = base();
        s.add_physical_instance(InstId(1), MemId(1), IndexSpaceId(1), TreeId(1))
            .unwrap();
        assert_eq!(
            s.add_copy_events((InstId(1), InstId(2)), region(1), None, ev(1), ev(2)),
            Err(RecordError::Unknown(Entity::Instance(InstId(2))))
        );
        s.add_physical_instance(InstId(2), MemId(1), IndexSpaceId(3), TreeId(1))
            .unwrap();
        let id = s
            .add_copy_events((InstId(1), InstId(2)), region(3), None, ev(1), ev(2))
            .unwrap();
        s.add_copy_field(ev(2), FieldId(1)).unwrap();
        let copy = s.events().copy(id).unwrap();
        assert_eq!(copy.fields(), &[FieldId(1)]);
        assert_eq!(copy.dst().id, InstId(2));
    }
}
