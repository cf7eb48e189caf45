use crate::{
    dependence::DependenceType,
    error::{Entity, RecordError, RecordResult},
    event::PhysicalKind,
    requirement::Requirement,
    types::{
        FieldId, HashMap, HashSet, IndexMap, IndexNodeId, IndexSet, InstanceKey, OpId, TaskFnId,
        TreeNodeKey,
    },
};
use core::fmt;
use tracing::trace;

mod diff;

pub use diff::DependenceDiff;

/// Coordinates of a point task inside its launch domain, one to three
/// dimensions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Point {
    dim: u8,
    coords: [i64; 3],
}

impl Point {
    /// Build a point from its coordinates. Returns `None` unless there are
    /// one to three of them.
    #[must_use]
    pub fn new(coords: &[i64]) -> Option<Self> {
        if coords.is_empty() || coords.len() > 3 {
            return None;
        }
        let mut point = Self {
            dim: u8::try_from(coords.len()).ok()?,
            coords: [0; 3],
        };
        point.coords[..coords.len()].copy_from_slice(coords);
        Some(point)
    }

    /// Coordinates, one per dimension.
    #[must_use]
    pub fn coords(&self) -> &[i64] {
        &self.coords[..usize::from(self.dim)]
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, c) in self.coords().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str(")")
    }
}

/// An ordering the runtime enforced, or should have enforced, between two
/// requirements of sibling operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MappingDependence {
    /// Task whose children the two operations are.
    pub context: OpId,
    /// Earlier operation.
    pub producer: OpId,
    /// Requirement slot of the earlier operation.
    pub producer_req: u32,
    /// Later operation.
    pub consumer: OpId,
    /// Requirement slot of the later operation.
    pub consumer_req: u32,
    /// Kind of the dependence.
    pub kind: DependenceType,
}

impl fmt::Display for MappingDependence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from requirement {} of operation {} to requirement {} of operation {}",
            self.kind, self.consumer_req, self.consumer, self.producer_req, self.producer
        )
    }
}

/// State owned by a task that encloses child operations.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    children: IndexSet<OpId>,
    claimed: Vec<MappingDependence>,
    required: Vec<MappingDependence>,
}

impl TaskContext {
    /// Child operations in launch order.
    #[must_use]
    pub const fn children(&self) -> &IndexSet<OpId> {
        &self.children
    }

    /// Dependences the runtime recorded between children.
    #[must_use]
    pub fn claimed(&self) -> &[MappingDependence] {
        &self.claimed
    }

    /// Dependences the last diff derived between children.
    #[must_use]
    pub fn required(&self) -> &[MappingDependence] {
        &self.required
    }
}

/// A single task, possibly a point of an index launch.
#[derive(Debug, Clone)]
pub struct SingleTask {
    name: String,
    task_fn: TaskFnId,
    enclosing: Option<(OpId, Point)>,
    context: TaskContext,
}

impl SingleTask {
    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launched task function.
    #[must_use]
    pub const fn task_fn(&self) -> TaskFnId {
        self.task_fn
    }

    /// Index launch and point, for point tasks.
    #[must_use]
    pub const fn enclosing(&self) -> Option<(OpId, Point)> {
        self.enclosing
    }

    /// Children and dependences recorded inside this task.
    #[must_use]
    pub const fn context(&self) -> &TaskContext {
        &self.context
    }
}

/// An index launch, carrying its point tasks.
#[derive(Debug, Clone)]
pub struct IndexTask {
    name: String,
    task_fn: TaskFnId,
    points: IndexSet<OpId>,
}

impl IndexTask {
    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launched task function.
    #[must_use]
    pub const fn task_fn(&self) -> TaskFnId {
        self.task_fn
    }

    /// Point tasks in recording order.
    #[must_use]
    pub const fn points(&self) -> &IndexSet<OpId> {
        &self.points
    }
}

/// What an operation is. Each kind diverges from the others on arity,
/// dependence participation and event-graph presence.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// A single task, enclosing its own children.
    SingleTask(SingleTask),
    /// An index launch whose points do the work.
    IndexTask(IndexTask),
    /// An inline mapping of one region.
    Mapping,
    /// A close of one region.
    Close,
    /// An explicit copy: slot 0 is the source, slot 1 the destination.
    Copy,
    /// Acquisition of user-level coherence.
    Acquire,
    /// Release of user-level coherence.
    Release,
    /// A fence ordering its context.
    Fence,
    /// A deletion of region-tree resources.
    Deletion,
}

impl OperationKind {
    /// A single task that is not a point of an index launch.
    pub fn single_task(name: impl Into<String>, task_fn: TaskFnId) -> Self {
        Self::SingleTask(SingleTask {
            name: name.into(),
            task_fn,
            enclosing: None,
            context: TaskContext::default(),
        })
    }

    /// An index launch with no points yet.
    pub fn index_task(name: impl Into<String>, task_fn: TaskFnId) -> Self {
        Self::IndexTask(IndexTask {
            name: name.into(),
            task_fn,
            points: IndexSet::default(),
        })
    }

    /// Event-graph node kind, for operations that execute.
    #[must_use]
    pub const fn physical_kind(&self) -> Option<PhysicalKind> {
        match self {
            Self::SingleTask(_) => Some(PhysicalKind::Task),
            Self::Mapping => Some(PhysicalKind::Mapping),
            Self::Close => Some(PhysicalKind::Close),
            Self::Copy => Some(PhysicalKind::Copy),
            Self::Acquire => Some(PhysicalKind::Acquire),
            Self::Release => Some(PhysicalKind::Release),
            Self::IndexTask(_) | Self::Fence | Self::Deletion => None,
        }
    }

    /// Human-readable label of the kind.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::SingleTask(task) => &task.name,
            Self::IndexTask(task) => &task.name,
            Self::Mapping => "Mapping",
            Self::Close => "Close",
            Self::Copy => "Copy",
            Self::Acquire => "Acquire",
            Self::Release => "Release",
            Self::Fence => "Fence",
            Self::Deletion => "Deletion",
        }
    }

    const fn is_point(&self) -> bool {
        matches!(self, Self::SingleTask(SingleTask { enclosing: Some(_), .. }))
    }
}

/// Logical adjacency of an operation.
///
/// `incoming` holds the operations depending on this one, `outgoing` the
/// operations this one depends on.
#[derive(Debug, Clone, Default)]
pub struct LogicalEdges {
    incoming: IndexSet<OpId>,
    outgoing: IndexSet<OpId>,
}

impl LogicalEdges {
    /// Later operations depending on this one.
    #[must_use]
    pub const fn incoming(&self) -> &IndexSet<OpId> {
        &self.incoming
    }

    /// Earlier operations this one depends on.
    #[must_use]
    pub const fn outgoing(&self) -> &IndexSet<OpId> {
        &self.outgoing
    }

    fn link(
        ops: &mut IndexMap<OpId, Operation>,
        select: fn(&mut Operation) -> &mut Self,
        dep: &MappingDependence,
    ) {
        if dep.producer == dep.consumer {
            return;
        }
        select(&mut ops[&dep.producer]).incoming.insert(dep.consumer);
        select(&mut ops[&dep.consumer]).outgoing.insert(dep.producer);
    }
}

/// A node of the operation graph.
#[derive(Debug, Clone)]
pub struct Operation {
    id: OpId,
    context: Option<OpId>,
    kind: OperationKind,
    requirements: IndexMap<u32, Requirement>,
    claimed: LogicalEdges,
    required: LogicalEdges,
    instances: IndexMap<u32, InstanceKey>,
}

impl Operation {
    /// Identifier of the operation.
    #[must_use]
    pub const fn id(&self) -> OpId {
        self.id
    }

    /// Enclosing task, `None` for the top-level task.
    #[must_use]
    pub const fn context(&self) -> Option<OpId> {
        self.context
    }

    /// Kind and kind-specific state.
    #[must_use]
    pub const fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Requirements keyed by slot, in recording order.
    #[must_use]
    pub const fn requirements(&self) -> &IndexMap<u32, Requirement> {
        &self.requirements
    }

    /// Requirement in slot `index`.
    #[must_use]
    pub fn requirement(&self, index: u32) -> Option<&Requirement> {
        self.requirements.get(&index)
    }

    /// Adjacency recorded by the runtime.
    #[must_use]
    pub const fn claimed_edges(&self) -> &LogicalEdges {
        &self.claimed
    }

    /// Adjacency derived by the last diff.
    #[must_use]
    pub const fn required_edges(&self) -> &LogicalEdges {
        &self.required
    }

    /// Instances mapped for each requirement slot.
    #[must_use]
    pub const fn instances(&self) -> &IndexMap<u32, InstanceKey> {
        &self.instances
    }

    /// Context state, if this operation is a single task.
    #[must_use]
    pub const fn task_context(&self) -> Option<&TaskContext> {
        match &self.kind {
            OperationKind::SingleTask(task) => Some(&task.context),
            _ => None,
        }
    }

    fn task_context_mut(&mut self) -> Option<&mut TaskContext> {
        match &mut self.kind {
            OperationKind::SingleTask(task) => Some(&mut task.context),
            _ => None,
        }
    }
}

/// `Task (UID 12)`, or `Task (UID 12) point (1,2)` for point tasks.
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (UID {})", self.kind.label(), self.id)?;
        if let OperationKind::SingleTask(SingleTask {
            enclosing: Some((_, point)),
            ..
        }) = &self.kind
        {
            write!(f, " point {point}")?;
        }
        Ok(())
    }
}

/// Visited set for [`OperationGraph::has_logical_path`].
///
/// Marks survive between queries so a batch of queries against the same
/// target can share work; call [`LogicalMarks::unmark_all`] before starting
/// an independent query.
#[derive(Debug, Clone, Default)]
pub struct LogicalMarks {
    marked: HashSet<OpId>,
}

impl LogicalMarks {
    /// Create an empty mark set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every mark.
    pub fn unmark_all(&mut self) {
        self.marked.clear();
    }

    /// Number of marked operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.marked.len()
    }

    /// Whether nothing is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    fn mark(&mut self, op: OpId) -> bool {
        self.marked.insert(op)
    }
}

/// Every operation of the trace and the logical dependences between them.
#[derive(Debug, Clone, Default)]
pub struct OperationGraph {
    ops: IndexMap<OpId, Operation>,
    aliases: HashMap<OpId, OpId>,
}

impl OperationGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a possibly aliased id to the operation it names.
    ///
    /// # Errors
    /// `Unknown` if no operation is recorded under the id.
    pub fn resolve(&self, id: OpId) -> RecordResult<OpId> {
        let id = self.aliases.get(&id).copied().unwrap_or(id);
        if self.ops.contains_key(&id) {
            Ok(id)
        } else {
            Err(RecordError::Unknown(Entity::Operation(id)))
        }
    }

    fn resolve_mut(&mut self, id: OpId) -> RecordResult<&mut Operation> {
        let id = self.resolve(id)?;
        Ok(&mut self.ops[&id])
    }

    fn ensure_fresh(&self, id: OpId) -> RecordResult {
        if self.ops.contains_key(&id) || self.aliases.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::Operation(id)));
        }
        Ok(())
    }

    /// Record an operation launched inside `context`, or the top-level task
    /// when `context` is `None`.
    ///
    /// # Errors
    /// `Duplicate` for a known id, `Unknown` for an unrecorded context,
    /// `Malformed` if the context is not a single task or a non-task has no
    /// context.
    pub fn begin_operation(
        &mut self,
        context: Option<OpId>,
        id: OpId,
        kind: OperationKind,
    ) -> RecordResult {
        self.ensure_fresh(id)?;
        let context = match context {
            Some(context) => {
                let context = self.resolve(context)?;
                if self.ops[&context].task_context().is_none() {
                    return Err(RecordError::Malformed {
                        entity: Entity::Operation(context),
                        reason: "only single tasks enclose operations",
                    });
                }
                Some(context)
            }
            None if matches!(kind, OperationKind::SingleTask(_)) => None,
            None => {
                return Err(RecordError::Malformed {
                    entity: Entity::Operation(id),
                    reason: "only a single task may lack a context",
                });
            }
        };
        if let Some(context) = context {
            self.ops[&context]
                .task_context_mut()
                .expect("OperationGraph::begin_operation: [1]")
                .children
                .insert(id);
        }
        trace!(op = %id, kind = kind.label(), ?context, "recorded operation");
        self.ops.insert(
            id,
            Operation {
                id,
                context,
                kind,
                requirements: IndexMap::default(),
                claimed: LogicalEdges::default(),
                required: LogicalEdges::default(),
                instances: IndexMap::default(),
            },
        );
        Ok(())
    }

    /// Record point `point` of index launch `index` as single task `id`.
    ///
    /// The point shares its launch's context but is not one of the
    /// context's children: the launch stands for it in the diff.
    ///
    /// # Errors
    /// `Duplicate` for a known id, `Unknown` for an unrecorded launch,
    /// `Malformed` if `index` is not an index launch.
    pub fn add_point(&mut self, index: OpId, id: OpId, point: Point) -> RecordResult {
        self.ensure_fresh(id)?;
        let index = self.resolve(index)?;
        let launch = &mut self.ops[&index];
        let OperationKind::IndexTask(task) = &mut launch.kind else {
            return Err(RecordError::Malformed {
                entity: Entity::Operation(index),
                reason: "points belong to index launches",
            });
        };
        task.points.insert(id);
        let kind = OperationKind::SingleTask(SingleTask {
            name: task.name.clone(),
            task_fn: task.task_fn,
            enclosing: Some((index, point)),
            context: TaskContext::default(),
        });
        let context = launch.context;
        trace!(op = %id, launch = %index, %point, "recorded point task");
        self.ops.insert(
            id,
            Operation {
                id,
                context,
                kind,
                requirements: IndexMap::default(),
                claimed: LogicalEdges::default(),
                required: LogicalEdges::default(),
                instances: IndexMap::default(),
            },
        );
        Ok(())
    }

    /// Make `alias` a second name for operation `existing`.
    ///
    /// # Errors
    /// `Unknown` if `existing` is unrecorded, `Duplicate` if `alias` already
    /// names an operation.
    pub fn add_alias(&mut self, existing: OpId, alias: OpId) -> RecordResult {
        let existing = self.resolve(existing)?;
        if alias == existing {
            return Ok(());
        }
        self.ensure_fresh(alias)?;
        self.aliases.insert(alias, existing);
        Ok(())
    }

    /// Attach a requirement to an operation.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded operation, `Duplicate` for an occupied
    /// slot, `Malformed` if the slot violates the kind's arity.
    pub fn add_requirement(&mut self, op: OpId, req: Requirement) -> RecordResult {
        let op = self.resolve_mut(op)?;
        let malformed = |reason| {
            Err(RecordError::Malformed {
                entity: Entity::Requirement {
                    op: op.id,
                    index: req.index(),
                },
                reason,
            })
        };
        match &op.kind {
            OperationKind::Fence | OperationKind::Deletion => {
                return malformed("operation kind takes no requirements");
            }
            OperationKind::Mapping | OperationKind::Close if req.index() != 0 => {
                return malformed("operation kind takes a single requirement in slot 0");
            }
            kind if kind.is_point() => {
                return malformed("point tasks derive requirements from their launch");
            }
            _ => {}
        }
        if op.requirements.contains_key(&req.index()) {
            return Err(RecordError::Duplicate(Entity::Requirement {
                op: op.id,
                index: req.index(),
            }));
        }
        op.requirements.insert(req.index(), req);
        Ok(())
    }

    /// Append a field to requirement `index` of `op`.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded operation or requirement, `Malformed` for
    /// a field listed twice.
    pub fn add_requirement_field(&mut self, op: OpId, index: u32, field: FieldId) -> RecordResult {
        let op = self.resolve_mut(op)?;
        let entity = Entity::Requirement { op: op.id, index };
        let req = op
            .requirements
            .get_mut(&index)
            .ok_or(RecordError::Unknown(entity))?;
        if req.add_field(field) {
            Ok(())
        } else {
            Err(RecordError::Malformed {
                entity,
                reason: "field listed twice",
            })
        }
    }

    /// Record the region a point task's requirement `index` resolved to.
    ///
    /// The point's requirement is its launch's requirement retargeted at
    /// `node`. For a task that is not a point the record only confirms an
    /// existing requirement.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded operation or launch requirement,
    /// `Malformed` for a non-task or a confirmation naming another node,
    /// `Duplicate` if the point already has the requirement.
    pub fn add_point_requirement(
        &mut self,
        op: OpId,
        index: u32,
        node: IndexNodeId,
        tree_node: Option<TreeNodeKey>,
    ) -> RecordResult {
        let op = self.resolve(op)?;
        let entity = Entity::Requirement { op, index };
        let operation = &self.ops[&op];
        let OperationKind::SingleTask(task) = &operation.kind else {
            return Err(RecordError::Malformed {
                entity,
                reason: "only tasks have instance requirements",
            });
        };
        let Some((launch, _)) = task.enclosing else {
            return match operation.requirement(index) {
                Some(req) if req.node() == node => Ok(()),
                Some(_) => Err(RecordError::Malformed {
                    entity,
                    reason: "instance requirement names another region",
                }),
                None => Err(RecordError::Unknown(entity)),
            };
        };
        if operation.requirements.contains_key(&index) {
            return Err(RecordError::Duplicate(entity));
        }
        let derived = self.ops[&launch]
            .requirement(index)
            .ok_or(RecordError::Unknown(Entity::Requirement { op: launch, index }))?
            .for_point(node, tree_node);
        self.ops[&op].requirements.insert(index, derived);
        Ok(())
    }

    /// Record the instance mapped for requirement `index` of `op`.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded operation, `Duplicate` for a slot mapped
    /// twice, `Malformed` if the kind maps no instance in that slot.
    pub fn add_instance(&mut self, op: OpId, index: u32, key: InstanceKey) -> RecordResult {
        let op = self.resolve_mut(op)?;
        let entity = Entity::OperationInstance { op: op.id, index };
        let reason = match op.kind {
            OperationKind::IndexTask(_) | OperationKind::Fence | OperationKind::Deletion => {
                Some("operation kind maps no instances")
            }
            OperationKind::Mapping | OperationKind::Close if index != 0 => {
                Some("operation kind maps a single instance in slot 0")
            }
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(RecordError::Malformed { entity, reason });
        }
        if op.instances.contains_key(&index) {
            return Err(RecordError::Duplicate(entity));
        }
        op.instances.insert(index, key);
        Ok(())
    }

    /// Record a dependence the runtime claims to have enforced.
    ///
    /// Everything is validated before anything is mutated: on error the
    /// graph is unchanged. A dependence of an operation on itself is kept in
    /// the claimed set but adds no adjacency.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded operation, `Malformed` if the context is
    /// not a task enclosing both operations or the producer is a deletion.
    pub fn add_mapping_dependence(&mut self, dep: MappingDependence) -> RecordResult {
        let dep = MappingDependence {
            context: self.resolve(dep.context)?,
            producer: self.resolve(dep.producer)?,
            consumer: self.resolve(dep.consumer)?,
            ..dep
        };
        let malformed = |reason| {
            Err(RecordError::Malformed {
                entity: Entity::Operation(dep.context),
                reason,
            })
        };
        let Some(context) = self.ops[&dep.context].task_context() else {
            return malformed("only single tasks enclose operations");
        };
        if !context.children.contains(&dep.producer) || !context.children.contains(&dep.consumer) {
            return malformed("dependence between operations outside the context");
        }
        if matches!(self.ops[&dep.producer].kind, OperationKind::Deletion) {
            return malformed("a deletion cannot be depended on");
        }
        LogicalEdges::link(&mut self.ops, |op| &mut op.claimed, &dep);
        self.ops[&dep.context]
            .task_context_mut()
            .expect("OperationGraph::add_mapping_dependence: [1]")
            .claimed
            .push(dep);
        Ok(())
    }

    /// Look up an operation, following aliases.
    #[must_use]
    pub fn get(&self, id: OpId) -> Option<&Operation> {
        let id = self.aliases.get(&id).copied().unwrap_or(id);
        self.ops.get(&id)
    }

    /// Requirement `index` of `op`.
    #[must_use]
    pub fn requirement(&self, op: OpId, index: u32) -> Option<&Requirement> {
        self.get(op)?.requirement(index)
    }

    /// Instance mapped for requirement `index` of `op`.
    #[must_use]
    pub fn instance(&self, op: OpId, index: u32) -> Option<InstanceKey> {
        self.get(op)?.instances.get(&index).copied()
    }

    /// All operations in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.ops.values()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no operation was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations that actually execute on behalf of `op`: the points of an
    /// index launch, nothing for fences and deletions, the operation itself
    /// otherwise.
    #[must_use]
    pub fn participants(&self, op: OpId) -> Vec<OpId> {
        let Some(operation) = self.get(op) else {
            return Vec::new();
        };
        match &operation.kind {
            OperationKind::IndexTask(task) => task.points.iter().copied().collect(),
            OperationKind::Fence | OperationKind::Deletion => Vec::new(),
            _ => vec![operation.id],
        }
    }

    /// Whether a chain of claimed dependences leads from `from` back to
    /// `target`. Every operation reaches itself.
    ///
    /// Operations already in `marks` are not explored again.
    pub fn has_logical_path(&self, from: OpId, target: OpId, marks: &mut LogicalMarks) -> bool {
        let mut pending = vec![from];
        while let Some(op) = pending.pop() {
            if op == target {
                return true;
            }
            if !marks.mark(op) {
                continue;
            }
            if let Some(node) = self.ops.get(&op) {
                pending.extend(node.claimed.outgoing.iter().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        requirement::{Coherence, Privilege},
        types::{FieldSpaceId, IndexSpaceId, InstId, TreeId},
    };

    fn req(index: u32) -> Requirement {
        let mut r = Requirement::new(
            index,
            IndexNodeId::Space(IndexSpaceId(1)),
            FieldSpaceId(1),
            TreeId(1),
            None,
            Privilege::ReadWrite,
            Coherence::Exclusive,
        );
        r.add_field(FieldId(1));
        r
    }

    fn dep(producer: u64, consumer: u64) -> MappingDependence {
        MappingDependence {
            context: OpId(1),
            producer: OpId(producer),
            producer_req: 0,
            consumer: OpId(consumer),
            consumer_req: 0,
            kind: DependenceType::True,
        }
    }

    fn graph(children: u64) -> OperationGraph {
        let mut g = OperationGraph::new();
        g.begin_operation(None, OpId(1), OperationKind::single_task("top", TaskFnId(1)))
            .unwrap();
        for id in 2..2 + children {
            let kind = OperationKind::single_task("child", TaskFnId(2));
            g.begin_operation(Some(OpId(1)), OpId(id), kind).unwrap();
        }
        g
    }

    #[test]
    fn point_display() {
        assert_eq!(Point::new(&[1, 2]).unwrap().to_string(), "(1,2)");
        assert_eq!(Point::new(&[-4]).unwrap().coords(), &[-4]);
        assert!(Point::new(&[]).is_none());
        assert!(Point::new(&[1, 2, 3, 4]).is_none());
    }

    #[test]
    fn path_is_reflexive() {
        let g = graph(1);
        assert!(g.has_logical_path(OpId(2), OpId(2), &mut LogicalMarks::new()));
    }

    #[test]
    fn path_follows_outgoing_edges_only() {
        let mut g = graph(3);
        g.add_mapping_dependence(dep(2, 3)).unwrap();
        g.add_mapping_dependence(dep(3, 4)).unwrap();
        let mut marks = LogicalMarks::new();
        assert!(g.has_logical_path(OpId(4), OpId(2), &mut marks));
        marks.unmark_all();
        assert!(!g.has_logical_path(OpId(2), OpId(4), &mut marks));
        assert_eq!(g.get(OpId(2)).unwrap().claimed_edges().incoming()[0], OpId(3));
    }

    #[test]
    fn shared_ancestors_are_visited_once() {
        // 6 depends on 4 and 5, both depend on 3, which depends on 2.
        let mut g = graph(5);
        for (p, c) in [(2, 3), (3, 4), (3, 5), (4, 6), (5, 6)] {
            g.add_mapping_dependence(dep(p, c)).unwrap();
        }
        let mut marks = LogicalMarks::new();
        assert!(!g.has_logical_path(OpId(6), OpId(1), &mut marks));
        assert_eq!(marks.len(), 5);
        marks.unmark_all();
        assert!(marks.is_empty());
        assert!(g.has_logical_path(OpId(6), OpId(2), &mut marks));
    }

    #[test]
    fn invalid_dependences_leave_the_graph_untouched() {
        let mut g = graph(2);
        g.begin_operation(Some(OpId(1)), OpId(10), OperationKind::Deletion)
            .unwrap();
        assert!(g.add_mapping_dependence(dep(10, 2)).unwrap_err().is_fatal());
        assert_eq!(
            g.add_mapping_dependence(dep(2, 99)),
            Err(RecordError::Unknown(Entity::Operation(OpId(99))))
        );
        let mut outside = dep(2, 3);
        outside.context = OpId(2);
        assert!(g.add_mapping_dependence(outside).is_err());
        assert!(g.get(OpId(2)).unwrap().claimed_edges().incoming().is_empty());
        assert!(g.get(OpId(1)).unwrap().task_context().unwrap().claimed().is_empty());
    }

    #[test]
    fn self_dependence_is_claimed_without_adjacency() {
        let mut g = graph(1);
        g.add_mapping_dependence(dep(2, 2)).unwrap();
        assert_eq!(g.get(OpId(1)).unwrap().task_context().unwrap().claimed().len(), 1);
        assert!(g.get(OpId(2)).unwrap().claimed_edges().outgoing().is_empty());
    }

    #[test]
    fn arity_is_enforced_per_kind() {
        let mut g = graph(0);
        g.begin_operation(Some(OpId(1)), OpId(2), OperationKind::Mapping).unwrap();
        g.begin_operation(Some(OpId(1)), OpId(3), OperationKind::Fence).unwrap();
        g.add_requirement(OpId(2), req(0)).unwrap();
        assert!(g.add_requirement(OpId(2), req(1)).unwrap_err().is_fatal());
        assert!(g.add_requirement(OpId(3), req(0)).unwrap_err().is_fatal());
        assert_eq!(
            g.add_requirement(OpId(2), req(0)),
            Err(RecordError::Duplicate(Entity::Requirement { op: OpId(2), index: 0 }))
        );
        assert!(g.add_requirement_field(OpId(2), 0, FieldId(1)).is_err());
        g.add_requirement_field(OpId(2), 0, FieldId(2)).unwrap();
        assert_eq!(g.requirement(OpId(2), 0).unwrap().fields(), &[FieldId(1), FieldId(2)]);
        assert!(
            g.begin_operation(None, OpId(4), OperationKind::Copy)
                .unwrap_err()
                .is_fatal()
        );
    }

    #[test]
    fn points_derive_requirements_and_aliases_resolve() {
        let mut g = graph(0);
        let launch = OperationKind::index_task("launch", TaskFnId(3));
        g.begin_operation(Some(OpId(1)), OpId(2), launch).unwrap();
        g.add_requirement(OpId(2), req(0)).unwrap();
        g.add_point(OpId(2), OpId(20), Point::new(&[0]).unwrap()).unwrap();
        g.add_alias(OpId(20), OpId(21)).unwrap();

        assert!(g.add_requirement(OpId(21), req(0)).unwrap_err().is_fatal());
        let sub = IndexNodeId::Space(IndexSpaceId(5));
        g.add_point_requirement(OpId(21), 0, sub, None).unwrap();
        let derived = g.requirement(OpId(20), 0).unwrap();
        assert_eq!(derived.node(), sub);
        assert_eq!(derived.fields(), &[FieldId(1)]);
        assert_eq!(g.participants(OpId(2)), vec![OpId(20)]);
        assert_eq!(g.get(OpId(20)).unwrap().to_string(), "launch (UID 20) point (0)");
        assert_eq!(
            g.add_point_requirement(OpId(20), 1, sub, None),
            Err(RecordError::Unknown(Entity::Requirement { op: OpId(2), index: 1 }))
        );

        let key = InstanceKey { id: InstId(1), version: 0 };
        g.add_instance(OpId(21), 0, key).unwrap();
        assert_eq!(g.instance(OpId(20), 0), Some(key));
        assert!(g.add_instance(OpId(2), 0, key).unwrap_err().is_fatal());
    }
}
