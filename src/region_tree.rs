use crate::{
    error::{Entity, RecordError, RecordResult},
    types::{
        FieldId, FieldSpaceId, HashMap, IndexMap, IndexNodeId, IndexPartId, IndexSet, IndexSpaceId,
        TreeId, TreeNodeKey,
    },
};
use tracing::trace;

/// A node of the index tree naming a set of points.
#[must_use]
#[derive(Debug, Clone)]
pub struct IndexSpaceNode {
    id: IndexSpaceId,
    parent: Option<IndexPartId>,
    color: u64,
    depth: u32,
    children: IndexMap<u64, IndexPartId>,
    /// Region trees in which this node has been materialized.
    trees: IndexSet<TreeId>,
    name: Option<String>,
}

impl IndexSpaceNode {
    /// Identifier of the node.
    #[must_use]
    pub const fn id(&self) -> IndexSpaceId {
        self.id
    }

    /// Parent partition, `None` for a root.
    #[must_use]
    pub const fn parent(&self) -> Option<IndexPartId> {
        self.parent
    }

    /// Color under the parent partition (zero for roots).
    #[must_use]
    pub const fn color(&self) -> u64 {
        self.color
    }

    /// Distance from the root of the index tree.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Child partitions keyed by color, in creation order.
    #[must_use]
    pub const fn children(&self) -> &IndexMap<u64, IndexPartId> {
        &self.children
    }

    /// Display name, if one was recorded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A partition of an index space into colored subspaces.
#[must_use]
#[derive(Debug, Clone)]
pub struct IndexPartNode {
    id: IndexPartId,
    parent: IndexSpaceId,
    color: u64,
    depth: u32,
    disjoint: bool,
    children: IndexMap<u64, IndexSpaceId>,
    trees: IndexSet<TreeId>,
    name: Option<String>,
}

impl IndexPartNode {
    /// Identifier of the node.
    #[must_use]
    pub const fn id(&self) -> IndexPartId {
        self.id
    }

    /// Partitioned index space.
    #[must_use]
    pub const fn parent(&self) -> IndexSpaceId {
        self.parent
    }

    /// Color under the parent space.
    #[must_use]
    pub const fn color(&self) -> u64 {
        self.color
    }

    /// Distance from the root of the index tree.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether the subspaces are statically known not to overlap.
    #[must_use]
    pub const fn is_disjoint(&self) -> bool {
        self.disjoint
    }

    /// Subspaces keyed by color, in creation order.
    #[must_use]
    pub const fn children(&self) -> &IndexMap<u64, IndexSpaceId> {
        &self.children
    }

    /// Display name, if one was recorded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A set of fields with optional display names.
#[must_use]
#[derive(Debug, Clone)]
pub struct FieldSpaceNode {
    id: FieldSpaceId,
    fields: IndexSet<FieldId>,
    field_names: HashMap<FieldId, String>,
    name: Option<String>,
}

impl FieldSpaceNode {
    /// Identifier of the field space.
    #[must_use]
    pub const fn id(&self) -> FieldSpaceId {
        self.id
    }

    /// Fields in allocation order.
    #[must_use]
    pub const fn fields(&self) -> &IndexSet<FieldId> {
        &self.fields
    }

    /// Display name of the field space.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Display name of one field.
    #[must_use]
    pub fn field_name(&self, field: FieldId) -> Option<&str> {
        self.field_names.get(&field).map(String::as_str)
    }
}

/// Root binding of one region tree.
#[must_use]
#[derive(Debug, Clone, Copy)]
pub struct RegionTree {
    root: IndexSpaceId,
    field_space: FieldSpaceId,
}

impl RegionTree {
    /// Index space the tree was created from.
    #[must_use]
    pub const fn root(&self) -> IndexSpaceId {
        self.root
    }

    /// Field space of every node in the tree.
    #[must_use]
    pub const fn field_space(&self) -> FieldSpaceId {
        self.field_space
    }
}

/// Materialization of an index node inside one region tree. A region node
/// when it materializes an index space, a partition node otherwise.
#[must_use]
#[derive(Debug, Clone)]
pub struct RegionTreeNode {
    key: TreeNodeKey,
    field_space: FieldSpaceId,
    parent: Option<IndexNodeId>,
    children: Vec<IndexNodeId>,
    name: Option<String>,
}

impl RegionTreeNode {
    /// Arena key of the node.
    pub const fn key(&self) -> TreeNodeKey {
        self.key
    }

    /// Field space of the owning tree.
    #[must_use]
    pub const fn field_space(&self) -> FieldSpaceId {
        self.field_space
    }

    /// Whether this is a region (rather than a partition) node.
    #[must_use]
    pub const fn is_region(&self) -> bool {
        self.key.index.is_region()
    }

    /// Parent node in the same tree.
    #[must_use]
    pub fn parent(&self) -> Option<TreeNodeKey> {
        self.parent.map(|index| TreeNodeKey {
            index,
            tree: self.key.tree,
        })
    }

    /// Children in the same tree, in instantiation order.
    pub fn children(&self) -> impl Iterator<Item = TreeNodeKey> + '_ {
        self.children.iter().map(|&index| TreeNodeKey {
            index,
            tree: self.key.tree,
        })
    }

    /// Display name, if one was recorded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Index trees, field spaces and their region-tree instantiations.
///
/// Every node lives in an arena keyed by its stable id; links between nodes
/// are ids, never references. Region-tree nodes are keyed by
/// `(index node, tree)` and mirror the index tree exactly: whenever an index
/// node is created under a parent that is already materialized in some
/// trees, the new node is materialized in those trees too.
#[must_use]
#[derive(Debug, Default, Clone)]
pub struct RegionTreeModel {
    spaces: IndexMap<IndexSpaceId, IndexSpaceNode>,
    partitions: IndexMap<IndexPartId, IndexPartNode>,
    field_spaces: IndexMap<FieldSpaceId, FieldSpaceNode>,
    trees: IndexMap<TreeId, RegionTree>,
    tree_nodes: IndexMap<TreeNodeKey, RegionTreeNode>,
}

impl RegionTreeModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a root index space.
    ///
    /// # Errors
    /// `Duplicate` if the id already exists.
    pub fn create_index_space(&mut self, id: IndexSpaceId) -> RecordResult {
        if self.spaces.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::IndexSpace(id)));
        }
        self.spaces.insert(
            id,
            IndexSpaceNode {
                id,
                parent: None,
                color: 0,
                depth: 0,
                children: IndexMap::default(),
                trees: IndexSet::default(),
                name: None,
            },
        );
        Ok(())
    }

    /// Record a partition of `parent` with the given color.
    ///
    /// The partition is materialized in every region tree that already
    /// contains `parent`.
    ///
    /// # Errors
    /// `Duplicate` if the id exists or the color is taken, `Unknown` if the
    /// parent has not been recorded.
    pub fn create_index_partition(
        &mut self,
        parent: IndexSpaceId,
        id: IndexPartId,
        disjoint: bool,
        color: u64,
    ) -> RecordResult {
        if self.partitions.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::IndexPartition(id)));
        }
        let parent_node = self
            .spaces
            .get_mut(&parent)
            .ok_or(RecordError::Unknown(Entity::IndexSpace(parent)))?;
        if parent_node.children.contains_key(&color) {
            return Err(RecordError::Duplicate(Entity::Color {
                parent: IndexNodeId::Space(parent),
                color,
            }));
        }
        parent_node.children.insert(color, id);
        let depth = parent_node.depth + 1;
        let parent_trees: Vec<TreeId> = parent_node.trees.iter().copied().collect();
        self.partitions.insert(
            id,
            IndexPartNode {
                id,
                parent,
                color,
                depth,
                disjoint,
                children: IndexMap::default(),
                trees: IndexSet::default(),
                name: None,
            },
        );
        for tree in parent_trees {
            self.instantiate(IndexNodeId::Partition(id), Some(IndexNodeId::Space(parent)), tree);
        }
        Ok(())
    }

    /// Record a subspace of partition `parent` with the given color.
    ///
    /// # Errors
    /// `Duplicate` if the id exists or the color is taken, `Unknown` if the
    /// parent has not been recorded.
    pub fn create_index_subspace(
        &mut self,
        parent: IndexPartId,
        id: IndexSpaceId,
        color: u64,
    ) -> RecordResult {
        if self.spaces.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::IndexSpace(id)));
        }
        let parent_node = self
            .partitions
            .get_mut(&parent)
            .ok_or(RecordError::Unknown(Entity::IndexPartition(parent)))?;
        if parent_node.children.contains_key(&color) {
            return Err(RecordError::Duplicate(Entity::Color {
                parent: IndexNodeId::Partition(parent),
                color,
            }));
        }
        parent_node.children.insert(color, id);
        let depth = parent_node.depth + 1;
        let parent_trees: Vec<TreeId> = parent_node.trees.iter().copied().collect();
        self.spaces.insert(
            id,
            IndexSpaceNode {
                id,
                parent: Some(parent),
                color,
                depth,
                children: IndexMap::default(),
                trees: IndexSet::default(),
                name: None,
            },
        );
        for tree in parent_trees {
            self.instantiate(IndexNodeId::Space(id), Some(IndexNodeId::Partition(parent)), tree);
        }
        Ok(())
    }

    /// Record an empty field space.
    ///
    /// # Errors
    /// `Duplicate` if the id already exists.
    pub fn create_field_space(&mut self, id: FieldSpaceId) -> RecordResult {
        if self.field_spaces.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::FieldSpace(id)));
        }
        self.field_spaces.insert(
            id,
            FieldSpaceNode {
                id,
                fields: IndexSet::default(),
                field_names: HashMap::default(),
                name: None,
            },
        );
        Ok(())
    }

    /// Record a field allocation.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded field space, `Duplicate` if the field was
    /// already allocated.
    pub fn create_field(&mut self, space: FieldSpaceId, field: FieldId) -> RecordResult {
        let node = self
            .field_spaces
            .get_mut(&space)
            .ok_or(RecordError::Unknown(Entity::FieldSpace(space)))?;
        if !node.fields.insert(field) {
            return Err(RecordError::Duplicate(Entity::Field { space, field }));
        }
        Ok(())
    }

    /// Record a region tree rooted at `root` over `field_space`, materializing
    /// the whole index subtree that exists at this point.
    ///
    /// # Errors
    /// `Duplicate` if the tree id exists, `Unknown` for an unrecorded root or
    /// field space.
    pub fn create_region(
        &mut self,
        root: IndexSpaceId,
        field_space: FieldSpaceId,
        tree: TreeId,
    ) -> RecordResult {
        if self.trees.contains_key(&tree) {
            return Err(RecordError::Duplicate(Entity::RegionTree(tree)));
        }
        if !self.spaces.contains_key(&root) {
            return Err(RecordError::Unknown(Entity::IndexSpace(root)));
        }
        if !self.field_spaces.contains_key(&field_space) {
            return Err(RecordError::Unknown(Entity::FieldSpace(field_space)));
        }
        self.trees.insert(tree, RegionTree { root, field_space });
        self.instantiate(IndexNodeId::Space(root), None, tree);
        Ok(())
    }

    /// Materialize `index` and its whole existing subtree in `tree`.
    fn instantiate(&mut self, index: IndexNodeId, parent: Option<IndexNodeId>, tree: TreeId) {
        let field_space = self.trees[&tree].field_space;
        let mut pending = vec![(index, parent)];
        while let Some((index, parent)) = pending.pop() {
            let key = TreeNodeKey { index, tree };
            let children: Vec<IndexNodeId> = match index {
                IndexNodeId::Space(id) => {
                    let node = self.spaces.get_mut(&id).expect("RegionTreeModel::instantiate: [1]");
                    let inserted = node.trees.insert(tree);
                    assert!(inserted, "RegionTreeModel::instantiate: [2]");
                    node.children.values().copied().map(IndexNodeId::Partition).collect()
                }
                IndexNodeId::Partition(id) => {
                    let node = self
                        .partitions
                        .get_mut(&id)
                        .expect("RegionTreeModel::instantiate: [3]");
                    let inserted = node.trees.insert(tree);
                    assert!(inserted, "RegionTreeModel::instantiate: [4]");
                    node.children.values().copied().map(IndexNodeId::Space).collect()
                }
            };
            if let Some(parent) = parent {
                self.tree_nodes
                    .get_mut(&TreeNodeKey { index: parent, tree })
                    .expect("RegionTreeModel::instantiate: [5]")
                    .children
                    .push(index);
            }
            trace!(%key, "materialized region tree node");
            let previous = self.tree_nodes.insert(
                key,
                RegionTreeNode {
                    key,
                    field_space,
                    parent,
                    children: Vec::with_capacity(children.len()),
                    name: None,
                },
            );
            assert!(previous.is_none(), "RegionTreeModel::instantiate: [6]");
            // Reverse so that children are materialized in creation order.
            pending.extend(children.into_iter().rev().map(|child| (child, Some(index))));
        }
    }

    /// Attach a display name to an index space.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded index space.
    pub fn name_index_space(&mut self, id: IndexSpaceId, name: impl Into<String>) -> RecordResult {
        let node = self
            .spaces
            .get_mut(&id)
            .ok_or(RecordError::Unknown(Entity::IndexSpace(id)))?;
        node.name = Some(name.into());
        Ok(())
    }

    /// Attach a display name to an index partition.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded partition.
    pub fn name_index_partition(&mut self, id: IndexPartId, name: impl Into<String>) -> RecordResult {
        let node = self
            .partitions
            .get_mut(&id)
            .ok_or(RecordError::Unknown(Entity::IndexPartition(id)))?;
        node.name = Some(name.into());
        Ok(())
    }

    /// Attach a display name to a field space.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded field space.
    pub fn name_field_space(&mut self, id: FieldSpaceId, name: impl Into<String>) -> RecordResult {
        let node = self
            .field_spaces
            .get_mut(&id)
            .ok_or(RecordError::Unknown(Entity::FieldSpace(id)))?;
        node.name = Some(name.into());
        Ok(())
    }

    /// Attach a display name to a field.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded field space or a field it does not
    /// define.
    pub fn name_field(
        &mut self,
        space: FieldSpaceId,
        field: FieldId,
        name: impl Into<String>,
    ) -> RecordResult {
        let node = self
            .field_spaces
            .get_mut(&space)
            .ok_or(RecordError::Unknown(Entity::FieldSpace(space)))?;
        if !node.fields.contains(&field) {
            return Err(RecordError::Unknown(Entity::Field { space, field }));
        }
        node.field_names.insert(field, name.into());
        Ok(())
    }

    /// Attach a display name to the node of `tree` materializing `index`
    /// over `field_space`.
    ///
    /// # Errors
    /// `Unknown` if the tree, the index node or the field space is missing,
    /// or if the tree holds no such node.
    pub fn name_tree_node(
        &mut self,
        tree: TreeId,
        index: IndexNodeId,
        field_space: FieldSpaceId,
        name: impl Into<String>,
    ) -> RecordResult {
        if !self.trees.contains_key(&tree) {
            return Err(RecordError::Unknown(Entity::RegionTree(tree)));
        }
        if !self.contains(index) {
            return Err(match index {
                IndexNodeId::Space(id) => RecordError::Unknown(Entity::IndexSpace(id)),
                IndexNodeId::Partition(id) => RecordError::Unknown(Entity::IndexPartition(id)),
            });
        }
        if !self.field_spaces.contains_key(&field_space) {
            return Err(RecordError::Unknown(Entity::FieldSpace(field_space)));
        }
        let key = self
            .find_node(tree, index, field_space)
            .ok_or(RecordError::Unknown(Entity::TreeNode { index, tree }))?;
        self.tree_nodes
            .get_mut(&key)
            .expect("RegionTreeModel::name_tree_node: [1]")
            .name = Some(name.into());
        Ok(())
    }

    /// Locate the node of `tree` materializing `index` over `field_space` by
    /// searching the tree from its root.
    #[must_use]
    pub fn find_node(
        &self,
        tree: TreeId,
        index: IndexNodeId,
        field_space: FieldSpaceId,
    ) -> Option<TreeNodeKey> {
        let root = self.trees.get(&tree)?;
        let mut pending = vec![TreeNodeKey {
            index: IndexNodeId::Space(root.root),
            tree,
        }];
        while let Some(key) = pending.pop() {
            let node = &self.tree_nodes[&key];
            if key.index == index && node.field_space == field_space {
                return Some(key);
            }
            pending.extend(node.children());
        }
        None
    }

    /// Whether the two index nodes may name overlapping points.
    ///
    /// Both nodes are raised to the same depth; if one ends up on the other
    /// it is its ancestor and they alias. Otherwise both walk up in lockstep
    /// to the lowest common ancestor: under a region the nodes came from
    /// different partitions and are assumed to alias, under a partition they
    /// alias unless the partition is disjoint. Nodes of unrelated trees never
    /// alias. Reporting false aliasing is always safe, false disjointness
    /// never is.
    ///
    /// # Panics
    /// If either node has not been recorded.
    #[must_use]
    pub fn is_aliased(&self, a: IndexNodeId, b: IndexNodeId) -> bool {
        let (orig_a, orig_b) = (a, b);
        let (mut a, mut b) = (a, b);
        while self.depth(a) > self.depth(b) {
            a = self.parent(a).expect("RegionTreeModel::is_aliased: [1]");
        }
        while self.depth(b) > self.depth(a) {
            b = self.parent(b).expect("RegionTreeModel::is_aliased: [2]");
        }
        if a == orig_b || b == orig_a {
            return true;
        }
        while a != b {
            let (Some(parent_a), Some(parent_b)) = (self.parent(a), self.parent(b)) else {
                return false;
            };
            a = parent_a;
            b = parent_b;
        }
        match a {
            IndexNodeId::Space(_) => true,
            IndexNodeId::Partition(id) => !self.partitions[&id].disjoint,
        }
    }

    /// Whether an index node has been recorded.
    #[must_use]
    pub fn contains(&self, index: IndexNodeId) -> bool {
        match index {
            IndexNodeId::Space(id) => self.spaces.contains_key(&id),
            IndexNodeId::Partition(id) => self.partitions.contains_key(&id),
        }
    }

    /// Depth of an index node.
    ///
    /// # Panics
    /// If the node has not been recorded.
    #[must_use]
    pub fn depth(&self, index: IndexNodeId) -> u32 {
        match index {
            IndexNodeId::Space(id) => self.spaces[&id].depth,
            IndexNodeId::Partition(id) => self.partitions[&id].depth,
        }
    }

    /// Parent of an index node.
    ///
    /// # Panics
    /// If the node has not been recorded.
    #[must_use]
    pub fn parent(&self, index: IndexNodeId) -> Option<IndexNodeId> {
        match index {
            IndexNodeId::Space(id) => self.spaces[&id].parent.map(IndexNodeId::Partition),
            IndexNodeId::Partition(id) => Some(IndexNodeId::Space(self.partitions[&id].parent)),
        }
    }

    /// Look up an index space.
    #[must_use]
    pub fn index_space(&self, id: IndexSpaceId) -> Option<&IndexSpaceNode> {
        self.spaces.get(&id)
    }

    /// Look up an index partition.
    #[must_use]
    pub fn index_partition(&self, id: IndexPartId) -> Option<&IndexPartNode> {
        self.partitions.get(&id)
    }

    /// Look up a field space.
    #[must_use]
    pub fn field_space(&self, id: FieldSpaceId) -> Option<&FieldSpaceNode> {
        self.field_spaces.get(&id)
    }

    /// Look up a region tree.
    #[must_use]
    pub fn tree(&self, id: TreeId) -> Option<&RegionTree> {
        self.trees.get(&id)
    }

    /// Look up a region or partition tree node.
    #[must_use]
    pub fn tree_node(&self, key: TreeNodeKey) -> Option<&RegionTreeNode> {
        self.tree_nodes.get(&key)
    }

    /// Trees in which an index node is materialized.
    pub fn trees_of(&self, index: IndexNodeId) -> impl Iterator<Item = TreeId> + '_ {
        let trees = match index {
            IndexNodeId::Space(id) => self.spaces.get(&id).map(|node| &node.trees),
            IndexNodeId::Partition(id) => self.partitions.get(&id).map(|node| &node.trees),
        };
        trees.into_iter().flatten().copied()
    }

    /// All recorded region trees in creation order.
    pub fn trees(&self) -> impl Iterator<Item = (TreeId, &RegionTree)> + '_ {
        self.trees.iter().map(|(&id, tree)| (id, tree))
    }
}
