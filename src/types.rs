use derive_more::{Display, From};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// `HashMap` type with fast hasher.
pub type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
/// `HashSet` type with fast hasher.
pub type HashSet<T> = _HashSet<T, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
///
/// Used wherever iteration order must follow recording order, which keeps
/// every report deterministic for a given trace.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
/// `IndexSet` type with fast hasher.
pub type IndexSet<T> = _IndexSet<T, FxBuildHasher>;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Display, From, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl core::fmt::LowerHex for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

id_type!(
    /// Identifier of an index space node.
    IndexSpaceId(u64)
);
id_type!(
    /// Identifier of an index partition node.
    IndexPartId(u64)
);
id_type!(
    /// Identifier of a field space.
    FieldSpaceId(u64)
);
id_type!(
    /// Identifier of a field inside a field space.
    FieldId(u32)
);
id_type!(
    /// Identifier of a region tree: one instantiation of an index tree with a
    /// field space.
    TreeId(u32)
);
id_type!(
    /// Unique identifier of an operation.
    OpId(u64)
);
id_type!(
    /// Identifier of the task function an operation launches.
    TaskFnId(u64)
);
id_type!(
    /// Identifier of an index-launch slice.
    SliceId(u64)
);
id_type!(
    /// Identifier of a processor.
    ProcId(u64)
);
id_type!(
    /// Identifier of a memory.
    MemId(u64)
);
id_type!(
    /// Identifier of a physical or reduction instance. The same id may be
    /// reused by the runtime, see [`InstanceKey`].
    InstId(u64)
);
id_type!(
    /// Identifier of a reduction operator.
    ReductionOpId(u32)
);
id_type!(
    /// Sequence number of a low-level copy, assigned in recording order.
    CopyId(u32)
);

/// Identity of one version of an instance.
///
/// Versions start at zero and increment each time the runtime re-creates an
/// instance under an id that was already recorded.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{id:#x}v{version}")]
pub struct InstanceKey {
    /// Instance id as reported by the runtime.
    pub id: InstId,
    /// Version of the id.
    pub version: u32,
}

/// Reference to a node of the index tree.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexNodeId {
    /// An index space.
    #[display("index space {_0}")]
    Space(IndexSpaceId),
    /// An index partition.
    #[display("index partition {_0}")]
    Partition(IndexPartId),
}

impl IndexNodeId {
    /// Whether the node names a region (index space) rather than a partition.
    #[must_use]
    pub const fn is_region(self) -> bool {
        matches!(self, Self::Space(_))
    }
}

/// Key of a region or partition tree node: the index node it materializes and
/// the tree it belongs to. The field space is implied by the tree.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{index} in tree {tree}")]
pub struct TreeNodeKey {
    /// Materialized index node.
    pub index: IndexNodeId,
    /// Owning region tree.
    pub tree: TreeId,
}
