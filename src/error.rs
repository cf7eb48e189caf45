use crate::{
    event::EventHandle,
    types::{
        FieldId, FieldSpaceId, IndexNodeId, IndexPartId, IndexSpaceId, InstId, MemId, OpId, ProcId,
        SliceId, TreeId,
    },
};
use derive_more::Display;
use thiserror::Error;

/// Something a trace record can define or reference.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Entity {
    /// A processor or utility processor.
    #[display("processor {_0:#x}")]
    Processor(ProcId),
    /// A memory.
    #[display("memory {_0:#x}")]
    Memory(MemId),
    /// An index space.
    #[display("index space {_0}")]
    IndexSpace(IndexSpaceId),
    /// An index partition.
    #[display("index partition {_0}")]
    IndexPartition(IndexPartId),
    /// A child of an index node with the given color.
    #[display("color {color} under {parent}")]
    Color {
        /// Parent node.
        parent: IndexNodeId,
        /// Color of the child.
        color: u64,
    },
    /// A field space.
    #[display("field space {_0}")]
    FieldSpace(FieldSpaceId),
    /// A field of a field space.
    #[display("field {field} of field space {space}")]
    Field {
        /// Owning field space.
        space: FieldSpaceId,
        /// Field id.
        field: FieldId,
    },
    /// A region tree.
    #[display("region tree {_0}")]
    RegionTree(TreeId),
    /// A node of a region tree.
    #[display("{index} in region tree {tree}")]
    TreeNode {
        /// Index node that should be materialized.
        index: IndexNodeId,
        /// Region tree.
        tree: TreeId,
    },
    /// An operation.
    #[display("operation {_0}")]
    Operation(OpId),
    /// A requirement slot of an operation.
    #[display("requirement {index} of operation {op}")]
    Requirement {
        /// Owning operation.
        op: OpId,
        /// Requirement slot.
        index: u32,
    },
    /// The start/terminate events of an operation.
    #[display("events of operation {_0}")]
    OperationEvents(OpId),
    /// An instance slot of an operation.
    #[display("instance for requirement {index} of operation {op}")]
    OperationInstance {
        /// Owning operation.
        op: OpId,
        /// Requirement slot.
        index: u32,
    },
    /// An index-launch slice.
    #[display("slice {_0}")]
    Slice(SliceId),
    /// An instance.
    #[display("instance {_0:#x}")]
    Instance(InstId),
    /// An event or a phase-barrier generation.
    #[display("{_0}")]
    Event(EventHandle),
    /// A phase barrier, all generations.
    #[display("phase barrier {_0:#x}")]
    PhaseBarrier(u64),
    /// A low-level copy identified by its terminate event.
    #[display("copy terminating at {_0}")]
    CopyByTerminator(EventHandle),
}

/// Error returned by a `TraceState` record call.
///
/// Every variant is classified by [`RecordError::is_fatal`]: recoverable
/// errors leave the model untouched so a tolerant ingester may retry the
/// record later or skip it; fatal errors halt ingestion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordError {
    /// The record references an entity that has not been recorded yet.
    #[error("{0} has not been recorded")]
    Unknown(Entity),
    /// An identity-defining record was seen twice.
    #[error("{0} was already recorded")]
    Duplicate(Entity),
    /// The record contradicts an invariant of the model.
    #[error("malformed record for {entity}: {reason}")]
    Malformed {
        /// Entity the record was about.
        entity: Entity,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// An earlier record failed fatally; the trace is no longer ingested.
    #[error("ingestion halted after a fatal record error")]
    Halted,
}

impl RecordError {
    /// Whether ingestion must stop after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Result of a record call.
pub type RecordResult<T = ()> = Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_references_are_recoverable() {
        assert!(!RecordError::Unknown(Entity::Operation(OpId(3))).is_fatal());
        assert!(RecordError::Duplicate(Entity::Operation(OpId(3))).is_fatal());
        assert!(RecordError::Halted.is_fatal());
        assert!(
            RecordError::Malformed {
                entity: Entity::Slice(SliceId(1)),
                reason: "slice chain contains a cycle",
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_name_the_entity() {
        let err = RecordError::Unknown(Entity::Field {
            space: FieldSpaceId(2),
            field: FieldId(7),
        });
        assert_eq!(err.to_string(), "field 7 of field space 2 has not been recorded");
        let err = RecordError::Duplicate(Entity::Memory(MemId(0x1e)));
        assert_eq!(err.to_string(), "memory 0x1e was already recorded");
    }
}
