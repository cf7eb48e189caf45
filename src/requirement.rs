use crate::{
    types::{FieldId, FieldSpaceId, IndexNodeId, ReductionOpId, TreeId, TreeNodeKey},
    utils::FieldRanges,
};
use core::fmt;

/// Access mode of a requirement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Privilege {
    /// No access; behaves as read-only for dependence purposes.
    #[display("NO ACCESS")]
    NoAccess,
    /// Reads only.
    #[display("READ-ONLY")]
    ReadOnly,
    /// Reads and writes.
    #[display("READ-WRITE")]
    ReadWrite,
    /// Writes without reading the previous contents.
    #[display("WRITE-ONLY")]
    WriteOnly,
    /// Folds values with the given reduction operator.
    #[display("REDUCE with Reduction Op {_0}")]
    Reduce(ReductionOpId),
}

impl Privilege {
    /// Decode the runtime's privilege bits. `READ_WRITE` is the union of the
    /// read, write and reduce bits, so it has to be matched first.
    #[must_use]
    pub const fn from_raw(bits: u32, redop: ReductionOpId) -> Option<Self> {
        match bits {
            0x0 => Some(Self::NoAccess),
            0x1 => Some(Self::ReadOnly),
            0x7 => Some(Self::ReadWrite),
            0x2 => Some(Self::WriteOnly),
            0x4 => Some(Self::Reduce(redop)),
            _ => None,
        }
    }

    /// Read-only or no access.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::NoAccess | Self::ReadOnly)
    }

    /// Any form of write, including reductions.
    #[must_use]
    pub const fn has_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly | Self::Reduce(_))
    }

    /// Write-only.
    #[must_use]
    pub const fn is_write_only(self) -> bool {
        matches!(self, Self::WriteOnly)
    }

    /// Reduction, with its operator.
    #[must_use]
    pub const fn reduction(self) -> Option<ReductionOpId> {
        match self {
            Self::Reduce(op) => Some(op),
            _ => None,
        }
    }

    /// Abbreviation used in compact requirement summaries.
    fn abbrev(self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAccess => f.write_str("NA"),
            Self::ReadOnly => f.write_str("RO"),
            Self::ReadWrite => f.write_str("RW"),
            Self::WriteOnly => f.write_str("WO"),
            Self::Reduce(op) => write!(f, "Red{op}-"),
        }
    }
}

/// Isolation mode of a requirement, strongest first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum Coherence {
    /// Accesses must be totally ordered.
    #[display("EXCLUSIVE")]
    Exclusive,
    /// Accesses may run in any order but not concurrently.
    #[display("ATOMIC")]
    Atomic,
    /// Accesses may run concurrently and observe each other.
    #[display("SIMULTANEOUS")]
    Simultaneous,
    /// No ordering guarantees.
    #[display("RELAXED")]
    Relaxed,
}

impl Coherence {
    /// Decode the runtime's coherence code.
    #[must_use]
    pub const fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Exclusive),
            1 => Some(Self::Atomic),
            2 => Some(Self::Simultaneous),
            3 => Some(Self::Relaxed),
            _ => None,
        }
    }

    const fn abbrev(self) -> char {
        match self {
            Self::Exclusive => 'E',
            Self::Atomic => 'A',
            Self::Simultaneous => 'S',
            Self::Relaxed => 'R',
        }
    }
}

/// An access descriptor: which part of which region tree an operation
/// touches, for which fields, and how.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    index: u32,
    node: IndexNodeId,
    field_space: FieldSpaceId,
    tree: TreeId,
    tree_node: Option<TreeNodeKey>,
    privilege: Privilege,
    coherence: Coherence,
    fields: Vec<FieldId>,
}

impl Requirement {
    /// Create a requirement with no fields yet.
    ///
    /// `tree_node` is the resolved region-tree node, `None` when the trace
    /// names a node the tree does not contain.
    pub const fn new(
        index: u32,
        node: IndexNodeId,
        field_space: FieldSpaceId,
        tree: TreeId,
        tree_node: Option<TreeNodeKey>,
        privilege: Privilege,
        coherence: Coherence,
    ) -> Self {
        Self {
            index,
            node,
            field_space,
            tree,
            tree_node,
            privilege,
            coherence,
            fields: Vec::new(),
        }
    }

    /// Copy of this requirement retargeted at a subregion, as seen by one
    /// point of an index launch.
    pub fn for_point(&self, node: IndexNodeId, tree_node: Option<TreeNodeKey>) -> Self {
        Self {
            node,
            tree_node,
            ..self.clone()
        }
    }

    /// Append a field. Returns `false` if the field is already listed.
    pub fn add_field(&mut self, field: FieldId) -> bool {
        if self.fields.contains(&field) {
            return false;
        }
        self.fields.push(field);
        true
    }

    /// Requirement slot within the owning operation.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Whether the requirement names a region rather than a partition.
    #[must_use]
    pub const fn is_region(&self) -> bool {
        self.node.is_region()
    }

    /// Named index node.
    #[must_use]
    pub const fn node(&self) -> IndexNodeId {
        self.node
    }

    /// Field space of the region tree.
    #[must_use]
    pub const fn field_space(&self) -> FieldSpaceId {
        self.field_space
    }

    /// Region tree id.
    #[must_use]
    pub const fn tree(&self) -> TreeId {
        self.tree
    }

    /// Resolved region-tree node.
    #[must_use]
    pub const fn tree_node(&self) -> Option<TreeNodeKey> {
        self.tree_node
    }

    /// Access mode.
    #[must_use]
    pub const fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// Isolation mode.
    #[must_use]
    pub const fn coherence(&self) -> Coherence {
        self.coherence
    }

    /// Fields in recording order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Position of a field in the field list.
    #[must_use]
    pub fn field_position(&self, field: FieldId) -> Option<usize> {
        self.fields.iter().position(|&f| f == field)
    }

    /// Whether the two requirements share at least one field.
    #[must_use]
    pub fn overlaps_fields(&self, other: &Self) -> bool {
        self.fields.iter().any(|f| other.fields.contains(f))
    }

    /// Fields present in both requirements, in `self`'s order.
    pub fn shared_fields<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = FieldId> + 'a {
        self.fields
            .iter()
            .copied()
            .filter(|f| other.fields.contains(f))
    }

    /// Compact one-line summary, e.g. `RW-E {index space 3,1,2} fields 1~2`.
    #[must_use]
    pub fn summary(&self) -> Summary<'_> {
        Summary(self)
    }
}

/// Multi-line description of a requirement used in diagnostics.
impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_region() { "Region" } else { "Partition" };
        let id = match self.node {
            IndexNodeId::Space(id) => id.0,
            IndexNodeId::Partition(id) => id.0,
        };
        writeln!(
            f,
            "Logical {kind} Requirement ({id:#x},{},{})",
            self.field_space, self.tree
        )?;
        let fields: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
        writeln!(f, "  Fields: {}", fields.join(", "))?;
        writeln!(f, "  Privilege: {}", self.privilege)?;
        write!(f, "  Coherence: {}", self.coherence)
    }
}

/// See [`Requirement::summary`].
#[derive(Debug, Clone, Copy)]
pub struct Summary<'a>(&'a Requirement);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let req = self.0;
        req.privilege.abbrev(f)?;
        write!(
            f,
            "{} {{{},{},{}}} fields {}",
            req.coherence.abbrev(),
            req.node,
            req.field_space,
            req.tree,
            req.fields.to_ranges()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexSpaceId;

    fn req(privilege: Privilege) -> Requirement {
        Requirement::new(
            0,
            IndexNodeId::Space(IndexSpaceId(0x1f)),
            FieldSpaceId(2),
            TreeId(3),
            None,
            privilege,
            Coherence::Exclusive,
        )
    }

    #[test]
    fn privilege_bits_decode() {
        assert_eq!(Privilege::from_raw(7, ReductionOpId(0)), Some(Privilege::ReadWrite));
        assert_eq!(
            Privilege::from_raw(4, ReductionOpId(5)),
            Some(Privilege::Reduce(ReductionOpId(5)))
        );
        assert_eq!(Privilege::from_raw(3, ReductionOpId(0)), None);
        assert!(Privilege::NoAccess.is_read_only());
        assert!(Privilege::Reduce(ReductionOpId(1)).has_write());
        assert!(!Privilege::ReadOnly.has_write());
        assert_eq!(Privilege::NoAccess.to_string(), "NO ACCESS");
        assert_eq!(Privilege::WriteOnly.to_string(), "WRITE-ONLY");
        assert_eq!(
            Privilege::Reduce(ReductionOpId(3)).to_string(),
            "REDUCE with Reduction Op 3"
        );
        assert_eq!(Coherence::from_raw(2), Some(Coherence::Simultaneous));
        assert_eq!(Coherence::from_raw(4), None);
    }

    #[test]
    fn fields_are_unique_and_ordered() {
        let mut r = req(Privilege::ReadOnly);
        assert!(r.add_field(FieldId(4)));
        assert!(r.add_field(FieldId(1)));
        assert!(!r.add_field(FieldId(4)));
        assert_eq!(r.fields(), &[FieldId(4), FieldId(1)]);
        assert_eq!(r.field_position(FieldId(1)), Some(1));

        let mut other = req(Privilege::ReadWrite);
        other.add_field(FieldId(1));
        assert!(r.overlaps_fields(&other));
        assert_eq!(r.shared_fields(&other).collect::<Vec<_>>(), vec![FieldId(1)]);
        other = req(Privilege::ReadWrite);
        other.add_field(FieldId(9));
        assert!(!r.overlaps_fields(&other));
    }

    #[test]
    fn display_lists_access_details() {
        let mut r = req(Privilege::Reduce(ReductionOpId(5)));
        r.add_field(FieldId(1));
        r.add_field(FieldId(2));
        assert_eq!(
            r.to_string(),
            "Logical Region Requirement (0x1f,2,3)\n  Fields: 1, 2\n  \
             Privilege: REDUCE with Reduction Op 5\n  Coherence: EXCLUSIVE"
        );
        assert_eq!(
            r.summary().to_string(),
            "Red5-E {index space 31,2,3} fields 1~2"
        );
    }
}
