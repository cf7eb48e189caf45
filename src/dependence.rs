use crate::{
    region_tree::RegionTreeModel,
    requirement::{Coherence, Requirement},
};
use derive_more::Display;

/// Kind of ordering constraint between two accesses, earlier access first.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DependenceType {
    /// The accesses commute.
    #[display("no dependence")]
    None,
    /// The later access consumes values produced by the earlier one.
    #[display("true dependence")]
    True,
    /// Ordering only: the later access overwrites what the earlier one reads.
    #[display("anti dependence")]
    Anti,
    /// Both accesses are atomic; they must not overlap in time.
    #[display("atomic dependence")]
    Atomic,
    /// Simultaneous or relaxed coherence; ordering is up to the application.
    #[display("simultaneous dependence")]
    Simultaneous,
}

impl DependenceType {
    /// Decode the runtime's dependence code.
    #[must_use]
    pub const fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::True),
            2 => Some(Self::Anti),
            3 => Some(Self::Atomic),
            4 => Some(Self::Simultaneous),
            _ => None,
        }
    }

    /// Every kind except [`DependenceType::None`] constrains mapping order.
    #[must_use]
    pub const fn is_mapping_dependence(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Classify the dependence of `later` on `earlier` from privileges and
/// coherence alone.
///
/// Callers must already have established that the requirements share a
/// field, live in the same tree and alias; see [`DependenceOracle::compute`].
#[must_use]
pub fn compute_dependence_type(earlier: &Requirement, later: &Requirement) -> DependenceType {
    let (p1, p2) = (earlier.privilege(), later.privilege());
    if p1.is_read_only() && p2.is_read_only() {
        return DependenceType::None;
    }
    if let (Some(op1), Some(op2)) = (p1.reduction(), p2.reduction()) {
        return if op1 == op2 {
            DependenceType::None
        } else {
            DependenceType::True
        };
    }
    debug_assert!(p1.has_write() || p2.has_write());
    let (c1, c2) = (earlier.coherence(), later.coherence());
    let either = |c: Coherence| c1 == c || c2 == c;
    if either(Coherence::Exclusive) {
        downgrade_to_anti(earlier, later, DependenceType::True)
    } else if either(Coherence::Atomic) {
        if c1 == Coherence::Atomic && c2 == Coherence::Atomic {
            downgrade_to_anti(earlier, later, DependenceType::Atomic)
        } else if (c1 != Coherence::Atomic && p1.is_read_only())
            || (c2 != Coherence::Atomic && p2.is_read_only())
        {
            DependenceType::None
        } else {
            downgrade_to_anti(earlier, later, DependenceType::True)
        }
    } else {
        // Simultaneous on either side, or relaxed on both.
        downgrade_to_anti(earlier, later, DependenceType::Simultaneous)
    }
}

/// No values flow when the earlier access only reads or the later one
/// overwrites without reading.
fn downgrade_to_anti(
    earlier: &Requirement,
    later: &Requirement,
    actual: DependenceType,
) -> DependenceType {
    if earlier.privilege().is_read_only() || later.privilege().is_write_only() {
        DependenceType::Anti
    } else {
        actual
    }
}

/// Full dependence test between two requirements: field overlap, tree
/// identity and aliasing are checked, cheapest first, before privileges and
/// coherence are consulted.
#[derive(Debug, Clone, Copy)]
pub struct DependenceOracle<'a> {
    regions: &'a RegionTreeModel,
}

impl<'a> DependenceOracle<'a> {
    /// Bind the oracle to a region-tree model.
    #[must_use]
    pub const fn new(regions: &'a RegionTreeModel) -> Self {
        Self { regions }
    }

    /// Dependence of `later` on `earlier`.
    #[must_use]
    pub fn compute(&self, earlier: &Requirement, later: &Requirement) -> DependenceType {
        if !earlier.overlaps_fields(later) {
            return DependenceType::None;
        }
        if earlier.tree() != later.tree() {
            return DependenceType::None;
        }
        if !self.regions.is_aliased(earlier.node(), later.node()) {
            return DependenceType::None;
        }
        compute_dependence_type(earlier, later)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        requirement::Privilege,
        types::{FieldId, FieldSpaceId, IndexNodeId, IndexPartId, IndexSpaceId, ReductionOpId, TreeId},
    };

    fn req(privilege: Privilege, coherence: Coherence) -> Requirement {
        req_on(IndexSpaceId(1), privilege, coherence, &[1])
    }

    fn req_on(
        space: IndexSpaceId,
        privilege: Privilege,
        coherence: Coherence,
        fields: &[u32],
    ) -> Requirement {
        let mut r = Requirement::new(
            0,
            IndexNodeId::Space(space),
            FieldSpaceId(1),
            TreeId(1),
            None,
            privilege,
            coherence,
        );
        for &f in fields {
            r.add_field(FieldId(f));
        }
        r
    }

    use Coherence::{Atomic, Exclusive, Relaxed, Simultaneous};
    use Privilege::{ReadOnly, ReadWrite, WriteOnly};

    #[test]
    fn exclusive_pairs() {
        let t = |a, b| compute_dependence_type(&req(a, Exclusive), &req(b, Exclusive));
        assert_eq!(t(ReadOnly, ReadWrite), DependenceType::Anti);
        assert_eq!(t(ReadWrite, ReadWrite), DependenceType::True);
        assert_eq!(t(ReadWrite, ReadOnly), DependenceType::True);
        assert_eq!(t(ReadWrite, WriteOnly), DependenceType::Anti);
        assert_eq!(t(ReadOnly, ReadOnly), DependenceType::None);
        assert_eq!(t(Privilege::NoAccess, ReadOnly), DependenceType::None);
    }

    #[test]
    fn reductions_commute_only_with_the_same_operator() {
        let red = |op| req(Privilege::Reduce(ReductionOpId(op)), Exclusive);
        assert_eq!(compute_dependence_type(&red(5), &red(5)), DependenceType::None);
        assert_eq!(compute_dependence_type(&red(5), &red(7)), DependenceType::True);
        assert_eq!(
            compute_dependence_type(&req(ReadOnly, Exclusive), &red(5)),
            DependenceType::Anti
        );
    }

    #[test]
    fn atomic_pairs() {
        let t = |a, ca, b, cb| compute_dependence_type(&req(a, ca), &req(b, cb));
        assert_eq!(t(ReadWrite, Atomic, ReadWrite, Atomic), DependenceType::Atomic);
        assert_eq!(t(ReadOnly, Atomic, ReadWrite, Atomic), DependenceType::Anti);
        assert_eq!(t(ReadOnly, Simultaneous, ReadWrite, Atomic), DependenceType::None);
        assert_eq!(t(ReadWrite, Atomic, ReadOnly, Relaxed), DependenceType::None);
        assert_eq!(t(ReadWrite, Simultaneous, ReadWrite, Atomic), DependenceType::True);
        assert_eq!(t(ReadWrite, Atomic, WriteOnly, Relaxed), DependenceType::Anti);
    }

    #[test]
    fn simultaneous_and_relaxed_pairs() {
        let t = |a, ca, b, cb| compute_dependence_type(&req(a, ca), &req(b, cb));
        assert_eq!(
            t(ReadWrite, Simultaneous, ReadWrite, Relaxed),
            DependenceType::Simultaneous
        );
        assert_eq!(t(ReadWrite, Relaxed, ReadWrite, Relaxed), DependenceType::Simultaneous);
        assert_eq!(t(ReadOnly, Relaxed, ReadWrite, Relaxed), DependenceType::Anti);
    }

    #[test]
    fn exclusive_dominates_weaker_coherence() {
        assert_eq!(
            compute_dependence_type(&req(ReadWrite, Relaxed), &req(ReadWrite, Exclusive)),
            DependenceType::True
        );
    }

    #[test]
    fn oracle_short_circuits_before_privileges() {
        let mut regions = RegionTreeModel::new();
        regions.create_index_space(IndexSpaceId(1)).unwrap();
        regions
            .create_index_partition(IndexSpaceId(1), IndexPartId(2), true, 0)
            .unwrap();
        regions.create_index_subspace(IndexPartId(2), IndexSpaceId(3), 0).unwrap();
        regions.create_index_subspace(IndexPartId(2), IndexSpaceId(4), 1).unwrap();
        let oracle = DependenceOracle::new(&regions);

        let writer = req_on(IndexSpaceId(1), ReadWrite, Exclusive, &[1]);
        let disjoint_fields = req_on(IndexSpaceId(1), ReadWrite, Exclusive, &[2]);
        assert_eq!(oracle.compute(&writer, &disjoint_fields), DependenceType::None);

        let left = req_on(IndexSpaceId(3), ReadWrite, Exclusive, &[1]);
        let right = req_on(IndexSpaceId(4), ReadWrite, Exclusive, &[1]);
        assert_eq!(oracle.compute(&left, &right), DependenceType::None);
        assert_eq!(oracle.compute(&writer, &right), DependenceType::True);

        let reader = req_on(IndexSpaceId(3), ReadOnly, Exclusive, &[1]);
        assert_eq!(oracle.compute(&reader, &writer), DependenceType::Anti);
    }

    #[test]
    fn disjoint_fields_never_consult_aliasing() {
        // Index nodes that were never recorded would make `is_aliased` panic;
        // the field check has to reject the pair first.
        let regions = RegionTreeModel::new();
        let oracle = DependenceOracle::new(&regions);
        let a = req_on(IndexSpaceId(77), ReadWrite, Exclusive, &[1]);
        let b = req_on(IndexSpaceId(78), ReadWrite, Exclusive, &[2]);
        assert_eq!(oracle.compute(&a, &b), DependenceType::None);
    }

    #[test]
    fn raw_codes_decode() {
        assert_eq!(DependenceType::from_raw(1), Some(DependenceType::True));
        assert_eq!(DependenceType::from_raw(9), None);
        assert!(!DependenceType::None.is_mapping_dependence());
        assert!(DependenceType::Simultaneous.is_mapping_dependence());
    }
}
