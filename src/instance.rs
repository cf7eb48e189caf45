use crate::{
    error::{Entity, RecordError, RecordResult},
    requirement::Requirement,
    types::{FieldId, IndexMap, InstId, InstanceKey, MemId, OpId, TreeNodeKey},
};
use tracing::trace;

/// Whether an instance holds region data or reduction buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    /// Regular instance holding field data.
    Physical,
    /// Buffer accumulating reductions.
    Reduction {
        /// Reductions fold into existing values rather than applying.
        fold: bool,
        /// The buffer is indexed indirectly.
        indirect: bool,
    },
}

/// Every access to an instance, per field: operation and the indices of
/// its requirements that touched the field, in recording order.
pub type InstanceUsers = IndexMap<FieldId, IndexMap<OpId, Vec<u32>>>;

/// One version of a physical or reduction instance.
#[must_use]
#[derive(Debug, Clone)]
pub struct PhysicalInstance {
    key: InstanceKey,
    memory: MemId,
    region: TreeNodeKey,
    kind: InstanceKind,
    users: InstanceUsers,
}

impl PhysicalInstance {
    /// Identity of this version.
    #[must_use]
    pub const fn key(&self) -> InstanceKey {
        self.key
    }

    /// Memory holding the instance.
    #[must_use]
    pub const fn memory(&self) -> MemId {
        self.memory
    }

    /// Region the instance was created for.
    #[must_use]
    pub const fn region(&self) -> TreeNodeKey {
        self.region
    }

    /// Physical or reduction.
    #[must_use]
    pub const fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Recorded accesses.
    #[must_use]
    pub const fn users(&self) -> &InstanceUsers {
        &self.users
    }

    fn add_user(&mut self, op: OpId, req: &Requirement) {
        for &field in req.fields() {
            self.users
                .entry(field)
                .or_default()
                .entry(op)
                .or_default()
                .push(req.index());
        }
    }
}

/// All instance versions, grouped by instance id.
///
/// The runtime reuses ids; each creation under a known id adds a new
/// version, and records that name an instance by id always refer to its
/// latest version.
#[must_use]
#[derive(Debug, Default, Clone)]
pub struct InstanceRegistry {
    versions: IndexMap<InstId, Vec<PhysicalInstance>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new version of instance `id` and return its key.
    pub fn create(
        &mut self,
        id: InstId,
        memory: MemId,
        region: TreeNodeKey,
        kind: InstanceKind,
    ) -> InstanceKey {
        let versions = self.versions.entry(id).or_default();
        let key = InstanceKey {
            id,
            version: u32::try_from(versions.len()).expect("InstanceRegistry::create: [1]"),
        };
        versions.push(PhysicalInstance {
            key,
            memory,
            region,
            kind,
            users: IndexMap::default(),
        });
        trace!(instance = %key, %memory, %region, "recorded instance");
        key
    }

    /// Key of the latest version of `id`.
    ///
    /// # Errors
    /// `Unknown` if the id was never recorded.
    pub fn latest(&self, id: InstId) -> RecordResult<InstanceKey> {
        self.versions
            .get(&id)
            .and_then(|versions| versions.last())
            .map(PhysicalInstance::key)
            .ok_or(RecordError::Unknown(Entity::Instance(id)))
    }

    /// Record that requirement `req` of `op` accessed instance `key`, for
    /// every field of the requirement.
    ///
    /// # Panics
    /// If `key` was not produced by this registry.
    pub fn add_user(&mut self, key: InstanceKey, op: OpId, req: &Requirement) {
        self.versions
            .get_mut(&key.id)
            .and_then(|versions| versions.get_mut(key.version as usize))
            .expect("InstanceRegistry::add_user: [1]")
            .add_user(op, req);
    }

    /// Look up one version.
    #[must_use]
    pub fn get(&self, key: InstanceKey) -> Option<&PhysicalInstance> {
        self.versions.get(&key.id)?.get(key.version as usize)
    }

    /// Every version of every instance, ids in recording order and versions
    /// oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PhysicalInstance> + '_ {
        self.versions.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        requirement::{Coherence, Privilege},
        types::{FieldSpaceId, IndexNodeId, IndexSpaceId, TreeId},
    };

    fn region() -> TreeNodeKey {
        TreeNodeKey {
            index: IndexNodeId::Space(IndexSpaceId(1)),
            tree: TreeId(1),
        }
    }

    fn req(index: u32, fields: &[u32]) -> Requirement {
        let mut r = Requirement::new(
            index,
            IndexNodeId::Space(IndexSpaceId(1)),
            FieldSpaceId(1),
            TreeId(1),
            Some(region()),
            Privilege::ReadWrite,
            Coherence::Exclusive,
        );
        for &f in fields {
            r.add_field(FieldId(f));
        }
        r
    }

    #[test]
    fn recreation_bumps_the_version() {
        let mut reg = InstanceRegistry::new();
        let first = reg.create(InstId(7), MemId(1), region(), InstanceKind::Physical);
        let second = reg.create(
            InstId(7),
            MemId(2),
            region(),
            InstanceKind::Reduction {
                fold: true,
                indirect: false,
            },
        );
        assert_eq!((first.version, second.version), (0, 1));
        assert_eq!(reg.latest(InstId(7)), Ok(second));
        assert_eq!(reg.get(first).unwrap().memory(), MemId(1));
        assert_eq!(
            reg.latest(InstId(8)),
            Err(RecordError::Unknown(Entity::Instance(InstId(8))))
        );
        assert_eq!(reg.iter().count(), 2);
    }

    #[test]
    fn users_are_grouped_by_field_then_operation() {
        let mut reg = InstanceRegistry::new();
        let key = reg.create(InstId(1), MemId(1), region(), InstanceKind::Physical);
        reg.add_user(key, OpId(3), &req(0, &[1, 2]));
        reg.add_user(key, OpId(3), &req(1, &[2]));
        reg.add_user(key, OpId(4), &req(0, &[2]));
        let users = reg.get(key).unwrap().users();
        assert_eq!(users[&FieldId(1)][&OpId(3)], vec![0]);
        assert_eq!(users[&FieldId(2)][&OpId(3)], vec![0, 1]);
        assert_eq!(
            users[&FieldId(2)].keys().copied().collect::<Vec<_>>(),
            vec![OpId(3), OpId(4)]
        );
    }
}
