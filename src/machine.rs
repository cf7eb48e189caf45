use crate::{
    error::{Entity, RecordError, RecordResult},
    types::{IndexMap, InstanceKey, MemId, OpId, ProcId},
};
use derive_more::Display;

/// Kind of a processor.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    /// Latency-optimized core.
    #[display("CPU")]
    Cpu,
    /// Throughput-optimized core.
    #[display("GPU")]
    Gpu,
    /// Runtime utility processor.
    #[display("utility")]
    Utility,
}

impl ProcessorKind {
    /// Decode the runtime's processor kind code.
    #[must_use]
    pub const fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Cpu),
            1 => Some(Self::Gpu),
            2 => Some(Self::Utility),
            _ => None,
        }
    }
}

/// Bandwidth and latency between a processor or memory and a memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Affinity {
    /// Bandwidth as reported by the runtime.
    pub bandwidth: u32,
    /// Latency as reported by the runtime.
    pub latency: u32,
}

/// A processor and what it executed.
#[must_use]
#[derive(Debug, Clone)]
pub struct Processor {
    id: ProcId,
    kind: ProcessorKind,
    memories: IndexMap<MemId, Affinity>,
    executed: Vec<OpId>,
}

impl Processor {
    /// Identifier of the processor.
    #[must_use]
    pub const fn id(&self) -> ProcId {
        self.id
    }

    /// Kind of the processor.
    #[must_use]
    pub const fn kind(&self) -> ProcessorKind {
        self.kind
    }

    /// Memories visible from this processor.
    #[must_use]
    pub const fn memories(&self) -> &IndexMap<MemId, Affinity> {
        &self.memories
    }

    /// Operations executed here, in recording order.
    #[must_use]
    pub fn executed(&self) -> &[OpId] {
        &self.executed
    }
}

/// A memory, its affinities and the instances allocated in it.
#[must_use]
#[derive(Debug, Clone)]
pub struct Memory {
    id: MemId,
    capacity: u64,
    processors: IndexMap<ProcId, Affinity>,
    memories: IndexMap<MemId, Affinity>,
    instances: Vec<InstanceKey>,
}

impl Memory {
    /// Identifier of the memory.
    #[must_use]
    pub const fn id(&self) -> MemId {
        self.id
    }

    /// Capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Processors that can access this memory.
    #[must_use]
    pub const fn processors(&self) -> &IndexMap<ProcId, Affinity> {
        &self.processors
    }

    /// Other memories this one can copy to and from.
    #[must_use]
    pub const fn memories(&self) -> &IndexMap<MemId, Affinity> {
        &self.memories
    }

    /// Instances allocated here, in creation order.
    #[must_use]
    pub fn instances(&self) -> &[InstanceKey] {
        &self.instances
    }
}

/// Processors and memories of the traced machine.
#[must_use]
#[derive(Debug, Default, Clone)]
pub struct Machine {
    processors: IndexMap<ProcId, Processor>,
    memories: IndexMap<MemId, Memory>,
}

impl Machine {
    /// Create an empty machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processor.
    ///
    /// # Errors
    /// `Duplicate` if the id is already known.
    pub fn add_processor(&mut self, id: ProcId, kind: ProcessorKind) -> RecordResult {
        if self.processors.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::Processor(id)));
        }
        self.processors.insert(
            id,
            Processor {
                id,
                kind,
                memories: IndexMap::default(),
                executed: Vec::new(),
            },
        );
        Ok(())
    }

    /// Record a utility processor.
    ///
    /// # Errors
    /// `Duplicate` if the id is already known.
    pub fn add_utility(&mut self, id: ProcId) -> RecordResult {
        self.add_processor(id, ProcessorKind::Utility)
    }

    /// Record a memory.
    ///
    /// # Errors
    /// `Duplicate` if the id is already known.
    pub fn add_memory(&mut self, id: MemId, capacity: u64) -> RecordResult {
        if self.memories.contains_key(&id) {
            return Err(RecordError::Duplicate(Entity::Memory(id)));
        }
        self.memories.insert(
            id,
            Memory {
                id,
                capacity,
                processors: IndexMap::default(),
                memories: IndexMap::default(),
                instances: Vec::new(),
            },
        );
        Ok(())
    }

    /// Record the affinity between a processor and a memory on both sides.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded processor or memory, `Malformed` if the
    /// affinity was already recorded.
    pub fn set_proc_mem(&mut self, proc: ProcId, mem: MemId, affinity: Affinity) -> RecordResult {
        let processor = self
            .processors
            .get_mut(&proc)
            .ok_or(RecordError::Unknown(Entity::Processor(proc)))?;
        let memory = self
            .memories
            .get_mut(&mem)
            .ok_or(RecordError::Unknown(Entity::Memory(mem)))?;
        if processor.memories.contains_key(&mem) || memory.processors.contains_key(&proc) {
            return Err(RecordError::Malformed {
                entity: Entity::Processor(proc),
                reason: "processor-memory affinity recorded twice",
            });
        }
        processor.memories.insert(mem, affinity);
        memory.processors.insert(proc, affinity);
        Ok(())
    }

    /// Record the affinity between two distinct memories on both sides.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded memory, `Malformed` for a memory paired
    /// with itself or an affinity recorded twice.
    pub fn set_mem_mem(&mut self, a: MemId, b: MemId, affinity: Affinity) -> RecordResult {
        for id in [a, b] {
            if !self.memories.contains_key(&id) {
                return Err(RecordError::Unknown(Entity::Memory(id)));
            }
        }
        let malformed = |reason| RecordError::Malformed {
            entity: Entity::Memory(a),
            reason,
        };
        if a == b {
            return Err(malformed("memory affinity to itself"));
        }
        if self.memories[&a].memories.contains_key(&b) || self.memories[&b].memories.contains_key(&a)
        {
            return Err(malformed("memory-memory affinity recorded twice"));
        }
        self.memories[&a].memories.insert(b, affinity);
        self.memories[&b].memories.insert(a, affinity);
        Ok(())
    }

    /// Record that `op` ran on `proc`.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded processor.
    pub fn add_executed(&mut self, proc: ProcId, op: OpId) -> RecordResult {
        self.processors
            .get_mut(&proc)
            .ok_or(RecordError::Unknown(Entity::Processor(proc)))?
            .executed
            .push(op);
        Ok(())
    }

    /// Record an instance allocation in `mem`.
    ///
    /// # Errors
    /// `Unknown` for an unrecorded memory.
    pub fn add_instance(&mut self, mem: MemId, instance: InstanceKey) -> RecordResult {
        self.memories
            .get_mut(&mem)
            .ok_or(RecordError::Unknown(Entity::Memory(mem)))?
            .instances
            .push(instance);
        Ok(())
    }

    /// Whether a memory has been recorded.
    #[must_use]
    pub fn contains_memory(&self, mem: MemId) -> bool {
        self.memories.contains_key(&mem)
    }

    /// Look up a processor.
    #[must_use]
    pub fn processor(&self, id: ProcId) -> Option<&Processor> {
        self.processors.get(&id)
    }

    /// Look up a memory.
    #[must_use]
    pub fn memory(&self, id: MemId) -> Option<&Memory> {
        self.memories.get(&id)
    }

    /// All processors in recording order.
    pub fn processors(&self) -> impl Iterator<Item = &Processor> + '_ {
        self.processors.values()
    }

    /// All memories in recording order.
    pub fn memories(&self) -> impl Iterator<Item = &Memory> + '_ {
        self.memories.values()
    }
}
