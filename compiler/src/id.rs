// id.rs — Stable identifiers for the equation-set arena
//
// Sets and variables live in flat arenas inside `Model`; these IDs are the
// indices. Allocated in document order, so iteration over them is
// deterministic and independent of hashing.

/// Stable identifier for an equation set (compartment, connection, or root).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetId(pub u32);

/// Stable identifier for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl SetId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation (document) order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_set: u32,
    next_var: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_set(&mut self) -> SetId {
        let id = SetId(self.next_set);
        self.next_set += 1;
        id
    }

    pub fn alloc_var(&mut self) -> VarId {
        let id = VarId(self.next_var);
        self.next_var += 1;
        id
    }
}
