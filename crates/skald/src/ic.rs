//! Inline caches attached to AST sites.
//!
//! All cache state is `Copy` and lives in `Cell`s on the owning node,
//! so the AST stays immutable apart from these write slots. Every
//! entry records the class version it observed; a version mismatch is
//! a plain miss and the entry is dropped silently. A cache that is full
//! and still misses megamorphises: its entries are discarded and the
//! site uses full dispatch from then on.
//!
//! Caches are pure optimisation. Dispatch results must be identical
//! whether a site hits, misses, or caching is disabled.

use crate::class::ClassId;

/// Widest supported polymorphic cache.
pub(crate) const PIC_MAX: usize = 4;

/// Local-slot cache: resolved `(depth, slot)` for an identifier, valid
/// while the shape epoch matches. Hits are additionally verified
/// against the target frame's name table, so a stale entry can never
/// read the wrong slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotIc {
    pub epoch: u32,
    pub depth: u32,
    pub slot: u16,
}

impl SlotIc {
    pub const EMPTY: Self = Self {
        epoch: u32::MAX,
        depth: 0,
        slot: 0,
    };

    pub fn is_empty(self) -> bool {
        self.epoch == u32::MAX
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldIcEntry {
    pub class: u32,
    pub version: u32,
    pub slot: u32,
}

const NO_ENTRY: FieldIcEntry = FieldIcEntry {
    class: u32::MAX,
    version: 0,
    slot: 0,
};

/// Field-access cache: `(class, version) -> field slot`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldIc {
    entries: [FieldIcEntry; PIC_MAX],
    len: u8,
    mega: bool,
}

impl FieldIc {
    pub const EMPTY: Self = Self {
        entries: [NO_ENTRY; PIC_MAX],
        len: 0,
        mega: false,
    };

    pub fn is_mega(self) -> bool {
        self.mega
    }

    pub fn lookup(&mut self, class: ClassId, version: u32) -> Option<u32> {
        if self.mega {
            return None;
        }
        for i in 0..self.len as usize {
            let entry = self.entries[i];
            if entry.class == class.0 && entry.version == version {
                // Most-recently-used first.
                self.entries[..=i].rotate_right(1);
                return Some(self.entries[0].slot);
            }
        }
        None
    }

    /// Records a resolved slot. `capacity` is the configured PIC size
    /// (2 or 4); a full cache that misses goes megamorphic instead.
    pub fn insert(&mut self, class: ClassId, version: u32, slot: u32, capacity: usize) {
        let capacity = capacity.min(PIC_MAX);
        if self.mega {
            return;
        }
        if (self.len as usize) >= capacity {
            *self = Self::EMPTY;
            self.mega = true;
            return;
        }
        self.entries[..=self.len as usize].rotate_right(1);
        self.entries[0] = FieldIcEntry {
            class: class.0,
            version,
            slot,
        };
        self.len += 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodIcEntry {
    pub class: u32,
    pub version: u32,
    /// Class that actually defines the method (maybe a parent).
    pub def_class: u32,
    /// Index into the defining class's method table; revalidated by the
    /// version check before use.
    pub index: u32,
}

const NO_METHOD: MethodIcEntry = MethodIcEntry {
    class: u32::MAX,
    version: 0,
    def_class: 0,
    index: 0,
};

/// Method-call cache: `(receiver class, version) -> method handle`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodIc {
    entries: [MethodIcEntry; PIC_MAX],
    len: u8,
    mega: bool,
}

impl MethodIc {
    pub const EMPTY: Self = Self {
        entries: [NO_METHOD; PIC_MAX],
        len: 0,
        mega: false,
    };

    pub fn is_mega(self) -> bool {
        self.mega
    }

    pub fn lookup(&mut self, class: ClassId, version: u32) -> Option<(ClassId, u32)> {
        if self.mega {
            return None;
        }
        for i in 0..self.len as usize {
            let entry = self.entries[i];
            if entry.class == class.0 && entry.version == version {
                self.entries[..=i].rotate_right(1);
                let hit = self.entries[0];
                return Some((ClassId(hit.def_class), hit.index));
            }
        }
        None
    }

    pub fn insert(&mut self, class: ClassId, version: u32, def_class: ClassId, index: u32, capacity: usize) {
        let capacity = capacity.min(PIC_MAX);
        if self.mega {
            return;
        }
        if (self.len as usize) >= capacity {
            *self = Self::EMPTY;
            self.mega = true;
            return;
        }
        self.entries[..=self.len as usize].rotate_right(1);
        self.entries[0] = MethodIcEntry {
            class: class.0,
            version,
            def_class: def_class.0,
            index,
        };
        self.len += 1;
    }
}

/// Index-site specialisation for `a[i]` reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexIc {
    Empty,
    List,
    Map,
    Str,
    Mega,
}

impl IndexIc {
    /// Notes the receiver shape seen at this site; two distinct shapes
    /// megamorphise it.
    pub fn observe(self, seen: Self) -> Self {
        match self {
            Self::Empty => seen,
            current if current == seen => current,
            _ => Self::Mega,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ic_hits_after_insert() {
        let mut ic = FieldIc::EMPTY;
        ic.insert(ClassId(3), 1, 7, 2);
        assert_eq!(ic.lookup(ClassId(3), 1), Some(7));
        // Version bump invalidates silently.
        assert_eq!(ic.lookup(ClassId(3), 2), None);
    }

    #[test]
    fn field_ic_megamorphises_at_capacity() {
        let mut ic = FieldIc::EMPTY;
        ic.insert(ClassId(1), 0, 0, 2);
        ic.insert(ClassId(2), 0, 1, 2);
        assert!(!ic.is_mega());
        ic.insert(ClassId(3), 0, 2, 2);
        assert!(ic.is_mega());
        assert_eq!(ic.lookup(ClassId(1), 0), None);
    }

    #[test]
    fn method_ic_keeps_most_recent_first() {
        let mut ic = MethodIc::EMPTY;
        ic.insert(ClassId(1), 0, ClassId(1), 10, 4);
        ic.insert(ClassId(2), 0, ClassId(2), 20, 4);
        assert_eq!(ic.lookup(ClassId(1), 0), Some((ClassId(1), 10)));
        assert_eq!(ic.lookup(ClassId(2), 0), Some((ClassId(2), 20)));
    }

    #[test]
    fn index_ic_observes_shapes() {
        let ic = IndexIc::Empty.observe(IndexIc::List);
        assert_eq!(ic, IndexIc::List);
        assert_eq!(ic.observe(IndexIc::List), IndexIc::List);
        assert_eq!(ic.observe(IndexIc::Map), IndexIc::Mega);
    }
}
