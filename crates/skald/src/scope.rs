//! Lexical scope frames and the thread-local frame pool.
//!
//! A frame owns an indexed slot array with a parallel name table, the
//! current arguments, `this` and the position of the statement being
//! executed. Name resolution walks the parent chain; closures keep
//! their defining frame alive through shared ownership.
//!
//! Frames churn on every call, so released frames are recycled through
//! a thread-local pool: `borrow_frame` resets a pooled frame completely
//! (fresh `frame_id`, cleared slots and signal state) and
//! `release_frame` scrubs the references a frame holds before pooling
//! it. A frame still reachable from a closure is simply left alone.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::args::Arguments;
use crate::source::Pos;
use crate::value::Value;

const SCOPE_POOL_LIMIT: usize = 64;

thread_local! {
    static SCOPE_POOL: RefCell<Vec<Rc<RefCell<ScopeData>>>> = const { RefCell::new(Vec::new()) };
    static NEXT_FRAME_ID: Cell<u64> = const { Cell::new(1) };
    /// Bumped whenever a declaration shadows a visible name; local-slot
    /// caches recorded under an older epoch revalidate.
    static SHAPE_EPOCH: Cell<u32> = const { Cell::new(0) };
}

pub(crate) fn shape_epoch() -> u32 {
    SHAPE_EPOCH.get()
}

fn bump_shape_epoch() {
    SHAPE_EPOCH.set(SHAPE_EPOCH.get().wrapping_add(1));
}

fn next_frame_id() -> u64 {
    let id = NEXT_FRAME_ID.get();
    NEXT_FRAME_ID.set(id + 1);
    id
}

#[derive(Debug)]
pub(crate) struct ScopeData {
    pub parent: Option<Scope>,
    pub args: Arguments,
    pub this: Value,
    pub pos: Pos,
    names: Vec<Rc<str>>,
    slots: Vec<Value>,
    mutable: Vec<bool>,
    pub frame_id: u64,
}

/// Shared handle to a scope frame.
#[derive(Debug, Clone)]
pub(crate) struct Scope(Rc<RefCell<ScopeData>>);

impl Scope {
    pub fn new_root() -> Self {
        Self(Rc::new(RefCell::new(ScopeData {
            parent: None,
            args: Arguments::empty(),
            this: Value::Void,
            pos: Pos::START,
            names: Vec::new(),
            slots: Vec::new(),
            mutable: Vec::new(),
            frame_id: next_frame_id(),
        })))
    }

    pub fn frame_id(&self) -> u64 {
        self.0.borrow().frame_id
    }

    pub fn pos(&self) -> Pos {
        self.0.borrow().pos
    }

    pub fn set_pos(&self, pos: Pos) {
        self.0.borrow_mut().pos = pos;
    }

    pub fn this(&self) -> Value {
        self.0.borrow().this.clone()
    }

    pub fn args(&self) -> Arguments {
        self.0.borrow().args.clone()
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.borrow().parent.clone()
    }

    /// Declares a local in this frame and returns its slot. Re-using a
    /// visible name shadows it: lookups scan newest-first, and the
    /// shape epoch is bumped so slot caches revalidate.
    pub fn declare(&self, name: &Rc<str>, value: Value, mutable: bool) -> u16 {
        if self.is_visible(name) {
            bump_shape_epoch();
        }
        let mut data = self.0.borrow_mut();
        let slot = u16::try_from(data.slots.len()).expect("frame slot overflow");
        data.names.push(Rc::clone(name));
        data.slots.push(value);
        data.mutable.push(mutable);
        slot
    }

    fn is_visible(&self, name: &str) -> bool {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let data = scope.0.borrow();
            if data.names.iter().any(|n| &**n == name) {
                return true;
            }
            current = data.parent.clone();
        }
        false
    }

    /// Resolves a name to `(depth, slot)`, scanning each frame
    /// newest-first so shadowing declarations win.
    pub fn lookup(&self, name: &str) -> Option<(u32, u16)> {
        let mut depth = 0u32;
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let data = scope.0.borrow();
            if let Some(idx) = data.names.iter().rposition(|n| &**n == name) {
                return Some((depth, idx as u16));
            }
            current = data.parent.clone();
            depth += 1;
        }
        None
    }

    fn ancestor(&self, depth: u32) -> Option<Self> {
        let mut current = self.clone();
        for _ in 0..depth {
            let parent = current.0.borrow().parent.clone()?;
            current = parent;
        }
        Some(current)
    }

    /// Reads the slot at `(depth, slot)`; returns the value and the
    /// owning frame's id (for cache validation).
    pub fn get_at(&self, depth: u32, slot: u16) -> Option<Value> {
        let frame = self.ancestor(depth)?;
        let data = frame.0.borrow();
        data.slots.get(slot as usize).cloned()
    }

    /// The declared name living at `(depth, slot)`, if any. Slot caches
    /// verify this before trusting a cached index.
    pub fn name_at(&self, depth: u32, slot: u16) -> Option<Rc<str>> {
        let frame = self.ancestor(depth)?;
        let data = frame.0.borrow();
        data.names.get(slot as usize).cloned()
    }

    /// Snapshot of every slot value in this frame, in slot order.
    /// Suspendable executions capture the root frame with this and
    /// restore it before each replay.
    pub fn slot_values(&self) -> Vec<Value> {
        self.0.borrow().slots.clone()
    }

    /// Restores previously captured slot values. Slots declared after
    /// the snapshot (there are none during an execution: scripts only
    /// declare into their module frame) are left untouched.
    pub fn restore_slot_values(&self, snapshot: &[Value]) {
        let mut data = self.0.borrow_mut();
        for (slot, value) in snapshot.iter().enumerate() {
            if slot < data.slots.len() {
                data.slots[slot] = value.clone();
            }
        }
    }

    /// Writes the slot at `(depth, slot)`. Returns `false` when the
    /// binding is immutable.
    pub fn set_at(&self, depth: u32, slot: u16, value: Value) -> bool {
        let Some(frame) = self.ancestor(depth) else {
            return false;
        };
        let mut data = frame.0.borrow_mut();
        if !data.mutable[slot as usize] {
            return false;
        }
        data.slots[slot as usize] = value;
        true
    }
}

/// Creates (or recycles) a frame for a call or block.
pub(crate) fn borrow_frame(
    parent: Option<Scope>,
    args: Arguments,
    this: Value,
    pos: Pos,
    pooled: bool,
) -> Scope {
    let recycled = if pooled {
        SCOPE_POOL.with_borrow_mut(Vec::pop)
    } else {
        None
    };
    match recycled {
        Some(cell) => {
            {
                let mut data = cell.borrow_mut();
                data.parent = parent;
                data.args = args;
                data.this = this;
                data.pos = pos;
                data.names.clear();
                data.slots.clear();
                data.mutable.clear();
                data.frame_id = next_frame_id();
            }
            Scope(cell)
        }
        None => {
            let scope = Scope::new_root();
            {
                let mut data = scope.0.borrow_mut();
                data.parent = parent;
                data.args = args;
                data.this = this;
                data.pos = pos;
            }
            scope
        }
    }
}

/// Returns a frame to the pool if nothing else holds it. References to
/// parent, args and `this` are scrubbed either way so a pooled frame
/// retains nothing.
pub(crate) fn release_frame(scope: Scope, pooled: bool) {
    let Scope(cell) = scope;
    if Rc::strong_count(&cell) != 1 {
        // Captured by a closure; it lives as long as the closure does.
        return;
    }
    {
        let mut data = cell.borrow_mut();
        data.parent = None;
        data.args = Arguments::empty();
        data.this = Value::Void;
        data.names.clear();
        data.slots.clear();
        data.mutable.clear();
    }
    if pooled {
        SCOPE_POOL.with_borrow_mut(|pool| {
            if pool.len() < SCOPE_POOL_LIMIT {
                pool.push(cell);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Rc<str> {
        Rc::from(s)
    }

    #[test]
    fn declare_and_lookup() {
        let scope = Scope::new_root();
        scope.declare(&name("x"), Value::Int(1), true);
        let (depth, slot) = scope.lookup("x").unwrap();
        assert_eq!((depth, slot), (0, 0));
        assert!(matches!(scope.get_at(depth, slot), Some(Value::Int(1))));
    }

    #[test]
    fn child_sees_parent_slots() {
        let root = Scope::new_root();
        root.declare(&name("x"), Value::Int(7), true);
        let child = borrow_frame(Some(root), Arguments::empty(), Value::Void, Pos::START, false);
        let (depth, slot) = child.lookup("x").unwrap();
        assert_eq!(depth, 1);
        assert!(matches!(child.get_at(depth, slot), Some(Value::Int(7))));
    }

    #[test]
    fn shadowing_wins_and_bumps_epoch() {
        let scope = Scope::new_root();
        scope.declare(&name("x"), Value::Int(1), true);
        let before = shape_epoch();
        scope.declare(&name("x"), Value::Int(2), true);
        assert_ne!(shape_epoch(), before);
        let (_, slot) = scope.lookup("x").unwrap();
        assert!(matches!(scope.get_at(0, slot), Some(Value::Int(2))));
    }

    #[test]
    fn immutable_bindings_reject_writes() {
        let scope = Scope::new_root();
        let slot = scope.declare(&name("k"), Value::Int(1), false);
        assert!(!scope.set_at(0, slot, Value::Int(2)));
    }

    #[test]
    fn pooled_frames_get_fresh_ids() {
        let parent = Scope::new_root();
        let frame = borrow_frame(
            Some(parent.clone()),
            Arguments::empty(),
            Value::Void,
            Pos::START,
            true,
        );
        let first_id = frame.frame_id();
        release_frame(frame, true);
        let again = borrow_frame(Some(parent), Arguments::empty(), Value::Void, Pos::START, true);
        assert_ne!(again.frame_id(), first_id);
        assert!(again.lookup("anything").is_none());
    }
}
