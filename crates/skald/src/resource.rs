//! Runtime configuration: optimisation flags and resource limits.

/// Toggles for the optimisation layers. Every flag is semantics
/// preserving: programs observe identical values, exceptions and side
/// effect order under any combination.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFlags {
    /// Recycle scope frames through the thread-local pool.
    pub scope_pool: bool,
    /// Reuse pooled argument builders at call sites.
    pub arg_builder: bool,
    /// Cache local-variable name resolution per AST site.
    pub local_slot_pic: bool,
    /// Polymorphic inline cache on field-access sites.
    pub field_pic: bool,
    /// Polymorphic inline cache on method-call sites.
    pub method_pic: bool,
    /// Entries per polymorphic cache: 2 (default) or 4.
    pub pic_size: u8,
    /// Monomorphic fast paths for numeric operations on primitives.
    pub primitive_fastops: bool,
    /// Memoise compiled regexes by `(pattern, flags)`.
    pub regex_cache: bool,
    /// Drive integer ranges with a plain counter instead of a generic
    /// iterator object.
    pub range_fast_iter: bool,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            scope_pool: true,
            arg_builder: true,
            local_slot_pic: true,
            field_pic: true,
            method_pic: true,
            pic_size: 2,
            primitive_fastops: true,
            regex_cache: true,
            range_fast_iter: true,
        }
    }
}

impl RuntimeFlags {
    /// Everything off: the reference configuration the optimised paths
    /// are checked against.
    #[must_use]
    pub fn all_off() -> Self {
        Self {
            scope_pool: false,
            arg_builder: false,
            local_slot_pic: false,
            field_pic: false,
            method_pic: false,
            pic_size: 2,
            primitive_fastops: false,
            regex_cache: false,
            range_fast_iter: false,
        }
    }

    pub(crate) fn pic_capacity(self) -> usize {
        if self.pic_size >= 4 { 4 } else { 2 }
    }
}

/// Hard limits enforced during execution.
///
/// The recursion check runs before a call frame is created, so the
/// limit fails fast instead of deep inside the callee.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// Maximum script call depth; exceeding it raises `StackOverflow`.
    pub max_recursion_depth: usize,
}

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 256;

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}
