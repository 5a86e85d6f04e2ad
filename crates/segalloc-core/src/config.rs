//! Allocator configuration.
//!
//! Defaults can be overridden from the environment with
//! [`AllocatorConfig::from_env`]:
//! - `SEGALLOC_MODE`: `strict` (default) follows the classic malloc contract,
//!   where releasing a foreign or already-released pointer is the caller's
//!   bug and is not diagnosed. `hardened` validates every incoming pointer
//!   against its boundary tags first and reports misuse as an error.
//! - `SEGALLOC_HEAP_LIMIT`: arena size limit in bytes (default 20 MiB).
//! - `SEGALLOC_VERIFY`: `1`/`true`/`on` runs the invariant checker after every
//!   mutating operation and aborts on the first violation.
//! - `SEGALLOC_LOG`: minimum lifecycle log level (`trace` .. `error`,
//!   default `info`).

use crate::arena::DEFAULT_HEAP_LIMIT;
use crate::log::AllocatorLogLevel;

/// Pointer validation policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// No validation of caller pointers beyond bounds-checked slicing.
    #[default]
    Strict,
    /// O(1) boundary-tag validation of every caller pointer. Double release
    /// and foreign pointers become errors instead of heap corruption.
    Hardened,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hardened" | "repair" | "checked" | "full" => Self::Hardened,
            _ => Self::Strict,
        }
    }

    /// Returns true if caller pointers are validated before use.
    #[must_use]
    pub const fn validates_pointers(self) -> bool {
        matches!(self, Self::Hardened)
    }
}

/// Runtime knobs of one allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub safety: SafetyLevel,
    /// Largest arena the bundled [`VecArena`](crate::arena::VecArena) may grow to.
    pub heap_limit: usize,
    /// Run the fatal invariant checker after every mutating operation.
    pub verify_each_op: bool,
    /// Lifecycle records below this level are not recorded.
    pub log_level: AllocatorLogLevel,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            safety: SafetyLevel::Strict,
            heap_limit: DEFAULT_HEAP_LIMIT,
            verify_each_op: false,
            log_level: AllocatorLogLevel::Info,
        }
    }
}

impl AllocatorConfig {
    /// Defaults overridden by the `SEGALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mode) = lookup("SEGALLOC_MODE") {
            config.safety = SafetyLevel::from_str_loose(&mode);
        }
        if let Some(limit) = lookup("SEGALLOC_HEAP_LIMIT").and_then(|v| v.trim().parse().ok()) {
            config.heap_limit = limit;
        }
        if let Some(verify) = lookup("SEGALLOC_VERIFY") {
            config.verify_each_op = parse_flag(&verify);
        }
        if let Some(level) = lookup("SEGALLOC_LOG") {
            config.log_level = AllocatorLogLevel::from_str_loose(&level);
        }
        config
    }

    #[must_use]
    pub fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety = safety;
        self
    }

    #[must_use]
    pub fn with_heap_limit(mut self, heap_limit: usize) -> Self {
        self.heap_limit = heap_limit;
        self
    }

    #[must_use]
    pub fn with_verify_each_op(mut self, verify_each_op: bool) -> Self {
        self.verify_each_op = verify_each_op;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: AllocatorLogLevel) -> Self {
        self.log_level = log_level;
        self
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}
