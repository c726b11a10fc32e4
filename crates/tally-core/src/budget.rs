//! Abstract size budget interfaces.
//!
//! The concrete implementation lives in `tally-loader`, where the record
//! cache accounts every admitted entry against a hard byte ceiling. Only the
//! traits live here so other crates can account memory without pulling in
//! the async stack.

/// A guard returned by a size budget when bytes are acquired.
///
/// Must be RAII: dropping it hands the bytes back to the budget.
pub trait SizeGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;
    /// Optional debug tag for metrics/tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A handle enforcing a byte ceiling.
///
/// Callers `try_acquire` before admitting data. `None` means the ceiling
/// would be crossed and the caller must free something first (evict) or
/// refuse the admission.
pub trait SizeBudget: Send + Sync + 'static {
    type Guard: SizeGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Currently accounted bytes.
    fn used_bytes(&self) -> usize;
}
