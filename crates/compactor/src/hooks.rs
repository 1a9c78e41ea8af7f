//! Caller callbacks invoked during a compaction.

/// Progress reporting and conflict resolution supplied by the caller.
///
/// Both methods have defaults, so an implementation only overrides what it
/// cares about.
pub trait CompactHooks {
    /// Called when work on `table` starts (with an empty `status`) and again
    /// with a summary once the table is finished. The final call uses the
    /// table name `"Total"`.
    fn set_status(&mut self, table: &str, status: &str) {
        let _ = (table, status);
    }

    /// Picks the tag to keep when several inputs define the user metadata
    /// entry `key`. `tags` are in source order. Returns the first by default.
    fn resolve_duplicate_metadata(&mut self, key: &[u8], tags: &[Vec<u8>]) -> Vec<u8> {
        let _ = key;
        tags.first().cloned().unwrap_or_default()
    }
}

/// Hooks that log status lines and keep the first metadata value.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl CompactHooks for DefaultHooks {
    fn set_status(&mut self, table: &str, status: &str) {
        if !status.is_empty() {
            tracing::debug!(table, status, "compaction status");
        }
    }
}
