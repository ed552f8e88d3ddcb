//! Process control context
//!
//! Bundles a native backend with the child table it owns. Creation,
//! reaping, waiting and signalling are all methods on [`ProcessControl`],
//! so independent contexts (one per test, or one per embedding) never share
//! children.

use crate::config::{ProcConfig, DEFAULT_MAX_WAIT_RETRIES};
use crate::kernel_interface::NativeProcessApi;
use crate::table::ChildSlotTable;
use crate::ProcStats;

/// Native backend plus the table of children created through it
pub struct ProcessControl<N: NativeProcessApi> {
    pub(crate) native: N,
    pub(crate) table: ChildSlotTable<N::Handle>,
    pub(crate) stats: ProcStats,
    pub(crate) max_wait_retries: u32,
    pub(crate) strict_mode: bool,
}

impl<N: NativeProcessApi> ProcessControl<N> {
    /// Context with an empty table of `capacity` slots
    pub fn new(native: N, capacity: usize) -> Self {
        Self {
            native,
            table: ChildSlotTable::new(capacity),
            stats: ProcStats::new(),
            max_wait_retries: DEFAULT_MAX_WAIT_RETRIES,
            strict_mode: false,
        }
    }

    /// Context sized and tuned from a configuration
    pub fn with_config(native: N, config: &ProcConfig) -> Self {
        Self::new(native, config.get_max_children())
            .with_max_wait_retries(config.get_max_wait_retries())
            .with_strict_mode(config.is_strict_mode())
    }

    /// Bound unexpected outcomes tolerated by a blocking wait
    pub fn with_max_wait_retries(mut self, retries: u32) -> Self {
        self.max_wait_retries = retries;
        self
    }

    /// Reject command lines with interior NULs instead of truncating them
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Table of tracked children
    pub fn table(&self) -> &ChildSlotTable<N::Handle> {
        &self.table
    }

    /// Native backend
    pub fn native(&self) -> &N {
        &self.native
    }

    /// Operation counters
    pub fn stats(&self) -> &ProcStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_interface::fake::FakeNative;

    #[test]
    fn test_with_config() {
        let config = ProcConfig::new();
        config.load_from_cmdline("proc.max_children=3 proc.wait_retries=2 proc.strict=1").unwrap();

        let control = ProcessControl::with_config(FakeNative::default(), &config);
        assert_eq!(control.table().capacity(), 3);
        assert_eq!(control.max_wait_retries, 2);
        assert!(control.strict_mode);
        assert_eq!(control.table().live_count(), 0);
    }
}
