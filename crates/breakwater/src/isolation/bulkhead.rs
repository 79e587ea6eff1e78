// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Non-blocking permit counter.
///
/// The limit is passed on every acquisition so it follows configuration changes without
/// recreating the bulkhead. Lowering the limit below the number of permits in use never revokes
/// them; new acquisitions fail until enough permits are released.
#[derive(Debug, Default)]
pub(crate) struct Bulkhead {
    in_use: AtomicUsize,
}

impl Bulkhead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a permit if fewer than `limit` are in use.
    pub fn try_acquire(self: &Arc<Self>, limit: usize) -> Option<BulkheadPermit> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                (in_use < limit).then_some(in_use + 1)
            })
            .ok()
            .map(|_| BulkheadPermit {
                bulkhead: Arc::clone(self),
            })
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Returns its permit to the bulkhead when dropped.
#[derive(Debug)]
pub(crate) struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
