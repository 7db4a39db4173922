//! Search operation callbacks: the transaction layer's say in a scan.

use crate::common::Result;

use super::tuple::{OwnedTuple, TupleReference};

/// Per-tuple visibility/lock decision supplied by the transaction layer.
///
/// The cursor calls [`proceed`](Self::proceed) with the page latched. When
/// it answers `false` the cursor copies the tuple, releases every latch and
/// calls [`reconcile`](Self::reconcile), which may block for as long as it
/// needs (e.g. waiting for a lock). The cursor then re-finds the tuple,
/// which a concurrent split may have moved or a delete removed.
///
/// `proceed` may be called again for the same tuple after `reconcile`, so
/// it must be idempotent.
pub trait SearchOperationCallback: Send + Sync {
    /// Whether the tuple can be returned without waiting.
    fn proceed(&self, tuple: &dyn TupleReference) -> bool;

    /// Block until the tuple can be returned. Called with no page latched.
    ///
    /// Failures should be reported as `Error::Callback`; they abort the
    /// scan step that triggered them.
    fn reconcile(&self, tuple: &OwnedTuple) -> Result<()>;
}

/// Callback that lets every tuple through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpOperationCallback;

impl SearchOperationCallback for NoOpOperationCallback {
    fn proceed(&self, _tuple: &dyn TupleReference) -> bool {
        true
    }

    fn reconcile(&self, _tuple: &OwnedTuple) -> Result<()> {
        Ok(())
    }
}
