use crate::DbError;

/// Handle returned by a connection's `prepare_cancel`, kept by the session
/// manager and invoked from whichever thread handles the client's
/// `cancel`/`disconnect` request.
///
/// The split into prepare/cancel/free mirrors the three-operation flow the
/// base design calls out: a cheap, synchronous "give me something I can call
/// later" step, a possibly-blocking cancel step, and an explicit teardown so
/// drivers that allocate native resources (interrupt handles, side
/// connections) aren't forced to leak them until the whole connection closes.
pub trait QueryCancelHandle: Send + Sync {
    /// Attempt to cancel the query this handle was prepared for.
    ///
    /// Best-effort: the query may already have finished, or the backend may
    /// not support cancellation at all (in which case this returns `Ok(())`
    /// without doing anything — see [`NoopCancelHandle`]).
    fn cancel(&self) -> Result<(), DbError>;

    /// Whether a cancel request has already been sent through this handle.
    fn is_cancelled(&self) -> bool;
}

/// A no-op cancel handle for drivers that don't support cancellation.
///
/// `cancel()` always succeeds and does nothing; callers see a normal
/// best-effort outcome rather than a `NotSupported` error.
#[derive(Clone, Default)]
pub struct NoopCancelHandle;

impl QueryCancelHandle for NoopCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_handle_cancel_always_succeeds() {
        let handle = NoopCancelHandle;
        assert!(handle.cancel().is_ok());
        assert!(!handle.is_cancelled());
    }
}
