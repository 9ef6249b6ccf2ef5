use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dbrelay_core::{
    ConnectionInfo, DbError, DbKind, Driver, DriverConnection, QueryCancelHandle,
    parse_connection_string,
};

/// Maximum number of simultaneously open logical connections.
pub const MAX_SLOTS: usize = 64;

/// Descriptive snapshot of one slot, as returned by the `connections` method.
/// Copied out of the slot table so the caller can hold it across other
/// session calls without keeping the lock.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub id: u64,
    pub driver: &'static str,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

struct Slot {
    id: u64,
    conn: Arc<dyn DriverConnection>,
    info: ConnectionInfo,
    cancel_handle: Option<Arc<dyn QueryCancelHandle>>,
    query_active: bool,
    max_result_rows: usize,
}

/// Outcome of `cancel_query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A running query was found and the driver's cancel was invoked.
    Cancelled,
    /// The slot had no query in flight; nothing to do.
    NoOp,
}

/// Fixed-capacity pool of logical database connections, keyed by a
/// monotonically increasing integer id that is never reused within a daemon
/// lifetime (spec §3/§4.2).
///
/// Connection objects are stored as `Arc<dyn DriverConnection>` rather than
/// `Box` so that `get()` can hand a clone to a worker thread and release the
/// slot-table lock immediately — the worker then runs its (possibly slow)
/// driver call without holding anything that blocks the protocol thread.
pub struct SessionManager {
    slots: Mutex<[Option<Slot>; MAX_SLOTS]>,
    next_id: AtomicU64,
    drivers: HashMap<DbKind, Box<dyn Driver>>,
    default_max_result_rows: usize,
}

impl SessionManager {
    /// `default_max_result_rows` is the daemon-wide row cap (the process
    /// entry point's `--max-result-rows` flag, or `dbrelay_core::MAX_RESULT_ROWS`
    /// if unset); a slot's own `max_result_rows` from `connect` overrides it.
    pub fn new(drivers: HashMap<DbKind, Box<dyn Driver>>, default_max_result_rows: Option<usize>) -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| None)),
            next_id: AtomicU64::new(1),
            drivers,
            default_max_result_rows: default_max_result_rows.unwrap_or(dbrelay_core::MAX_RESULT_ROWS),
        }
    }

    /// Parses `connstr`, dispatches to the matching driver, and on success
    /// pings the new connection to fail fast on a connection that accepted
    /// the handshake but can't actually serve queries, then occupies the
    /// first free slot with a fresh id. `max_result_rows` overrides the
    /// default `MAX_RESULT_ROWS` cap for every query answered through this
    /// slot (spec §3: "a second cap ... default 2^20, per-connection
    /// overridable").
    pub fn connect(
        &self,
        connstr: &str,
        password: Option<&str>,
        max_result_rows: Option<usize>,
    ) -> Result<u64, DbError> {
        let target = parse_connection_string(connstr)
            .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;

        let driver = self
            .drivers
            .get(&target.kind())
            .ok_or_else(|| DbError::NotSupported(format!("{:?} driver not compiled in", target.kind())))?;

        let mut slots = self.slots.lock().expect("session slot lock poisoned");
        let free_index = slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(DbError::PoolExhausted(MAX_SLOTS))?;

        let conn = driver.connect(&target, password)?;
        conn.ping()?;
        let info = conn.info();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        slots[free_index] = Some(Slot {
            id,
            conn: Arc::from(conn),
            info,
            cancel_handle: None,
            query_active: false,
            max_result_rows: max_result_rows.unwrap_or(self.default_max_result_rows),
        });

        Ok(id)
    }

    /// Row cap to apply for queries against `id`, or the daemon default if
    /// the slot is unknown or never overrode it.
    pub fn max_result_rows(&self, id: u64) -> usize {
        let slots = self.slots.lock().expect("session slot lock poisoned");
        slots
            .iter()
            .find(|s| matches!(s, Some(slot) if slot.id == id))
            .and_then(|s| s.as_ref())
            .map(|slot| slot.max_result_rows)
            .unwrap_or(self.default_max_result_rows)
    }

    /// Closes the driver connection and frees the slot. Workers already
    /// mid-call on this slot still observe their terminal state and push it
    /// normally; the spec's expectation is that callers cancel first.
    pub fn disconnect(&self, id: u64) -> Result<(), DbError> {
        let mut slots = self.slots.lock().expect("session slot lock poisoned");
        let index = slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.id == id))
            .ok_or_else(|| DbError::ObjectNotFound(format!("connection {id}")))?;

        if let Some(mut slot) = slots[index].take() {
            if let Some(conn) = Arc::get_mut(&mut slot.conn) {
                conn.close()?;
            }
        }

        Ok(())
    }

    /// Pure lookup: clones the `Arc` so the caller can run driver calls
    /// without holding the slot-table lock.
    pub fn get(&self, id: u64) -> Option<Arc<dyn DriverConnection>> {
        let slots = self.slots.lock().expect("session slot lock poisoned");
        slots
            .iter()
            .find(|s| matches!(s, Some(slot) if slot.id == id))
            .and_then(|s| s.as_ref())
            .map(|slot| slot.conn.clone())
    }

    pub fn list(&self) -> Vec<ConnectionSummary> {
        let slots = self.slots.lock().expect("session slot lock poisoned");
        slots
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|slot| ConnectionSummary {
                id: slot.id,
                driver: slot.info.driver,
                database: slot.info.database.clone(),
                host: slot.info.host.clone(),
                port: slot.info.port,
                user: slot.info.user.clone(),
            })
            .collect()
    }

    /// Invoked by the dispatcher right before launching a worker. Frees any
    /// stale cancel handle first (there shouldn't be one, since `finish_query`
    /// clears it, but a prior worker that errored out before calling
    /// `finish_query` would leave one behind), then asks the driver for a
    /// fresh one and marks the slot as having a query in flight.
    ///
    /// Returns `false` if the slot id is unknown, `true` otherwise
    /// (cancellation on this driver may still be a no-op if the driver
    /// doesn't support it — that is an implementation detail of the
    /// returned handle, not visible here).
    pub fn prepare_cancel(&self, id: u64) -> bool {
        let mut slots = self.slots.lock().expect("session slot lock poisoned");
        let slot = match slots
            .iter_mut()
            .find(|s| matches!(s, Some(slot) if slot.id == id))
            .and_then(|s| s.as_mut())
        {
            Some(slot) => slot,
            None => return false,
        };

        slot.cancel_handle = None;
        let handle = slot.conn.prepare_cancel();
        slot.cancel_handle = Some(handle);
        slot.query_active = true;
        true
    }

    /// Looks up the slot's current cancel handle and invokes the driver's
    /// cancel through it. Safe to call from any thread — the handle itself
    /// is `Send + Sync` and documented to tolerate concurrent invocation
    /// from a thread other than the one inside the blocking driver call.
    pub fn cancel_query(&self, id: u64) -> Result<CancelOutcome, DbError> {
        let handle = {
            let slots = self.slots.lock().expect("session slot lock poisoned");
            let slot = slots
                .iter()
                .find(|s| matches!(s, Some(slot) if slot.id == id))
                .and_then(|s| s.as_ref())
                .ok_or_else(|| DbError::ObjectNotFound(format!("connection {id}")))?;

            if !slot.query_active {
                return Ok(CancelOutcome::NoOp);
            }
            slot.cancel_handle.clone()
        };

        match handle {
            Some(handle) => {
                handle.cancel()?;
                Ok(CancelOutcome::Cancelled)
            }
            None => Ok(CancelOutcome::NoOp),
        }
    }

    /// Called by the worker, unconditionally, once the driver call returns.
    /// Clears `query_active` and drops the cancel handle — the invariant
    /// in spec §4.2 (`cancel_handle.is_some() iff query_active`) holds for
    /// the interval between `prepare_cancel` and this call.
    pub fn finish_query(&self, id: u64) {
        let mut slots = self.slots.lock().expect("session slot lock poisoned");
        if let Some(slot) = slots
            .iter_mut()
            .find(|s| matches!(s, Some(slot) if slot.id == id))
            .and_then(|s| s.as_mut())
        {
            slot.cancel_handle = None;
            slot.query_active = false;
        }
    }

    /// Whether `id` currently names an occupied slot.
    pub fn contains(&self, id: u64) -> bool {
        let slots = self.slots.lock().expect("session slot lock poisoned");
        slots.iter().any(|s| matches!(s, Some(slot) if slot.id == id))
    }

    /// Closes every open connection. Called once at daemon teardown.
    pub fn close_all(&self) {
        let mut slots = self.slots.lock().expect("session slot lock poisoned");
        for slot in slots.iter_mut() {
            if let Some(mut s) = slot.take() {
                if let Some(conn) = Arc::get_mut(&mut s.conn) {
                    if let Err(e) = conn.close() {
                        log::warn!("error closing connection {}: {e}", s.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrelay_test_support::FakeDriver;

    fn manager_with_fake_sqlite() -> SessionManager {
        let mut drivers: HashMap<DbKind, Box<dyn Driver>> = HashMap::new();
        drivers.insert(DbKind::Sqlite, FakeDriver::new(DbKind::Sqlite).as_driver_box());
        SessionManager::new(drivers, None)
    }

    #[test]
    fn connect_then_disconnect_frees_the_slot_and_next_id_differs() {
        let mgr = manager_with_fake_sqlite();
        let id1 = mgr.connect("sqlite:///tmp/a.db", None, None).unwrap();
        assert!(mgr.contains(id1));

        mgr.disconnect(id1).unwrap();
        assert!(!mgr.contains(id1));

        let id2 = mgr.connect("sqlite:///tmp/b.db", None, None).unwrap();
        assert_ne!(id1, id2, "ids must never be reused within a daemon lifetime");
    }

    #[test]
    fn connect_rejects_unsupported_driver() {
        let mgr = manager_with_fake_sqlite();
        let err = mgr.connect("postgres://localhost/db", None, None).unwrap_err();
        assert!(matches!(err, DbError::NotSupported(_)));
    }

    #[test]
    fn pool_exhaustion_is_reported_as_non_fatal_error() {
        let mgr = manager_with_fake_sqlite();
        for _ in 0..MAX_SLOTS {
            mgr.connect("sqlite:///tmp/a.db", None, None).unwrap();
        }
        let err = mgr.connect("sqlite:///tmp/overflow.db", None, None).unwrap_err();
        assert!(matches!(err, DbError::PoolExhausted(MAX_SLOTS)));
    }

    #[test]
    fn disconnect_of_unknown_id_is_an_error() {
        let mgr = manager_with_fake_sqlite();
        assert!(mgr.disconnect(999).is_err());
    }

    #[test]
    fn prepare_cancel_and_finish_query_track_query_active_invariant() {
        let mgr = manager_with_fake_sqlite();
        let id = mgr.connect("sqlite:///tmp/a.db", None, None).unwrap();

        assert_eq!(mgr.cancel_query(id).unwrap(), CancelOutcome::NoOp);

        assert!(mgr.prepare_cancel(id));
        assert_eq!(mgr.cancel_query(id).unwrap(), CancelOutcome::Cancelled);

        mgr.finish_query(id);
        assert_eq!(mgr.cancel_query(id).unwrap(), CancelOutcome::NoOp);
    }

    #[test]
    fn prepare_cancel_on_unknown_slot_returns_false() {
        let mgr = manager_with_fake_sqlite();
        assert!(!mgr.prepare_cancel(999));
    }

    #[test]
    fn list_reflects_connected_slots() {
        let mgr = manager_with_fake_sqlite();
        let id = mgr.connect("sqlite:///tmp/a.db", None, None).unwrap();
        let summaries = mgr.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, id);
        assert_eq!(summaries[0].driver, "sqlite");
    }
}
