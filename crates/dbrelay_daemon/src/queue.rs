use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// What kind of async request a worker was launched for (spec §4.3).
#[derive(Debug, Clone)]
pub enum AsyncQueryKind {
    PaginatedRead {
        table: String,
        schema: Option<String>,
        offset: u64,
        limit: u64,
    },
    RawStatement {
        sql: String,
    },
}

/// Terminal outcome of an async query, populated exactly once.
#[derive(Debug, Clone)]
pub enum AsyncOutcome {
    Completed(serde_json::Value),
    Cancelled,
    Error { code: i64, message: String },
}

/// One async-query record (spec §3 "Async query"). Lives from dispatch
/// through to the moment the response writer serializes its terminal state.
pub struct AsyncQueryHandle {
    pub query_id: u64,
    pub slot_id: u64,
    /// Deep copy of the JSON-RPC `id` the client sent. `None` means the
    /// triggering message was a notification (no `id` member at all) — the
    /// response writer must drop this record silently instead of emitting
    /// an envelope for it.
    pub request_id: Option<serde_json::Value>,
    pub cancel_requested: AtomicBool,
    outcome: Mutex<Option<AsyncOutcome>>,
}

impl AsyncQueryHandle {
    fn new(query_id: u64, slot_id: u64, request_id: Option<serde_json::Value>) -> Self {
        Self {
            query_id,
            slot_id,
            request_id,
            cancel_requested: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    pub fn set_outcome(&self, outcome: AsyncOutcome) {
        let mut guard = self.outcome.lock().expect("async outcome lock poisoned");
        *guard = Some(outcome);
    }

    pub fn take_outcome(&self) -> Option<AsyncOutcome> {
        self.outcome.lock().expect("async outcome lock poisoned").take()
    }
}

struct Inner {
    fifo: VecDeque<Arc<AsyncQueryHandle>>,
    active_by_slot: HashMap<u64, Arc<AsyncQueryHandle>>,
}

/// Thread-safe FIFO of terminal async-query records, plus a self-pipe that
/// wakes the protocol loop's readiness wait whenever a record is pushed
/// (spec §3/§4.3, design note "Cross-thread safe writes").
///
/// Workers never touch the output stream directly — they push here, and
/// only the protocol thread, on waking, drains the pipe and pops every
/// completed record in FIFO order.
pub struct CompletionQueue {
    inner: Mutex<Inner>,
    wake_writer: Mutex<UnixStream>,
    wake_reader: Mutex<UnixStream>,
    next_query_id: AtomicU64,
}

impl CompletionQueue {
    pub fn new() -> std::io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                fifo: VecDeque::new(),
                active_by_slot: HashMap::new(),
            }),
            wake_writer: Mutex::new(writer),
            wake_reader: Mutex::new(reader),
            next_query_id: AtomicU64::new(1),
        })
    }

    /// Raw fd of the reader end, for the readiness multiplexer to poll on.
    pub fn reader_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        self.wake_reader.lock().expect("wake reader lock poisoned").as_raw_fd()
    }

    /// Registers a new in-flight query before its worker is launched, so a
    /// `cancel` arriving concurrently can always find it by slot id.
    pub fn register(
        &self,
        slot_id: u64,
        request_id: Option<serde_json::Value>,
    ) -> Arc<AsyncQueryHandle> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(AsyncQueryHandle::new(query_id, slot_id, request_id));

        let mut inner = self.inner.lock().expect("completion queue lock poisoned");
        inner.active_by_slot.insert(slot_id, handle.clone());
        handle
    }

    /// Looks up the currently-running query on `slot_id` and flags it for
    /// cancellation. Returns `true` iff a running query was found — this is
    /// the `cancel` method's synchronous result.
    pub fn request_cancel(&self, slot_id: u64) -> bool {
        let inner = self.inner.lock().expect("completion queue lock poisoned");
        match inner.active_by_slot.get(&slot_id) {
            Some(handle) => {
                handle.cancel_requested.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Called by the worker once it has recorded a terminal outcome on the
    /// handle. Removes it from the active list, appends it to the FIFO, and
    /// writes one wake byte.
    pub fn push(&self, handle: Arc<AsyncQueryHandle>) {
        {
            let mut inner = self.inner.lock().expect("completion queue lock poisoned");
            inner.active_by_slot.remove(&handle.slot_id);
            inner.fifo.push_back(handle);
        }

        let mut writer = self.wake_writer.lock().expect("wake writer lock poisoned");
        match writer.write_all(&[0u8]) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // Pipe buffer is full; the reader will still see readiness
                // from the bytes already queued, and draining is level
                // triggered on the byte count, not edge triggered per push.
            }
            Err(e) => log::warn!("failed to write completion wake byte: {e}"),
        }
    }

    /// Non-blocking pop of the oldest completed query, in push order.
    pub fn pop(&self) -> Option<Arc<AsyncQueryHandle>> {
        let mut inner = self.inner.lock().expect("completion queue lock poisoned");
        inner.fifo.pop_front()
    }

    /// Number of queries currently registered as in-flight (launched but
    /// not yet pushed to the FIFO). Used by the shutdown drain to decide
    /// when it is safe to stop waiting for stragglers.
    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("completion queue lock poisoned").active_by_slot.len()
    }

    /// Drains every currently-available byte from the self-pipe. Must be
    /// called before `pop()`-ing so a coalesced wake-up (many pushes, one
    /// readiness event) still results in every completion being drained —
    /// the pipe is just a level-triggered signal, not a counted one.
    pub fn drain_notify(&self) {
        let mut reader = self.wake_reader.lock().expect("wake reader lock poisoned");
        let mut buf = [0u8; 256];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("failed to drain completion wake pipe: {e}");
                    break;
                }
            }
        }
    }
}
