//! Protocol loop: owns the byte streams, frames messages, dispatches
//! requests, and serializes responses (spec §4.4).

use std::io::{self, Write};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value as Json, json};

use crate::dispatch::{
    Dispatcher, ERR_INVALID_REQUEST, ERR_METHOD_NOT_FOUND, ERR_PARSE, HandlerOutcome, parse_frame,
};
use crate::framing::{FillOutcome, FrameReader};
use crate::queue::{AsyncOutcome, CompletionQueue};

/// Readiness wait timeout: bounds how long `poll()` blocks so the loop can
/// re-check the shutdown flag even with no activity on either fd.
const POLL_TIMEOUT_MS: i32 = 100;

/// Upper bound on how long shutdown waits for already-launched workers to
/// finish and push their completions before giving up on them.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProtocolLoop<W: Write> {
    reader: FrameReader,
    writer: W,
    dispatcher: Dispatcher,
    queue: Arc<CompletionQueue>,
    shutdown_requested: Arc<AtomicBool>,
}

impl<W: Write> ProtocolLoop<W> {
    pub fn new(
        stdin_fd: RawFd,
        writer: W,
        dispatcher: Dispatcher,
        queue: Arc<CompletionQueue>,
        shutdown_requested: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        crate::framing::set_nonblocking(stdin_fd)?;
        Ok(Self {
            reader: FrameReader::new(stdin_fd),
            writer,
            dispatcher,
            queue,
            shutdown_requested,
        })
    }

    /// Runs until EOF on stdin or the shutdown flag is observed.
    pub fn run(&mut self, stdin_fd: RawFd) {
        loop {
            let wake_fd = self.queue.reader_fd();
            let mut fds = [
                libc::pollfd {
                    fd: stdin_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: wake_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("readiness wait failed: {err}");
                break;
            }

            // Completions first: draining the wake pipe and popping every
            // finished query before touching new input keeps responses
            // flowing even under a flood of inbound requests.
            self.queue.drain_notify();
            self.emit_all_completions();

            match self.reader.fill() {
                Ok(FillOutcome::Eof) => {
                    if let Some(frame) = self.reader.take_final_partial_frame() {
                        self.process_frame(&frame);
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("failed to read from input stream: {e}");
                    break;
                }
            }

            while let Some(frame) = self.reader.next_frame() {
                self.process_frame(&frame);
            }

            if self.shutdown_requested.load(Ordering::SeqCst) {
                break;
            }
        }

        self.drain_on_shutdown();
    }

    fn process_frame(&mut self, frame: &[u8]) {
        if frame.is_empty() {
            return;
        }

        let parsed = match parse_frame(frame) {
            Ok(p) => p,
            Err(_) => {
                self.write_error(Json::Null, ERR_PARSE, "Parse error");
                return;
            }
        };

        let is_notification = parsed.id.is_none();
        let response_id = parsed.id.clone().unwrap_or(Json::Null);

        let method = match (&parsed.method, parsed.jsonrpc_is_2_0) {
            (Some(method), true) => method.clone(),
            _ => {
                if !is_notification {
                    self.write_error(response_id, ERR_INVALID_REQUEST, "Invalid Request");
                }
                return;
            }
        };

        let outcome = self.dispatcher.dispatch(&method, &parsed.params, parsed.id.clone());

        if is_notification {
            return;
        }

        match outcome {
            HandlerOutcome::Deferred => {}
            HandlerOutcome::Sync(Ok(result)) => self.write_result(response_id, result),
            HandlerOutcome::Sync(Err(e)) => self.write_error(response_id, e.code, e.message),
        }
    }

    fn emit_all_completions(&mut self) {
        while let Some(handle) = self.queue.pop() {
            let request_id = match &handle.request_id {
                Some(id) => id.clone(),
                None => continue, // notification: drop silently.
            };

            match handle.take_outcome() {
                Some(AsyncOutcome::Completed(value)) => self.write_result(request_id, value),
                Some(AsyncOutcome::Cancelled) => {
                    self.write_error(request_id, -32000, "Query cancelled")
                }
                Some(AsyncOutcome::Error { code, message }) => {
                    self.write_error(request_id, code, message)
                }
                None => log::error!(
                    "completed async query {} had no outcome recorded",
                    handle.query_id
                ),
            }
        }
    }

    fn write_result(&mut self, id: Json, result: Json) {
        self.write_line(&json!({ "jsonrpc": "2.0", "id": id, "result": result }));
    }

    fn write_error(&mut self, id: Json, code: i64, message: impl Into<String>) {
        self.write_line(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message.into() },
        }));
    }

    fn write_line(&mut self, value: &Json) {
        let mut line = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("failed to serialize response: {e}");
                return;
            }
        };
        line.push(b'\n');
        if let Err(e) = self.writer.write_all(&line) {
            log::warn!("failed to write response: {e}");
            return;
        }
        let _ = self.writer.flush();
    }

    /// Best-effort wait for already-launched workers to finish once the
    /// loop has decided to exit. Any async query handle still active after
    /// the timeout is abandoned — its worker thread dies with the process.
    fn drain_on_shutdown(&mut self) {
        let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.queue.active_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            self.queue.drain_notify();
            self.emit_all_completions();
        }
        self.queue.drain_notify();
        self.emit_all_completions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use dbrelay_core::DbKind;
    use dbrelay_test_support::FakeDriver;
    use std::collections::HashMap;
    use std::io::Write as _;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicBool;

    struct VecWriter(Vec<u8>);
    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn make_loop(input: &UnixStream) -> ProtocolLoop<VecWriter> {
        let mut drivers: HashMap<DbKind, Box<dyn dbrelay_core::Driver>> = HashMap::new();
        drivers.insert(DbKind::Sqlite, FakeDriver::new(DbKind::Sqlite).as_driver_box());
        let session = Arc::new(SessionManager::new(drivers, None));
        let queue = Arc::new(CompletionQueue::new().unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher {
            session,
            queue: queue.clone(),
            shutdown_requested: shutdown.clone(),
        };

        ProtocolLoop::new(input.as_raw_fd(), VecWriter(Vec::new()), dispatcher, queue, shutdown)
            .unwrap()
    }

    #[test]
    fn notification_produces_no_output() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n").unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        assert!(protocol.writer.0.is_empty());
    }

    #[test]
    fn parse_error_yields_one_error_line_with_null_id() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client.write_all(b"{not json}\n").unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        let output = String::from_utf8(protocol.writer.0).unwrap();
        let line: Json = serde_json::from_str(output.trim()) .unwrap();
        assert_eq!(line["id"], Json::Null);
        assert_eq!(line["error"]["code"], json!(-32700));
    }

    #[test]
    fn connect_query_disconnect_round_trip_emits_three_ordered_responses() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"connect\",\"params\":{\"connstr\":\"sqlite:///tmp/t.db\"}}\n\
                  {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"query\",\"params\":{\"conn_id\":1,\"table\":\"users\",\"limit\":10}}\n\
                  {\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"disconnect\",\"params\":{\"conn_id\":1}}\n",
            )
            .unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        let output = String::from_utf8(protocol.writer.0).unwrap();
        let lines: Vec<Json> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], json!(1));
        assert_eq!(lines[0]["result"]["conn_id"], json!(1));
        assert_eq!(lines[1]["id"], json!(2));
        assert!(lines[1]["result"]["columns"].is_array());
        assert_eq!(lines[2]["id"], json!(3));
    }

    #[test]
    fn unknown_method_returns_method_not_found() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"frobnicate\"}\n")
            .unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        let output = String::from_utf8(protocol.writer.0).unwrap();
        let line: Json = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(line["error"]["code"], json!(ERR_METHOD_NOT_FOUND));
    }

    #[test]
    fn missing_jsonrpc_version_is_invalid_request() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client
            .write_all(b"{\"id\":1,\"method\":\"ping\"}\n")
            .unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        let output = String::from_utf8(protocol.writer.0).unwrap();
        let line: Json = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(line["error"]["code"], json!(ERR_INVALID_REQUEST));
    }

    #[test]
    fn empty_line_is_skipped_silently() {
        let (mut client, server) = UnixStream::pair().unwrap();
        client
            .write_all(b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .unwrap();
        drop(client);

        let mut protocol = make_loop(&server);
        protocol.run(server.as_raw_fd());

        let output = String::from_utf8(protocol.writer.0).unwrap();
        assert_eq!(output.lines().count(), 1);
    }
}
