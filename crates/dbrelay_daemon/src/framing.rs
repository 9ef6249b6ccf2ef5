//! Non-blocking newline-delimited JSON reader (spec §4.4 "Framing").
//!
//! Wraps a raw fd directly rather than `std::io::Stdin` because the stdlib
//! wrapper buffers internally and offers no nonblocking mode; a daemon that
//! must also wait on a second fd (the completion queue's self-pipe) needs
//! `read()` to return `WouldBlock` instead of parking the thread.

use std::io;
use std::os::fd::RawFd;

/// Hard cap on how large the pending-bytes buffer may grow before a frame
/// is considered malformed. Guards against a client that never sends a
/// newline from growing memory without bound.
const MAX_BUFFER_BYTES: usize = 64 * 1024 * 1024;

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Accumulates bytes read from a non-blocking fd and splits them into
/// newline-terminated frames. Partial frames survive across calls to
/// `fill`; the buffer is freed when the reader is dropped.
pub struct FrameReader {
    fd: RawFd,
    buf: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Some bytes were read (frames may now be available via `next_frame`).
    Read,
    /// `read()` would have blocked; nothing new arrived this call.
    WouldBlock,
    /// The peer closed its end of the stream.
    Eof,
}

impl FrameReader {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            buf: Vec::new(),
        }
    }

    /// Drains everything currently readable on the fd into the internal
    /// buffer without blocking.
    pub fn fill(&mut self) -> io::Result<FillOutcome> {
        let mut chunk = [0u8; 65536];
        let mut read_any = false;

        loop {
            let n = unsafe {
                libc::read(
                    self.fd,
                    chunk.as_mut_ptr() as *mut libc::c_void,
                    chunk.len(),
                )
            };

            if n > 0 {
                read_any = true;
                self.buf.extend_from_slice(&chunk[..n as usize]);
                if self.buf.len() > MAX_BUFFER_BYTES {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "frame buffer exceeded maximum size without a newline",
                    ));
                }
                if (n as usize) < chunk.len() {
                    // Short read: almost certainly drained the socket for now.
                    return Ok(FillOutcome::Read);
                }
                continue;
            }

            if n == 0 {
                return Ok(if read_any {
                    FillOutcome::Read
                } else {
                    FillOutcome::Eof
                });
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    return Ok(if read_any {
                        FillOutcome::Read
                    } else {
                        FillOutcome::WouldBlock
                    });
                }
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }

    /// Splits off one complete frame (bytes up to, not including, the first
    /// newline) if the buffer currently contains one. Empty lines are
    /// returned as empty `Vec`s — the caller skips them silently per spec.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        Some(frame)
    }

    /// At end-of-stream, any non-empty partial frame still in the buffer
    /// counts as one final frame (spec §4.4 "Boundary behaviour").
    pub fn take_final_partial_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn splits_multiple_frames_from_one_fill() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        writer.write_all(b"{\"a\":1}\n{\"b\":2}\n").unwrap();
        drop(writer);

        let mut fr = FrameReader::new(reader.as_raw_fd());
        set_nonblocking(reader.as_raw_fd()).unwrap();
        assert_eq!(fr.fill().unwrap(), FillOutcome::Read);

        assert_eq!(fr.next_frame().unwrap(), b"{\"a\":1}".to_vec());
        assert_eq!(fr.next_frame().unwrap(), b"{\"b\":2}".to_vec());
        assert!(fr.next_frame().is_none());
    }

    #[test]
    fn partial_frame_survives_until_newline_arrives() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        writer.write_all(b"{\"a\":").unwrap();

        let mut fr = FrameReader::new(reader.as_raw_fd());
        set_nonblocking(reader.as_raw_fd()).unwrap();
        fr.fill().unwrap();
        assert!(fr.next_frame().is_none());

        writer.write_all(b"1}\n").unwrap();
        fr.fill().unwrap();
        assert_eq!(fr.next_frame().unwrap(), b"{\"a\":1}".to_vec());
    }

    #[test]
    fn empty_line_yields_an_empty_frame_for_the_caller_to_skip() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        writer.write_all(b"\n").unwrap();
        drop(writer);

        let mut fr = FrameReader::new(reader.as_raw_fd());
        set_nonblocking(reader.as_raw_fd()).unwrap();
        fr.fill().unwrap();
        assert_eq!(fr.next_frame().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn eof_with_unterminated_bytes_yields_one_final_frame() {
        let (writer, reader) = UnixStream::pair().unwrap();
        let mut writer = writer;
        writer.write_all(b"{\"trailing\":true}").unwrap();
        drop(writer);

        let mut fr = FrameReader::new(reader.as_raw_fd());
        set_nonblocking(reader.as_raw_fd()).unwrap();

        loop {
            match fr.fill().unwrap() {
                FillOutcome::Eof => break,
                FillOutcome::Read => continue,
                FillOutcome::WouldBlock => continue,
            }
        }

        assert!(fr.next_frame().is_none());
        assert_eq!(
            fr.take_final_partial_frame().unwrap(),
            b"{\"trailing\":true}".to_vec()
        );
    }
}
