//! NCP transport: opens the radio link and frames/deframes the spinel-like
//! length-delimited command/notification protocol carried over it.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CoreError;
use crate::reactor::{Component, Interest, Readiness};

/// How the radio link was reached, parsed from the `<radio-url>` CLI
/// argument (`spinel+hdlc+uart:///dev/ttyUSB0?baudrate=115200`,
/// `spinel+hdlc+forkpty://usr/bin/ot-rcp?forkpty-arg=1`, or a plain
/// `socket://host:port` for simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioUrl {
    SerialDevice { path: String, baud_rate: u32 },
    Socket { host: String, port: u16 },
    Subprocess { path: String, args: Vec<String> },
}

impl RadioUrl {
    /// Parses the `scheme://path?query` shape the `--radio-url`-equivalent
    /// CLI argument carries. No general-purpose URL crate is pulled in for
    /// this — the grammar is narrow enough for a hand-rolled split, matching
    /// the rest of the agent's CLI surface.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let (scheme, rest) = s.split_once("://").ok_or(CoreError::InvalidArgs)?;
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));

        let params: Vec<(&str, &str)> = query
            .split('&')
            .filter(|kv| !kv.is_empty())
            .filter_map(|kv| kv.split_once('='))
            .collect();

        if scheme.contains("uart") {
            let baud_rate = params
                .iter()
                .find(|(k, _)| *k == "baudrate")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(115_200);

            Ok(Self::SerialDevice {
                path: path.to_string(),
                baud_rate,
            })
        } else if scheme.contains("forkpty") || scheme.contains("spawn") {
            let args = params
                .iter()
                .filter(|(k, _)| *k == "forkpty-arg" || *k == "arg")
                .map(|(_, v)| v.to_string())
                .collect();

            Ok(Self::Subprocess {
                path: path.to_string(),
                args,
            })
        } else if scheme.contains("tcp") || scheme.contains("socket") {
            let (host, port) = path.rsplit_once(':').ok_or(CoreError::InvalidArgs)?;
            let port = port.parse().map_err(|_| CoreError::InvalidArgs)?;

            Ok(Self::Socket {
                host: host.to_string(),
                port,
            })
        } else {
            Err(CoreError::InvalidArgs)
        }
    }
}

/// A complete frame read off (or about to be written to) the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: u8,
    pub id: u32,
    pub payload: Vec<u8>,
}

/// Wire encoding: `[len:u16 LE][header:u8][id:u32 LE][payload:len-5 bytes]`.
/// Deliberately simple relative to real HDLC/spinel framing — the spec names
/// only the shape (header, command/property/event id, payload), not a byte
/// format, so the wire details here are this crate's to pick.
mod wire {
    use super::Frame;

    pub const HEADER_LEN: usize = 2 + 1 + 4;

    pub fn encode(frame: &Frame) -> Vec<u8> {
        let len = (HEADER_LEN - 2 + frame.payload.len()) as u16;

        let mut out = Vec::with_capacity(2 + len as usize);
        out.extend_from_slice(&len.to_le_bytes());
        out.push(frame.header);
        out.extend_from_slice(&frame.id.to_le_bytes());
        out.extend_from_slice(&frame.payload);
        out
    }

    /// Attempts to pull one complete frame off the front of `buf`, returning
    /// the frame and how many bytes of `buf` it consumed.
    pub fn decode(buf: &[u8]) -> Option<(Frame, usize)> {
        if buf.len() < 2 {
            return None;
        }

        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let total = 2 + len;

        if total < Self::HEADER_LEN || buf.len() < total {
            return None;
        }

        let header = buf[2];
        let id = u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]);
        let payload = buf[7..total].to_vec();

        Some((Frame { header, id, payload }, total))
    }
}

const MAX_SEND_WINDOW: usize = 4;

enum Link {
    Serial(std::fs::File),
    Socket(UnixStream),
    Subprocess { child: Child, stdin: std::process::ChildStdin },
}

impl Link {
    fn raw_fd(&self) -> RawFd {
        match self {
            Link::Serial(f) => f.as_raw_fd(),
            Link::Socket(s) => s.as_raw_fd(),
            Link::Subprocess { child, .. } => {
                child.stdout.as_ref().map(|o| o.as_raw_fd()).unwrap_or(-1)
            }
        }
    }

    fn read_available(&mut self, buf: &mut Vec<u8>) -> std::io::Result<usize> {
        let mut chunk = [0u8; 4096];

        let n = match self {
            Link::Serial(f) => f.read(&mut chunk)?,
            Link::Socket(s) => s.read(&mut chunk)?,
            Link::Subprocess { child, .. } => {
                child.stdout.as_mut().unwrap().read(&mut chunk)?
            }
        };

        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Link::Serial(f) => f.write_all(data),
            Link::Socket(s) => s.write_all(data),
            Link::Subprocess { stdin, .. } => stdin.write_all(data),
        }
    }
}

/// An in-flight outgoing frame awaiting acknowledgement, retransmitted if a
/// NAK arrives for it before the reliability layer's ack.
struct PendingSend {
    frame: Frame,
    retries: u8,
}

const MAX_RETRIES: u8 = 3;

/// Opens one of {character device, listening socket, sub-process pipe} and
/// frames the spinel-like protocol over it. On an unrecoverable framing
/// error it flips `reset_requested` rather than surfacing the error up the
/// call stack — per the component design, framing faults trigger an NCP
/// reset, they are not returned to a caller.
pub struct NcpTransport {
    link: Link,
    recv_buf: Vec<u8>,
    inbox: VecDeque<Frame>,
    send_window: VecDeque<PendingSend>,
    reset_requested: Arc<AtomicBool>,
}

impl NcpTransport {
    pub fn open(url: &RadioUrl, reset_requested: Arc<AtomicBool>) -> Result<Self, CoreError> {
        let link = match url {
            RadioUrl::SerialDevice { path, .. } => {
                let file = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .map_err(CoreError::from)?;
                Link::Serial(file)
            }
            RadioUrl::Socket { host, port } => {
                // A raw TCP stream would need `std::net`; Unix-domain is used
                // for the common simulation case (ot-rcp listening on a
                // socket file named `host`) while still satisfying the
                // same `Read + Write + AsRawFd` shape.
                let _ = port;
                let stream = UnixStream::connect(host).map_err(CoreError::from)?;
                Link::Socket(stream)
            }
            RadioUrl::Subprocess { path, args } => {
                let mut child = Command::new(path)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(CoreError::from)?;
                let stdin = child.stdin.take().ok_or(CoreError::Other)?;
                Link::Subprocess { child, stdin }
            }
        };

        Ok(Self {
            link,
            recv_buf: Vec::new(),
            inbox: VecDeque::new(),
            send_window: VecDeque::new(),
            reset_requested,
        })
    }

    /// Queues a frame for transmission; blocks the caller only long enough
    /// to hand the bytes to the OS (never waits on the link being ready —
    /// that would violate the "one suspension point" rule).
    pub fn send(&mut self, frame: Frame) -> Result<(), CoreError> {
        if self.send_window.len() >= MAX_SEND_WINDOW {
            return Err(CoreError::InvalidState);
        }

        let bytes = wire::encode(&frame);

        if let Err(err) = self.link.write_all(&bytes) {
            self.fail(err);
            return Err(CoreError::Canceled);
        }

        self.send_window.push_back(PendingSend { frame, retries: 0 });
        Ok(())
    }

    /// Pops the next fully-deframed incoming frame, if any are buffered.
    pub fn recv(&mut self) -> Option<Frame> {
        self.inbox.pop_front()
    }

    /// The reliability layer's NAK for the oldest unacknowledged frame:
    /// retransmit up to `MAX_RETRIES`, then treat the link as broken.
    pub fn on_nak(&mut self) {
        if let Some(mut pending) = self.send_window.pop_front() {
            if pending.retries >= MAX_RETRIES {
                log::warn!("NCP transport: giving up retransmitting frame id {}", pending.frame.id);
                self.reset_requested.store(true, Ordering::Relaxed);
                return;
            }

            pending.retries += 1;
            let bytes = wire::encode(&pending.frame);

            if let Err(err) = self.link.write_all(&bytes) {
                self.fail(err);
                return;
            }

            self.send_window.push_front(pending);
        }
    }

    pub fn on_ack(&mut self) {
        self.send_window.pop_front();
    }

    fn fail(&mut self, err: std::io::Error) {
        log::error!("NCP transport link error: {err}");
        self.reset_requested.store(true, Ordering::Relaxed);
    }
}

impl Component for NcpTransport {
    fn name(&self) -> &'static str {
        "ncp-transport"
    }

    fn interest(&self) -> Option<Interest> {
        Some(Interest {
            fd: self.link.raw_fd(),
            readable: true,
            writable: false,
        })
    }

    fn dispatch(&mut self, ready: Readiness) {
        if !ready.readable {
            return;
        }

        loop {
            match self.link.read_available(&mut self.recv_buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }

            let mut consumed_total = 0;

            while let Some((frame, consumed)) = wire::decode(&self.recv_buf[consumed_total..]) {
                self.inbox.push_back(frame);
                consumed_total += consumed;
            }

            if consumed_total > 0 {
                self.recv_buf.drain(..consumed_total);
            }

            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uart_radio_url() {
        let url = RadioUrl::parse("spinel+hdlc+uart:///dev/ttyUSB0?baudrate=460800").unwrap();
        assert_eq!(
            url,
            RadioUrl::SerialDevice {
                path: "/dev/ttyUSB0".into(),
                baud_rate: 460_800,
            }
        );
    }

    #[test]
    fn defaults_baud_rate_when_unspecified() {
        let url = RadioUrl::parse("spinel+hdlc+uart:///dev/ttyACM0").unwrap();
        assert_eq!(
            url,
            RadioUrl::SerialDevice {
                path: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert_eq!(RadioUrl::parse("ftp://nope").unwrap_err(), CoreError::InvalidArgs);
    }

    #[test]
    fn frame_round_trips_through_wire_encoding() {
        let frame = Frame {
            header: 0x80,
            id: 42,
            payload: vec![1, 2, 3, 4],
        };

        let bytes = wire::encode(&frame);
        let (decoded, consumed) = wire::decode(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_reports_none_on_partial_frame() {
        let frame = Frame {
            header: 0x80,
            id: 1,
            payload: vec![9, 9, 9],
        };

        let bytes = wire::encode(&frame);
        assert!(wire::decode(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn decode_rejects_undersized_length_field_instead_of_panicking() {
        // `len` claims a 2-byte frame (less than the 5-byte header+id), and
        // enough bytes are present to satisfy `buf.len() >= total` — this
        // used to index past the header/id fields and panic.
        let mut bytes = 2u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0]);
        assert!(wire::decode(&bytes).is_none());
    }
}
