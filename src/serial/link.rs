/// Byte transport between host and imager client

use crate::error::{H8dError, Result};
use crate::serial::command::BaudRate;
use crate::serial::session::AbortHandle;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// How long one poll of a serial port waits for a byte
pub const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A full-duplex byte link to the client
///
/// `poll_byte` never waits for data: it returns `Ok(None)` when nothing has
/// arrived yet, which the session treats as one idle poll.
pub trait SerialLink {
    /// Send bytes
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Take the next received byte, if any
    fn poll_byte(&mut self) -> Result<Option<u8>>;

    /// Drop anything received but not yet read
    fn discard_input(&mut self) -> Result<()> {
        while self.poll_byte()?.is_some() {}
        Ok(())
    }

    /// Human-readable name of the link
    fn name(&self) -> String;
}

/// Read at most one byte; a read that times out or would block is `None`
fn read_one<R: Read + ?Sized>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Link over any reader/writer
///
/// The stream must not block indefinitely on reads: give it a read timeout
/// or put it in non-blocking mode, otherwise aborts and bounded waits are
/// never seen while the client is silent.
#[derive(Debug)]
pub struct IoLink<T: Read + Write> {
    inner: T,
    name: String,
}

impl<T: Read + Write> IoLink<T> {
    /// Wrap a stream
    pub fn new<S: Into<String>>(inner: T, name: S) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }

    /// Unwrap the stream
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> SerialLink for IoLink<T> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.inner.flush()?;
        Ok(())
    }

    fn poll_byte(&mut self) -> Result<Option<u8>> {
        read_one(&mut self.inner)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Link over a serial port in raw 8N1 mode
pub struct PortLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialLink for PortLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn poll_byte(&mut self) -> Result<Option<u8>> {
        read_one(&mut self.port)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| H8dError::Io(e.into()))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Open a serial port at `rate`, 8 data bits, no parity, one stop bit
///
/// Reads give up after [`PORT_READ_TIMEOUT`] so every wait stays a poll.
pub fn open_port(path: &str, rate: BaudRate) -> Result<PortLink> {
    let port = serialport::new(path, rate.bps())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(PORT_READ_TIMEOUT)
        .open()
        .map_err(|e| H8dError::PortUnavailable(format!("{}: {}", path, e)))?;
    log::info!("opened {} at {} baud", path, rate.bps());
    Ok(PortLink {
        port,
        name: path.to_string(),
    })
}

/// In-memory link replaying a scripted client
///
/// Replies are queued up front; `None` entries are idle polls. Every byte
/// the host sends is recorded. An abort can be armed to fire once a given
/// number of bytes has been delivered to the host.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    incoming: VecDeque<Option<u8>>,
    sent: Vec<u8>,
    delivered: usize,
    abort_after: Option<(usize, AbortHandle)>,
}

impl ScriptedLink {
    /// Empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue reply bytes
    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.push_reply(bytes);
        self
    }

    /// Queue reply bytes on an existing link
    pub fn push_reply(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().map(|&b| Some(b)));
    }

    /// Queue idle polls
    pub fn idle(mut self, polls: usize) -> Self {
        self.incoming.extend(std::iter::repeat(None).take(polls));
        self
    }

    /// Trigger `handle` once `bytes` have been delivered
    pub fn abort_after(mut self, bytes: usize, handle: AbortHandle) -> Self {
        self.abort_after = Some((bytes, handle));
        self
    }

    /// Everything the host sent
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Bytes delivered to the host so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Script entries not yet consumed
    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl SerialLink for ScriptedLink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.sent.extend_from_slice(data);
        Ok(())
    }

    fn poll_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.incoming.pop_front().flatten();
        if byte.is_some() {
            self.delivered += 1;
            if let Some((limit, handle)) = &self.abort_after {
                if self.delivered >= *limit {
                    handle.trigger();
                }
            }
        }
        Ok(byte)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.incoming.clear();
        Ok(())
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scripted_link() {
        let mut link = ScriptedLink::new().reply(b"?").idle(1).reply(b"3");
        assert_eq!(link.poll_byte().unwrap(), Some(b'?'));
        assert_eq!(link.poll_byte().unwrap(), None);
        assert_eq!(link.poll_byte().unwrap(), Some(b'3'));
        assert_eq!(link.poll_byte().unwrap(), None);
        link.write_bytes(b"Q").unwrap();
        assert_eq!(link.sent(), b"Q");
        assert_eq!(link.delivered(), 2);
    }

    #[test]
    fn test_scripted_abort() {
        let handle = AbortHandle::new();
        let mut link = ScriptedLink::new().reply(b"abc").abort_after(2, handle.clone());
        link.poll_byte().unwrap();
        assert!(!handle.is_set());
        link.poll_byte().unwrap();
        assert!(handle.is_set());
    }

    #[test]
    fn test_io_link() {
        let mut link = IoLink::new(Cursor::new(vec![b'R']), "cursor");
        assert_eq!(link.poll_byte().unwrap(), Some(b'R'));
        assert_eq!(link.poll_byte().unwrap(), None);
        link.write_bytes(b"xy").unwrap();
        assert_eq!(link.name(), "cursor");
    }

    #[cfg(unix)]
    #[test]
    fn test_io_link_polls_without_blocking() {
        use std::os::unix::net::UnixStream;

        let (host, mut client) = UnixStream::pair().unwrap();
        host.set_read_timeout(Some(Duration::from_millis(1))).unwrap();
        let mut link = IoLink::new(host, "socket");
        assert_eq!(link.poll_byte().unwrap(), None);

        client.write_all(b"abc").unwrap();
        assert_eq!(link.poll_byte().unwrap(), Some(b'a'));
        link.discard_input().unwrap();
        assert_eq!(link.poll_byte().unwrap(), None);
    }

    #[test]
    fn test_open_port_missing() {
        assert!(matches!(
            open_port("/nonexistent/ttyS99", BaudRate::B9600),
            Err(H8dError::PortUnavailable(_))
        ));
    }
}
