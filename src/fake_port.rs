//! In-memory board used by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::relay_port::Buffer;
use crate::relay_port::ConnectionConfig;
use crate::relay_port::PortOpener;
use crate::relay_port::RelayPort;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fail {
    Open,
    Clear,
    Write,
    Flush,
    Read,
}

#[derive(Debug, Default)]
pub struct Board {
    pub written: Vec<u8>,
    pub reply: VecDeque<u8>,
    /// How long each read takes before it returns, in order. Reads not listed
    /// here return at once. A read slower than the port timeout times out.
    pub read_delays: VecDeque<Duration>,
    pub timeouts: Vec<Duration>,
    pub timeout: Duration,
    pub pending_input: u32,
    pub pending_output: u32,
    pub cleared: Vec<Buffer>,
    pub opened: usize,
    pub closed: usize,
    pub fail: Vec<Fail>,
}

impl Board {
    fn failing(&self, step: Fail) -> io::Result<()> {
        match self.fail.contains(&step) {
            true => Err(io::Error::new(io::ErrorKind::Other, format!("{:?} failed", step))),
            false => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeOpener {
    pub board: Arc<Mutex<Board>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(steps: &[Fail]) -> Self {
        let opener = Self::new();
        opener.board().fail = steps.to_vec();
        opener
    }

    pub fn board(&self) -> std::sync::MutexGuard<'_, Board> {
        self.board.lock().unwrap()
    }

    pub fn config() -> ConnectionConfig {
        ConnectionConfig::new("fake0").with_settle_delays(Default::default(), Default::default())
    }
}

impl PortOpener for FakeOpener {
    fn open(&self, config: &ConnectionConfig) -> io::Result<Box<dyn RelayPort>> {
        let mut board = self.board();
        if board.fail.contains(&Fail::Open) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No such device {}", config.device),
            ));
        }
        board.opened += 1;
        board.timeout = config.read_timeout;
        Ok(Box::new(FakePort {
            board: self.board.clone(),
        }))
    }
}

pub struct FakePort {
    board: Arc<Mutex<Board>>,
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (delay, timeout) = {
            let mut board = self.board.lock().unwrap();
            board.failing(Fail::Read)?;
            (board.read_delays.pop_front().unwrap_or_default(), board.timeout)
        };
        if delay >= timeout {
            thread::sleep(timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        thread::sleep(delay);

        let mut board = self.board.lock().unwrap();
        if board.reply.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        let mut n = 0;
        while n < buf.len() {
            match board.reply.pop_front() {
                Some(byte) => buf[n] = byte,
                None => break,
            }
            n += 1;
        }
        Ok(n)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut board = self.board.lock().unwrap();
        board.failing(Fail::Write)?;
        board.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.board.lock().unwrap().failing(Fail::Flush)
    }
}

impl RelayPort for FakePort {
    fn bytes_to_read(&self) -> io::Result<u32> {
        Ok(self.board.lock().unwrap().pending_input)
    }

    fn bytes_to_write(&self) -> io::Result<u32> {
        Ok(self.board.lock().unwrap().pending_output)
    }

    fn clear(&self, buffer: Buffer) -> io::Result<()> {
        let mut board = self.board.lock().unwrap();
        board.failing(Fail::Clear)?;
        match buffer {
            Buffer::Input => board.pending_input = 0,
            Buffer::Output => board.pending_output = 0,
            Buffer::All => {
                board.pending_input = 0;
                board.pending_output = 0;
            }
        }
        board.cleared.push(buffer);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let mut board = self.board.lock().unwrap();
        board.timeout = timeout;
        board.timeouts.push(timeout);
        Ok(())
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        if let Ok(mut board) = self.board.lock() {
            board.closed += 1;
        }
    }
}
