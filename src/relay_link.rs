//! Driver for one KMTronic 4-channel relay board on a serial link.
//!
//! The board speaks a half-duplex request/response protocol with fixed
//! settle delays, so a [`RelayLink`] must only ever be used from one place
//! at a time. Use [`crate::relay_ctl::RelayControl`] to share it.

use log::debug;
use log::info;
use log::warn;
use std::io;
use std::io::Write;
use std::thread;
use std::time::Instant;
use thiserror::Error;

use crate::relay_frame;
use crate::relay_frame::RelayStates;
use crate::relay_frame::STATUS_REPLY_LEN;
use crate::relay_frame::STATUS_REQUEST;
use crate::relay_port::Buffer;
use crate::relay_port::ConnectionConfig;
use crate::relay_port::PortOpener;
use crate::relay_port::RelayPort;
use crate::relay_port::SerialPortOpener;
use crate::relay_types::Channel;
use crate::relay_types::InvalidChannel;
use crate::relay_types::RelayState;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to connect to {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Already connected to {device}")]
    AlreadyConnected { device: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Not connected to relay board")]
    NotConnected,

    #[error(transparent)]
    InvalidChannel(#[from] InvalidChannel),

    #[error("Failed to switch relay {channel}: {source}")]
    Io {
        channel: Channel,
        #[source]
        source: io::Error,
    },
}

struct Connection {
    port: Box<dyn RelayPort>,
    config: ConnectionConfig,
}

pub struct RelayLink<O: PortOpener = SerialPortOpener> {
    opener: O,
    connection: Option<Connection>,
    states: RelayStates,
}

impl RelayLink<SerialPortOpener> {
    pub fn new() -> Self {
        Self::with_opener(SerialPortOpener)
    }
}

impl Default for RelayLink<SerialPortOpener> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PortOpener> RelayLink<O> {
    pub fn with_opener(opener: O) -> Self {
        Self {
            opener,
            connection: None,
            states: RelayStates::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn device(&self) -> Option<&str> {
        self.connection
            .as_ref()
            .map(|connection| connection.config.device.as_str())
    }

    /// Last commanded or polled state. `None` means unknown. The states of a
    /// closed connection stay readable until the next connect.
    pub fn cached_state(&self, channel: Channel) -> Option<RelayState> {
        self.states.get(&channel).copied()
    }

    pub fn cached_states(&self) -> &RelayStates {
        &self.states
    }

    /// Opens the board and waits for the adapter to settle. Connecting an
    /// already connected link fails and keeps the existing connection.
    pub fn connect(&mut self, config: ConnectionConfig) -> Result<(), ConnectError> {
        if let Some(device) = self.device() {
            return Err(ConnectError::AlreadyConnected {
                device: String::from(device),
            });
        }

        let open_error = |source| ConnectError::Open {
            device: config.device.clone(),
            source,
        };

        // the port is dropped, and thereby closed, on every early return
        let port = self.opener.open(&config).map_err(open_error)?;
        port.clear(Buffer::All).map_err(open_error)?;
        thread::sleep(config.connect_settle);

        info!(
            "Connected to relay board on {} ({} baud)",
            config.device, config.baud_rate
        );
        self.states.clear();
        self.connection = Some(Connection { port, config });
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection.port);
            info!("Disconnected from {}", connection.config.device);
        }
    }

    /// Switches a channel. The cached state is only updated once the frame
    /// has been flushed to the wire.
    pub fn set_channel(&mut self, channel: i64, state: RelayState) -> Result<(), CommandError> {
        let connection = self.connection.as_mut().ok_or(CommandError::NotConnected)?;
        let channel = Channel::try_from(channel)?;

        let frame = relay_frame::set_frame(channel, state);
        debug!("Set '{}' to '{}' with frame {:02X?}", channel, state, frame);
        connection
            .discard_stale_output()
            .and_then(|_| connection.transmit(&frame))
            .map_err(|source| CommandError::Io { channel, source })?;

        info!("Set '{}' to '{}'", channel, state);
        self.states.insert(channel, state);
        Ok(())
    }

    pub fn set_all(&mut self, state: RelayState) -> Result<(), CommandError> {
        for channel in Channel::ALL {
            self.set_channel(channel.number() as i64, state)?;
        }
        Ok(())
    }

    /// Commands the inverse of the cached state. Unknown counts as off.
    pub fn toggle(&mut self, channel: i64) -> Result<RelayState, CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let channel = Channel::try_from(channel)?;
        let state = self
            .cached_state(channel)
            .unwrap_or(RelayState::Off)
            .toggled();
        self.set_channel(channel.number() as i64, state)?;
        Ok(state)
    }

    /// Reads the board's state first and only then toggles. Returns `None`,
    /// without switching anything, when the status could not be read.
    pub fn toggle_polled(&mut self, channel: i64) -> Result<Option<RelayState>, CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let channel = Channel::try_from(channel)?;
        if self.query_status().is_empty() {
            warn!("State of '{}' is unknown, not toggling", channel);
            return Ok(None);
        }
        self.toggle(channel.number() as i64).map(Some)
    }

    /// Polls all four channels. Every failure, including not being
    /// connected, yields an empty map; it never means "all off".
    pub fn query_status(&mut self) -> RelayStates {
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return RelayStates::new(),
        };

        let reply = match connection.request_status() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Status request on {} failed: {}", connection.config.device, e);
                return RelayStates::new();
            }
        };

        match relay_frame::decode_status(&reply) {
            Some(states) => {
                debug!("Status reply {:02X?}", reply);
                self.states.extend(states.iter());
                states
            }
            None => {
                warn!(
                    "Incomplete status reply, expected {} bytes but got {}",
                    STATUS_REPLY_LEN,
                    reply.len()
                );
                RelayStates::new()
            }
        }
    }
}

impl<O: PortOpener> Drop for RelayLink<O> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Connection {
    fn discard_stale_output(&mut self) -> io::Result<()> {
        let pending = self.port.bytes_to_write()?;
        if pending > 0 {
            debug!("Discarding {} unsent bytes", pending);
            self.port.clear(Buffer::Output)?;
        }
        Ok(())
    }

    fn discard_stale_input(&mut self) -> io::Result<()> {
        let pending = self.port.bytes_to_read()?;
        if pending > 0 {
            debug!("Discarding {} unread bytes", pending);
            self.port.clear(Buffer::Input)?;
        }
        Ok(())
    }

    /// Writes one frame and waits for the board to settle.
    fn transmit(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        thread::sleep(self.config.command_settle);
        Ok(())
    }

    /// The whole reply has to arrive within one read timeout, however many
    /// reads it takes.
    fn request_status(&mut self) -> io::Result<Vec<u8>> {
        self.discard_stale_input()?;
        self.transmit(&STATUS_REQUEST)?;

        let deadline = Instant::now() + self.config.read_timeout;
        let mut reply = [0u8; STATUS_REPLY_LEN];
        let mut filled = 0;
        while filled < reply.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;
            match self.port.read(&mut reply[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reply[..filled].to_vec())
    }
}
