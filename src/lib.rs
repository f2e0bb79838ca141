//! Driver for KMTronic 4-channel USB relay boards.
//!
//! [`RelayLink`] owns the serial connection and speaks the board's frame
//! protocol. [`RelayControl`] runs a link on its own thread so that several
//! callers, e.g. a command source and a status poller, can share one board.

pub mod redis_shim;
pub mod relay_ctl;
pub mod relay_frame;
pub mod relay_link;
pub mod relay_port;
pub mod relay_types;

#[cfg(test)]
mod fake_port;

pub use relay_ctl::ControlError;
pub use relay_ctl::RelayControl;
pub use relay_frame::RelayStates;
pub use relay_link::CommandError;
pub use relay_link::ConnectError;
pub use relay_link::RelayLink;
pub use relay_port::list_available_ports;
pub use relay_port::ConnectionConfig;
pub use relay_types::Channel;
pub use relay_types::RelayState;
