use log::debug;
use log::info;
use std::io;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::relay_frame::RelayStates;
use crate::relay_link::CommandError;
use crate::relay_link::ConnectError;
use crate::relay_link::RelayLink;
use crate::relay_port::ConnectionConfig;
use crate::relay_port::PortOpener;
use crate::relay_types::RelayState;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Relay worker has stopped")]
    WorkerGone,
}

enum Request {
    Connect(ConnectionConfig, Sender<Result<(), ConnectError>>),
    Disconnect(Sender<()>),
    Set(i64, RelayState, Sender<Result<(), CommandError>>),
    SetAll(RelayState, Sender<Result<(), CommandError>>),
    Toggle(i64, Sender<Result<RelayState, CommandError>>),
    Status(Sender<RelayStates>),
}

/// Handle to a worker thread that owns a [`RelayLink`] and executes requests
/// strictly one after another. Handles are cheap to clone and may be used from
/// any thread. The worker disconnects the link once the last handle is gone.
#[derive(Clone)]
pub struct RelayControl {
    requests: Sender<Request>,
}

impl RelayControl {
    pub fn spawn<O>(link: RelayLink<O>) -> io::Result<(RelayControl, JoinHandle<()>)>
    where
        O: PortOpener + 'static,
    {
        let (requests, queue) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(String::from("relay-link"))
            .spawn(move || run(link, queue))?;
        Ok((RelayControl { requests }, worker))
    }

    pub fn connect(&self, config: ConnectionConfig) -> Result<(), ControlError> {
        Ok(self.call(|reply| Request::Connect(config, reply))??)
    }

    /// Queued behind any request already in flight, so a poll that is running
    /// completes before the link is closed.
    pub fn disconnect(&self) {
        // a stopped worker has already closed the link
        let _ = self.call(Request::Disconnect);
    }

    pub fn set(&self, channel: i64, state: RelayState) -> Result<(), ControlError> {
        Ok(self.call(|reply| Request::Set(channel, state, reply))??)
    }

    pub fn set_all(&self, state: RelayState) -> Result<(), ControlError> {
        Ok(self.call(|reply| Request::SetAll(state, reply))??)
    }

    pub fn toggle(&self, channel: i64) -> Result<RelayState, ControlError> {
        Ok(self.call(|reply| Request::Toggle(channel, reply))??)
    }

    pub fn query_status(&self) -> RelayStates {
        self.call(Request::Status).unwrap_or_default()
    }

    /// Queries the status every `interval` and hands each result to `handler`
    /// until it returns `false`. Empty results are passed on as well.
    pub fn poll_status<F>(&self, interval: Duration, mut handler: F)
    where
        F: FnMut(RelayStates) -> bool,
    {
        loop {
            if !handler(self.query_status()) {
                return;
            }
            thread::sleep(interval);
        }
    }

    fn call<T, F>(&self, request: F) -> Result<T, ControlError>
    where
        F: FnOnce(Sender<T>) -> Request,
    {
        let (reply, response) = mpsc::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| ControlError::WorkerGone)?;
        response.recv().map_err(|_| ControlError::WorkerGone)
    }
}

fn run<O: PortOpener>(mut link: RelayLink<O>, queue: Receiver<Request>) {
    debug!("Relay worker started");
    for request in queue {
        // a dropped reply receiver only means the caller stopped waiting
        match request {
            Request::Connect(config, reply) => {
                let _ = reply.send(link.connect(config));
            }
            Request::Disconnect(reply) => {
                link.disconnect();
                let _ = reply.send(());
            }
            Request::Set(channel, state, reply) => {
                let _ = reply.send(link.set_channel(channel, state));
            }
            Request::SetAll(state, reply) => {
                let _ = reply.send(link.set_all(state));
            }
            Request::Toggle(channel, reply) => {
                let _ = reply.send(link.toggle(channel));
            }
            Request::Status(reply) => {
                let _ = reply.send(link.query_status());
            }
        }
    }
    link.disconnect();
    info!("Relay worker stopped");
}
