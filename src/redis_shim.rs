//! Bridge between a redis stream of relay commands and the relay board.
//!
//! Stream entries carry a `relay` field (`1` to `4`) and a `state` field
//! (`On`/`Off`). Polled states are written to a hash keyed by channel number.

use log::debug;
use log::warn;
use redis::streams::StreamReadOptions;
use redis::streams::StreamReadReply;
use redis::Commands;
use redis::ConnectionLike;
use redis::FromRedisValue;
use redis::RedisError;
use redis::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::relay_frame::RelayStates;
use crate::relay_types::Channel;
use crate::relay_types::InvalidRelayState;
use crate::relay_types::RelayState;

#[derive(Debug, Error)]
pub enum EntryProblem {
    #[error("field '{0}' is missing")]
    MissingField(&'static str),

    #[error("field '{field}' is not text")]
    NotText {
        field: &'static str,
        #[source]
        source: RedisError,
    },

    #[error("relay '{0}' does not exist")]
    UnknownRelay(String),

    #[error(transparent)]
    InvalidState(#[from] InvalidRelayState),
}

#[derive(Debug, Error)]
#[error("Bad entry '{entry_id}' in stream '{stream_key}': {problem}")]
pub struct StreamEntryError {
    pub stream_key: String,
    pub entry_id: String,
    pub problem: EntryProblem,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    StreamEntry(#[from] StreamEntryError),

    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct StreamKeys {
    pub stream_key: String,
    /// Where the id of the last handled entry is kept between runs.
    pub last_entry_id_key: String,
    pub block_ms: usize,
}

/// Commands read by one XREAD, reduced to the last state per channel.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamBatch {
    pub last_entry_id: String,
    pub relay_states: RelayStates,
}

/// Reads relay commands forever and hands each batch to `handler`, or `None`
/// when the read timed out or only carried bad entries. `on_bad_entry`
/// decides whether a bad entry is skipped (`Ok`) or ends the dispatch.
pub fn dispatch_relay_states<C, E, H>(
    redis: &mut C,
    keys: &StreamKeys,
    on_bad_entry: E,
    handler: &mut H,
) -> Result<(), DispatchError>
where
    C: ConnectionLike,
    E: Fn(StreamEntryError) -> Result<(), StreamEntryError>,
    H: FnMut(&mut C, Option<RelayStates>) -> anyhow::Result<()>,
{
    loop {
        let last_entry_id = redis
            .get::<_, Option<String>>(&keys.last_entry_id_key)?
            .unwrap_or_else(|| String::from("$"));

        match read_batch(redis, keys, &last_entry_id, &on_bad_entry)? {
            Some(batch) => {
                let relay_states = Some(batch.relay_states).filter(|states| !states.is_empty());
                handler(&mut *redis, relay_states)?;
                redis.set::<_, _, ()>(&keys.last_entry_id_key, batch.last_entry_id)?;
            }
            None => handler(&mut *redis, None)?,
        }
    }
}

fn read_batch<C, E>(
    redis: &mut C,
    keys: &StreamKeys,
    last_entry_id: &str,
    on_bad_entry: &E,
) -> Result<Option<StreamBatch>, DispatchError>
where
    C: ConnectionLike,
    E: Fn(StreamEntryError) -> Result<(), StreamEntryError>,
{
    let opts = StreamReadOptions::default().block(keys.block_ms);
    let reply: Option<StreamReadReply> =
        redis.xread_options(&[&keys.stream_key], &[last_entry_id], &opts)?;

    let stream = match reply.and_then(|reply| reply.keys.into_iter().next()) {
        Some(stream) => stream,
        None => return Ok(None),
    };

    let mut batch = StreamBatch {
        last_entry_id: String::from(last_entry_id),
        relay_states: RelayStates::new(),
    };
    for entry in stream.ids {
        match relay_command(&entry.map) {
            Ok((channel, state)) => {
                batch.relay_states.insert(channel, state);
            }
            Err(problem) => on_bad_entry(StreamEntryError {
                stream_key: stream.key.clone(),
                entry_id: entry.id.clone(),
                problem,
            })?,
        }
        batch.last_entry_id = entry.id;
    }
    debug!("Read {:?} from stream '{}'", batch, stream.key);
    Ok(Some(batch))
}

fn relay_command(fields: &HashMap<String, Value>) -> Result<(Channel, RelayState), EntryProblem> {
    let text = |field: &'static str| -> Result<String, EntryProblem> {
        let value = fields.get(field).ok_or(EntryProblem::MissingField(field))?;
        String::from_redis_value(value).map_err(|source| EntryProblem::NotText { field, source })
    };

    let relay = text("relay")?;
    let channel = relay
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|number| Channel::try_from(number).ok())
        .ok_or(EntryProblem::UnknownRelay(relay))?;
    let state = text("state")?.parse::<RelayState>()?;
    Ok((channel, state))
}

/// Hash fields for polled states: channel number to `On`/`Off`.
pub fn status_fields(relay_states: &RelayStates) -> Vec<(u8, String)> {
    relay_states
        .iter()
        .map(|(channel, state)| (channel.number(), state.to_string()))
        .collect()
}

/// Writes polled states into the hash at `status_key`. An empty poll leaves
/// the hash untouched.
pub fn publish_relay_states<C: ConnectionLike>(
    redis: &mut C,
    status_key: &str,
    relay_states: &RelayStates,
) -> Result<(), RedisError> {
    if relay_states.is_empty() {
        warn!("No relay status available, keeping '{}' as is", status_key);
        return Ok(());
    }
    redis.hset_multiple(status_key, &status_fields(relay_states))
}
