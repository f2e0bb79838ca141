//! Fixed-length frames spoken by the KMTronic 4-channel USB relay board.
//!
//! Every host command is three bytes starting with [`START`]. The board only
//! answers the status request, with one byte per channel.

use std::collections::BTreeMap;

use crate::relay_types::Channel;
use crate::relay_types::RelayState;

pub const START: u8 = 0xFF;
pub const STATUS_COMMAND: u8 = 0x09;
pub const STATUS_REQUEST: [u8; 3] = [START, STATUS_COMMAND, 0x00];
pub const STATUS_REPLY_LEN: usize = 4;

pub type RelayStates = BTreeMap<Channel, RelayState>;

pub fn set_frame(channel: Channel, state: RelayState) -> [u8; 3] {
    let state = match state {
        RelayState::On => 0x01,
        RelayState::Off => 0x00,
    };
    [START, channel.number(), state]
}

/// Byte `i` of the reply is the state of channel `i + 1`. Only `0x01` means
/// on. Anything but a complete reply decodes to `None`.
pub fn decode_status(reply: &[u8]) -> Option<RelayStates> {
    if reply.len() != STATUS_REPLY_LEN {
        return None;
    }
    let states = Channel::ALL
        .iter()
        .zip(reply)
        .map(|(channel, byte)| (*channel, RelayState::from(*byte == 0x01)))
        .collect();
    Some(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_types::Channel::*;
    use crate::relay_types::RelayState::*;

    #[test]
    fn set_frames_carry_channel_and_state() {
        for channel in Channel::ALL {
            assert_eq!(set_frame(channel, On), [0xFF, channel.number(), 0x01]);
            assert_eq!(set_frame(channel, Off), [0xFF, channel.number(), 0x00]);
        }
    }

    #[test]
    fn status_request_is_fixed() {
        assert_eq!(STATUS_REQUEST, [0xFF, 0x09, 0x00]);
    }

    #[test]
    fn decodes_mixed_reply() {
        let states = decode_status(&[0x01, 0x00, 0x01, 0x00]).unwrap();
        let expected: RelayStates = [(Channel1, On), (Channel2, Off), (Channel3, On), (Channel4, Off)]
            .into_iter()
            .collect();
        assert_eq!(states, expected);
    }

    #[test]
    fn only_exact_one_decodes_as_on() {
        let states = decode_status(&[0x02, 0xFF, 0x01, 0x10]).unwrap();
        assert_eq!(states[&Channel1], Off);
        assert_eq!(states[&Channel2], Off);
        assert_eq!(states[&Channel3], On);
        assert_eq!(states[&Channel4], Off);
    }

    #[test]
    fn incomplete_reply_decodes_to_none() {
        assert_eq!(decode_status(&[]), None);
        assert_eq!(decode_status(&[0x01, 0x01]), None);
        assert_eq!(decode_status(&[0x01, 0x01, 0x01, 0x01, 0x01]), None);
    }
}
