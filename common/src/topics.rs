use crate::types::RoomId;

pub const TOPIC_PLANT_STATE: &str = "aircon/plant/state";

/// Subscription filter for every room panel command.
pub const TOPIC_CMD_FILTER: &str = "aircon/cmnd/+/+";

const CMD_PREFIX: &str = "aircon/cmnd/";

pub const MAX_PAYLOAD_BYTES: usize = 512;

pub fn room_state_topic(room: &RoomId) -> String {
    format!("aircon/room/{room}/state")
}

pub fn room_command_topic(room: &RoomId, kind: &str) -> String {
    format!("{CMD_PREFIX}{room}/{kind}")
}

/// Splits `aircon/cmnd/{room}/{kind}` into its room and command kind.
pub fn parse_command_topic(topic: &str) -> Option<(RoomId, &str)> {
    let rest = topic.strip_prefix(CMD_PREFIX)?;
    let (room, kind) = rest.split_once('/')?;
    if room.is_empty() || kind.is_empty() || kind.contains('/') {
        return None;
    }
    Some((RoomId::from(room), kind))
}
