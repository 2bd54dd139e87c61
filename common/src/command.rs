use crate::{
    config::PlantConfig,
    error::{PlantError, PlantResult},
    records::Invoice,
    types::{FanSpeed, RoomId, RoomSnapshot},
};

/// Every operation the scheduler accepts from its callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    InitializePlant(PlantConfig),
    StartPlant,
    StopPlant,
    CheckIn(RoomId),
    CheckOut(RoomId),
    PowerOn { room: RoomId, current_temp: f64 },
    PowerOff(RoomId),
    ChangeTargetTemp { room: RoomId, temp: f64 },
    ChangeTargetSpeed { room: RoomId, speed: FanSpeed },
    GetFee(RoomId),
    GetAllStatus,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializePlant(_) => "initialize_plant",
            Self::StartPlant => "start_plant",
            Self::StopPlant => "stop_plant",
            Self::CheckIn(_) => "check_in",
            Self::CheckOut(_) => "check_out",
            Self::PowerOn { .. } => "power_on",
            Self::PowerOff(_) => "power_off",
            Self::ChangeTargetTemp { .. } => "change_target_temp",
            Self::ChangeTargetSpeed { .. } => "change_target_speed",
            Self::GetFee(_) => "get_fee",
            Self::GetAllStatus => "get_all_status",
        }
    }

    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::CheckIn(room)
            | Self::CheckOut(room)
            | Self::PowerOff(room)
            | Self::GetFee(room)
            | Self::PowerOn { room, .. }
            | Self::ChangeTargetTemp { room, .. }
            | Self::ChangeTargetSpeed { room, .. } => Some(room),
            Self::InitializePlant(_)
            | Self::StartPlant
            | Self::StopPlant
            | Self::GetAllStatus => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ack,
    PoweredOn { target_temp: f64, speed: FanSpeed },
    Invoice(Invoice),
    Room(RoomSnapshot),
    Rooms(Vec<RoomSnapshot>),
}

pub fn parse_temperature(value: &str) -> PlantResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|temp| temp.is_finite())
        .ok_or_else(|| PlantError::InvalidCommand(format!("invalid temperature {value:?}")))
}

pub fn parse_speed(value: &str) -> PlantResult<FanSpeed> {
    FanSpeed::parse(value).ok_or_else(|| PlantError::UnknownSpeed(value.trim().to_string()))
}

/// Parses a room panel command. `kind` is the last topic segment:
/// `power` (`on:<temp>` or `off`), `target` (`<temp>`) or `speed` (`<tier>`).
pub fn parse_panel_command(room: &RoomId, kind: &str, payload: &str) -> PlantResult<Request> {
    let payload = payload.trim();
    match kind {
        "power" => {
            let lowered = payload.to_ascii_lowercase();
            if lowered == "off" {
                return Ok(Request::PowerOff(room.clone()));
            }
            match lowered.split_once(':') {
                Some(("on", temp)) => Ok(Request::PowerOn {
                    room: room.clone(),
                    current_temp: parse_temperature(temp)?,
                }),
                _ => Err(PlantError::InvalidCommand(format!(
                    "power payload must be on:<temp> or off, got {payload:?}"
                ))),
            }
        }
        "target" => Ok(Request::ChangeTargetTemp {
            room: room.clone(),
            temp: parse_temperature(payload)?,
        }),
        "speed" => Ok(Request::ChangeTargetSpeed {
            room: room.clone(),
            speed: parse_speed(payload)?,
        }),
        other => Err(PlantError::InvalidCommand(format!(
            "unknown panel command {other:?}"
        ))),
    }
}
