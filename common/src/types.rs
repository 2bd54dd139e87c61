use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Cool,
    Heat,
    Unset,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::Unset => "UNSET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "COOL" | "0" => Some(Self::Cool),
            "HEAT" | "1" => Some(Self::Heat),
            _ => None,
        }
    }

    /// Whether `current` already meets `target` for this mode.
    pub fn is_satisfied(self, current: f64, target: f64) -> bool {
        match self {
            Self::Cool => current <= target,
            Self::Heat => current >= target,
            Self::Unset => true,
        }
    }

    /// Moves `current` toward `target` by at most `step`, never overshooting.
    pub fn step_toward(self, current: f64, target: f64, step: f64) -> f64 {
        match self {
            Self::Cool if current > target => (current - step).max(target),
            Self::Heat if current < target => (current + step).min(target),
            _ => current,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlantStatus {
    Standby,
    Running,
    Stopped,
}

impl PlantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standby => "STANDBY",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomStatus {
    Available,
    Closed,
    Standby,
    Serving,
    Waiting,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Closed => "CLOSED",
            Self::Standby => "STANDBY",
            Self::Serving => "SERVING",
            Self::Waiting => "WAITING",
        }
    }

    /// Powered on: the room either holds a session or is idling at its target.
    pub fn is_powered(self) -> bool {
        matches!(self, Self::Standby | Self::Serving | Self::Waiting)
    }
}

/// Fan-speed tier. Ordering follows priority: `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanSpeed {
    Low,
    Normal,
    High,
}

impl FanSpeed {
    pub const ALL: [FanSpeed; 3] = [Self::Low, Self::Normal, Self::High];

    pub fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
        }
    }

    /// Accepts the tier name in any case or its numeric level.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(level) = value.parse::<usize>() {
            return Self::from_index(level);
        }
        match value.to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "NORMAL" | "MEDIUM" | "MIDDLE" => Some(Self::Normal),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub status: &'static str,
    pub mode: &'static str,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    pub speed: Option<&'static str>,
    #[serde(rename = "serviceTime")]
    pub service_time_secs: f64,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f64>,
    #[serde(rename = "tempLowLimit")]
    pub temp_low_limit: Option<f64>,
    #[serde(rename = "tempHighLimit")]
    pub temp_high_limit: Option<f64>,
    pub fee: f64,
    #[serde(rename = "feeRate")]
    pub fee_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlantStatusPayload {
    pub mode: &'static str,
    pub status: &'static str,
    pub tick: u64,
    pub serving: Vec<RoomId>,
    pub waiting: Vec<RoomId>,
    pub rooms: Vec<RoomSnapshot>,
}
