use serde::{Deserialize, Serialize};

use crate::{
    error::{PlantError, PlantResult},
    types::{FanSpeed, Mode},
};

pub const DEFAULT_ROOM_IDS: [&str; 5] = ["309c", "310c", "311c", "312c", "f3"];

/// Plant-wide operating parameters set once by the administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    pub mode: Mode,
    pub temp_low_limit: f64,
    pub temp_high_limit: f64,
    pub default_target_temp: f64,
    pub default_speed: FanSpeed,
    /// Currency units per minute, indexed by `FanSpeed::index`.
    pub fee_rate: Vec<f64>,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Cool,
            temp_low_limit: 16.0,
            temp_high_limit: 30.0,
            default_target_temp: 24.0,
            default_speed: FanSpeed::Normal,
            fee_rate: vec![0.5, 0.75, 1.5],
        }
    }
}

impl PlantConfig {
    pub fn validate(&self) -> PlantResult<()> {
        if self.mode == Mode::Unset {
            return Err(PlantError::Configuration(
                "mode must be COOL or HEAT".to_string(),
            ));
        }

        let temps = [
            self.temp_low_limit,
            self.default_target_temp,
            self.temp_high_limit,
        ];
        if temps.iter().any(|value| !value.is_finite()) {
            return Err(PlantError::Configuration(
                "temperatures must be finite".to_string(),
            ));
        }
        if !(self.temp_low_limit < self.default_target_temp
            && self.default_target_temp < self.temp_high_limit)
        {
            return Err(PlantError::Configuration(format!(
                "expected temp_low_limit < default_target_temp < temp_high_limit, got {} / {} / {}",
                self.temp_low_limit, self.default_target_temp, self.temp_high_limit
            )));
        }

        if self.fee_rate.len() != FanSpeed::ALL.len() {
            return Err(PlantError::Configuration(format!(
                "expected {} fee rates, got {}",
                FanSpeed::ALL.len(),
                self.fee_rate.len()
            )));
        }
        if self
            .fee_rate
            .iter()
            .any(|rate| !rate.is_finite() || *rate < 0.0)
        {
            return Err(PlantError::Configuration(
                "fee rates must be finite and non-negative".to_string(),
            ));
        }

        Ok(())
    }

    pub fn fee_rate(&self, speed: FanSpeed) -> f64 {
        self.fee_rate.get(speed.index()).copied().unwrap_or(0.0)
    }

    /// Target temperatures must lie strictly inside the configured limits.
    pub fn check_target_temp(&self, temp: f64) -> PlantResult<()> {
        if temp.is_finite() && self.temp_low_limit < temp && temp < self.temp_high_limit {
            Ok(())
        } else {
            Err(PlantError::OutOfRange {
                what: "target temperature",
                value: temp,
                low: self.temp_low_limit,
                high: self.temp_high_limit,
            })
        }
    }
}

/// Tuning of the admission scheduler and the simulated room model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub service_capacity: usize,
    pub wait_grace_secs: f64,
    /// Simulated seconds advanced by one tick.
    pub tick_secs: f64,
    /// Degrees per simulated second, indexed by `FanSpeed::index`.
    pub temp_change_per_sec: [f64; 3],
    pub reach_tolerance: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            service_capacity: 3,
            wait_grace_secs: 120.0,
            tick_secs: 1.0,
            temp_change_per_sec: [1.0 / 120.0, 1.0 / 60.0, 1.0 / 30.0],
            reach_tolerance: 0.01,
        }
    }
}

impl SchedulerConfig {
    pub fn temp_rate(&self, speed: FanSpeed) -> f64 {
        self.temp_change_per_sec[speed.index()]
    }

    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.service_capacity == 0 {
            self.service_capacity = defaults.service_capacity;
        }
        if !self.wait_grace_secs.is_finite() || self.wait_grace_secs <= 0.0 {
            self.wait_grace_secs = defaults.wait_grace_secs;
        }
        if !self.tick_secs.is_finite() || self.tick_secs <= 0.0 {
            self.tick_secs = defaults.tick_secs;
        }
        for (rate, fallback) in self
            .temp_change_per_sec
            .iter_mut()
            .zip(defaults.temp_change_per_sec)
        {
            if !rate.is_finite() || *rate <= 0.0 {
                *rate = fallback;
            }
        }
        if !self.reach_tolerance.is_finite() || self.reach_tolerance <= 0.0 {
            self.reach_tolerance = defaults.reach_tolerance;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub http_port: u16,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            mqtt_enabled: false,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub rooms: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Applied at boot when present; otherwise the administrator sets it.
    #[serde(default)]
    pub plant: Option<PlantConfig>,
    #[serde(default)]
    pub auto_start: bool,
    pub tick_interval_ms: u64,
    pub timezone: String,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rooms: DEFAULT_ROOM_IDS.iter().map(|id| id.to_string()).collect(),
            scheduler: SchedulerConfig::default(),
            plant: None,
            auto_start: false,
            tick_interval_ms: 1_000,
            timezone: "Asia/Shanghai".to_string(),
            network: NetworkConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        let mut seen = Vec::new();
        for room in self.rooms.drain(..) {
            let room = room.trim().to_string();
            if !room.is_empty() && !seen.contains(&room) {
                seen.push(room);
            }
        }
        self.rooms = if seen.is_empty() {
            DEFAULT_ROOM_IDS.iter().map(|id| id.to_string()).collect()
        } else {
            seen
        };

        self.scheduler.sanitize();
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 60_000);

        if self
            .plant
            .as_ref()
            .is_some_and(|plant| plant.validate().is_err())
        {
            self.plant = None;
            self.auto_start = false;
        }
    }
}
