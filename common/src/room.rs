use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    error::{PlantError, PlantResult},
    types::{FanSpeed, RoomId, RoomStatus},
};

/// Fixed room set, ordered by id so iteration and tie-breaks are deterministic.
pub type RoomDirectory = BTreeMap<RoomId, Room>;

#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    status: RoomStatus,
    current_temp: Option<f64>,
    target_temp: Option<f64>,
    current_speed: Option<FanSpeed>,
    accrued_fee: f64,
    service_secs: f64,
    check_in_time: Option<DateTime<Utc>>,
    check_out_time: Option<DateTime<Utc>>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            status: RoomStatus::Available,
            current_temp: None,
            target_temp: None,
            current_speed: None,
            accrued_fee: 0.0,
            service_secs: 0.0,
            check_in_time: None,
            check_out_time: None,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn current_temp(&self) -> Option<f64> {
        self.current_temp
    }

    pub fn target_temp(&self) -> Option<f64> {
        self.target_temp
    }

    pub fn current_speed(&self) -> Option<FanSpeed> {
        self.current_speed
    }

    pub fn accrued_fee(&self) -> f64 {
        self.accrued_fee
    }

    pub fn service_secs(&self) -> f64 {
        self.service_secs
    }

    pub fn check_in_time(&self) -> Option<DateTime<Utc>> {
        self.check_in_time
    }

    pub fn check_out_time(&self) -> Option<DateTime<Utc>> {
        self.check_out_time
    }

    pub fn require_current_temp(&self) -> PlantResult<f64> {
        self.current_temp.ok_or_else(|| self.unset("current temperature"))
    }

    pub fn require_target_temp(&self) -> PlantResult<f64> {
        self.target_temp.ok_or_else(|| self.unset("target temperature"))
    }

    pub fn require_speed(&self) -> PlantResult<FanSpeed> {
        self.current_speed.ok_or_else(|| self.unset("fan speed"))
    }

    pub(crate) fn set_status(&mut self, status: RoomStatus) {
        self.status = status;
    }

    /// Starts a new stay: billing counters reset, device stays off.
    pub(crate) fn check_in(&mut self, now: DateTime<Utc>) {
        self.status = RoomStatus::Closed;
        self.current_temp = None;
        self.target_temp = None;
        self.current_speed = None;
        self.accrued_fee = 0.0;
        self.service_secs = 0.0;
        self.check_in_time = Some(now);
        self.check_out_time = None;
    }

    pub(crate) fn check_out(&mut self, now: DateTime<Utc>) {
        self.status = RoomStatus::Available;
        self.check_out_time = Some(now);
    }

    pub(crate) fn power_on(&mut self, current_temp: f64, target_temp: f64, speed: FanSpeed) {
        self.current_temp = Some(current_temp);
        self.target_temp = Some(target_temp);
        self.current_speed = Some(speed);
        self.status = RoomStatus::Standby;
    }

    pub(crate) fn set_target_temp(&mut self, temp: f64) {
        self.target_temp = Some(temp);
    }

    pub(crate) fn set_speed(&mut self, speed: FanSpeed) {
        self.current_speed = Some(speed);
    }

    pub(crate) fn set_current_temp(&mut self, temp: f64) {
        self.current_temp = Some(temp);
    }

    pub(crate) fn accrue(&mut self, fee: f64, secs: f64) {
        self.accrued_fee += fee;
        self.service_secs += secs;
    }

    fn unset(&self, field: &'static str) -> PlantError {
        PlantError::UnsetField {
            room: self.id.clone(),
            field,
        }
    }
}
