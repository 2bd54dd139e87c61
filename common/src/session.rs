use chrono::{DateTime, Utc};

use crate::{
    records::Detail,
    types::{FanSpeed, RoomId},
};

/// Wait budget of a request that can only be admitted after the queue's tiers change.
pub const UNBOUNDED_WAIT: f64 = f64::INFINITY;

/// A room's pending or active request for service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSession {
    room_id: RoomId,
    target_speed: FanSpeed,
    fee_rate: f64,
    elapsed_secs: f64,
    remaining_wait: f64,
    fee: f64,
    started_at: Option<DateTime<Utc>>,
}

impl ServiceSession {
    pub fn new(room_id: RoomId, target_speed: FanSpeed, fee_rate: f64, wait_secs: f64) -> Self {
        Self {
            room_id,
            target_speed,
            fee_rate,
            elapsed_secs: 0.0,
            remaining_wait: wait_secs,
            fee: 0.0,
            started_at: None,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn target_speed(&self) -> FanSpeed {
        self.target_speed
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn remaining_wait(&self) -> f64 {
        self.remaining_wait
    }

    pub fn fee(&self) -> f64 {
        self.fee
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.elapsed_secs = 0.0;
        self.fee = 0.0;
        self.started_at = Some(now);
    }

    /// Closes the active segment. Returns `None` if the session was never started.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<Detail> {
        let start = self.started_at.take()?;
        Some(Detail {
            room_id: self.room_id.clone(),
            start,
            finish: now.max(start),
            speed: self.target_speed,
            fee_rate: self.fee_rate,
            fee: self.fee,
            duration_secs: self.elapsed_secs,
        })
    }

    pub fn retarget(&mut self, speed: FanSpeed, fee_rate: f64) {
        self.target_speed = speed;
        self.fee_rate = fee_rate;
    }

    pub fn set_remaining_wait(&mut self, secs: f64) {
        self.remaining_wait = secs;
    }

    /// Accrues `secs` of service at `fee_rate` per minute; returns the fee charged.
    pub(crate) fn advance(&mut self, secs: f64, fee_rate: f64) -> f64 {
        let charged = fee_rate / 60.0 * secs;
        self.fee_rate = fee_rate;
        self.elapsed_secs += secs;
        self.fee += charged;
        charged
    }

    /// Burns wait budget; returns true once it is exhausted.
    pub(crate) fn count_down(&mut self, secs: f64) -> bool {
        self.remaining_wait -= secs;
        self.remaining_wait <= 0.0
    }
}
