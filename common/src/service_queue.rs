use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    config::{PlantConfig, SchedulerConfig},
    error::{PlantError, PlantResult},
    records::Detail,
    room::RoomDirectory,
    session::{ServiceSession, UNBOUNDED_WAIT},
    types::{FanSpeed, Mode, RoomId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Client request or capacity backfill.
    Request,
    /// The session's wait budget ran out; it may rotate out an equal-tier member.
    Timeout,
}

/// A session removed from the service queue together with its closed segment.
#[derive(Debug)]
pub struct Finished {
    pub session: ServiceSession,
    pub detail: Option<Detail>,
}

#[derive(Debug)]
pub enum PushOutcome {
    Admitted { evicted: Option<Finished> },
    Refused(ServiceSession),
}

/// Sessions currently being served, bounded by the plant's capacity.
#[derive(Debug, Clone)]
pub struct ServiceQueue {
    capacity: usize,
    grace_secs: f64,
    sessions: BTreeMap<RoomId, ServiceSession>,
    min_speed: Option<FanSpeed>,
    max_speed: Option<FanSpeed>,
}

impl ServiceQueue {
    pub fn new(capacity: usize, grace_secs: f64) -> Self {
        Self {
            capacity,
            grace_secs,
            sessions: BTreeMap::new(),
            min_speed: None,
            max_speed: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remaining capacity.
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.sessions.len())
    }

    pub fn get(&self, room: &RoomId) -> Option<&ServiceSession> {
        self.sessions.get(room)
    }

    pub fn contains(&self, room: &RoomId) -> bool {
        self.sessions.contains_key(room)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn min_speed(&self) -> Option<FanSpeed> {
        self.min_speed
    }

    pub fn max_speed(&self) -> Option<FanSpeed> {
        self.max_speed
    }

    pub fn push(
        &mut self,
        mut session: ServiceSession,
        admission: Admission,
        now: DateTime<Utc>,
    ) -> PushOutcome {
        if self.sessions.len() < self.capacity {
            self.insert(session, now);
            return PushOutcome::Admitted { evicted: None };
        }

        let (Some(min), Some(max)) = (self.min_speed, self.max_speed) else {
            session.set_remaining_wait(UNBOUNDED_WAIT);
            return PushOutcome::Refused(session);
        };

        let speed = session.target_speed();
        let preempts = speed > min || (admission == Admission::Timeout && speed == min);
        if preempts {
            if let Some(victim) = self.eviction_victim(min) {
                let evicted = self.take(&victim, now);
                self.insert(session, now);
                return PushOutcome::Admitted { evicted };
            }
        }

        if speed == min && min == max {
            session.set_remaining_wait(self.grace_secs);
        } else {
            session.set_remaining_wait(UNBOUNDED_WAIT);
        }
        PushOutcome::Refused(session)
    }

    pub fn remove(&mut self, room: &RoomId, now: DateTime<Utc>) -> Option<Finished> {
        self.take(room, now)
    }

    /// Finishes and returns every member.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<Finished> {
        let rooms = self.room_ids();
        rooms
            .iter()
            .filter_map(|room| self.take(room, now))
            .collect()
    }

    /// Advances one tick of service for every member and returns the rooms
    /// that reached their target temperature. Reached sessions stay queued;
    /// the caller removes them.
    pub fn update(
        &mut self,
        mode: Mode,
        plant: &PlantConfig,
        tuning: &SchedulerConfig,
        rooms: &mut RoomDirectory,
    ) -> PlantResult<Vec<RoomId>> {
        let secs = tuning.tick_secs;
        let mut reached = Vec::new();

        for (room_id, session) in self.sessions.iter_mut() {
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| PlantError::UnknownRoom(room_id.clone()))?;
            let current = room.require_current_temp()?;
            let target = room.require_target_temp()?;
            let speed = session.target_speed();

            let charged = session.advance(secs, plant.fee_rate(speed));
            room.accrue(charged, secs);

            let next = mode.step_toward(current, target, tuning.temp_rate(speed) * secs);
            room.set_current_temp(next);

            if (next - target).abs() < tuning.reach_tolerance || mode.is_satisfied(next, target) {
                reached.push(room_id.clone());
            }
        }

        Ok(reached)
    }

    /// Longest-served member at `speed`; equal service time evicts the lowest room id.
    fn eviction_victim(&self, speed: FanSpeed) -> Option<RoomId> {
        self.sessions
            .values()
            .filter(|session| session.target_speed() == speed)
            .max_by(|a, b| {
                a.elapsed_secs()
                    .total_cmp(&b.elapsed_secs())
                    .then_with(|| b.room_id().cmp(a.room_id()))
            })
            .map(|session| session.room_id().clone())
    }

    fn insert(&mut self, mut session: ServiceSession, now: DateTime<Utc>) {
        session.start(now);
        self.sessions.insert(session.room_id().clone(), session);
        self.recompute_bounds();
    }

    fn take(&mut self, room: &RoomId, now: DateTime<Utc>) -> Option<Finished> {
        let mut session = self.sessions.remove(room)?;
        self.recompute_bounds();
        let detail = session.finish(now);
        Some(Finished { session, detail })
    }

    fn recompute_bounds(&mut self) {
        let speeds = self.sessions.values().map(ServiceSession::target_speed);
        self.min_speed = speeds.clone().min();
        self.max_speed = speeds.max();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap()
    }

    fn session(room: &str, speed: FanSpeed) -> ServiceSession {
        ServiceSession::new(RoomId::from(room), speed, 1.0, 120.0)
    }

    fn queue_with(members: &[(&str, FanSpeed)]) -> ServiceQueue {
        let mut queue = ServiceQueue::new(3, 120.0);
        for (room, speed) in members {
            assert!(matches!(
                queue.push(session(room, *speed), Admission::Request, now()),
                PushOutcome::Admitted { evicted: None }
            ));
        }
        queue
    }

    fn serve_for(queue: &mut ServiceQueue, room: &str, secs: f64) {
        queue
            .sessions
            .get_mut(&RoomId::from(room))
            .unwrap()
            .advance(secs, 1.0);
    }

    #[test]
    fn higher_tier_preempts_longest_served_low() {
        let mut queue = queue_with(&[
            ("a", FanSpeed::Low),
            ("b", FanSpeed::Low),
            ("c", FanSpeed::High),
        ]);
        serve_for(&mut queue, "a", 10.0);
        serve_for(&mut queue, "b", 40.0);

        let outcome = queue.push(session("d", FanSpeed::Normal), Admission::Request, now());

        let PushOutcome::Admitted {
            evicted: Some(evicted),
        } = outcome
        else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted.session.room_id(), &RoomId::from("b"));
        assert_eq!(evicted.detail.unwrap().duration_secs, 40.0);
        assert!(queue.contains(&RoomId::from("d")));
        assert!(queue.contains(&RoomId::from("a")));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.min_speed(), Some(FanSpeed::Low));
        assert_eq!(queue.max_speed(), Some(FanSpeed::High));
    }

    #[test]
    fn equal_service_time_evicts_lowest_room_id() {
        let mut queue = queue_with(&[
            ("b", FanSpeed::Low),
            ("a", FanSpeed::Low),
            ("c", FanSpeed::Low),
        ]);

        let outcome = queue.push(session("d", FanSpeed::High), Admission::Request, now());

        let PushOutcome::Admitted {
            evicted: Some(evicted),
        } = outcome
        else {
            panic!("expected an eviction");
        };
        assert_eq!(evicted.session.room_id(), &RoomId::from("a"));
    }

    #[test]
    fn saturated_equal_tier_waits_with_grace() {
        let mut queue = queue_with(&[
            ("a", FanSpeed::Normal),
            ("b", FanSpeed::Normal),
            ("c", FanSpeed::Normal),
        ]);

        let outcome = queue.push(session("d", FanSpeed::Normal), Admission::Request, now());

        let PushOutcome::Refused(refused) = outcome else {
            panic!("expected refusal");
        };
        assert_eq!(refused.remaining_wait(), 120.0);
        assert!(!refused.is_active());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn lower_tier_against_mixed_queue_waits_indefinitely() {
        let mut queue = queue_with(&[
            ("a", FanSpeed::Normal),
            ("b", FanSpeed::High),
            ("c", FanSpeed::High),
        ]);

        for speed in [FanSpeed::Low, FanSpeed::Normal] {
            let outcome = queue.push(session("d", speed), Admission::Request, now());
            let PushOutcome::Refused(refused) = outcome else {
                panic!("expected refusal");
            };
            assert_eq!(refused.remaining_wait(), UNBOUNDED_WAIT);
        }
    }

    #[test]
    fn timeout_rotates_out_equal_tier() {
        let mut queue = queue_with(&[
            ("a", FanSpeed::Normal),
            ("b", FanSpeed::Normal),
            ("c", FanSpeed::Normal),
        ]);
        serve_for(&mut queue, "c", 120.0);

        let outcome = queue.push(session("d", FanSpeed::Normal), Admission::Timeout, now());

        let PushOutcome::Admitted {
            evicted: Some(evicted),
        } = outcome
        else {
            panic!("expected rotation");
        };
        assert_eq!(evicted.session.room_id(), &RoomId::from("c"));
        assert!(queue.contains(&RoomId::from("d")));
    }

    #[test]
    fn timeout_below_minimum_is_refused() {
        let mut queue = queue_with(&[
            ("a", FanSpeed::High),
            ("b", FanSpeed::High),
            ("c", FanSpeed::High),
        ]);

        let outcome = queue.push(session("d", FanSpeed::Low), Admission::Timeout, now());

        let PushOutcome::Refused(refused) = outcome else {
            panic!("expected refusal");
        };
        assert_eq!(refused.remaining_wait(), UNBOUNDED_WAIT);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn capacity_never_exceeded() {
        let mut queue = ServiceQueue::new(3, 120.0);
        let speeds = [FanSpeed::Low, FanSpeed::Normal, FanSpeed::High];
        for i in 0..30 {
            let speed = speeds[i % 3];
            let _ = queue.push(session(&format!("r{i}"), speed), Admission::Request, now());
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.free_slots(), 0);
    }

    #[test]
    fn remove_finishes_session() {
        let mut queue = queue_with(&[("a", FanSpeed::Low)]);

        let finished = queue.remove(&RoomId::from("a"), now()).unwrap();

        assert!(finished.detail.is_some());
        assert!(queue.is_empty());
        assert_eq!(queue.min_speed(), None);
        assert!(queue.remove(&RoomId::from("a"), now()).is_none());
    }

    #[test]
    fn update_cools_and_bills_until_reached() {
        let plant = PlantConfig::default();
        let tuning = SchedulerConfig::default();
        let mut rooms = RoomDirectory::new();
        let mut room = Room::new(RoomId::from("a"));
        room.power_on(23.5, 20.0, FanSpeed::High);
        rooms.insert(RoomId::from("a"), room);
        let mut queue = queue_with(&[("a", FanSpeed::High)]);

        // 3.5 degrees at 1/30 per second.
        for _ in 0..104 {
            let reached = queue
                .update(Mode::Cool, &plant, &tuning, &mut rooms)
                .unwrap();
            assert!(reached.is_empty());
        }
        let reached = queue
            .update(Mode::Cool, &plant, &tuning, &mut rooms)
            .unwrap();

        assert_eq!(reached, vec![RoomId::from("a")]);
        let room = &rooms[&RoomId::from("a")];
        assert!((room.current_temp().unwrap() - 20.0).abs() < 0.01);
        assert_eq!(room.service_secs(), 105.0);
        assert!((room.accrued_fee() - 1.5 / 60.0 * 105.0).abs() < 1e-9);
    }
}
