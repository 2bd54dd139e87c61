use std::collections::BTreeMap;

use crate::{
    session::ServiceSession,
    types::{FanSpeed, RoomId},
};

/// Sessions refused by the service queue. Waiting rooms are not billed and
/// their temperature does not change.
#[derive(Debug, Clone, Default)]
pub struct WaitQueue {
    sessions: BTreeMap<RoomId, ServiceSession>,
    max_speed: Option<FanSpeed>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
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

    pub fn max_speed(&self) -> Option<FanSpeed> {
        self.max_speed
    }

    pub fn push(&mut self, session: ServiceSession) {
        let speed = session.target_speed();
        self.max_speed = Some(self.max_speed.map_or(speed, |max| max.max(speed)));
        self.sessions.insert(session.room_id().clone(), session);
    }

    /// Removes the highest-tier session closest to timing out.
    pub fn pop(&mut self) -> Option<ServiceSession> {
        let max = self.max_speed?;
        let room = self
            .sessions
            .values()
            .filter(|session| session.target_speed() == max)
            .min_by(|a, b| a.remaining_wait().total_cmp(&b.remaining_wait()))?
            .room_id()
            .clone();
        self.remove(&room)
    }

    pub fn remove(&mut self, room: &RoomId) -> Option<ServiceSession> {
        let session = self.sessions.remove(room)?;
        self.recompute_max();
        Some(session)
    }

    pub fn drain(&mut self) -> Vec<ServiceSession> {
        self.max_speed = None;
        std::mem::take(&mut self.sessions).into_values().collect()
    }

    /// Burns `secs` of wait budget and hands back the sessions whose budget
    /// ran out, higher tiers first.
    pub fn update(&mut self, secs: f64) -> Vec<ServiceSession> {
        let expired: Vec<RoomId> = self
            .sessions
            .iter_mut()
            .filter_map(|(room, session)| session.count_down(secs).then(|| room.clone()))
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }

        let mut timed_out: Vec<ServiceSession> = expired
            .iter()
            .filter_map(|room| self.sessions.remove(room))
            .collect();
        self.recompute_max();

        timed_out.sort_by(|a, b| {
            b.target_speed()
                .cmp(&a.target_speed())
                .then_with(|| a.remaining_wait().total_cmp(&b.remaining_wait()))
        });
        timed_out
    }

    fn recompute_max(&mut self) {
        self.max_speed = self
            .sessions
            .values()
            .map(ServiceSession::target_speed)
            .max();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UNBOUNDED_WAIT;

    fn waiting(room: &str, speed: FanSpeed, wait: f64) -> ServiceSession {
        ServiceSession::new(RoomId::from(room), speed, 0.75, wait)
    }

    #[test]
    fn pop_prefers_tier_then_shortest_wait() {
        let mut queue = WaitQueue::new();
        queue.push(waiting("a", FanSpeed::Normal, 90.0));
        queue.push(waiting("b", FanSpeed::Normal, 10.0));
        queue.push(waiting("c", FanSpeed::Low, 1.0));

        let first = queue.pop().unwrap();
        assert_eq!(first.room_id(), &RoomId::from("b"));
        assert_eq!(queue.max_speed(), Some(FanSpeed::Normal));

        let second = queue.pop().unwrap();
        assert_eq!(second.room_id(), &RoomId::from("a"));
        assert_eq!(queue.max_speed(), Some(FanSpeed::Low));
    }

    #[test]
    fn update_returns_only_expired() {
        let mut queue = WaitQueue::new();
        queue.push(waiting("a", FanSpeed::Normal, 2.0));
        queue.push(waiting("b", FanSpeed::High, UNBOUNDED_WAIT));

        assert!(queue.update(1.0).is_empty());
        let expired = queue.update(1.0);

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].room_id(), &RoomId::from("a"));
        assert!(!queue.contains(&RoomId::from("a")));
        assert_eq!(queue.max_speed(), Some(FanSpeed::High));
    }

    #[test]
    fn waiting_sessions_are_not_billed() {
        let mut queue = WaitQueue::new();
        queue.push(waiting("a", FanSpeed::High, UNBOUNDED_WAIT));

        for _ in 0..300 {
            let _ = queue.update(1.0);
        }

        let session = queue.get(&RoomId::from("a")).unwrap();
        assert_eq!(session.fee(), 0.0);
        assert_eq!(session.elapsed_secs(), 0.0);
    }

    #[test]
    fn remove_and_drain_reset_max() {
        let mut queue = WaitQueue::new();
        queue.push(waiting("a", FanSpeed::High, 5.0));
        queue.push(waiting("b", FanSpeed::Low, 5.0));

        assert!(queue.remove(&RoomId::from("a")).is_some());
        assert_eq!(queue.max_speed(), Some(FanSpeed::Low));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
