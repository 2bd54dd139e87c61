use chrono::{DateTime, Utc};

use crate::{
    command::{Request, Response},
    config::{PlantConfig, SchedulerConfig},
    error::{PlantError, PlantResult},
    plant::Plant,
    records::{Invoice, Operation, OperationLog, PlantRecord},
    room::Room,
    service_queue::{Admission, Finished, PushOutcome, ServiceQueue},
    session::ServiceSession,
    types::{FanSpeed, PlantStatusPayload, RoomId, RoomSnapshot, RoomStatus},
    wait_queue::WaitQueue,
};

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub reached: Vec<RoomId>,
    pub timed_out: Vec<RoomId>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.reached.is_empty() && self.timed_out.is_empty()
    }
}

/// Owns the plant, both queues and the pending record outbox. Callers wrap it
/// in a single lock; nothing here blocks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    plant: Plant,
    tuning: SchedulerConfig,
    service: ServiceQueue,
    waiting: WaitQueue,
    ticks: u64,
    outbox: Vec<PlantRecord>,
}

impl Scheduler {
    pub fn new<I, S>(room_ids: I, mut tuning: SchedulerConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tuning.sanitize();
        Self {
            plant: Plant::new(room_ids),
            service: ServiceQueue::new(tuning.service_capacity, tuning.wait_grace_secs),
            waiting: WaitQueue::new(),
            tuning,
            ticks: 0,
            outbox: Vec::new(),
        }
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn tuning(&self) -> &SchedulerConfig {
        &self.tuning
    }

    pub fn service_queue(&self) -> &ServiceQueue {
        &self.service
    }

    pub fn wait_queue(&self) -> &WaitQueue {
        &self.waiting
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Drains records produced since the last call, in the order they happened.
    pub fn take_records(&mut self) -> Vec<PlantRecord> {
        std::mem::take(&mut self.outbox)
    }

    pub fn dispatch(&mut self, request: Request, now: DateTime<Utc>) -> PlantResult<Response> {
        match request {
            Request::InitializePlant(params) => {
                self.initialize_plant(params)?;
                Ok(Response::Ack)
            }
            Request::StartPlant => {
                self.start_plant()?;
                Ok(Response::Ack)
            }
            Request::StopPlant => {
                self.stop_plant(now)?;
                Ok(Response::Ack)
            }
            Request::CheckIn(room) => {
                self.check_in(&room, now)?;
                Ok(Response::Ack)
            }
            Request::CheckOut(room) => self.check_out(&room, now).map(Response::Invoice),
            Request::PowerOn { room, current_temp } => {
                let (target_temp, speed) = self.power_on(&room, current_temp, now)?;
                Ok(Response::PoweredOn { target_temp, speed })
            }
            Request::PowerOff(room) => {
                self.power_off(&room, now)?;
                Ok(Response::Ack)
            }
            Request::ChangeTargetTemp { room, temp } => {
                self.change_target_temp(&room, temp, now)?;
                Ok(Response::Ack)
            }
            Request::ChangeTargetSpeed { room, speed } => {
                self.change_target_speed(&room, speed, now)?;
                Ok(Response::Ack)
            }
            Request::GetFee(room) => self.get_fee(&room).map(Response::Room),
            Request::GetAllStatus => Ok(Response::Rooms(self.get_all_status())),
        }
    }

    pub fn initialize_plant(&mut self, params: PlantConfig) -> PlantResult<()> {
        self.plant.configure(params)
    }

    pub fn start_plant(&mut self) -> PlantResult<()> {
        self.plant.start()
    }

    /// Halts service: every session is finished, both queues emptied and every
    /// occupied room closed.
    pub fn stop_plant(&mut self, now: DateTime<Utc>) -> PlantResult<()> {
        self.plant.params()?;

        for finished in self.service.drain(now) {
            self.record_detail(finished);
        }
        self.waiting.drain();

        let powered: Vec<RoomId> = self
            .plant
            .rooms()
            .filter(|room| room.status().is_powered())
            .map(|room| room.id().clone())
            .collect();
        for id in powered {
            self.plant.room_mut(&id)?.set_status(RoomStatus::Closed);
            self.log(&id, Operation::PowerOff, now);
        }

        self.plant.stop();
        Ok(())
    }

    pub fn check_in(&mut self, id: &RoomId, now: DateTime<Utc>) -> PlantResult<()> {
        self.plant.params()?;
        let room = self.plant.room_mut(id)?;
        expect_status(room, &[RoomStatus::Available], "check in")?;

        room.check_in(now);
        self.log(id, Operation::CheckIn, now);
        Ok(())
    }

    /// Closes the stay and bills it. The device must be powered off first.
    pub fn check_out(&mut self, id: &RoomId, now: DateTime<Utc>) -> PlantResult<Invoice> {
        self.plant.params()?;
        let room = self.plant.room_mut(id)?;
        expect_status(room, &[RoomStatus::Closed], "check out")?;

        let invoice = Invoice {
            room_id: id.clone(),
            check_in: room.check_in_time().unwrap_or(now),
            check_out: now,
            total_fee: room.accrued_fee(),
            service_secs: room.service_secs(),
        };
        room.check_out(now);

        self.log(id, Operation::CheckOut, now);
        self.outbox.push(PlantRecord::Invoice(invoice.clone()));
        Ok(invoice)
    }

    pub fn power_on(
        &mut self,
        id: &RoomId,
        current_temp: f64,
        now: DateTime<Utc>,
    ) -> PlantResult<(f64, FanSpeed)> {
        let params = self.plant.require_running()?;
        if !current_temp.is_finite() {
            return Err(PlantError::InvalidCommand(format!(
                "current temperature {current_temp} is not a number"
            )));
        }
        let (default_temp, default_speed) = (params.default_target_temp, params.default_speed);

        let room = self.plant.room(id)?;
        let (target_temp, speed) = match room.status() {
            RoomStatus::Closed => (default_temp, default_speed),
            RoomStatus::Standby => (room.require_target_temp()?, room.require_speed()?),
            status => return Err(invalid_status(id, status, "power on")),
        };

        self.plant
            .room_mut(id)?
            .power_on(current_temp, target_temp, speed);
        self.log(id, Operation::PowerOn, now);

        let session = self.new_session(id, speed)?;
        self.admit(session, Admission::Request, now)?;
        Ok((target_temp, speed))
    }

    pub fn power_off(&mut self, id: &RoomId, now: DateTime<Utc>) -> PlantResult<()> {
        self.plant.require_running()?;
        let room = self.plant.room(id)?;
        if !room.status().is_powered() {
            return Err(invalid_status(id, room.status(), "power off"));
        }

        if let Some(finished) = self.service.remove(id, now) {
            self.record_detail(finished);
        }
        self.waiting.remove(id);

        self.plant.room_mut(id)?.set_status(RoomStatus::Closed);
        self.log(id, Operation::PowerOff, now);
        Ok(())
    }

    pub fn change_target_temp(
        &mut self,
        id: &RoomId,
        temp: f64,
        now: DateTime<Utc>,
    ) -> PlantResult<()> {
        self.plant.require_running()?.check_target_temp(temp)?;
        let room = self.plant.room(id)?;
        if !room.status().is_powered() {
            return Err(invalid_status(id, room.status(), "change the target of"));
        }
        let speed = room.require_speed()?;

        self.plant.room_mut(id)?.set_target_temp(temp);
        self.log(id, Operation::ChangeTemp, now);

        if !self.service.contains(id) && !self.waiting.contains(id) {
            let session = self.new_session(id, speed)?;
            self.admit(session, Admission::Request, now)?;
        }
        Ok(())
    }

    pub fn change_target_speed(
        &mut self,
        id: &RoomId,
        speed: FanSpeed,
        now: DateTime<Utc>,
    ) -> PlantResult<()> {
        let fee_rate = self.plant.require_running()?.fee_rate(speed);
        let room = self.plant.room(id)?;
        if !room.status().is_powered() {
            return Err(invalid_status(id, room.status(), "change the speed of"));
        }

        self.plant.room_mut(id)?.set_speed(speed);
        self.log(id, Operation::ChangeSpeed, now);

        if let Some(finished) = self.service.remove(id, now) {
            let mut session = finished.session.clone();
            self.record_detail(finished);
            session.retarget(speed, fee_rate);

            // The freed slot goes to strictly higher waiting tiers first.
            while self.service.free_slots() > 0
                && self.waiting.max_speed().is_some_and(|max| max > speed)
            {
                let Some(promoted) = self.waiting.pop() else {
                    break;
                };
                self.admit(promoted, Admission::Request, now)?;
            }
            self.admit(session, Admission::Request, now)
        } else if let Some(mut session) = self.waiting.remove(id) {
            session.retarget(speed, fee_rate);
            self.admit(session, Admission::Request, now)
        } else {
            let session = self.new_session(id, speed)?;
            self.admit(session, Admission::Request, now)
        }
    }

    pub fn get_fee(&self, id: &RoomId) -> PlantResult<RoomSnapshot> {
        self.plant.room(id).map(|room| self.snapshot(room))
    }

    pub fn get_all_status(&self) -> Vec<RoomSnapshot> {
        self.plant.rooms().map(|room| self.snapshot(room)).collect()
    }

    pub fn status_payload(&self) -> PlantStatusPayload {
        PlantStatusPayload {
            mode: self.plant.mode().as_str(),
            status: self.plant.status().as_str(),
            tick: self.ticks,
            serving: self.service.room_ids(),
            waiting: self.waiting.room_ids(),
            rooms: self.get_all_status(),
        }
    }

    /// One scheduling cycle: serve, then offer timed-out waiters a slot, then
    /// backfill free capacity from the highest waiting tier.
    pub fn tick(&mut self, now: DateTime<Utc>) -> PlantResult<TickReport> {
        if !self.plant.is_running() {
            return Ok(TickReport {
                tick: self.ticks,
                ..TickReport::default()
            });
        }
        self.ticks += 1;

        let mode = self.plant.mode();
        let (params, rooms) = self.plant.split_mut()?;
        let reached = self.service.update(mode, params, &self.tuning, rooms)?;
        for id in &reached {
            if let Some(finished) = self.service.remove(id, now) {
                self.record_detail(finished);
            }
            self.plant.room_mut(id)?.set_status(RoomStatus::Standby);
        }

        let expired = self.waiting.update(self.tuning.tick_secs);
        let timed_out: Vec<RoomId> = expired
            .iter()
            .map(|session| session.room_id().clone())
            .collect();
        for session in expired {
            self.admit(session, Admission::Timeout, now)?;
        }

        while self.service.free_slots() > 0 {
            let Some(session) = self.waiting.pop() else {
                break;
            };
            self.admit(session, Admission::Request, now)?;
        }

        Ok(TickReport {
            tick: self.ticks,
            reached,
            timed_out,
        })
    }

    /// Routes a session into service or the wait queue. A room that already
    /// meets its target needs no service and idles in STANDBY.
    fn admit(
        &mut self,
        session: ServiceSession,
        admission: Admission,
        now: DateTime<Utc>,
    ) -> PlantResult<()> {
        let id = session.room_id().clone();
        let mode = self.plant.mode();
        let room = self.plant.room(&id)?;
        if mode.is_satisfied(room.require_current_temp()?, room.require_target_temp()?) {
            self.plant.room_mut(&id)?.set_status(RoomStatus::Standby);
            return Ok(());
        }

        match self.service.push(session, admission, now) {
            PushOutcome::Admitted { evicted } => {
                self.plant.room_mut(&id)?.set_status(RoomStatus::Serving);
                self.log(&id, Operation::Dispatch, now);
                if let Some(evicted) = evicted {
                    self.park_evicted(evicted)?;
                }
            }
            PushOutcome::Refused(session) => {
                self.plant.room_mut(&id)?.set_status(RoomStatus::Waiting);
                self.waiting.push(session);
            }
        }
        Ok(())
    }

    fn park_evicted(&mut self, evicted: Finished) -> PlantResult<()> {
        let mut session = evicted.session.clone();
        self.record_detail(evicted);
        session.set_remaining_wait(self.tuning.wait_grace_secs);
        self.plant
            .room_mut(session.room_id())?
            .set_status(RoomStatus::Waiting);
        self.waiting.push(session);
        Ok(())
    }

    fn new_session(&self, id: &RoomId, speed: FanSpeed) -> PlantResult<ServiceSession> {
        let fee_rate = self.plant.params()?.fee_rate(speed);
        Ok(ServiceSession::new(
            id.clone(),
            speed,
            fee_rate,
            self.tuning.wait_grace_secs,
        ))
    }

    fn snapshot(&self, room: &Room) -> RoomSnapshot {
        let params = self.plant.params().ok();
        RoomSnapshot {
            room_id: room.id().clone(),
            status: room.status().as_str(),
            mode: self.plant.mode().as_str(),
            current_temp: room.current_temp(),
            speed: room.current_speed().map(FanSpeed::as_str),
            service_time_secs: room.service_secs(),
            target_temp: room.target_temp(),
            temp_low_limit: params.map(|params| params.temp_low_limit),
            temp_high_limit: params.map(|params| params.temp_high_limit),
            fee: room.accrued_fee(),
            fee_rate: params.zip(room.current_speed()).map(|(params, speed)| params.fee_rate(speed)),
        }
    }

    fn record_detail(&mut self, finished: Finished) {
        if let Some(detail) = finished.detail {
            self.outbox.push(PlantRecord::Detail(detail));
        }
    }

    fn log(&mut self, id: &RoomId, operation: Operation, at: DateTime<Utc>) {
        self.outbox.push(PlantRecord::Operation(OperationLog {
            room_id: id.clone(),
            operation,
            at,
        }));
    }
}

fn invalid_status(id: &RoomId, status: RoomStatus, operation: &'static str) -> PlantError {
    PlantError::InvalidStatus {
        room: id.clone(),
        status: status.as_str(),
        operation,
    }
}

fn expect_status(room: &Room, allowed: &[RoomStatus], operation: &'static str) -> PlantResult<()> {
    if allowed.contains(&room.status()) {
        Ok(())
    } else {
        Err(invalid_status(room.id(), room.status(), operation))
    }
}
