use crate::{
    config::PlantConfig,
    error::{PlantError, PlantResult},
    room::{Room, RoomDirectory},
    types::{Mode, PlantStatus, RoomId},
};

/// Plant-wide parameters plus the fixed room directory.
#[derive(Debug, Clone)]
pub struct Plant {
    status: PlantStatus,
    params: Option<PlantConfig>,
    rooms: RoomDirectory,
}

impl Plant {
    pub fn new<I, S>(room_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms = room_ids
            .into_iter()
            .map(|id| {
                let id = RoomId::new(id);
                (id.clone(), Room::new(id))
            })
            .collect();
        Self {
            status: PlantStatus::Standby,
            params: None,
            rooms,
        }
    }

    pub fn status(&self) -> PlantStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == PlantStatus::Running
    }

    pub fn is_initialized(&self) -> bool {
        self.params.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.params.as_ref().map_or(Mode::Unset, |params| params.mode)
    }

    pub fn params(&self) -> PlantResult<&PlantConfig> {
        self.params.as_ref().ok_or(PlantError::NotInitialized)
    }

    /// Parameters can be replaced any time the plant is not running.
    pub fn configure(&mut self, params: PlantConfig) -> PlantResult<()> {
        params.validate()?;
        if self.is_running() {
            return Err(PlantError::Configuration(
                "stop the plant before changing its parameters".to_string(),
            ));
        }
        self.params = Some(params);
        Ok(())
    }

    pub fn start(&mut self) -> PlantResult<()> {
        self.params()?;
        self.status = PlantStatus::Running;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.status = PlantStatus::Stopped;
    }

    pub fn require_running(&self) -> PlantResult<&PlantConfig> {
        let params = self.params()?;
        if !self.is_running() {
            return Err(PlantError::NotRunning);
        }
        Ok(params)
    }

    pub fn room(&self, id: &RoomId) -> PlantResult<&Room> {
        self.rooms
            .get(id)
            .ok_or_else(|| PlantError::UnknownRoom(id.clone()))
    }

    pub fn room_mut(&mut self, id: &RoomId) -> PlantResult<&mut Room> {
        self.rooms
            .get_mut(id)
            .ok_or_else(|| PlantError::UnknownRoom(id.clone()))
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Parameters and rooms borrowed together for the tick.
    pub(crate) fn split_mut(&mut self) -> PlantResult<(&PlantConfig, &mut RoomDirectory)> {
        let params = self.params.as_ref().ok_or(PlantError::NotInitialized)?;
        Ok((params, &mut self.rooms))
    }
}
