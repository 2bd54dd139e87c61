pub mod command;
pub mod config;
pub mod error;
pub mod plant;
pub mod records;
pub mod render;
pub mod room;
pub mod scheduler;
pub mod service_queue;
pub mod session;
pub mod topics;
pub mod types;
pub mod wait_queue;

pub use command::{parse_panel_command, parse_speed, parse_temperature, Request, Response};
pub use config::{NetworkConfig, PlantConfig, RuntimeConfig, SchedulerConfig, DEFAULT_ROOM_IDS};
pub use error::{PlantError, PlantResult};
pub use plant::Plant;
pub use records::{
    Detail, Invoice, MemoryStore, Operation, OperationLog, PlantRecord, RecordStore, Report,
    ReportPeriod,
};
pub use render::{render_detail, render_invoice, render_report, RenderedFile};
pub use room::{Room, RoomDirectory};
pub use scheduler::{Scheduler, TickReport};
pub use service_queue::{Admission, Finished, PushOutcome, ServiceQueue};
pub use session::{ServiceSession, UNBOUNDED_WAIT};
pub use topics::*;
pub use types::{
    FanSpeed, Mode, PlantStatus, PlantStatusPayload, RoomId, RoomSnapshot, RoomStatus,
};
pub use wait_queue::WaitQueue;
