use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use aircon_common::{
    parse_command_topic, parse_panel_command, parse_speed, parse_temperature, render_detail,
    render_invoice, render_report, room_state_topic, PlantConfig, PlantError, RecordStore,
    RenderedFile, Report, ReportPeriod, Request, Response, RoomId, RuntimeConfig, Scheduler,
    MAX_PAYLOAD_BYTES, TOPIC_CMD_FILTER, TOPIC_PLANT_STATE,
};

use crate::recorder::Recorder;

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Mutex<Scheduler>>,
    recorder: Recorder,
    timezone: Arc<String>,
    mqtt: Option<AsyncClient>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    journal_path: Arc<PathBuf>,
    reports_dir: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct PrintedFile {
    path: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let scheduler = build_scheduler(&runtime);
    let recorder = Recorder::start(store.journal_path.as_ref().clone())
        .await
        .context("failed to open record journal")?;

    let mqtt = if runtime.network.mqtt_enabled {
        let (client, eventloop) = connect_mqtt(&runtime);
        Some((client, eventloop))
    } else {
        info!("mqtt disabled; room panels are only reachable over http");
        None
    };

    let app_state = AppState {
        scheduler: Arc::new(Mutex::new(scheduler)),
        recorder,
        timezone: Arc::new(runtime.timezone.clone()),
        mqtt: mqtt.as_ref().map(|(client, _)| client.clone()),
        store,
    };

    if let Some((client, eventloop)) = mqtt {
        client
            .subscribe(TOPIC_CMD_FILTER, QoS::AtMostOnce)
            .await
            .context("failed to subscribe to room panel commands")?;
        spawn_mqtt_loop(app_state.clone(), eventloop);
        spawn_state_publish_loop(app_state.clone(), client);
    }
    spawn_tick_loop(app_state.clone(), runtime.tick_interval_ms);

    let port = std::env::var("AIRCON_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, make_router(app_state)).await?;
    Ok(())
}

fn build_scheduler(runtime: &RuntimeConfig) -> Scheduler {
    let mut scheduler = Scheduler::new(runtime.rooms.iter().cloned(), runtime.scheduler.clone());

    if let Some(plant) = runtime.plant.clone() {
        match scheduler.initialize_plant(plant) {
            Ok(()) => info!("plant parameters restored from runtime config"),
            Err(err) => warn!("stored plant parameters rejected: {err}"),
        }
    }
    if runtime.auto_start {
        match scheduler.start_plant() {
            Ok(()) => info!("plant started at boot"),
            Err(err) => warn!("auto start failed: {err}"),
        }
    }

    info!(
        "plant ready with {} rooms, capacity {}",
        runtime.rooms.len(),
        scheduler.tuning().service_capacity
    );
    scheduler
}

fn connect_mqtt(runtime: &RuntimeConfig) -> (AsyncClient, rumqttc::EventLoop) {
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("aircon-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    AsyncClient::new(mqtt_options, 64)
}

fn make_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/plant/status", get(handle_plant_status))
        .route("/api/plant/init", post(handle_plant_init))
        .route("/api/plant/start", post(handle_plant_start))
        .route("/api/plant/stop", post(handle_plant_stop))
        .route("/api/rooms/{room}/check-in", post(handle_check_in))
        .route("/api/rooms/{room}/check-out", post(handle_check_out))
        .route("/api/rooms/{room}/power-on", post(handle_power_on))
        .route("/api/rooms/{room}/power-off", post(handle_power_off))
        .route("/api/rooms/{room}/target", post(handle_set_target))
        .route("/api/rooms/{room}/speed", post(handle_set_speed))
        .route("/api/rooms/{room}/fee", get(handle_get_fee))
        .route("/api/rooms/{room}/detail", get(handle_get_detail))
        .route("/api/rooms/{room}/detail/print", post(handle_print_detail))
        .route("/api/rooms/{room}/invoice", get(handle_get_invoice))
        .route("/api/rooms/{room}/invoice/print", post(handle_print_invoice))
        .route("/api/rooms/{room}/report", get(handle_get_report))
        .route("/api/rooms/{room}/report/print", post(handle_print_report))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Runs one request inside the scheduler's critical section. Records are
/// handed to the writer before the lock is released so they keep their order.
async fn execute(state: &AppState, request: Request) -> Result<Response, PlantError> {
    execute_then(state, request, |_, response| Ok(response)).await
}

/// Like [`execute`], but `follow_up` shapes the response while the lock is
/// still held, so no tick can land between the request and what it reports.
async fn execute_then<F>(
    state: &AppState,
    request: Request,
    follow_up: F,
) -> Result<Response, PlantError>
where
    F: FnOnce(&Scheduler, Response) -> Result<Response, PlantError>,
{
    let name = request.name();
    let room = request.room().cloned();

    let result = {
        let mut scheduler = state.scheduler.lock().await;
        let result = scheduler
            .dispatch(request, Utc::now())
            .and_then(|response| follow_up(&*scheduler, response));
        state.recorder.submit_all(scheduler.take_records());
        result
    };

    match (&result, room) {
        (Ok(_), Some(room)) => info!("{name} room {room}"),
        (Ok(_), None) => info!("{name}"),
        (Err(err), _) => warn!("{name} rejected: {err}"),
    }
    result
}

fn spawn_tick_loop(app_state: AppState, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

        loop {
            interval.tick().await;

            let result = {
                let mut scheduler = app_state.scheduler.lock().await;
                let result = scheduler.tick(Utc::now());
                app_state.recorder.submit_all(scheduler.take_records());
                result
            };

            match result {
                Ok(report) if !report.is_quiet() => info!(
                    "tick {}: reached {:?}, timed out {:?}",
                    report.tick, report.reached, report.timed_out
                ),
                Ok(report) => debug!("tick {}", report.tick),
                Err(err) => warn!("tick failed: {err}"),
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, mqtt: AsyncClient) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let payload = { app_state.scheduler.lock().await.status_payload() };

            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_PLANT_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("plant state publish failed: {err}");
                    }
                }
                Err(err) => warn!("plant state serialization failed: {err}"),
            }

            for room in &payload.rooms {
                publish_room_state(&mqtt, room).await;
            }
        }
    });
}

async fn publish_room_state(mqtt: &AsyncClient, room: &aircon_common::RoomSnapshot) {
    match serde_json::to_vec(room) {
        Ok(body) => {
            if let Err(err) = mqtt
                .publish(room_state_topic(&room.room_id), QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("room {} state publish failed: {err}", room.room_id);
            }
        }
        Err(err) => warn!("room {} state serialization failed: {err}", room.room_id),
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let Some((room, kind)) = parse_command_topic(&topic) else {
        return Ok(());
    };

    let request = parse_panel_command(&room, kind, &message)?;
    let response = execute_then(app_state, request, |scheduler, _| {
        scheduler.get_fee(&room).map(Response::Room)
    })
    .await?;

    if let (Some(mqtt), Response::Room(snapshot)) = (&app_state.mqtt, response) {
        publish_room_state(mqtt, &snapshot).await;
    }
    Ok(())
}

async fn handle_plant_status(State(state): State<AppState>) -> impl IntoResponse {
    let payload = state.scheduler.lock().await.status_payload();
    Json(payload)
}

async fn handle_plant_init(
    State(state): State<AppState>,
    Json(params): Json<PlantConfig>,
) -> axum::response::Response {
    if let Err(err) = execute(&state, Request::InitializePlant(params.clone())).await {
        return plant_error_response(&err);
    }

    if let Err(err) = state.store.save_plant(params).await {
        warn!("failed to persist plant parameters: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist plant parameters",
        );
    }

    handle_plant_status(State(state)).await.into_response()
}

async fn handle_plant_start(State(state): State<AppState>) -> axum::response::Response {
    match execute(&state, Request::StartPlant).await {
        Ok(_) => handle_plant_status(State(state)).await.into_response(),
        Err(err) => plant_error_response(&err),
    }
}

async fn handle_plant_stop(State(state): State<AppState>) -> axum::response::Response {
    match execute(&state, Request::StopPlant).await {
        Ok(_) => handle_plant_status(State(state)).await.into_response(),
        Err(err) => plant_error_response(&err),
    }
}

async fn handle_check_in(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    room_request(&state, Request::CheckIn(room.clone()), &room).await
}

async fn handle_check_out(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    respond(execute(&state, Request::CheckOut(RoomId::new(room))).await)
}

async fn handle_power_on(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("current_temp") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'current_temp' parameter");
    };
    let current_temp = match parse_temperature(value) {
        Ok(temp) => temp,
        Err(err) => return plant_error_response(&err),
    };

    let request = Request::PowerOn {
        room: RoomId::new(room),
        current_temp,
    };
    respond(execute(&state, request).await)
}

async fn handle_power_off(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    room_request(&state, Request::PowerOff(room.clone()), &room).await
}

async fn handle_set_target(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let temp = match parse_temperature(value) {
        Ok(temp) => temp,
        Err(err) => return plant_error_response(&err),
    };

    let room = RoomId::new(room);
    let request = Request::ChangeTargetTemp {
        room: room.clone(),
        temp,
    };
    room_request(&state, request, &room).await
}

async fn handle_set_speed(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let speed = match parse_speed(value) {
        Ok(speed) => speed,
        Err(err) => return plant_error_response(&err),
    };

    let room = RoomId::new(room);
    let request = Request::ChangeTargetSpeed {
        room: room.clone(),
        speed,
    };
    room_request(&state, request, &room).await
}

async fn handle_get_fee(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    respond(execute(&state, Request::GetFee(RoomId::new(room))).await)
}

async fn handle_get_detail(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    if let Err(err) = ensure_room(&state, &room).await {
        return plant_error_response(&err);
    }

    state.recorder.flush().await;
    let store = state.recorder.store().lock().await;
    let details: Vec<_> = store.details_for_stay(&room).into_iter().cloned().collect();
    Json(details).into_response()
}

async fn handle_print_detail(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    if let Err(err) = ensure_room(&state, &room).await {
        return plant_error_response(&err);
    }

    let offset = report_offset(&state.timezone);
    state.recorder.flush().await;
    let rendered = {
        let store = state.recorder.store().lock().await;
        render_detail(&store.details_for_stay(&room), offset)
    };

    match rendered {
        Some(file) => print_response(&state, file).await,
        None => error_response(StatusCode::NOT_FOUND, "No detail records for this stay"),
    }
}

async fn handle_get_invoice(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    if let Err(err) = ensure_room(&state, &room).await {
        return plant_error_response(&err);
    }

    state.recorder.flush().await;
    let invoice = {
        let store = state.recorder.store().lock().await;
        store.latest_invoice(&room).cloned()
    };

    match invoice {
        Some(invoice) => Json(invoice).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Room has not checked out yet"),
    }
}

async fn handle_print_invoice(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
) -> axum::response::Response {
    let room = RoomId::new(room);
    if let Err(err) = ensure_room(&state, &room).await {
        return plant_error_response(&err);
    }

    state.recorder.flush().await;
    let invoice = {
        let store = state.recorder.store().lock().await;
        store.latest_invoice(&room).cloned()
    };

    match invoice {
        Some(invoice) => {
            let file = render_invoice(&invoice, report_offset(&state.timezone));
            print_response(&state, file).await
        }
        None => error_response(StatusCode::NOT_FOUND, "Room has not checked out yet"),
    }
}

async fn handle_get_report(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    match build_report(&state, room, &params).await {
        Ok(report) => Json(report).into_response(),
        Err(response) => response,
    }
}

async fn handle_print_report(
    State(state): State<AppState>,
    UrlPath(room): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    match build_report(&state, room, &params).await {
        Ok(report) => {
            let file = render_report(&report, report_offset(&state.timezone));
            print_response(&state, file).await
        }
        Err(response) => response,
    }
}

async fn build_report(
    state: &AppState,
    room: String,
    params: &HashMap<String, String>,
) -> Result<Report, axum::response::Response> {
    let room = RoomId::new(room);
    ensure_room(state, &room)
        .await
        .map_err(|err| plant_error_response(&err))?;

    let period = match params.get("period") {
        Some(value) => ReportPeriod::parse(value).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "Invalid period. Use 'day', 'week' or 'month'",
            )
        })?,
        None => ReportPeriod::Day,
    };

    let offset = report_offset(&state.timezone);
    let date = match params.get("date") {
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, "Invalid date. Use YYYY-MM-DD")
        })?,
        None => Utc::now().with_timezone(&offset).date_naive(),
    };

    let (start, finish) = period
        .bounds(date, offset)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Date out of range"))?;

    state.recorder.flush().await;
    let store = state.recorder.store().lock().await;
    Ok(Report::build(&*store, &room, start, finish))
}

/// Runs `request` and answers with the room's state as it left the request.
async fn room_request(state: &AppState, request: Request, room: &RoomId) -> axum::response::Response {
    let result = execute_then(state, request, |scheduler, _| {
        scheduler.get_fee(room).map(Response::Room)
    })
    .await;
    respond(result)
}

async fn ensure_room(state: &AppState, room: &RoomId) -> Result<(), PlantError> {
    state.scheduler.lock().await.plant().room(room).map(|_| ())
}

async fn print_response(state: &AppState, file: RenderedFile) -> axum::response::Response {
    match state.store.write_report(&file).await {
        Ok(path) => {
            info!("printed {}", path.display());
            Json(PrintedFile {
                path: path.display().to_string(),
            })
            .into_response()
        }
        Err(err) => {
            warn!("failed to write {}: {err:#}", file.filename);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to write file")
        }
    }
}

fn respond(result: Result<Response, PlantError>) -> axum::response::Response {
    match result {
        Ok(Response::Ack) => Json(json!({ "ok": true })).into_response(),
        Ok(Response::PoweredOn { target_temp, speed }) => {
            Json(json!({ "targetTemp": target_temp, "speed": speed })).into_response()
        }
        Ok(Response::Invoice(invoice)) => Json(invoice).into_response(),
        Ok(Response::Room(snapshot)) => Json(snapshot).into_response(),
        Ok(Response::Rooms(snapshots)) => Json(snapshots).into_response(),
        Err(err) => plant_error_response(&err),
    }
}

fn plant_error_response(err: &PlantError) -> axum::response::Response {
    let status = match err {
        PlantError::UnknownRoom(_) => StatusCode::NOT_FOUND,
        PlantError::InvalidStatus { .. } | PlantError::NotInitialized | PlantError::NotRunning => {
            StatusCode::CONFLICT
        }
        PlantError::Configuration(_)
        | PlantError::OutOfRange { .. }
        | PlantError::UnknownSpeed(_)
        | PlantError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        PlantError::UnsetField { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
}

impl AppStore {
    fn from_env() -> Self {
        let data_dir = std::env::var("AIRCON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.aircon"));
        Self::new(&data_dir)
    }

    fn new(data_dir: &Path) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            journal_path: Arc::new(data_dir.join("records.jsonl")),
            reports_dir: Arc::new(data_dir.join("reports")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    /// Keeps the administrator's parameters across restarts.
    async fn save_plant(&self, plant: PlantConfig) -> anyhow::Result<()> {
        let mut runtime = self.load_runtime_config().await?;
        runtime.plant = Some(plant);
        self.save_runtime_config(&runtime).await
    }

    async fn write_report(&self, file: &RenderedFile) -> anyhow::Result<PathBuf> {
        let dir = self.reports_dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(&file.filename);
        tokio::fs::write(&path, file.body.as_bytes()).await?;
        Ok(path)
    }
}

fn report_offset(timezone: &str) -> FixedOffset {
    match timezone.parse::<Tz>() {
        Ok(tz) => Utc::now().with_timezone(&tz).offset().fix(),
        Err(_) => {
            warn!("unknown timezone {timezone:?}; reporting in UTC");
            Utc.fix()
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn make_test_state(dir: &Path) -> AppState {
        let store = AppStore::new(dir);
        let runtime = RuntimeConfig::default();
        AppState {
            scheduler: Arc::new(Mutex::new(build_scheduler(&runtime))),
            recorder: Recorder::start(store.journal_path.as_ref().clone())
                .await
                .unwrap(),
            timezone: Arc::new(runtime.timezone),
            mqtt: None,
            store,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = HttpRequest::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn running_app(dir: &Path) -> Router {
        let app = make_router(make_test_state(dir).await);
        let params = serde_json::to_value(PlantConfig::default()).unwrap();
        let (status, _) = call(&app, "POST", "/api/plant/init", Some(params)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/api/plant/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "RUNNING");
        app
    }

    #[tokio::test]
    async fn status_lists_every_room() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = make_router(make_test_state(dir.path()).await);

        let (status, body) = call(&app, "GET", "/api/plant/status", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "STANDBY");
        assert_eq!(body["mode"], "UNSET");
        assert_eq!(body["rooms"].as_array().unwrap().len(), 5);
        assert_eq!(body["rooms"][0]["roomId"], "309c");
    }

    #[tokio::test]
    async fn init_rejects_bad_parameters_and_persists_good_ones() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = make_router(make_test_state(dir.path()).await);

        let mut params = serde_json::to_value(PlantConfig::default()).unwrap();
        params["fee_rate"] = json!([1.0]);
        let (status, body) = call(&app, "POST", "/api/plant/init", Some(params)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("fee rates"));

        let params = serde_json::to_value(PlantConfig::default()).unwrap();
        let (status, body) = call(&app, "POST", "/api/plant/init", Some(params)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "COOL");

        let saved = AppStore::new(dir.path()).load_runtime_config().await.unwrap();
        assert_eq!(saved.plant, Some(PlantConfig::default()));
    }

    #[tokio::test]
    async fn room_requests_map_errors_to_status_codes() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = running_app(dir.path()).await;

        let (status, _) = call(&app, "POST", "/api/rooms/404/check-in", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/api/rooms/309c/power-on?current_temp=28", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", "/api/rooms/309c/check-in", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, "POST", "/api/rooms/309c/power-on", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(&app, "POST", "/api/rooms/309c/power-on?current_temp=28", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["targetTemp"], 24.0);
        assert_eq!(body["speed"], "NORMAL");

        let (status, _) = call(&app, "POST", "/api/rooms/309c/target?value=40", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/api/rooms/309c/speed?value=turbo", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "POST", "/api/rooms/309c/speed?value=high", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["speed"], "HIGH");
        assert_eq!(body["status"], "SERVING");
        assert_eq!(body["feeRate"], 1.5);
    }

    #[tokio::test]
    async fn stay_produces_detail_invoice_and_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = running_app(dir.path()).await;

        call(&app, "POST", "/api/rooms/f3/check-in", None).await;
        call(&app, "POST", "/api/rooms/f3/power-on?current_temp=27", None).await;

        let (status, _) = call(&app, "POST", "/api/rooms/f3/check-out", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(&app, "GET", "/api/rooms/f3/invoice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", "/api/rooms/f3/power-off", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CLOSED");

        let (status, details) = call(&app, "GET", "/api/rooms/f3/detail", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details.as_array().unwrap().len(), 1);
        assert_eq!(details[0]["speed"], "NORMAL");

        let (status, invoice) = call(&app, "POST", "/api/rooms/f3/check-out", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(invoice["room_id"], "f3");

        let (status, printed) = call(&app, "POST", "/api/rooms/f3/invoice/print", None).await;
        assert_eq!(status, StatusCode::OK);
        let path = PathBuf::from(printed["path"].as_str().unwrap());
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(body.starts_with("==================== INVOICE"));
        assert!(path.starts_with(dir.path().join("reports")));

        let (status, report) = call(&app, "GET", "/api/rooms/f3/report?period=month", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["times_of_on_off"], 2);
        assert_eq!(report["times_of_dispatch"], 1);
        assert_eq!(report["number_of_detail"], 1);

        let (status, _) = call(&app, "GET", "/api/rooms/f3/report?period=year", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(&app, "GET", "/api/rooms/f3/report?date=%2B262142-12-31", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Date out of range");
    }

    #[tokio::test]
    async fn room_snapshot_is_taken_before_the_lock_is_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = make_test_state(dir.path()).await;
        execute(&state, Request::InitializePlant(PlantConfig::default()))
            .await
            .unwrap();
        execute(&state, Request::StartPlant).await.unwrap();
        let room = RoomId::from("311c");
        execute(&state, Request::CheckIn(room.clone())).await.unwrap();

        let scheduler = state.scheduler.clone();
        let request = Request::PowerOn {
            room: room.clone(),
            current_temp: 29.0,
        };
        let response = execute_then(&state, request, |locked, _| {
            assert!(scheduler.try_lock().is_err());
            locked.get_fee(&room).map(Response::Room)
        })
        .await
        .unwrap();

        let Response::Room(snapshot) = response else {
            panic!("expected a room snapshot");
        };
        assert_eq!(snapshot.status, "SERVING");
        assert_eq!(snapshot.current_temp, Some(29.0));
        assert_eq!(snapshot.service_time_secs, 0.0);
    }

    #[tokio::test]
    async fn stop_closes_powered_rooms() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = running_app(dir.path()).await;
        call(&app, "POST", "/api/rooms/310c/check-in", None).await;
        call(&app, "POST", "/api/rooms/310c/power-on?current_temp=29", None).await;

        let (status, body) = call(&app, "POST", "/api/plant/stop", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "STOPPED");
        assert_eq!(body["serving"], json!([]));
        assert_eq!(body["rooms"][1]["status"], "CLOSED");
    }
}
