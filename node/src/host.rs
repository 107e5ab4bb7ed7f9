use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use hive_common::{
    build_registry, command_filter, module_state_topic, node_status_topic, parse_command_topic,
    HiveError, ModuleId, ModuleIo, ModuleRegistry, NotificationQueue, PwmChannel, PwmWindow,
    RuntimeConfig, SettingsRecord, WallClock,
};

use crate::{sim::SimHardware, store::FileStorage};

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;

/// Everything the modules touch, behind one lock.
struct Node {
    registry: ModuleRegistry,
    hardware: SimHardware,
    storage: FileStorage,
    notifications: NotificationQueue,
}

impl Node {
    fn split(
        &mut self,
        now_ms: u64,
        clock: Option<WallClock>,
    ) -> (&mut ModuleRegistry, ModuleIo<'_>) {
        let Self {
            registry,
            hardware,
            storage,
            notifications,
        } = self;
        (
            registry,
            ModuleIo {
                now_ms,
                clock,
                hardware,
                storage,
                notifier: notifications,
            },
        )
    }

    fn record(&mut self, id: ModuleId) -> Result<SettingsRecord, HiveError> {
        self.registry.settings(id, &self.hardware).cloned()
    }

    fn records(&mut self) -> Vec<(ModuleId, SettingsRecord)> {
        self.registry.all_settings(&self.hardware)
    }

    /// Settings records of every module that notified since the last call.
    fn take_notified(&mut self) -> Vec<(ModuleId, SettingsRecord)> {
        let ids = self.notifications.drain();
        ids.into_iter()
            .filter_map(|id| self.record(id).ok().map(|record| (id, record)))
            .collect()
    }
}

#[derive(Clone)]
struct AppState {
    node: Arc<Mutex<Node>>,
    node_id: Arc<String>,
    timezone: Arc<String>,
    time_synced: Arc<AtomicBool>,
    settings_loaded: bool,
    mqtt: AsyncClient,
}

#[derive(Clone)]
struct AppStore {
    data_dir: Arc<PathBuf>,
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct NodeStatus {
    #[serde(rename = "nodeId")]
    node_id: String,
    #[serde(rename = "uptimeMs")]
    uptime_ms: u64,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "settingsLoaded")]
    settings_loaded: bool,
    modules: Vec<ModuleSummary>,
}

#[derive(Debug, Serialize)]
struct ModuleSummary {
    id: ModuleId,
    #[serde(rename = "moduleType")]
    module_type: &'static str,
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct ModuleView {
    id: ModuleId,
    settings: SettingsRecord,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    if runtime.timezone.parse::<Tz>().is_err() {
        warn!(
            "unknown timezone '{}', falling back to UTC",
            runtime.timezone
        );
        runtime.timezone = "UTC".to_string();
    }

    let storage = FileStorage::open(
        store.data_dir.join("settings.bin"),
        runtime.node.storage_size,
    )?;
    info!("module settings stored in {}", storage.path().display());

    let mut node = Node {
        registry: build_registry(&runtime.modules).context("invalid module layout")?,
        hardware: SimHardware::from_layout(&runtime.modules),
        storage,
        notifications: NotificationQueue::default(),
    };
    let clock = now_in_timezone(&runtime.timezone).map(|now| WallClock::from_datetime(&now));
    let settings_loaded = {
        let (registry, mut io) = node.split(monotonic_ms(), clock);
        registry
            .init_all(&mut io)
            .context("failed to initialise module storage")?
    };
    let pwm_channels = node.registry.pwm_channels();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let client_id = format!("hive-node-{}", runtime.node.node_id);
    let mut mqtt_options = MqttOptions::new(client_id, mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        node: Arc::new(Mutex::new(node)),
        node_id: Arc::new(runtime.node.node_id.clone()),
        timezone: Arc::new(runtime.timezone.clone()),
        time_synced: Arc::new(AtomicBool::new(clock.is_some())),
        settings_loaded,
        mqtt,
    };

    subscribe_topics(&app_state).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone(), runtime.node.tick_interval_ms);
    spawn_pwm_drive_loop(
        app_state.clone(),
        pwm_channels,
        runtime.node.pwm_drive_interval_ms,
    );
    spawn_state_publish_loop(app_state.clone(), runtime.node.state_publish_interval_ms);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/modules", get(handle_get_modules))
        .route(
            "/api/modules/{id}",
            get(handle_get_module).put(handle_put_module),
        )
        .route("/api/modules/{id}/state", post(handle_set_module_state))
        .route("/api/sim/inputs/{pin}", post(handle_set_sim_input))
        .with_state(app_state.clone());
    let mqtt = app_state.mqtt.clone();
    let node_id = app_state.node_id.as_ref().clone();

    let port = std::env::var("HIVE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind node server at {addr}"))?;

    info!("node listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(mqtt, node_id))
        .await?;
    Ok(())
}

async fn shutdown_signal(mqtt: AsyncClient, node_id: String) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
    if let Err(err) = mqtt
        .publish(node_status_topic(&node_id), QoS::AtLeastOnce, true, "offline")
        .await
    {
        warn!("node status publish failed: {err}");
    }
}

async fn subscribe_topics(app_state: &AppState) -> anyhow::Result<()> {
    app_state
        .mqtt
        .subscribe(command_filter(&app_state.node_id), QoS::AtLeastOnce)
        .await?;
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    let topic = node_status_topic(&app_state.node_id);
                    if let Err(err) = app_state
                        .mqtt
                        .publish(topic, QoS::AtLeastOnce, true, "online")
                        .await
                    {
                        warn!("node status publish failed: {err}");
                    }
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

fn spawn_control_loop(app_state: AppState, tick_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval_ms));

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let clock =
                now_in_timezone(&app_state.timezone).map(|now| WallClock::from_datetime(&now));
            app_state
                .time_synced
                .store(clock.is_some(), Ordering::Relaxed);

            let changed = {
                let mut node = app_state.node.lock().await;
                node.hardware.advance(now_ms);
                let (registry, mut io) = node.split(now_ms, clock);
                registry.tick_all(&mut io);
                node.take_notified()
            };

            publish_records(&app_state, changed).await;
        }
    });
}

/// Stands in for the board's timer interrupt: switches each heater relay from
/// the on-duration its control tick last published.
fn spawn_pwm_drive_loop(
    app_state: AppState,
    channels: Vec<(ModuleId, PwmChannel)>,
    interval_ms: u64,
) {
    if channels.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut windows: HashMap<ModuleId, PwmWindow> = channels
            .iter()
            .map(|(id, _)| (*id, PwmWindow::default()))
            .collect();
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let mut node = app_state.node.lock().await;
            for (id, channel) in &channels {
                let Some(window) = windows.get_mut(id) else {
                    continue;
                };
                let on = window.relay_on(now_ms, channel.output.load());
                if channel.relay.is_on(&node.hardware) != on {
                    debug!(module = %id, on, "heater relay switched");
                    channel.relay.set(&mut node.hardware, on);
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;

            let records = app_state.node.lock().await.records();
            publish_records(&app_state, records).await;
        }
    });
}

async fn publish_records(app_state: &AppState, records: Vec<(ModuleId, SettingsRecord)>) {
    for (id, record) in records {
        let topic = module_state_topic(&app_state.node_id, id);
        match serde_json::to_vec(&record) {
            Ok(body) => {
                if let Err(err) = app_state
                    .mqtt
                    .publish(topic, QoS::AtLeastOnce, true, body)
                    .await
                {
                    warn!(module = %id, "module state publish failed: {err}");
                }
            }
            Err(err) => warn!(module = %id, "module state serialization failed: {err}"),
        }
    }
}

/// Applies a settings request to one module and publishes whatever changed.
async fn apply_request(
    app_state: &AppState,
    id: ModuleId,
    request: &SettingsRecord,
) -> Result<SettingsRecord, HiveError> {
    let now_ms = monotonic_ms();
    let clock = now_in_timezone(&app_state.timezone).map(|now| WallClock::from_datetime(&now));

    let (result, changed) = {
        let mut node = app_state.node.lock().await;
        let result = {
            let (registry, mut io) = node.split(now_ms, clock);
            registry.apply_settings(id, request, &mut io)
        };
        let result = result.and_then(|()| node.record(id));
        (result, node.take_notified())
    };

    publish_records(app_state, changed).await;
    if let Ok(record) = &result {
        publish_records(app_state, vec![(id, record.clone())]).await;
    }
    result
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let Some(id) = parse_command_topic(&app_state.node_id, topic) else {
        return Ok(());
    };
    let request: SettingsRecord =
        serde_json::from_slice(&payload).context("malformed settings request")?;

    apply_request(app_state, id, &request)
        .await
        .with_context(|| format!("settings request for module {id} rejected"))?;
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let modules = {
        let node = state.node.lock().await;
        node.registry
            .ids()
            .into_iter()
            .filter_map(|id| node.registry.module(id))
            .map(|module| ModuleSummary {
                id: module.id(),
                module_type: module.module_type(),
                enabled: module.is_enabled(),
            })
            .collect()
    };

    Json(NodeStatus {
        node_id: state.node_id.as_ref().clone(),
        uptime_ms: monotonic_ms(),
        time_synced: state.time_synced.load(Ordering::Relaxed),
        timezone: state.timezone.as_ref().clone(),
        settings_loaded: state.settings_loaded,
        modules,
    })
}

async fn handle_get_modules(State(state): State<AppState>) -> impl IntoResponse {
    let views: Vec<ModuleView> = state
        .node
        .lock()
        .await
        .records()
        .into_iter()
        .map(|(id, settings)| ModuleView { id, settings })
        .collect();
    Json(views)
}

async fn handle_get_module(
    State(state): State<AppState>,
    Path(id): Path<u8>,
) -> axum::response::Response {
    let record = state.node.lock().await.record(ModuleId(id));
    match record {
        Ok(record) => Json(record).into_response(),
        Err(err) => hive_error_response(&err),
    }
}

async fn handle_put_module(
    State(state): State<AppState>,
    Path(id): Path<u8>,
    Json(request): Json<SettingsRecord>,
) -> axum::response::Response {
    match apply_request(&state, ModuleId(id), &request).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => hive_error_response(&err),
    }
}

async fn handle_set_module_state(
    State(state): State<AppState>,
    Path(id): Path<u8>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let enabled = match value.to_ascii_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid state. Use 'on' or 'off'"),
    };

    let id = ModuleId(id);
    let now_ms = monotonic_ms();
    let clock = now_in_timezone(&state.timezone).map(|now| WallClock::from_datetime(&now));
    let (result, changed) = {
        let mut node = state.node.lock().await;
        let result = {
            let (registry, mut io) = node.split(now_ms, clock);
            registry.set_enabled(id, enabled, &mut io)
        };
        let result = result.and_then(|()| node.record(id));
        (result, node.take_notified())
    };
    publish_records(&state, changed).await;

    match result {
        Ok(record) => {
            publish_records(&state, vec![(id, record.clone())]).await;
            Json(record).into_response()
        }
        Err(err) => hive_error_response(&err),
    }
}

/// Drives a simulated input pin, standing in for a wall switch or PIR.
async fn handle_set_sim_input(
    State(state): State<AppState>,
    Path(pin): Path<u8>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let high = match params.get("value").map(|value| value.to_ascii_lowercase()) {
        Some(value) if value == "high" => true,
        Some(value) if value == "low" => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid level. Use 'high' or 'low'"),
    };
    state.node.lock().await.hardware.set_input(pin, high);
    StatusCode::NO_CONTENT.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HIVE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hive"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            data_dir: Arc::new(data_dir),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn hive_error_response(err: &HiveError) -> axum::response::Response {
    let status = match err {
        HiveError::UnknownModule(_) => StatusCode::NOT_FOUND,
        err if err.is_invalid_settings() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
