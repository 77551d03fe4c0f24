mod config;
mod db;
mod engine;
mod light;
mod log;
mod luminosity;
mod moisture;
mod mqtt;
mod plant;
mod pump;
mod shots;
mod signal;
mod state;
mod valve;
mod water_level;
mod web;

use anyhow::{Context, Result};
use greenhouse_frontend::SensorPort;
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, sync::Arc, time::Duration, time::Instant};
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use db::Db;
use engine::{Drivers, Regulator};
use light::LightOutput;
use log::ChannelLog;
use pump::PumpOutput;
use signal::StatusChannel;
use state::{SharedState, SystemState};
use valve::ValveBus;

/// Everything the control loop needs besides the hardware.
struct Host {
    cfg: Config,
    db: Db,
    log: ChannelLog,
    status: StatusChannel,
    shot_rx: mpsc::UnboundedReceiver<usize>,
    shared: SharedState,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:greenhouse.db?mode=rwc".to_string());
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;
    info!(path = %config_path, tick_ms = cfg.tick_ms, "config loaded");

    // ── Database + fact log writer ──────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    let (log, log_rx) = ChannelLog::new();
    tokio::spawn(log::run_writer(db.clone(), log_rx, cfg.plant_defaults()));

    // ── Shared state (ephemeral, for the status API) ────────────────
    let shared: SharedState = Arc::new(RwLock::new(SystemState::new()));
    shared
        .write()
        .await
        .record_system("controller started".to_string());

    // ── MQTT: status signals out, manual shots in ───────────────────
    let mut mqttoptions = MqttOptions::new("greenhouse-controller", broker, mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);

    let (status, status_rx) = StatusChannel::new();
    let (shot_tx, shot_rx) = mpsc::unbounded_channel();
    tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        shot_tx,
        Arc::clone(&shared),
    ));
    tokio::spawn(mqtt::run_status_publisher(
        client,
        status_rx,
        Arc::clone(&shared),
    ));

    let host = Host {
        cfg,
        db,
        log,
        status,
        shot_rx,
        shared: Arc::clone(&shared),
    };

    // ── Web server ──────────────────────────────────────────────────
    tokio::spawn(async move {
        if let Err(e) = web::serve(shared, web_port).await {
            error!("status api stopped: {e:#}");
        }
    });

    start(host).await
}

#[cfg(feature = "gpio")]
async fn start(host: Host) -> Result<()> {
    use greenhouse_frontend::adc::AnalogFrontEnd;
    use light::Ws2812Spi;
    use pump::GpioPump;
    use valve::GpioValveBus;

    let sensors = AnalogFrontEnd::new(host.cfg.frontend.clone())?;
    let drivers = Drivers {
        valves: GpioValveBus::new(&host.cfg.valves)?,
        pump: GpioPump::new(&host.cfg.pump)?,
        lights: Ws2812Spi::new()?,
    };
    run(host, sensors, drivers, |_| {}).await
}

#[cfg(not(feature = "gpio"))]
async fn start(host: Host) -> Result<()> {
    use greenhouse_frontend::sim::{GreenhouseSim, Scenario, SharedSim};
    use light::MockLightOutput;
    use pump::MockPump;
    use valve::MockValveBus;

    let scenario = Scenario::from_str_lossy(
        &env::var("SIM_SCENARIO").unwrap_or_else(|_| "drying".to_string()),
    );
    let occupied: usize = env::var("SIM_PLANTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);
    warn!(%scenario, occupied, "no gpio feature: running against the simulator");

    let sim = SharedSim::new(GreenhouseSim::new(scenario, occupied, 600.0));
    let feedback = sim.clone();
    let drivers = Drivers {
        valves: MockValveBus::default(),
        pump: MockPump::default(),
        lights: MockLightOutput::default(),
    };
    run(host, sim, drivers, move |watering| feedback.set_watering(watering)).await
}

/// Build the engine on the given hardware and run the control loop until
/// Ctrl-C or a hardware error, then apply the fail-safe shutdown.
async fn run<S, B, P, L>(
    mut host: Host,
    sensors: S,
    drivers: Drivers<B, P, L>,
    mut on_tick: impl FnMut(Option<usize>),
) -> Result<()>
where
    S: SensorPort,
    B: ValveBus,
    P: PumpOutput,
    L: LightOutput,
{
    let defaults = host.cfg.plant_defaults();
    let plants = plant::slots_from(host.db.load_plants(defaults).await?);
    let known = plants.iter().flatten().count();
    if known == 0 {
        warn!("plant directory is empty; positions are learned by detection");
    }
    info!(plants = known, "plant directory loaded");

    let mut engine = Regulator::new(
        &host.cfg,
        sensors,
        plants,
        drivers,
        Arc::new(host.log),
        Arc::new(host.status),
    );

    info!("closing all valves");
    engine
        .initialize_valves()
        .await
        .context("valve initialisation failed")?;
    info!("valves closed, regulation starting");

    let mut ticker = tokio::time::interval(Duration::from_millis(host.cfg.tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let refresh_every = Duration::from_secs(host.cfg.plant_refresh_sec);
    let mut last_refresh = Instant::now();

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                break Ok(());
            }
            _ = ticker.tick() => {}
        }

        let now = Instant::now();

        while let Ok(position) = host.shot_rx.try_recv() {
            engine.request_shot(position, now);
        }

        if now.duration_since(last_refresh) >= refresh_every {
            last_refresh = now;
            match host.db.load_plants(defaults).await {
                Ok(rows) => engine.refresh_plants(plant::slots_from(rows)),
                Err(e) => warn!("plant directory refresh failed: {e:#}"),
            }
        }

        if let Err(e) = engine.tick(now, OffsetDateTime::now_utc()) {
            break Err(e);
        }
        on_tick(engine.in_flight());

        let events = engine.take_events();
        let snapshot = engine.snapshot();
        host.shared.write().await.record_engine(snapshot, events);
    };

    warn!("shutting down: pump off, lights off");
    if let Err(e) = engine.shutdown() {
        error!("fail-safe shutdown incomplete: {e:#}");
    }

    if let Err(e) = &outcome {
        error!("control loop stopped: {e:#}");
        host.shared
            .write()
            .await
            .record_error(format!("control loop stopped: {e:#}"));
    }
    outcome
}
