//! # TETHER Node
//!
//! Runs one side of the link: a robot (listens) or a console (dials).
//!
//! ## Usage
//!
//! Built with the `node` feature:
//!
//! ```bash
//! cargo run -p tether_networking --features node --bin tether_node -- --role robot
//! tether_node --role robot --listen 0.0.0.0:44445
//! tether_node --role console --connect 192.168.2.2:44445
//! tether_node --role robot --config robot.toml --ticks 600
//! ```
//!
//! The robot simulates a depth-hold loop; the console arms the vehicle and
//! steps its depth setpoint. Set `RUST_LOG=tether_networking=debug` for link
//! detail.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tether_core::components::{
    register_components, Armed, DepthMeasurement, DepthTarget, Leak, MeasuredVoltage, Name,
    Orientation, Position, Robot, Surface,
};
use tether_core::{ComponentRegistry, InstanceId, Store};
use tether_networking::{
    PeerEvent, Phase, Replicator, SyncApp, SyncConfig, SyncResult, TcpTransport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Descent/ascent rate of the simulated vehicle, m/s.
const VERTICAL_SPEED: f32 = 0.25;

/// Battery drain per second while armed, volts.
const ARMED_DRAIN: f32 = 0.002;

/// Seconds between console setpoint changes.
const SETPOINT_PERIOD_SECS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Vehicle side: owns sensors, accepts consoles.
    Robot,
    /// Operator side: dials the robot, sends commands.
    Console,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "TETHER replication node")]
struct Cli {
    /// Which side of the link to run
    #[arg(long, value_enum, default_value_t = Role::Console)]
    role: Role,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept connections on this address (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Dial this peer; may be repeated (adds to config)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Stop after this many ticks (runs forever when omitted)
    #[arg(long)]
    ticks: Option<u64>,

    /// Instance name (overrides config)
    #[arg(long)]
    name: Option<String>,
}

fn main() -> SyncResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let instance = InstanceId::random();

    let mut registry = ComponentRegistry::new();
    register_components(&mut registry)?;

    let transport = TcpTransport::start(config.transport_config(), instance)?;
    if let Some(addr) = transport.local_addr() {
        info!(%addr, "listening");
    }
    let replicator = Replicator::new(transport, registry, config.replication_config());
    let mut app = SyncApp::new(Store::with_instance(instance), replicator, config.tick_rate);

    match cli.role {
        Role::Robot => install_robot(&mut app, &config),
        Role::Console => install_console(&mut app, &config),
    }
    info!(
        role = ?cli.role,
        name = %config.instance_name,
        instance = %instance,
        tick_rate = config.tick_rate,
        "node started"
    );

    // One report per second of ticks.
    let chunk = u64::from(config.tick_rate);
    let mut remaining = cli.ticks;
    loop {
        let step = remaining.map_or(chunk, |left| left.min(chunk));
        if step == 0 {
            break;
        }
        app.run_for(step);
        if let Some(left) = remaining.as_mut() {
            *left -= step;
        }
        report(&mut app);
    }

    let stats = app.tick_loop().stats();
    info!(
        ticks = stats.total_ticks,
        late = stats.late_ticks,
        avg_us = stats.avg_tick_us,
        "node stopped"
    );
    Ok(())
}

fn resolve_config(cli: &Cli) -> SyncResult<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(name) = &cli.name {
        config.instance_name.clone_from(name);
    }
    if cli.listen.is_some() {
        config.listen_addr = cli.listen;
    }
    config.peers.extend(cli.connect.iter().copied());
    if cli.role == Role::Robot && config.listen_addr.is_none() {
        warn!("robot without listen_addr; consoles cannot reach it");
    }
    config.validate()?;
    Ok(config)
}

fn report(app: &mut SyncApp<TcpTransport>) {
    for event in app.replicator_mut().drain_events() {
        match event {
            PeerEvent::Rejected { peer, reason } => warn!(peer = %peer, %reason, "peer rejected"),
            other => info!(event = ?other, "peer event"),
        }
    }

    let store = app.store();
    for (entity, depth) in store.query::<DepthMeasurement>() {
        let target = store.get::<DepthTarget>(entity).map_or(0.0, |target| target.0);
        let armed = store.get::<Armed>(entity).copied().unwrap_or_default();
        let voltage = store.get::<MeasuredVoltage>(entity).map_or(0.0, |volts| volts.0);
        info!(
            entity = %entity,
            depth = depth.depth,
            target,
            armed = ?armed,
            voltage,
            "vehicle"
        );
    }
    for peer in app.replicator().peers() {
        info!(
            peer = %peer.token,
            state = ?peer.state,
            latency_ticks = ?peer.latency_ticks,
            mirrors = peer.mirrored_entities,
            "link"
        );
    }
}

fn install_robot(app: &mut SyncApp<TcpTransport>, config: &SyncConfig) {
    let store = app.store_mut();
    let vehicle = store.spawn_replicated();
    let spawned = [
        store.insert(vehicle, Robot).err(),
        store.insert(vehicle, Name::new(config.instance_name.clone())).err(),
        store.insert(vehicle, Position::default()).err(),
        store.insert(vehicle, Orientation::IDENTITY).err(),
        store.insert(vehicle, DepthMeasurement::default()).err(),
        store.insert(vehicle, DepthTarget(0.0)).err(),
        store.insert(vehicle, Armed::Disarmed).err(),
        store.insert(vehicle, MeasuredVoltage(16.8)).err(),
        store.insert(vehicle, Leak(false)).err(),
    ];
    for err in spawned.into_iter().flatten() {
        warn!(error = %err, "vehicle setup incomplete");
    }

    let dt = config.tick_duration().as_secs_f32();
    app.add_system(Phase::Update, move |store| simulate_vehicle(store, dt));
}

/// Moves measured depth toward the setpoint while armed.
fn simulate_vehicle(store: &mut Store, dt: f32) {
    let vehicles: Vec<_> = store.query::<Robot>().map(|(entity, _)| entity).collect();
    for vehicle in vehicles {
        if store.get::<Armed>(vehicle) != Some(&Armed::Armed) {
            continue;
        }
        let target = store.get::<DepthTarget>(vehicle).map_or(0.0, |target| target.0);
        let Some(measured) = store.get::<DepthMeasurement>(vehicle).copied() else {
            continue;
        };

        let error = target - measured.depth;
        if error.abs() > f32::EPSILON {
            let step = error.clamp(-VERTICAL_SPEED * dt, VERTICAL_SPEED * dt);
            if let Some(depth) = store.get_mut::<DepthMeasurement>(vehicle) {
                depth.depth += step;
                depth.pressure = 1013.25 + depth.depth * 100.5;
            }
            if let Some(position) = store.get_mut::<Position>(vehicle) {
                position.z = -measured.depth - step;
            }
        }
        if let Some(voltage) = store.get_mut::<MeasuredVoltage>(vehicle) {
            voltage.0 = (voltage.0 - ARMED_DRAIN * dt).max(0.0);
        }
    }
}

fn install_console(app: &mut SyncApp<TcpTransport>, config: &SyncConfig) {
    let store = app.store_mut();
    let console = store.spawn_replicated();
    if let Err(err) = store
        .insert(console, Surface)
        .and_then(|_| store.insert(console, Name::new(config.instance_name.clone())))
    {
        warn!(error = %err, "console setup incomplete");
    }

    let period = SETPOINT_PERIOD_SECS * u64::from(config.tick_rate);
    app.add_system(Phase::Update, move |store| command_vehicle(store, period));
}

/// Arms every known vehicle and steps its depth setpoint each period.
fn command_vehicle(store: &mut Store, period: u64) {
    if period == 0 || store.tick().0 % period != 0 {
        return;
    }
    let step = (store.tick().0 / period) % 4;
    #[allow(clippy::cast_precision_loss)]
    let setpoint = step as f32 * 1.5;

    let vehicles: Vec<_> = store.query::<Robot>().map(|(entity, _)| entity).collect();
    for vehicle in vehicles {
        let result = store
            .insert(vehicle, Armed::Armed)
            .and_then(|_| store.insert(vehicle, DepthTarget(setpoint)));
        match result {
            Ok(_) => info!(vehicle = %vehicle, setpoint, "setpoint sent"),
            Err(err) => warn!(vehicle = %vehicle, error = %err, "setpoint failed"),
        }
    }
}
