use anyhow::{Context, Result};
use rollcall_engine::{Attendance, Config};
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";
/// Requests waiting for the engine thread before callers block.
const QUEUE_DEPTH: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("invalid configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        model_family = %config.model_family,
        index = config.index.kind(),
        threshold = config.recognition_threshold,
        "configuration loaded"
    );

    let attendance = Attendance::from_config(&config).context("failed to open face index")?;
    let index_backend = attendance.index().backend_name();
    let engine = engine::spawn_engine(attendance, QUEUE_DEPTH).context("failed to spawn engine thread")?;

    let service = dbus_interface::AttendanceService {
        engine,
        index_backend,
    };
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
