pub mod audio;
pub mod bridge;
pub mod db;
pub mod models;
pub mod notifications;
pub mod scheduler;
pub mod settings;
pub mod stats;
pub mod timer;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use audio::ChimePlayer;
use bridge::{server, UiRelay};
use db::Database;
use notifications::{DesktopPresenter, NotificationPresenter};
use scheduler::WakeScheduler;
use settings::SettingsStore;
use stats::StatsStore;
use timer::SessionController;
use utils::{Clock, SystemClock};

pub use models::{DailyStats, Phase, StatsSummary};
pub use timer::commands::{Request, Response};

async fn serve_until_shutdown() -> Result<()> {
    let data_dir = settings::data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let user_settings = settings_store.current();
    if !settings_store.path().exists() {
        if let Err(err) = settings_store.update(user_settings.clone()) {
            warn!("Could not write default settings: {err:?}");
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let database = Database::new(data_dir.join("tomato.sqlite3"))?;

    let stats = StatsStore::new(database.clone(), clock.clone());
    if let Err(err) = stats.initialize_if_missing().await {
        error!("Failed to initialize stats: {err:?}");
    }

    let relay = UiRelay::default();
    let presenter = Arc::new(DesktopPresenter::new(
        user_settings.notifications.clone(),
        ChimePlayer::new(),
        relay.clone(),
    ));
    presenter.check_permission();

    let scheduler = WakeScheduler::new(database.clone(), clock);
    let controller = SessionController::new(
        scheduler.clone(),
        stats,
        presenter.clone(),
        relay.clone(),
        user_settings.durations,
    );
    controller.restore().await;

    let shutdown = CancellationToken::new();

    let (fired_rx, dispatch) = scheduler.start(user_settings.poll_interval(), shutdown.clone());
    let wake_consumer = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.process_wakes(fired_rx).await })
    };

    let socket_path = data_dir.join(server::SOCKET_FILE_NAME);
    let listener = server::bind(&socket_path)?;
    let server_task = tokio::spawn(server::serve(
        listener,
        controller,
        relay,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down...");
    shutdown.cancel();

    for (name, task) in [
        ("dispatch", dispatch),
        ("wake consumer", wake_consumer),
        ("ui server", server_task),
    ] {
        if let Err(err) = task.await {
            error!("{name} task failed: {err}");
        }
    }

    presenter.shutdown();
    if let Err(err) = std::fs::remove_file(&socket_path) {
        warn!("Could not remove socket {}: {err}", socket_path.display());
    }

    Ok(())
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Tomato Timer starting up...");

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(serve_until_shutdown())
}
