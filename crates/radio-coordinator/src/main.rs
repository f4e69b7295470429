use radio_core::config::Config;
use radio_core::settings::SettingsStore;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // File logging; the log path is configurable but defaults to the data dir.
    if let Some(parent) = config.paths.log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.paths.log_file)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radio_coordinator=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", config.paths.log_file);
    info!("Config loaded from: {:?}", Config::config_path());

    let settings = SettingsStore::load(config.paths.settings_file.clone());

    let engine = Box::new(radio_coordinator::engine::EngineDriver::new());
    let notify = Box::new(radio_coordinator::notify::NotifySendBackend::new(
        config.notification.channel_id.clone(),
    ));

    let mut core = radio_coordinator::CoordinatorCore::new(config, engine, notify, settings);
    core.spawn_monitors();
    let handle = core.handle();

    let loop_task = tokio::spawn(core.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.stop().await;
    loop_task.await?;

    Ok(())
}
