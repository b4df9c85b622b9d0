use color_eyre::{eyre::eyre, Result};
use padpilot::config::{ControllerEnabled, EngineSettings};
use padpilot::controller::analog::SharedProfile;
use padpilot::persistence::FileBlobStore;
use padpilot::EngineHandle;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let settings_path = EngineSettings::default_path();
    let settings = EngineSettings::load_from(&settings_path)
        .await
        .map_err(|e| eyre!("Invalid settings: {}", e))?;

    let profile = Arc::new(SharedProfile::from_settings(&settings.analog));
    let enabled = ControllerEnabled::new(true);
    let store = FileBlobStore::new(EngineSettings::config_dir());
    info!("Storing bindings in {}", store.dir().display());

    let engine = EngineHandle::spawn(settings, store, profile, enabled)
        .await
        .map_err(|e| eyre!("Failed to spawn engine: {}", e))?;

    let mut status = engine.status();
    let mut edges = engine.subscribe_edges();
    let mut last_fired = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
            Ok(edge) = edges.recv() => {
                info!(
                    "{} {} ({:?})",
                    edge.id,
                    if edge.pressed { "pressed" } else { "released" },
                    edge.source
                );
            }
            Ok(()) = status.changed() => {
                let fired = status.borrow_and_update().last_fired.clone();
                if fired != last_fired {
                    if let Some(id) = &fired {
                        info!("Fired shortcut for {}", id);
                    }
                    last_fired = fired;
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
