mod app;
mod config;

use app::ShellApp;
use config::ShellSettingsStore;

/// Application entry point.
///
/// Bootstraps tracing, loads persisted shell settings, wires the
/// synchronization core, and hands control to the command loop.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings_store = ShellSettingsStore::load();
    let settings = settings_store.settings();
    tracing::info!(
        scope = %settings.scope_key,
        latency = %settings.latency_profile().name(),
        "starting wisp shell"
    );

    let mut app = ShellApp::new(&settings);
    if let Err(error) = app.run().await {
        tracing::error!("shell loop terminated: {error}");
        std::process::exit(1);
    }
}
