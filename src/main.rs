use chatpane::app::ChatApp;
use chatpane::completion::{Completer, OpenAiClient};
use chatpane::config::Config;
use chatpane::conversation::store::ConversationStore;
use chatpane::session::Session;
use eframe::egui;
use log::{info, warn};
use std::sync::mpsc;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    info!("config file: {}", Config::default_path().display());
    info!("model: {} via {}", config.model, config.api_base);
    if config.api_key.is_none() {
        warn!("no API key configured; requests will fail until one is set");
    }

    let store = ConversationStore::new(config.chats_dir.clone());
    store.ensure_dir()?;
    info!("conversations: {}", store.dir().display());
    let mut session = Session::new(store, config.system_prompt.clone());
    session.start_new()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chatpane-runtime")
        .build()?;

    let completer: Arc<dyn Completer> = Arc::new(OpenAiClient::new(&config));
    let (tx, rx) = mpsc::channel();
    let app = ChatApp::new(session, completer, runtime.handle().clone(), tx, rx);
    let _runtime = runtime;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Chatpane")
            .with_inner_size([1000.0, 700.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Chatpane",
        native_options,
        Box::new(move |creation_context| {
            app.theme().apply_visuals(&creation_context.egui_ctx);
            Ok(Box::new(app))
        }),
    )?;

    Ok(())
}
