use std::path::PathBuf;
use std::sync::Arc;

use thread_warden::config::DEFAULT_CONFIG_PATH;
use thread_warden::{
    BOT_NAME, Chat, Config, Error, Handler, MatrixClient, ModerationPolicy, RoomManager, Storage,
    logging,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Sync events buffered between the sync loop and the handler
const EVENT_QUEUE_SIZE: usize = 256;

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Load environment variables from .env, if present
    dotenv::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let mut config = Config::load(&config_path).await?;
    config.apply_process_env();

    logging::init(&config.log_dir)?;
    config.validate()?;
    let config = Arc::new(config);

    let client = Arc::new(MatrixClient::new(
        &config.homeserver,
        config.bot_user_id(),
        config.access_token.clone(),
    )?);
    let storage = Arc::new(Storage::load(&config.data_dir).await?);
    let retrier = config.retrier();

    let chat = Arc::new(Chat::new(client.clone(), Arc::clone(&storage), retrier));
    let rooms = Arc::new(RoomManager::new(
        Arc::clone(&chat),
        config.moderation.dm_room_name.clone(),
    ));
    let policy = ModerationPolicy::new(Arc::clone(&chat), storage, rooms, config.policy_settings());
    let handler = Handler::new(chat, policy, Arc::clone(&config));

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let sync_client = Arc::clone(&client);
    let timeout_ms = config.sync.timeout_ms;
    let sync = tokio::spawn(async move {
        sync_client.sync_forever(tx, &retrier, timeout_ms).await;
    });

    logging::log_console(&format!(
        "{BOT_NAME} running as {} on {}",
        config.user_id, config.homeserver
    ));

    tokio::select! {
        () = handler.run(rx) => warn!("Sync loop ended, shutting down"),
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    sync.abort();
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {err}");
            std::process::exit(1);
        }
    };

    // Handle any errors that occurred during execution
    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
