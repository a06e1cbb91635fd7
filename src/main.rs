use std::{
    fs::{self, OpenOptions},
    sync::{atomic::AtomicBool, Arc, Mutex},
};

use button_gremlin::{
    config::{Config, LoggingConfig},
    discord,
    storage::SoundLibrary,
    voice::{SongbirdTransport, VoiceSessionManager},
    web::{self, AppState},
};
use poise::serenity_prelude as serenity;
use serenity::GatewayIntents;
use songbird::Songbird;
use tracing::{error, info};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};

fn init_tracing(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &logging.destination {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = if logging.pretty {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(logging.destination.is_none())
            .boxed()
    } else {
        fmt::layer().json().with_writer(writer).boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config.logging)?;
    info!(?config, "starting button gremlin");

    let manager = Songbird::serenity();
    let voice = VoiceSessionManager::new(
        SongbirdTransport::new(Arc::clone(&manager)),
        config.voice.idle_disconnect_timeout,
    );
    let library = SoundLibrary::new(config.sounds_dir.clone());
    let online = Arc::new(AtomicBool::new(false));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let framework = discord::get_framework(voice.clone(), library.clone(), Arc::clone(&online));

    let mut client = serenity::Client::builder(&config.token, intents)
        .framework(framework)
        .voice_manager_arc(manager)
        .await?;

    if config.web.enabled {
        let state = AppState {
            voice,
            library,
            cache: Arc::clone(&client.cache),
            online,
            api_key: Arc::from(config.web.api_key.as_str()),
        };
        let port = config.web.port;
        tokio::spawn(async move {
            if let Err(why) = web::serve(state, port).await {
                error!(error = %why, "web server stopped");
            }
        });
    } else {
        info!("web server disabled");
    }

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(why) = client.start().await {
            error!(error = ?why, "client error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shard_manager.shutdown_all().await;
    Ok(())
}
