//! Brings every clip's metadata file up to the current layout. Safe to run
//! more than once.

use button_gremlin::{config, storage::SoundLibrary};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();

    let sounds_dir = config::sounds_dir(|key| std::env::var(key).ok());
    info!(path = %sounds_dir.display(), "migrating sound metadata");

    let migrated = SoundLibrary::new(sounds_dir).migrate_metadata().await?;
    for name in &migrated {
        info!(sound = %name, "migrated");
    }
    info!(count = migrated.len(), "migration complete");
    Ok(())
}
