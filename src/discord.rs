use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use poise::{serenity_prelude as serenity, CreateReply};
use tracing::{error, info, warn};

use crate::{
  storage::{format_file_size, is_allowed_extension, SoundFile, SoundLibrary, ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES},
  voice::{SongbirdTransport, VoiceSessionManager, VoiceTarget},
};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;
type CommandResult = Result<(), Error>;

const SOUNDS_PER_PAGE: usize = 10;
const AUTOCOMPLETE_LIMIT: usize = 25;
const PLAY_FAILED: &str = "❌ Failed to play sound. Make sure the bot has proper permissions.";
const GUILD_ONLY: &str = "❌ This command can only be used in a server.";

pub struct Data {
  voice: VoiceSessionManager<SongbirdTransport>,
  library: SoundLibrary,
  online: Arc<AtomicBool>,
}

#[poise::command(slash_command)]
async fn ping(ctx: Context<'_>) -> CommandResult {
  ctx.say("🏓 Pong!").await?;
  Ok(())
}

async fn autocomplete_sound(ctx: Context<'_>, partial: &str) -> Vec<serenity::AutocompleteChoice> {
  let sounds = match ctx.data().library.list().await {
    Ok(sounds) => sounds,
    Err(err) => {
      warn!(error = %err, "unable to list sounds for autocomplete");
      return Vec::new();
    }
  };
  let partial = partial.to_lowercase();
  sounds
    .into_iter()
    .filter(|sound| sound.name.to_lowercase().contains(&partial))
    .take(AUTOCOMPLETE_LIMIT)
    .map(|sound| serenity::AutocompleteChoice::new(sound.display_name, sound.name))
    .collect()
}

/// The voice channel the command's author is sitting in.
fn caller_voice_target(ctx: Context<'_>) -> Option<VoiceTarget> {
  let guild = ctx.guild()?;
  let channel_id = guild
    .voice_states
    .get(&ctx.author().id)
    .and_then(|voice_state| voice_state.channel_id)?;
  Some(VoiceTarget::new(guild.id, channel_id))
}

/// Play a sound in your voice channel
#[poise::command(slash_command, guild_only)]
async fn play(
  ctx: Context<'_>,
  #[description = "The sound to play"]
  #[autocomplete = "autocomplete_sound"]
  sound: String,
) -> CommandResult {
  ctx.defer().await?;

  let Some(target) = caller_voice_target(ctx) else {
    ctx.say("❌ You need to be in a voice channel to play sounds!").await?;
    return Ok(());
  };
  let Some(sound_file) = ctx.data().library.get(&sound).await? else {
    ctx.say(format!("❌ Sound \"{sound}\" not found.")).await?;
    return Ok(());
  };

  let voice = &ctx.data().voice;
  let connection = match voice.connect(target).await {
    Ok(connection) => connection,
    Err(err) => {
      error!(error = %err, sound = %sound, guild_id = %target.guild_id, "unable to join voice channel");
      ctx.say(PLAY_FAILED).await?;
      return Ok(());
    }
  };

  let reply = ctx.say(format!("🔊 Playing **{}**...", sound_file.display_name)).await?;
  if let Err(err) = voice
    .play_audio_file(&connection, target.guild_id, &sound_file.path)
    .await
  {
    error!(error = %err, sound = %sound, guild_id = %target.guild_id, "error playing sound");
    reply.edit(ctx, CreateReply::default().content(PLAY_FAILED)).await?;
  }
  Ok(())
}

/// Renders one page of the sound list, or `None` when the page is out of range.
fn render_page(sounds: &[SoundFile], page: usize) -> Option<String> {
  let total_pages = sounds.len().div_ceil(SOUNDS_PER_PAGE);
  if page == 0 || page > total_pages {
    return None;
  }
  let start = (page - 1) * SOUNDS_PER_PAGE;
  let lines: Vec<String> = sounds
    .iter()
    .enumerate()
    .skip(start)
    .take(SOUNDS_PER_PAGE)
    .map(|(idx, sound)| {
      format!("**{}.** {} *({})*", idx + 1, sound.display_name, format_file_size(sound.size))
    })
    .collect();
  Some(lines.join("\n"))
}

/// List all available sounds
#[poise::command(slash_command)]
async fn list(
  ctx: Context<'_>,
  #[description = "Page number"]
  #[min = 1]
  page: Option<u32>,
) -> CommandResult {
  ctx.defer().await?;

  let sounds = ctx.data().library.list().await?;
  if sounds.is_empty() {
    ctx.say("📁 No sounds available. Use `/upload` to add some!").await?;
    return Ok(());
  }

  let total_pages = sounds.len().div_ceil(SOUNDS_PER_PAGE);
  let page = page.unwrap_or(1) as usize;
  let Some(description) = render_page(&sounds, page) else {
    ctx.say(format!("❌ Invalid page number. Please choose between 1 and {total_pages}.")).await?;
    return Ok(());
  };

  let plural = if sounds.len() == 1 { "" } else { "s" };
  let footer = format!("Page {page} of {total_pages} • Total: {} sound{plural}", sounds.len());
  let embed = serenity::CreateEmbed::new()
    .color(0x5865f2)
    .title("🔊 Available Sounds")
    .description(description)
    .footer(serenity::CreateEmbedFooter::new(footer));
  ctx.send(CreateReply::default().embed(embed)).await?;
  Ok(())
}

/// Upload a new sound file
#[poise::command(slash_command)]
async fn upload(
  ctx: Context<'_>,
  #[description = "The audio file to upload"] file: serenity::Attachment,
) -> CommandResult {
  ctx.defer().await?;

  if file.size as usize > MAX_UPLOAD_BYTES {
    ctx.say(format!("❌ File too large! Maximum size is {}MB.", MAX_UPLOAD_BYTES / (1024 * 1024))).await?;
    return Ok(());
  }
  if !is_allowed_extension(&file.filename) {
    let allowed: Vec<String> = ALLOWED_EXTENSIONS.iter().map(|ext| format!(".{ext}")).collect();
    ctx.say(format!("❌ Invalid file type! Allowed formats: {}", allowed.join(", "))).await?;
    return Ok(());
  }

  let saved = match file.download().await {
    Ok(bytes) => ctx.data().library.save(&file.filename, &bytes).await.map_err(Error::from),
    Err(err) => Err(err.into()),
  };
  match saved {
    Ok(sound) => {
      info!(sound = %sound.name, size = sound.size, "sound uploaded");
      ctx.say(format!(
        "✅ Successfully uploaded **{name}**!\nUse `/play {name}` to play it.",
        name = sound.name
      ))
      .await?;
    }
    Err(err) => {
      error!(error = %err, file = %file.filename, "error uploading file");
      ctx.say("❌ Failed to upload file. Please try again.").await?;
    }
  }
  Ok(())
}

/// Disconnect the bot from the voice channel
#[poise::command(slash_command)]
async fn disconnect(ctx: Context<'_>) -> CommandResult {
  let Some(guild_id) = ctx.guild_id() else {
    ctx.send(CreateReply::default().content(GUILD_ONLY).ephemeral(true)).await?;
    return Ok(());
  };

  ctx.data().voice.disconnect(guild_id).await;
  ctx.say("👋 Disconnected from voice channel.").await?;
  Ok(())
}

async fn poise_event_handler(
  _ctx: &serenity::Context,
  event: &serenity::FullEvent,
  _framework: poise::FrameworkContext<'_, Data, Error>,
  data: &Data,
) -> Result<(), Error> {
  match event {
    serenity::FullEvent::Ready { .. } | serenity::FullEvent::Resume { .. } => {
      data.online.store(true, Ordering::SeqCst);
    }
    _ => {}
  }
  Ok(())
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
  match error {
    poise::FrameworkError::Command { error, ctx, .. } => {
      error!(command = %ctx.command().name, error = %error, "error executing command");
      check_msg(
        ctx
          .send(
            CreateReply::default()
              .content("❌ There was an error while executing this command!")
              .ephemeral(true),
          )
          .await,
      );
    }
    other => {
      if let Err(err) = poise::builtins::on_error(other).await {
        error!(error = %err, "error while handling framework error");
      }
    }
  }
}

fn get_framework_options() -> poise::FrameworkOptions<Data, Error> {
  poise::FrameworkOptions {
    commands: vec![ping(), play(), list(), upload(), disconnect()],
    on_error: |error| Box::pin(on_error(error)),
    event_handler: |ctx, event, framework, data| Box::pin(poise_event_handler(ctx, event, framework, data)),
    ..Default::default()
  }
}

pub fn get_framework(
  voice: VoiceSessionManager<SongbirdTransport>,
  library: SoundLibrary,
  online: Arc<AtomicBool>,
) -> poise::Framework<Data, Error> {
  poise::Framework::builder()
    .options(get_framework_options())
    .setup(move |ctx, ready, framework| {
      Box::pin(async move {
        info!(user = %ready.user.name, "bot ready");
        info!(
          "invite URL: https://discord.com/api/oauth2/authorize?client_id={}&permissions=36703232&scope=bot%20applications.commands",
          ready.user.id
        );
        poise::builtins::register_globally(ctx, &framework.options().commands).await?;
        online.store(true, Ordering::SeqCst);
        Ok(Data { voice, library, online })
      })
    })
    .build()
}

fn check_msg<T>(result: serenity::Result<T>) {
  if let Err(why) = result {
    error!(error = ?why, "error sending message");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use std::path::PathBuf;

  fn sound(name: &str, size: u64) -> SoundFile {
    SoundFile {
      name: name.to_string(),
      display_name: name.to_string(),
      path: PathBuf::from(format!("{name}.mp3")),
      size,
      uploaded_at: Utc::now(),
      tags: Vec::new(),
    }
  }

  #[test]
  fn pages_hold_ten_sounds() {
    let sounds: Vec<_> = (0..12).map(|i| sound(&format!("s{i:02}"), 10)).collect();

    let first = render_page(&sounds, 1).unwrap();
    assert_eq!(first.lines().count(), 10);
    assert!(first.starts_with("**1.** s00 *(10 B)*"));

    let second = render_page(&sounds, 2).unwrap();
    assert_eq!(second.lines().collect::<Vec<_>>(), ["**11.** s10 *(10 B)*", "**12.** s11 *(10 B)*"]);
  }

  #[test]
  fn out_of_range_pages_are_rejected() {
    let sounds = vec![sound("bonk", 2048)];
    assert!(render_page(&sounds, 0).is_none());
    assert!(render_page(&sounds, 2).is_none());
    assert_eq!(render_page(&sounds, 1).unwrap(), "**1.** bonk *(2.00 KB)*");
  }
}
