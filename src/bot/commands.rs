use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        skip_command(),
        previous_command(),
        shuffle_command(),
        loop_command(),
        volume_command(),
        stop_command(),
    ]
}

/// Registers the slash commands globally
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    serenity::model::application::Command::set_global_commands(&ctx.http, all_commands())
        .await?;
    Ok(())
}

/// Registers the slash commands for a single guild (propagates immediately)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a track or playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "search",
                "song / playlist link or search term",
            )
            .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause / resume")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip track")
}

fn previous_command() -> CreateCommand {
    CreateCommand::new("previous").description("Play the previous track again")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the queue")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Toggle looping of the current track")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Change the volume by one step")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "direction", "up or down")
                .add_string_choice("up", "up")
                .add_string_choice("down", "down")
                .required(true),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop & disconnect")
}
