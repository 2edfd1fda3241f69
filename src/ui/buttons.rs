use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// Custom ids of the now-playing card buttons
pub mod button_ids {
    pub const PAUSE: &str = "music_pause";
    pub const SKIP: &str = "music_skip";
    pub const PREVIOUS: &str = "music_previous";
    pub const VOLUME_DOWN: &str = "music_volume_down";
    pub const VOLUME_UP: &str = "music_volume_up";
    pub const SHUFFLE: &str = "music_shuffle";
    pub const LOOP: &str = "music_loop";
    pub const STOP: &str = "music_stop";
}

/// Builder for the now-playing card controls
pub struct MusicControls;

impl MusicControls {
    /// Transport and volume on the first row, queue modes and stop on the second.
    /// The loop button is highlighted while looping is on.
    pub fn create_player_controls(is_looping: bool) -> Vec<CreateActionRow> {
        let loop_style = if is_looping {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        };

        let row1 = CreateActionRow::Buttons(vec![
            CreateButton::new(button_ids::PAUSE)
                .emoji('⏯')
                .style(ButtonStyle::Primary),
            CreateButton::new(button_ids::SKIP)
                .emoji('⏭')
                .style(ButtonStyle::Primary),
            CreateButton::new(button_ids::PREVIOUS)
                .emoji('⏮')
                .style(ButtonStyle::Primary),
            CreateButton::new(button_ids::VOLUME_DOWN)
                .emoji('🔉')
                .style(ButtonStyle::Success),
            CreateButton::new(button_ids::VOLUME_UP)
                .emoji('🔊')
                .style(ButtonStyle::Success),
        ]);

        let row2 = CreateActionRow::Buttons(vec![
            CreateButton::new(button_ids::SHUFFLE)
                .emoji('🔀')
                .style(ButtonStyle::Secondary),
            CreateButton::new(button_ids::LOOP)
                .emoji('🔁')
                .style(loop_style),
            CreateButton::new(button_ids::STOP)
                .emoji('⏹')
                .style(ButtonStyle::Danger),
        ]);

        vec![row1, row2]
    }
}
