use anyhow::Result;
use serenity::{
    builder::GetMessages,
    http::Http,
    model::{channel::Message, id::ChannelId},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// How long the "text-only messages aren't allowed" warning stays up
pub const WARNING_LIFETIME: Duration = Duration::from_secs(8);
const PURGE_LIMIT: usize = 1000;
const PAGE_SIZE: usize = 100;

/// A message may stay in a moderated channel when it carries a file or a link
pub fn is_allowed(content: &str, has_attachments: bool) -> bool {
    has_attachments
        || content
            .split_whitespace()
            .any(|token| token.starts_with("http://") || token.starts_with("https://"))
}

fn is_removable(message: &Message) -> bool {
    !message.author.bot && !is_allowed(&message.content, !message.attachments.is_empty())
}

/// Deletes `message` if it breaks the channel rule and posts a short-lived
/// warning. Returns whether it was removed.
pub async fn enforce(http: &Arc<Http>, message: &Message) -> Result<bool> {
    if !is_removable(message) {
        return Ok(false);
    }

    message.delete(http).await?;
    info!(
        "🚫 Removed text-only message from {} in channel {}",
        message.author.name, message.channel_id
    );

    let warning = message
        .channel_id
        .say(
            http,
            format!(
                "🚫 <@{}>, text-only messages aren't allowed. Include a link or file.",
                message.author.id
            ),
        )
        .await?;

    let http = http.clone();
    tokio::spawn(async move {
        tokio::time::sleep(WARNING_LIFETIME).await;
        if let Err(e) = warning.delete(&http).await {
            debug!("Could not delete moderation warning: {:?}", e);
        }
    });

    Ok(true)
}

/// Bulk cleanup of a moderated channel
#[derive(Clone)]
pub struct Purger {
    http: Arc<Http>,
}

impl Purger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    /// Scans the most recent messages of `channel_id` (up to 1000, newest
    /// first) and deletes every text-only one. Returns the deleted count.
    pub async fn purge(&self, channel_id: ChannelId) -> Result<usize> {
        let mut deleted = 0;
        let mut scanned = 0;
        let mut before = None;

        while scanned < PURGE_LIMIT {
            let limit = PAGE_SIZE.min(PURGE_LIMIT - scanned);
            let mut request = GetMessages::new().limit(limit as u8);
            if let Some(message_id) = before {
                request = request.before(message_id);
            }

            let page = channel_id.messages(&self.http, request).await?;
            let Some(oldest) = page.last() else {
                break;
            };
            before = Some(oldest.id);
            scanned += page.len();

            for message in page.iter().filter(|m| is_removable(m)) {
                match message.delete(&self.http).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!("⚠️ Could not delete message {}: {:?}", message.id, e),
                }
            }

            if page.len() < limit {
                break;
            }
        }

        info!(
            "🧹 Purged {} of {} scanned message(s) in channel {}",
            deleted, scanned, channel_id
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_allowed() {
        assert!(is_allowed("check this https://youtu.be/x", false));
        assert!(is_allowed("http://example.com", false));
        assert!(is_allowed("two\nlines\thttps://a.b", false));
    }

    #[test]
    fn attachments_are_allowed() {
        assert!(is_allowed("", true));
        assert!(is_allowed("just words", true));
    }

    #[test]
    fn plain_text_is_rejected() {
        assert!(!is_allowed("hello there", false));
        assert!(!is_allowed("", false));
    }

    #[test]
    fn links_must_start_a_token() {
        assert!(!is_allowed("see:https://example.com", false));
        assert!(!is_allowed("ftp://files.example.com", false));
        assert!(!is_allowed("HTTPS://EXAMPLE.COM", false));
    }
}
