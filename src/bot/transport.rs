use crate::chat::ChatTransport;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, Http};
use std::sync::Arc;
use tracing::error;

/// Posts messages through Discord's REST API
#[derive(Clone)]
pub struct SerenityTransport {
    http: Arc<Http>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn parse_channel(channel_id: &str) -> AppResult<ChannelId> {
    channel_id
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| AppError::MissingChannel(channel_id.to_string()))
}

#[async_trait]
impl ChatTransport for SerenityTransport {
    async fn send(&self, channel_id: &str, text: &str) -> AppResult<()> {
        let channel = parse_channel(channel_id)?;
        channel.say(&self.http, text).await.map_err(|e| {
            error!("Cannot post to Discord channel {}: {}", channel_id, e);
            AppError::from(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids_must_be_snowflakes() {
        assert_eq!(parse_channel("123456789").unwrap(), ChannelId::new(123456789));
        assert!(matches!(parse_channel("0"), Err(AppError::MissingChannel(_))));
        assert!(matches!(parse_channel("general"), Err(AppError::MissingChannel(_))));
    }
}
