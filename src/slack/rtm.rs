//! RTM event stream task

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::api::SlackClient;
use super::events::{parse_frame, RtmFrame};
use super::SlackError;
use crate::transport::ChatEvent;

/// How a single RTM session ended
enum SessionEnd {
    /// Socket closed or the server said goodbye
    Reconnect,
    /// The event consumer is gone
    ConsumerGone,
}

/// Keep an RTM session open, reconnecting until the consumer goes away
/// or the credentials are rejected.
pub(super) async fn run(client: SlackClient, events: mpsc::Sender<ChatEvent>) {
    let mut retry_interval = client.reconnect_interval();

    loop {
        match session(&client, &events).await {
            Ok(SessionEnd::ConsumerGone) => {
                debug!("Slack: Event consumer gone, closing RTM stream");
                return;
            }
            Ok(SessionEnd::Reconnect) => {
                info!("Slack: RTM connection closed, reconnecting");
                retry_interval = client.reconnect_interval();
            }
            Err(SlackError::InvalidAuth) => {
                let _ = events.send(ChatEvent::InvalidAuth).await;
                return;
            }
            Err(e) => {
                warn!("Slack: RTM connection failed: {}", e);
            }
        }

        if events.is_closed() {
            return;
        }
        debug!("Slack: Reconnecting RTM in {:?}", retry_interval);
        tokio::time::sleep(retry_interval).await;
        retry_interval = std::cmp::min(retry_interval * 2, client.max_reconnect_interval());
    }
}

async fn session(
    client: &SlackClient,
    events: &mpsc::Sender<ChatEvent>,
) -> Result<SessionEnd, SlackError> {
    let rtm = client.rtm_connect().await?;
    let (mut socket, _) = tokio_tungstenite::connect_async(rtm.url.as_str()).await?;
    info!("Slack: RTM connected as {}", rtm.self_.id);

    if events
        .send(ChatEvent::Connected {
            self_id: rtm.self_.id,
        })
        .await
        .is_err()
    {
        return Ok(SessionEnd::ConsumerGone);
    }

    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match parse_frame(&text) {
                RtmFrame::Event(event) => {
                    if events.send(event).await.is_err() {
                        let _ = socket.close(None).await;
                        return Ok(SessionEnd::ConsumerGone);
                    }
                }
                RtmFrame::Goodbye => return Ok(SessionEnd::Reconnect),
            },
            Message::Ping(data) => socket.send(Message::Pong(data)).await?,
            Message::Close(_) => return Ok(SessionEnd::Reconnect),
            _ => {}
        }
    }
    Ok(SessionEnd::Reconnect)
}
