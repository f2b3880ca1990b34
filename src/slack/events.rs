//! RTM frame parsing
//!
//! Maps the JSON frames of the RTM websocket onto [`ChatEvent`]s.

use serde::Deserialize;

use crate::transport::{ChatEvent, ChatMessage};

/// Message subtypes that carry user-visible text worth relaying.
/// `bot_message` frames often lack `user`; they are told apart by `bot_id`.
const RELAYED_SUBTYPES: &[&str] = &["bot_message", "me_message", "thread_broadcast", "file_share"];

/// What a single RTM frame means for the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmFrame {
    /// Forward this event to the consumer
    Event(ChatEvent),
    /// The server is about to close the socket; reconnect
    Goodbye,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    subtype: Option<String>,
    channel: Option<String>,
    user: Option<String>,
    bot_id: Option<String>,
    text: Option<String>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Parse a text frame. Frames that are not valid JSON are ignored.
pub fn parse_frame(text: &str) -> RtmFrame {
    let Ok(frame) = serde_json::from_str::<RawFrame>(text) else {
        return RtmFrame::Event(ChatEvent::Ignored);
    };

    let event = match frame.kind.as_deref() {
        Some("message") => match message_event(frame) {
            Some(message) => ChatEvent::Message(message),
            None => ChatEvent::Ignored,
        },
        Some("error") => {
            let error = frame.error.unwrap_or(RawError {
                code: 0,
                msg: "unspecified RTM error".to_string(),
            });
            ChatEvent::Fatal(format!("RTM error {}: {}", error.code, error.msg))
        }
        Some("goodbye") => return RtmFrame::Goodbye,
        _ => ChatEvent::Ignored,
    };
    RtmFrame::Event(event)
}

fn message_event(frame: RawFrame) -> Option<ChatMessage> {
    if let Some(subtype) = frame.subtype.as_deref() {
        if !RELAYED_SUBTYPES.contains(&subtype) {
            return None;
        }
    }
    Some(ChatMessage {
        channel: frame.channel?,
        user: frame.user,
        bot_id: frame.bot_id,
        text: frame.text?,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_plain_message() {
        let frame = parse_frame(
            r#"{"type":"message","channel":"C024BE91L","user":"U2147483697","text":"ping","ts":"1355517523.000005"}"#,
        );
        assert_eq!(
            frame,
            RtmFrame::Event(ChatEvent::Message(ChatMessage {
                channel: "C024BE91L".to_string(),
                user: Some("U2147483697".to_string()),
                bot_id: None,
                text: "ping".to_string(),
            }))
        );
    }

    #[test]
    fn test_edited_message_is_ignored() {
        let frame = parse_frame(
            r#"{"type":"message","subtype":"message_changed","channel":"C1","message":{"text":"x"}}"#,
        );
        assert_eq!(frame, RtmFrame::Event(ChatEvent::Ignored));
    }

    #[test]
    fn test_bot_message_without_user() {
        let frame = parse_frame(
            r#"{"type":"message","subtype":"bot_message","channel":"C1","bot_id":"B1","text":"hi"}"#,
        );
        assert_eq!(
            frame,
            RtmFrame::Event(ChatEvent::Message(ChatMessage {
                channel: "C1".to_string(),
                user: None,
                bot_id: Some("B1".to_string()),
                text: "hi".to_string(),
            }))
        );
    }

    #[test]
    fn test_error_frame_is_fatal() {
        let frame = parse_frame(r#"{"type":"error","error":{"code":1,"msg":"Socket URL has expired"}}"#);
        assert_eq!(
            frame,
            RtmFrame::Event(ChatEvent::Fatal(
                "RTM error 1: Socket URL has expired".to_string()
            ))
        );
    }

    #[test]
    fn test_goodbye() {
        assert_eq!(parse_frame(r#"{"type":"goodbye"}"#), RtmFrame::Goodbye);
    }

    #[test]
    fn test_other_frames_are_ignored() {
        assert_eq!(
            parse_frame(r#"{"type":"user_typing","channel":"C1","user":"U1"}"#),
            RtmFrame::Event(ChatEvent::Ignored)
        );
        assert_eq!(
            parse_frame(r#"{"ok":true,"reply_to":1,"ts":"1.0","text":"hello"}"#),
            RtmFrame::Event(ChatEvent::Ignored)
        );
        assert_eq!(parse_frame("not json"), RtmFrame::Event(ChatEvent::Ignored));
    }
}
