//! JSON wire format of the media gateway and the conversational agent.
//!
//! Gateway messages carry an `event` tag, agent messages a `type` tag. Both
//! decode into the pipeline's [`ControlEvent`] or an [`AgentEvent`]; unknown
//! tags decode to `None` so callers can skip them without logging noise.

use crate::error::{CallguardError, Result};
use crate::pipeline::types::{ControlEvent, MediaTrack, SessionId};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum GatewayMessage {
    Connected {},
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Stop {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    #[serde(default)]
    track: Option<String>,
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AgentMessage {
    UserStartedSpeaking {},
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default)]
        prompt_response: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Message from the conversational agent relevant to the call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The caller started speaking over the agent.
    SpeechStarted,
    /// Finalized analysis text of the latest utterance.
    Analysis(String),
}

/// One decoded line of a mixed gateway/agent log.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Gateway(ControlEvent),
    Agent(AgentEvent),
}

/// Decodes one gateway text message.
///
/// Returns `Ok(None)` for events the pipeline does not use.
pub fn decode_gateway(text: &str) -> Result<Option<ControlEvent>> {
    let message: GatewayMessage = serde_json::from_str(text)?;
    gateway_event(message)
}

fn gateway_event(message: GatewayMessage) -> Result<Option<ControlEvent>> {
    let event = match message {
        GatewayMessage::Connected {} => ControlEvent::Connected,
        GatewayMessage::Start { start } => ControlEvent::SessionStart {
            id: SessionId::new(start.stream_sid),
        },
        GatewayMessage::Media { media } => {
            let payload = STANDARD
                .decode(media.payload.as_bytes())
                .map_err(|e| CallguardError::MalformedEvent {
                    message: format!("invalid base64 media payload: {e}"),
                })?;
            let track = media
                .track
                .as_deref()
                .map(MediaTrack::parse)
                .unwrap_or_else(|| MediaTrack::Other(String::new()));
            ControlEvent::Media { track, payload }
        }
        GatewayMessage::Stop {} => ControlEvent::Stop,
        GatewayMessage::Other => return Ok(None),
    };
    Ok(Some(event))
}

/// Decodes one agent text message.
pub fn decode_agent(text: &str) -> Result<Option<AgentEvent>> {
    let message: AgentMessage = serde_json::from_str(text)?;
    agent_event(message)
}

fn agent_event(message: AgentMessage) -> Result<Option<AgentEvent>> {
    match message {
        AgentMessage::UserStartedSpeaking {} => Ok(Some(AgentEvent::SpeechStarted)),
        AgentMessage::Assistant { prompt_response } => match prompt_response {
            Some(text) => Ok(Some(AgentEvent::Analysis(text))),
            None => Err(CallguardError::MalformedEvent {
                message: "assistant message without prompt_response".to_string(),
            }),
        },
        AgentMessage::Other => Ok(None),
    }
}

/// Decodes a line that may come from either side, by its tag field.
pub fn decode_line(text: &str) -> Result<Option<Inbound>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("event").is_some() {
        let message = GatewayMessage::deserialize(value)?;
        Ok(gateway_event(message)?.map(Inbound::Gateway))
    } else if value.get("type").is_some() {
        let message = AgentMessage::deserialize(value)?;
        Ok(agent_event(message)?.map(Inbound::Agent))
    } else {
        Err(CallguardError::MalformedEvent {
            message: "message has neither an event nor a type field".to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

/// Instruction asking the gateway to drop buffered playback.
pub fn encode_clear(session_id: &SessionId) -> Result<String> {
    let message = OutboundMessage::Clear {
        stream_sid: session_id.as_str(),
    };
    serde_json::to_string(&message).map_err(|e| CallguardError::Other(e.to_string()))
}
