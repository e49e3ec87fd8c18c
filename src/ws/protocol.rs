//! JSON envelope spoken on the realtime channel.
//!
//! Every text frame is `{"event": name, "data": payload, "ack": id?}`. A frame
//! without `event` but with `ack` answers an earlier acked emit.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::{ClientEvent, ServerEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(ServerEvent),
    Ack { id: u64, payload: Value },
    /// Event name this client does not know about
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    ack: Option<u64>,
}

pub fn encode(event: &ClientEvent, ack: Option<u64>) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(event)?;
    if let (Some(id), Value::Object(map)) = (ack, &mut value) {
        map.insert("ack".to_string(), Value::from(id));
    }
    serde_json::to_string(&value)
}

pub fn decode(text: &str) -> Result<Frame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;

    match (raw.event, raw.ack) {
        (Some(name), _) => {
            let tagged = json!({ "event": name, "data": raw.data });
            match serde_json::from_value::<ServerEvent>(tagged) {
                Ok(event) => Ok(Frame::Event(event)),
                Err(_) => Ok(Frame::Unknown(name)),
            }
        }
        (None, Some(id)) => Ok(Frame::Ack {
            id,
            payload: raw.data,
        }),
        (None, None) => Ok(Frame::Unknown(String::new())),
    }
}
