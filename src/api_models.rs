use serde::{Deserialize, Serialize};

/**
 * Text frames a client may send over its websocket
 *
 * Frames with any other `type`, or that aren't JSON at all, fail to parse and
 * are dropped by the room.
 */
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Vote {
        /**
         * Index into the poll's options
         */
        option: i64,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/**
 * Response for a poll created in a freshly generated room
 */
#[derive(Debug, Deserialize, Serialize)]
pub struct CreatedRoom {
    pub id: String,
    pub poll: crate::models::Poll,
}
