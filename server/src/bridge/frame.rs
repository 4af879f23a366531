//! JSON control envelope sent from the client to the bridge.
//!
//! ```text
//! {"type":"resize","cols":120,"rows":40}
//! {"type":"cmd","cmd":"bHMgLWxhCg=="}
//! {"type":"heartbeat"}
//! ```
//!
//! `cmd` carries base64-encoded bytes so arbitrary control sequences survive
//! the text frame. Unknown `type` values decode to [`Control::Unknown`] and are
//! ignored by the input relay.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::TermSize;

/// Wire shape of one inbound control frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cols: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rows: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Frame {
    pub fn resize(cols: u16, rows: u16) -> Self {
        Self {
            kind: "resize".into(),
            cols: i64::from(cols),
            rows: i64::from(rows),
            ..Self::default()
        }
    }

    pub fn cmd(input: &[u8]) -> Self {
        Self {
            kind: "cmd".into(),
            cmd: STANDARD.encode(input),
            ..Self::default()
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: "heartbeat".into(),
            ..Self::default()
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decoded effect of a control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Resize(TermSize),
    Input(Vec<u8>),
    Heartbeat,
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cmd payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("invalid terminal size {cols}x{rows}")]
    Geometry { cols: i64, rows: i64 },
}

/// Parse and interpret one text frame.
pub fn decode(text: &str) -> Result<Control, FrameError> {
    let frame: Frame = serde_json::from_str(text)?;
    match frame.kind.as_str() {
        "resize" => {
            let (Ok(cols), Ok(rows)) = (u16::try_from(frame.cols), u16::try_from(frame.rows))
            else {
                return Err(FrameError::Geometry {
                    cols: frame.cols,
                    rows: frame.rows,
                });
            };
            if cols == 0 || rows == 0 {
                return Err(FrameError::Geometry {
                    cols: frame.cols,
                    rows: frame.rows,
                });
            }
            Ok(Control::Resize(TermSize { cols, rows }))
        }
        "cmd" => Ok(Control::Input(STANDARD.decode(frame.cmd.as_bytes())?)),
        "heartbeat" => Ok(Control::Heartbeat),
        _ => Ok(Control::Unknown(frame.kind)),
    }
}
