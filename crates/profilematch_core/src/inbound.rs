use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use profilematch_logging::pm_debug;

use crate::Stage;

/// A decoded server message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    ConnectionEstablished {
        message: String,
    },
    Pong,
    Update {
        stage: Option<Stage>,
        progress: u8,
        message: String,
    },
    Complete {
        message: String,
        results: Value,
    },
    Error {
        message: String,
        detail: Option<String>,
    },
    /// A `type` this client does not know. Kept for forward compatibility.
    Unknown {
        kind: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("malformed `{kind}` payload: {reason}")]
    Payload { kind: String, reason: String },
}

#[derive(Deserialize)]
struct InfoPayload {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct UpdatePayload {
    #[serde(default)]
    stage: Option<String>,
    progress: f64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct CompletePayload {
    #[serde(default)]
    message: String,
    results: Value,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<String>,
}

const FALLBACK_ERROR: &str = "Analysis failed";

/// Parse one text frame from the progress stream.
pub fn parse_frame(text: &str) -> Result<Inbound, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| FrameError::Json(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    let inbound = match kind.as_str() {
        "connection_established" => {
            let payload: InfoPayload = payload(&kind, value)?;
            Inbound::ConnectionEstablished {
                message: payload.message,
            }
        }
        "pong" => Inbound::Pong,
        "analysis_update" => {
            let payload: UpdatePayload = payload(&kind, value)?;
            Inbound::Update {
                stage: parse_stage(payload.stage.as_deref()),
                progress: clamp_progress(payload.progress),
                message: payload.message,
            }
        }
        "analysis_complete" => {
            let payload: CompletePayload = payload(&kind, value)?;
            Inbound::Complete {
                message: payload.message,
                results: payload.results,
            }
        }
        "analysis_error" => {
            let payload: ErrorPayload = payload(&kind, value)?;
            let message = if payload.message.trim().is_empty() {
                FALLBACK_ERROR.to_string()
            } else {
                payload.message
            };
            Inbound::Error {
                message,
                detail: payload.error.filter(|detail| !detail.is_empty()),
            }
        }
        _ => Inbound::Unknown { kind },
    };
    Ok(inbound)
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|err| FrameError::Payload {
        kind: kind.to_string(),
        reason: err.to_string(),
    })
}

fn parse_stage(raw: Option<&str>) -> Option<Stage> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match raw.parse() {
        Ok(stage) => Some(stage),
        Err(err) => {
            pm_debug!("{}", err);
            None
        }
    }
}

fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_fields_are_decoded() {
        let frame = r#"{"type":"analysis_update","stage":"skills","progress":30,"message":"Detecting skills","data":{}}"#;
        assert_eq!(
            parse_frame(frame),
            Ok(Inbound::Update {
                stage: Some(Stage::Skills),
                progress: 30,
                message: "Detecting skills".to_string(),
            })
        );
    }

    #[test]
    fn progress_is_clamped_and_rounded() {
        let over = json!({"type": "analysis_update", "stage": "analysis", "progress": 250});
        let under = json!({"type": "analysis_update", "stage": "analysis", "progress": -3});
        let fractional = json!({"type": "analysis_update", "stage": "analysis", "progress": 41.6});
        let progress = |v: Value| match parse_frame(&v.to_string()) {
            Ok(Inbound::Update { progress, .. }) => progress,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(progress(over), 100);
        assert_eq!(progress(under), 0);
        assert_eq!(progress(fractional), 42);
    }

    #[test]
    fn unknown_stage_becomes_none() {
        let frame = json!({"type": "analysis_update", "stage": "warmup", "progress": 5});
        match parse_frame(&frame.to_string()) {
            Ok(Inbound::Update { stage, .. }) => assert_eq!(stage, None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_without_message_gets_fallback_text() {
        let frame = json!({"type": "analysis_error", "message": "", "error": "Traceback"});
        assert_eq!(
            parse_frame(&frame.to_string()),
            Ok(Inbound::Error {
                message: FALLBACK_ERROR.to_string(),
                detail: Some("Traceback".to_string()),
            })
        );
    }

    #[test]
    fn rejects_garbage_and_untyped_frames() {
        assert!(matches!(parse_frame("not json"), Err(FrameError::Json(_))));
        assert_eq!(parse_frame(r#"{"stage":"skills"}"#), Err(FrameError::MissingType));
        assert_eq!(parse_frame(r#"{"type":7}"#), Err(FrameError::MissingType));
    }

    #[test]
    fn complete_without_results_is_malformed() {
        let err = parse_frame(r#"{"type":"analysis_complete","message":"Done"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Payload { ref kind, .. } if kind == "analysis_complete"));
    }

    #[test]
    fn unknown_types_are_preserved() {
        assert_eq!(
            parse_frame(r#"{"type":"heartbeat"}"#),
            Ok(Inbound::Unknown {
                kind: "heartbeat".to_string()
            })
        );
    }
}
