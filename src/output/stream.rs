//! Newline-delimited JSON event stream
//!
//! Every lifecycle event becomes one `{"type": "test:<kind>", "data": {...}}`
//! line as soon as the listener sees it. The stream ends with a
//! `test:summary` frame.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::trace;

use crate::coordinator::TappedEvent;
use crate::models::LifecycleEvent;
use crate::results::RunReport;

pub const SUMMARY_TYPE: &str = "test:summary";

/// One line of the event stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl StreamFrame {
    /// Frame for a lifecycle event; the payload fields are lifted into `data`
    pub fn from_event(event: &LifecycleEvent, test_id: Option<&str>) -> Self {
        let mut data = match &event.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        data.entry("ref")
            .or_insert_with(|| Value::String(event.correlation_ref.clone()));
        if let Some(test_id) = test_id {
            data.entry("test_id")
                .or_insert_with(|| Value::String(test_id.to_string()));
        }

        Self {
            kind: event.kind.as_str().to_string(),
            data: Value::Object(data),
        }
    }

    pub fn summary(report: &RunReport) -> Self {
        let mut data = json!({
            "total": report.tests_total,
            "completed": report.tests_completed,
            "passed": report.tests_passed,
            "failed": report.tests_failed,
            "status": report.status,
        });
        if let Some(error) = &report.error {
            data["error"] = Value::String(error.clone());
        }
        if !report.warnings.is_empty() {
            data["warnings"] = json!(report.warnings);
        }

        Self {
            kind: SUMMARY_TYPE.to_string(),
            data,
        }
    }
}

/// Write one frame followed by a newline and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &StreamFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Write every tapped event until the tap closes, then hand the writer back
pub async fn forward_events<W>(
    mut events: mpsc::UnboundedReceiver<TappedEvent>,
    mut writer: W,
) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0usize;
    while let Some(tapped) = events.recv().await {
        let frame = StreamFrame::from_event(&tapped.event, tapped.test_id.as_deref());
        write_frame(&mut writer, &frame).await?;
        written += 1;
    }
    trace!("Event stream closed after {} frames", written);
    Ok(writer)
}
