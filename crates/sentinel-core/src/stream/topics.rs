use serde::de::DeserializeOwned;

use super::{StreamError, StreamFrame, StreamTopic};
use crate::models::{AgentLogEvent, AnalysisStatusEvent, PipelineExecution, PulseEvent};

/// Key the console channel is subscribed under. The channel is not scoped,
/// so any stable value works.
pub const CONSOLE_CHANNEL_KEY: &str = "console";

const ANALYSIS_STATUS_EVENT: &str = "analysis-status";
const NOTIFICATION_EVENT: &str = "notification";
const AGENT_LOGS_EVENT: &str = "agent-logs";
const PIPELINE_INIT_EVENT: &str = "pipeline-init";
const PIPELINE_PULSE_EVENT: &str = "pipeline-pulse";
const PIPELINE_COMPLETE_EVENT: &str = "pipeline-complete";

/// Per-analysis status channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnalysisStatusTopic;

impl StreamTopic for AnalysisStatusTopic {
    type Event = AnalysisStatusEvent;

    fn url(&self, endpoint: &str, key: &str) -> String {
        format!("{endpoint}/api/logs/{key}/stream")
    }

    fn event_names(&self) -> &'static [&'static str] {
        &[ANALYSIS_STATUS_EVENT]
    }

    fn decode(&self, frame: &StreamFrame) -> Result<Self::Event, StreamError> {
        decode_json(frame, ANALYSIS_STATUS_EVENT)
    }

    fn correlation_key<'a>(&self, event: &'a Self::Event) -> Option<&'a str> {
        Some(event.analysis_id.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    Pulse,
    Complete,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleEvent {
    Notification(PulseEvent),
    AgentLog(AgentLogEvent),
    Pipeline {
        stage: PipelineStage,
        execution: PipelineExecution,
    },
}

/// Shared console channel carrying notifications, agent logs and pipeline
/// telemetry.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleTopic;

impl StreamTopic for ConsoleTopic {
    type Event = ConsoleEvent;

    fn url(&self, endpoint: &str, _key: &str) -> String {
        format!("{endpoint}/api/sse/stream")
    }

    fn event_names(&self) -> &'static [&'static str] {
        &[
            NOTIFICATION_EVENT,
            AGENT_LOGS_EVENT,
            PIPELINE_INIT_EVENT,
            PIPELINE_PULSE_EVENT,
            PIPELINE_COMPLETE_EVENT,
        ]
    }

    fn decode(&self, frame: &StreamFrame) -> Result<Self::Event, StreamError> {
        let name = frame.event.as_deref().unwrap_or("message");
        let stage = match name {
            NOTIFICATION_EVENT => {
                // The re-pull trigger must survive a payload the feed cannot render.
                let pulse = serde_json::from_str::<PulseEvent>(&frame.data).unwrap_or_else(|_| {
                    PulseEvent {
                        message: frame.data.clone(),
                        ..PulseEvent::default()
                    }
                });
                return Ok(ConsoleEvent::Notification(pulse));
            }
            AGENT_LOGS_EVENT => {
                return decode_json(frame, AGENT_LOGS_EVENT).map(ConsoleEvent::AgentLog);
            }
            PIPELINE_INIT_EVENT => PipelineStage::Init,
            PIPELINE_PULSE_EVENT => PipelineStage::Pulse,
            PIPELINE_COMPLETE_EVENT => PipelineStage::Complete,
            other => return Err(StreamError::UnknownEvent(other.to_string())),
        };
        let execution = decode_json(frame, name)?;
        Ok(ConsoleEvent::Pipeline { stage, execution })
    }

    fn correlation_key<'a>(&self, _event: &'a Self::Event) -> Option<&'a str> {
        None
    }
}

fn decode_json<T: DeserializeOwned>(frame: &StreamFrame, event: &str) -> Result<T, StreamError> {
    serde_json::from_str(&frame.data).map_err(|source| StreamError::Parse {
        event: event.to_string(),
        source,
    })
}
