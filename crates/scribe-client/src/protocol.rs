//! Wire-format types for the two line-oriented streams.
//!
//! One JSON payload per `data: ` line. Both streams terminate their
//! transport on `complete` or `error`; no event follows either.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScribeError};

/// A timestamped, speaker-attributed span of transcribed text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub speaker_tag: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Full transcript entity. Mutated incrementally until the `complete`
/// event delivers the authoritative server copy; immutable after.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub id: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default, deserialize_with = "speaker_roles_from_wire")]
    pub speaker_roles: HashMap<i64, String>,
}

/// JSON object keys are strings, and inside an internally-tagged enum serde
/// buffers the payload in a form that will not coerce `"0"` back to an
/// integer key. Accept string keys and parse them.
fn speaker_roles_from_wire<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<i64, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(tag, role)| {
            tag.parse::<i64>()
                .map(|tag| (tag, role))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl Transcript {
    /// Display label for a speaker tag: the assigned role if any,
    /// otherwise a generic `Speaker N`.
    pub fn speaker_label(&self, tag: Option<i64>) -> String {
        match tag {
            Some(tag) => match self.speaker_roles.get(&tag) {
                Some(role) => role.clone(),
                None => format!("Speaker {tag}"),
            },
            None => "Speaker".to_string(),
        }
    }
}

/// Diagnostic/progress message emitted during note generation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub timestamp: String,
    pub event: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Events on the transcription stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscribeEvent {
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_id: Option<String>,
    },

    /// A single not-yet-finalized utterance; each partial replaces the
    /// previous one.
    Partial {
        text: String,
        #[serde(default)]
        speaker: Option<String>,
        #[serde(default)]
        speaker_tag: Option<i64>,
    },

    FinalSegment {
        segment: TranscriptSegment,
    },

    AudioUrl {
        audio_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_id: Option<String>,
    },

    Complete {
        transcript: Transcript,
    },

    Error {
        error: String,
    },
}

/// Events on the note-generation stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerateEvent {
    Trace(TraceEvent),

    SectionComplete {
        section: String,
        content: String,
        timestamp: String,
    },

    Complete {
        note_markdown: String,
        timestamp: String,
    },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

pub fn decode_transcribe_event(line: &str) -> Result<TranscribeEvent> {
    serde_json::from_str(line).map_err(|e| ScribeError::Decode(e.to_string()))
}

pub fn decode_generate_event(line: &str) -> Result<GenerateEvent> {
    serde_json::from_str(line).map_err(|e| ScribeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_final_segment_payload() {
        let line = r#"{"type":"final_segment","segment":{"start":0.0,"end":2.5,"text":"Hello, how are you feeling today?","speaker_tag":0,"confidence":0.95}}"#;

        let ev = decode_transcribe_event(line).expect("decode should succeed");
        match ev {
            TranscribeEvent::FinalSegment { segment } => {
                assert_eq!(segment.start, 0.0);
                assert_eq!(segment.end, 2.5);
                assert_eq!(segment.speaker_tag, Some(0));
                assert_eq!(segment.confidence, Some(0.95));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_partial_without_speaker_fields() {
        let line = r#"{"type":"partial","text":"I've been having"}"#;

        let ev = decode_transcribe_event(line).expect("decode should succeed");
        assert_eq!(
            ev,
            TranscribeEvent::Partial {
                text: "I've been having".to_string(),
                speaker: None,
                speaker_tag: None,
            }
        );
    }

    #[test]
    fn decode_complete_with_speaker_roles() {
        let line = r#"{"type":"complete","transcript":{"id":"t1","segments":[],"language":"en","duration":5.0,"filename":"visit.wav","speaker_roles":{"0":"provider","1":"patient"}}}"#;

        let ev = decode_transcribe_event(line).expect("decode should succeed");
        match ev {
            TranscribeEvent::Complete { transcript } => {
                assert_eq!(transcript.id, "t1");
                assert_eq!(transcript.speaker_roles.get(&0).map(String::as_str), Some("provider"));
                assert_eq!(transcript.speaker_label(Some(1)), "patient");
                assert_eq!(transcript.speaker_label(Some(7)), "Speaker 7");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_transcript_entity_with_speaker_roles() {
        let body = r#"{"id":"t2","segments":[],"speaker_roles":{"0":"provider"}}"#;

        let transcript: Transcript = serde_json::from_str(body).expect("decode should succeed");
        assert_eq!(transcript.speaker_roles.get(&0).map(String::as_str), Some("provider"));
    }

    #[test]
    fn decode_trace_and_section_complete() {
        let trace = r#"{"type":"trace","timestamp":"2025-01-01T00:00:00","event":"processing_section","message":"Processing Plan section...","metadata":{"section":"plan"}}"#;
        let ev = decode_generate_event(trace).expect("decode should succeed");
        match ev {
            GenerateEvent::Trace(t) => {
                assert_eq!(t.event, "processing_section");
                assert_eq!(t.metadata["section"], "plan");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let section = r#"{"type":"section_complete","section":"plan","content":"Follow up in 2 weeks.","timestamp":"2025-01-01T00:00:01"}"#;
        let ev = decode_generate_event(section).expect("decode should succeed");
        assert_eq!(
            ev,
            GenerateEvent::SectionComplete {
                section: "plan".to_string(),
                content: "Follow up in 2 weeks.".to_string(),
                timestamp: "2025-01-01T00:00:01".to_string(),
            }
        );
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        let err = decode_transcribe_event("{not json").unwrap_err();
        assert!(matches!(err, ScribeError::Decode(_)));
    }
}
