//! Grouping of low-level generation trace events into step-level groups
//! with live streaming previews.

use chrono::{DateTime, FixedOffset};

use crate::protocol::TraceEvent;

/// A step-level group of consecutive trace events.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceGroup {
    /// Step identifier derived from the raw `event` field.
    pub step: String,
    /// Message of the first event in the group.
    pub label: String,
    /// Section the step is working on, when the metadata names one.
    pub section: Option<String>,
    pub count: usize,
    pub first_timestamp: Option<DateTime<FixedOffset>>,
    pub last_timestamp: Option<DateTime<FixedOffset>>,
    /// Live preview: streamed section content when present, otherwise the
    /// most recent message.
    pub preview: String,
}

#[derive(Clone, Debug, Default)]
pub struct TraceAggregator {
    groups: Vec<TraceGroup>,
}

/// Collapse event-name variants onto their step: the generator emits e.g.
/// `llm_reasoning`, `llm_reasoning_delta`, `llm_reasoning_complete` for one
/// logical step, and a family of `guardrails_*` events for another.
fn step_of(event: &str) -> String {
    if event.starts_with("guardrails") || event == "privacy_validation" {
        return "guardrails".to_string();
    }
    for suffix in ["_complete", "_delta", "_chunk", "_started"] {
        if let Some(stem) = event.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    event.to_string()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .or_else(|| format!("{raw}Z").parse().ok())
}

impl TraceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trace event in. Consecutive events of the same step (and
    /// section, when named) extend the current group; anything else starts
    /// a new one.
    pub fn push(&mut self, event: &TraceEvent) {
        let step = step_of(&event.event);
        let section = event
            .metadata
            .get("section")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        let timestamp = parse_timestamp(&event.timestamp);

        let preview = event
            .metadata
            .get("section_content")
            .and_then(|c| c.as_str())
            .unwrap_or(&event.message)
            .to_string();

        match self.groups.last_mut() {
            Some(group) if group.step == step && group.section == section => {
                group.count += 1;
                group.last_timestamp = timestamp.or(group.last_timestamp);
                group.preview = preview;
            }
            _ => self.groups.push(TraceGroup {
                step,
                label: event.message.clone(),
                section,
                count: 1,
                first_timestamp: timestamp,
                last_timestamp: timestamp,
                preview,
            }),
        }
    }

    pub fn groups(&self) -> &[TraceGroup] {
        &self.groups
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(event: &str, message: &str, metadata: serde_json::Value) -> TraceEvent {
        TraceEvent {
            timestamp: "2025-01-01T00:00:00+00:00".to_string(),
            event: event.to_string(),
            message: message.to_string(),
            metadata,
        }
    }

    #[test]
    fn consecutive_same_step_events_form_one_group() {
        let mut agg = TraceAggregator::new();
        agg.push(&trace("llm_reasoning", "thinking", json!({})));
        agg.push(&trace("llm_reasoning_delta", "thinking more", json!({})));
        agg.push(&trace("llm_reasoning_complete", "done", json!({})));

        let groups = agg.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].step, "llm_reasoning");
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].label, "thinking");
        assert_eq!(groups[0].preview, "done");
    }

    #[test]
    fn step_change_starts_a_new_group() {
        let mut agg = TraceAggregator::new();
        agg.push(&trace("started", "Starting note generation...", json!({})));
        agg.push(&trace("processing_section", "Processing Plan section...", json!({})));
        agg.push(&trace("rendering", "Rendering final note...", json!({})));

        assert_eq!(agg.groups().len(), 3);
    }

    #[test]
    fn section_content_metadata_wins_the_preview() {
        let mut agg = TraceAggregator::new();
        agg.push(&trace(
            "llm_reasoning_complete",
            "done",
            json!({"section_content": "Follow up in 2 weeks."}),
        ));

        assert_eq!(agg.groups()[0].preview, "Follow up in 2 weeks.");
    }

    #[test]
    fn guardrails_family_groups_together() {
        let mut agg = TraceAggregator::new();
        agg.push(&trace("guardrails_output", "applying", json!({})));
        agg.push(&trace("privacy_validation", "validated", json!({})));
        agg.push(&trace("guardrails_error", "failed", json!({})));

        let groups = agg.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].step, "guardrails");
        assert_eq!(groups[0].count, 3);
    }

    #[test]
    fn naive_timestamps_still_parse() {
        let mut agg = TraceAggregator::new();
        let mut ev = trace("started", "go", json!({}));
        ev.timestamp = "2025-01-01T00:00:00".to_string();
        agg.push(&ev);

        assert!(agg.groups()[0].first_timestamp.is_some());
    }
}
