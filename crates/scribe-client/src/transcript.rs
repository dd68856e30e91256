//! Incremental transcript assembly: live-partial tracking, same-speaker
//! coalescing, batch timestamp repair, and display-time merging.

use crate::protocol::{Transcript, TranscriptSegment};

/// Largest inter-segment gap we still trust, in seconds. Anything beyond
/// it (or any non-monotonic start) marks the whole sequence as unreliable.
pub const MAX_TRUSTED_GAP_SECS: f64 = 1800.0;

/// Display-time merge joins same-speaker neighbors up to this far apart.
pub const DISPLAY_MERGE_GAP_SECS: f64 = 30.0;

const REBUILD_WORDS_PER_SEC: f64 = 2.5;
const REBUILD_PAUSE_SECS: f64 = 0.5;

/// The current not-yet-finalized utterance. At most one exists; a new
/// partial replaces it, a final segment clears it.
#[derive(Clone, Debug, PartialEq)]
pub struct LivePartial {
    pub text: String,
    pub speaker: Option<String>,
    pub speaker_tag: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct TranscriptAssembler {
    segments: Vec<TranscriptSegment>,
    partial: Option<LivePartial>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live partial. Partials never enter history.
    pub fn push_partial(&mut self, text: String, speaker: Option<String>, speaker_tag: Option<i64>) {
        self.partial = Some(LivePartial { text, speaker, speaker_tag });
    }

    /// Append a finalized segment, coalescing into the previous one when it
    /// shares the same speaker tag. Upstream splits a continuous utterance
    /// into multiple fragments; joining here keeps one entry per utterance.
    pub fn push_final(&mut self, mut segment: TranscriptSegment) {
        self.partial = None;

        if segment.end < segment.start {
            segment.end = segment.start;
        }

        match self.segments.last_mut() {
            Some(last) if last.speaker_tag == segment.speaker_tag => {
                if !segment.text.is_empty() {
                    if !last.text.is_empty() {
                        last.text.push(' ');
                    }
                    last.text.push_str(&segment.text);
                }
                last.end = segment.end;
                last.confidence = segment.confidence;
            }
            _ => self.segments.push(segment),
        }
    }

    /// Terminal `complete`: adopt the server transcript as authoritative,
    /// repairing its timestamps if they look unreliable. The assembler's
    /// own history is discarded in favor of the server copy.
    pub fn finish(&mut self, mut transcript: Transcript) -> Transcript {
        self.partial = None;
        repair_timestamps(&mut transcript.segments);
        self.segments = transcript.segments.clone();
        transcript
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn live_partial(&self) -> Option<&LivePartial> {
        self.partial.as_ref()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.partial = None;
    }
}

/// True when any consecutive pair is non-monotonic in `start` or gapped
/// beyond [`MAX_TRUSTED_GAP_SECS`].
pub fn timestamps_unreliable(segments: &[TranscriptSegment]) -> bool {
    segments.windows(2).any(|pair| {
        pair[1].start < pair[0].start || pair[1].start - pair[0].end > MAX_TRUSTED_GAP_SECS
    })
}

/// Batch repair pass, applied once over the full sequence.
///
/// If any pair trips [`timestamps_unreliable`], every timestamp in the
/// sequence is treated as untrustworthy and regenerated synthetically:
/// duration proportional to word count at a fixed words-per-second rate,
/// a fixed pause between segments, starting at zero.
///
/// This is a lossy heuristic fallback, not a timing guarantee — a single
/// legitimate pause longer than 30 minutes also triggers a full rebuild.
pub fn repair_timestamps(segments: &mut [TranscriptSegment]) {
    if !timestamps_unreliable(segments) {
        return;
    }

    tracing::warn!(
        segments = segments.len(),
        "unreliable timestamps detected, rebuilding synthetically"
    );

    let mut t = 0.0;
    for segment in segments.iter_mut() {
        let words = segment.text.split_whitespace().count().max(1);
        segment.start = t;
        segment.end = t + words as f64 / REBUILD_WORDS_PER_SEC;
        t = segment.end + REBUILD_PAUSE_SECS;
    }
}

/// Display-time pass: merge consecutive segments sharing a speaker tag when
/// the gap between them is at most [`DISPLAY_MERGE_GAP_SECS`]. Reduces
/// visual fragmentation without altering the authoritative ingest history.
pub fn merge_for_display(segments: &[TranscriptSegment]) -> Vec<TranscriptSegment> {
    let mut merged: Vec<TranscriptSegment> = Vec::with_capacity(segments.len());

    for segment in segments {
        match merged.last_mut() {
            Some(last)
                if last.speaker_tag == segment.speaker_tag
                    && segment.start - last.end <= DISPLAY_MERGE_GAP_SECS =>
            {
                if !segment.text.is_empty() {
                    if !last.text.is_empty() {
                        last.text.push(' ');
                    }
                    last.text.push_str(&segment.text);
                }
                last.end = segment.end;
                last.confidence = segment.confidence;
            }
            _ => merged.push(segment.clone()),
        }
    }

    merged
}

/// Format seconds as `MM:SS` (`HH:MM:SS` at exactly an hour). Anything past
/// one hour is assumed to be in the wrong unit and run through the common
/// conversion factors first; values that stay absurd render as `??:??`.
pub fn format_timecode(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "00:00".to_string();
    }

    let mut normalized = seconds;
    if seconds > 3600.0 {
        // Upstream engines occasionally report milliseconds or worse; try
        // the common wrong-unit factors before giving up.
        for factor in [1_000.0, 1_000_000.0, 1_000_000_000.0, 60.0] {
            let converted = seconds / factor;
            if (0.0..=3600.0).contains(&converted) {
                normalized = converted;
                break;
            }
        }
        if normalized > 3600.0 {
            return "??:??".to_string();
        }
    }

    let total = normalized as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Parse `MM:SS` or `HH:MM:SS` back to seconds; malformed input is 0.
pub fn parse_timecode(timecode: &str) -> f64 {
    let parts: Vec<Option<u64>> = timecode.split(':').map(|p| p.parse().ok()).collect();
    match parts.as_slice() {
        [Some(m), Some(s)] => (m * 60 + s) as f64,
        [Some(h), Some(m), Some(s)] => (h * 3600 + m * 60 + s) as f64,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str, tag: i64) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker_tag: Some(tag),
            confidence: None,
        }
    }

    #[test]
    fn same_speaker_fragments_coalesce() {
        let mut a = TranscriptAssembler::new();
        a.push_final(seg(0.0, 2.0, "Hello", 0));
        a.push_final(seg(2.0, 4.0, "there", 0));
        a.push_final(seg(10.0, 12.0, "Hi", 1));

        let segments = a.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello there");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].end, 4.0);
        assert_eq!(segments[1].text, "Hi");
        assert_eq!(segments[1].speaker_tag, Some(1));
    }

    #[test]
    fn run_of_same_speaker_finals_yields_one_segment() {
        let mut a = TranscriptAssembler::new();
        let mut cfg = seg(0.0, 1.0, "one", 3);
        cfg.confidence = Some(0.9);
        a.push_final(cfg);
        a.push_final(seg(1.0, 2.0, "two", 3));
        let mut last = seg(2.0, 3.5, "three", 3);
        last.confidence = Some(0.7);
        a.push_final(last);

        let segments = a.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "one two three");
        assert_eq!(segments[0].end, 3.5);
        assert_eq!(segments[0].confidence, Some(0.7));
    }

    #[test]
    fn partial_replaces_previous_and_clears_on_final() {
        let mut a = TranscriptAssembler::new();
        a.push_partial("Hel".to_string(), None, Some(0));
        a.push_partial("Hello".to_string(), None, Some(0));
        assert_eq!(a.live_partial().map(|p| p.text.as_str()), Some("Hello"));

        a.push_final(seg(0.0, 1.0, "Hello", 0));
        assert!(a.live_partial().is_none());
        assert_eq!(a.segments().len(), 1);
    }

    #[test]
    fn monotonic_sequence_is_left_untouched() {
        let mut segments = vec![seg(0.0, 2.0, "a b", 0), seg(2.5, 4.0, "c", 1)];
        let before = segments.clone();
        repair_timestamps(&mut segments);
        assert_eq!(segments, before);
    }

    #[test]
    fn non_monotonic_start_triggers_full_rebuild() {
        let mut segments = vec![
            seg(5.0, 7.0, "one two three four five", 0),
            seg(1.0, 2.0, "six seven", 1),
        ];
        repair_timestamps(&mut segments);

        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].end, 2.0); // 5 words / 2.5 wps
        assert_eq!(segments[1].start, 2.5);
        assert!((segments[1].end - 3.3).abs() < 1e-9); // 2 words / 2.5 wps
        assert!(segments.windows(2).all(|p| p[1].start > p[0].start));
    }

    #[test]
    fn oversized_gap_triggers_rebuild() {
        let mut segments = vec![seg(0.0, 2.0, "hello", 0), seg(2000.0, 2002.0, "again", 0)];
        assert!(timestamps_unreliable(&segments));
        repair_timestamps(&mut segments);
        assert!(segments[1].start < 10.0);
    }

    #[test]
    fn display_merge_joins_close_same_speaker_segments() {
        let segments = vec![
            seg(0.0, 2.0, "Hello", 0),
            seg(20.0, 22.0, "again", 0),
            seg(60.0, 62.0, "later", 0),
            seg(63.0, 64.0, "Hi", 1),
        ];

        let merged = merge_for_display(&segments);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].text, "Hello again");
        assert_eq!(merged[0].end, 22.0);
        assert_eq!(merged[1].text, "later");
        assert_eq!(merged[2].speaker_tag, Some(1));

        // Ingest history is untouched.
        assert_eq!(segments[0].text, "Hello");
    }

    #[test]
    fn timecode_formatting_and_parsing() {
        assert_eq!(format_timecode(75.0), "01:15");
        assert_eq!(format_timecode(-3.0), "00:00");
        // Past one hour the value is treated as wrong-unit: 3725 reads as
        // milliseconds and normalizes to ~3.7 s.
        assert_eq!(format_timecode(3725.0), "00:03");
        assert_eq!(format_timecode(90_000.0), "01:30");
        assert_eq!(parse_timecode("01:15"), 75.0);
        assert_eq!(parse_timecode("01:02:05"), 3725.0);
        assert_eq!(parse_timecode("bogus"), 0.0);
    }
}
