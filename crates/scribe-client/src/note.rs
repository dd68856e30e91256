//! Placeholder-aware section patching for the evolving note document.
//!
//! Machine-generated section content is spliced into a markdown document
//! that a human may be editing at the same time. The patcher must preserve
//! user-authored text inside a section while throwing away template
//! boilerplate, and must never lose an already-rendered section.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Markdown headings, levels 2-6.
    static ref HEADING_RE: Regex = Regex::new(r"(?m)^(#{2,6})[ \t]+(.+?)[ \t]*$").unwrap();

    /// Any heading terminates a section's content span.
    static ref ANY_HEADING_RE: Regex = Regex::new(r"(?m)^#{1,6}[ \t]+").unwrap();

    /// Fixed boilerplate markers that never count as user content.
    static ref FIXED_PLACEHOLDER_RE: Regex = Regex::new(
        r"(?i)^(placeholder|tbd|to be (generated|completed|documented|determined)|pending|content will (be|appear) .*|awaiting (generation|dictation).*)$"
    )
    .unwrap();

    /// Collapse runs of blank lines left behind by stripping.
    static ref BLANK_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Generic negative-finding phrases templates use to fill empty sections.
const NEGATIVE_FINDING_PHRASES: &[&str] = &[
    "no significant findings",
    "no abnormalities noted",
    "none reported",
    "none noted",
    "not discussed",
    "not assessed",
    "nothing to report",
    "no acute distress",
];

/// Derive candidate human-readable header titles for a section key.
///
/// Separators become spaces and each word is title-cased, except that
/// `and` stays lower-case (`assessment_and_plan` → `Assessment and Plan`);
/// a plain title-cased and a sentence-cased variant are also tried to
/// tolerate inconsistent upstream header formatting. Matching is
/// case-insensitive, so the variants mostly matter for the append fallback.
pub fn header_candidates(key: &str) -> Vec<String> {
    let words: Vec<String> = key
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    if words.is_empty() {
        return vec![key.to_string()];
    }

    let cap = |w: &str| {
        let mut chars = w.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };

    let with_and_exception: Vec<String> = words
        .iter()
        .enumerate()
        .map(|(i, w)| if i > 0 && w == "and" { w.clone() } else { cap(w) })
        .collect();
    let all_title: Vec<String> = words.iter().map(|w| cap(w)).collect();
    let sentence: Vec<String> = words
        .iter()
        .enumerate()
        .map(|(i, w)| if i == 0 { cap(w) } else { w.clone() })
        .collect();

    let mut candidates = Vec::new();
    for v in [with_and_exception, all_title, sentence] {
        let joined = v.join(" ");
        if !candidates.contains(&joined) {
            candidates.push(joined);
        }
    }
    candidates
}

/// Build a skeleton document from a template's section keys, one level-2
/// heading per section over a placeholder body. Used when no rendered
/// preview is available; the placeholder text is one the patcher strips.
pub fn section_skeleton(sections: &[String]) -> String {
    let mut out = String::new();
    for key in sections {
        if !out.is_empty() {
            out.push('\n');
        }
        let title = header_candidates(key)
            .into_iter()
            .next()
            .unwrap_or_else(|| key.clone());
        out.push_str(&format!("## {title}\n\n*To be generated*\n"));
    }
    out
}

/// Byte span of a section: heading line plus content running to the next
/// heading of any level or the document end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionSpan {
    /// Start of the heading line.
    pub heading_start: usize,
    /// Start of the content, just past the heading line's newline.
    pub content_start: usize,
    /// End of the content (exclusive).
    pub content_end: usize,
}

/// Case-insensitively locate the section for `key` in `document`.
pub fn find_section(document: &str, key: &str) -> Option<SectionSpan> {
    let candidates: Vec<String> = header_candidates(key)
        .into_iter()
        .map(|c| c.to_lowercase())
        .collect();

    for caps in HEADING_RE.captures_iter(document) {
        let m = caps.get(0)?;
        let title = caps.get(2).map(|t| t.as_str().trim().to_lowercase())?;

        if !candidates.contains(&title) {
            continue;
        }

        let content_start = document[m.end()..]
            .find('\n')
            .map(|i| m.end() + i + 1)
            .unwrap_or(document.len());
        let content_end = ANY_HEADING_RE
            .find(&document[content_start..])
            .map(|next| content_start + next.start())
            .unwrap_or(document.len());

        return Some(SectionSpan {
            heading_start: m.start(),
            content_start,
            content_end,
        });
    }

    None
}

fn count_level2_headings(document: &str) -> usize {
    HEADING_RE
        .captures_iter(document)
        .filter(|c| c.get(1).map(|h| h.as_str().len()) == Some(2))
        .count()
}

/// Strip markdown emphasis and bracket decoration for phrase comparison.
fn normalize_line(line: &str) -> String {
    line.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '[' | ']' | '`'))
        .trim()
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase()
}

#[derive(Clone, Debug, Default)]
pub struct SectionPatcher {
    template_defaults: Vec<String>,
}

impl SectionPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the active template's declared default strings (its
    /// `{{ var or "default" }}` fallbacks) as additional placeholders.
    pub fn with_template_defaults(defaults: Vec<String>) -> Self {
        Self {
            template_defaults: defaults.into_iter().map(|d| normalize_line(&d)).collect(),
        }
    }

    fn is_placeholder_line(&self, line: &str) -> bool {
        let normalized = normalize_line(line);
        if normalized.is_empty() {
            return false;
        }
        FIXED_PLACEHOLDER_RE.is_match(&normalized)
            || NEGATIVE_FINDING_PHRASES.contains(&normalized.as_str())
            || self.template_defaults.iter().any(|d| d == &normalized)
    }

    /// Remove placeholder boilerplate from a section body and collapse the
    /// blank-line runs left behind. What remains is user content.
    fn strip_placeholders(&self, body: &str) -> String {
        let kept: Vec<&str> = body
            .lines()
            .filter(|line| !self.is_placeholder_line(line))
            .collect();

        let collapsed = BLANK_RUN_RE
            .replace_all(&kept.join("\n"), "\n\n")
            .into_owned();
        collapsed.trim_matches('\n').to_string()
    }

    /// True when the document holds any content the placeholder heuristic
    /// does not recognize as boilerplate: edits that must not be lost.
    pub fn has_user_content(&self, document: &str) -> bool {
        for line in document.lines() {
            // Headings of any level are document structure, not content.
            if line.trim_start().starts_with('#') {
                continue;
            }
            let normalized = normalize_line(line);
            if !normalized.is_empty() && !self.is_placeholder_line(line) {
                return true;
            }
        }
        false
    }

    /// Splice `content` into the section for `key`.
    ///
    /// Preserved user text stays above the new content; if no heading
    /// matches, a new level-2 section is appended instead of failing.
    /// The level-2 heading count never decreases across a call.
    pub fn patch(&self, document: &str, key: &str, content: &str) -> String {
        let content = content.trim_matches('\n');

        let Some(span) = find_section(document, key) else {
            tracing::debug!(key, "no matching heading, appending new section");
            return append_section(document, key, content);
        };

        let body = &document[span.content_start..span.content_end];
        let mut preserved = self.strip_placeholders(body);

        // Previously injected machine content is not user text; dropping an
        // exact match keeps re-delivery of the same section idempotent.
        if !content.is_empty() {
            preserved = preserved.replace(content, "");
            preserved = BLANK_RUN_RE.replace_all(&preserved, "\n\n").into_owned();
            preserved = preserved.trim_matches('\n').to_string();
        }

        let mut replacement = if preserved.is_empty() {
            format!("{content}\n")
        } else {
            format!("{preserved}\n\n{content}\n")
        };
        // Keep a separating blank line when another section follows.
        if span.content_end < document.len() {
            replacement.push('\n');
        }

        let mut patched = String::with_capacity(document.len() + replacement.len());
        patched.push_str(&document[..span.content_start]);
        // A heading on the document's last line has no trailing newline, so
        // the content span starts at end-of-document mid-line.
        if !patched.ends_with('\n') {
            patched.push('\n');
        }
        patched.push_str(&replacement);
        patched.push_str(&document[span.content_end..]);

        debug_assert!(count_level2_headings(&patched) >= count_level2_headings(document));
        patched
    }
}

fn append_section(document: &str, key: &str, content: &str) -> String {
    let title = header_candidates(key)
        .into_iter()
        .next()
        .unwrap_or_else(|| key.to_string());

    let mut out = document.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("## {title}\n\n{content}\n"));
    out
}
