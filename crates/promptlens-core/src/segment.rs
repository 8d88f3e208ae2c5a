//! Splitting decoded metadata text into prompt, negative prompt and settings.
//!
//! Strategies run in a fixed priority order and the first one that yields a
//! non-empty field wins. Every strategy is a plain function so each can be
//! exercised on its own.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::record::{Diagnostics, Strategy};
use crate::source::PARAMETERS_KEY;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub const NEGATIVE_MARKER: &str = "Negative prompt:";
pub const STEPS_MARKER: &str = "Steps:";

const QUOTED_PROMPT: &str = "\"prompt\":";
const QUOTED_NEGATIVE: &str = "\"negativePrompt\":";
const QUOTED_STEPS: &str = "\"steps\":";

/// ComfyUI node types whose `inputs.text` holds a prompt.
const TEXT_ENCODER_NODES: &[&str] = &["CLIPTextEncode", "CLIPTextEncodeSDXL"];
/// ComfyUI node types whose `inputs.steps` holds the step count.
const SAMPLER_NODES: &[&str] = &["KSampler", "KSamplerAdvanced"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    pub prompt: String,
    pub negative: String,
    pub settings: String,
}

impl Fields {
    fn is_empty(&self) -> bool {
        self.prompt.is_empty() && self.negative.is_empty() && self.settings.is_empty()
    }

    fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segments {
    pub fields: Fields,
    pub strategy: Strategy,
}

/// Text handed to every strategy: the untouched input and its
/// whitespace-normalised form.
pub struct SegmentInput<'a> {
    pub raw: &'a str,
    pub normalized: String,
}

impl<'a> SegmentInput<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            normalized: normalize_whitespace(raw),
        }
    }
}

type StrategyFn = fn(&SegmentInput) -> Option<Fields>;

/// Strategies in priority order.
const STRATEGIES: &[(Strategy, StrategyFn)] = &[
    (Strategy::StructuredDocument, structured_document),
    (Strategy::QuotedMarkers, quoted_markers),
    (Strategy::PlainMarkers, plain_markers),
    (Strategy::SpacedMarkers, spaced_markers),
    (Strategy::WholeText, whole_text),
];

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

pub fn segment(text: &str, diag: &mut Diagnostics) -> Segments {
    let input = SegmentInput::new(text);
    for (strategy, run) in STRATEGIES {
        match run(&input) {
            Some(fields) => {
                diag.push(format!("strategy {strategy} matched"));
                return Segments {
                    fields,
                    strategy: *strategy,
                };
            }
            None => diag.push(format!("strategy {strategy} found nothing")),
        }
    }
    Segments {
        fields: Fields::default(),
        strategy: Strategy::None,
    }
}

/// A payload that repeats its own `parameters` key (optionally followed by a
/// colon) has it removed so the key never ends up in the prompt. The word
/// anywhere else is ordinary prompt text.
fn after_parameters(text: &str) -> &str {
    match text.strip_prefix(PARAMETERS_KEY) {
        Some(rest) => {
            let rest = rest.trim_start();
            rest.strip_prefix(':').unwrap_or(rest).trim_start()
        }
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Structured documents
// ---------------------------------------------------------------------------

pub fn structured_document(input: &SegmentInput) -> Option<Fields> {
    let doc: Value = serde_json::from_str(&input.normalized).ok()?;
    let root = doc.as_object()?;

    let mut prompt = None;
    let mut negative = None;
    let mut steps: Option<(&Value, &Map<String, Value>)> = None;

    if let Some(models) = root.get("models").and_then(Value::as_array) {
        for model in models.iter().filter_map(Value::as_object) {
            if prompt.is_none() {
                prompt = text_value(model.get("prompt"));
            }
            if negative.is_none() {
                negative = text_value(model.get("negativePrompt"));
            }
            if steps.is_none() {
                steps = steps_value(model.get("steps")).map(|v| (v, model));
            }
        }
    } else {
        prompt = text_value(root.get("prompt"));
        negative = text_value(root.get("negativePrompt"));
        steps = steps_value(root.get("steps")).map(|v| (v, root));
    }

    if prompt.is_none() || negative.is_none() {
        let mut encoded = root
            .values()
            .filter_map(|node| node_inputs(node, TEXT_ENCODER_NODES))
            .filter_map(|inputs| text_value(inputs.get("text")));
        let first = encoded.next();
        let second = encoded.next();
        if prompt.is_none() {
            prompt = first;
        }
        if negative.is_none() {
            negative = second;
        }
    }

    if steps.is_none() {
        steps = root
            .values()
            .filter_map(|node| node_inputs(node, SAMPLER_NODES))
            .find_map(|inputs| steps_value(inputs.get("steps")).map(|v| (v, inputs)));
    }

    Fields {
        prompt: prompt.unwrap_or_default(),
        negative: negative.unwrap_or_default(),
        settings: steps
            .map(|(value, source)| render_settings(value, source))
            .unwrap_or_default(),
    }
    .non_empty()
}

fn text_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn steps_value(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// `inputs` of a node graph entry whose `class_type` is one of `kinds`.
fn node_inputs<'a>(node: &'a Value, kinds: &[&str]) -> Option<&'a Map<String, Value>> {
    let class = node.get("class_type")?.as_str()?;
    if !kinds.iter().any(|k| k.eq_ignore_ascii_case(class)) {
        return None;
    }
    node.get("inputs")?.as_object()
}

/// `"steps": N` followed by the other scalar entries of the map it came from.
fn render_settings(steps: &Value, source: &Map<String, Value>) -> String {
    let mut parts = vec![format!("\"steps\": {steps}")];
    for (key, value) in source {
        if matches!(key.as_str(), "prompt" | "negativePrompt" | "steps") {
            continue;
        }
        if matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_)) {
            parts.push(format!("{}: {value}", Value::String(key.clone())));
        }
    }
    parts.join(", ")
}

// ---------------------------------------------------------------------------
// Marker based layouts
// ---------------------------------------------------------------------------

pub fn quoted_markers(input: &SegmentInput) -> Option<Fields> {
    let text = after_parameters(&input.normalized);
    let p = text.find(QUOTED_PROMPT)?;
    let n = text.find(QUOTED_NEGATIVE)?;
    let s = text.find(QUOTED_STEPS)?;
    if !(p < n && n < s) {
        return None;
    }

    Fields {
        prompt: strip_quoted(&text[p + QUOTED_PROMPT.len()..n]),
        negative: strip_quoted(&text[n + QUOTED_NEGATIVE.len()..s]),
        settings: text[s..].trim().to_string(),
    }
    .non_empty()
}

/// Trim a quoted JSON value slice: `  "a cat", ` becomes `a cat`.
fn strip_quoted(slice: &str) -> String {
    let s = slice.trim();
    let s = s.strip_suffix(',').unwrap_or(s).trim_end();
    let s = s.strip_suffix('"').unwrap_or(s);
    let s = s.strip_prefix('"').unwrap_or(s);
    s.trim().to_string()
}

pub fn plain_markers(input: &SegmentInput) -> Option<Fields> {
    split_plain(after_parameters(&input.normalized))
}

/// Split on `Negative prompt:` / `Steps:`. Needs at least one marker.
/// The settings slice keeps its leading `Steps:`.
fn split_plain(text: &str) -> Option<Fields> {
    let neg = text.find(NEGATIVE_MARKER);
    let steps = match neg {
        Some(n) => {
            let start = n + NEGATIVE_MARKER.len();
            text[start..]
                .find(STEPS_MARKER)
                .map(|i| start + i)
                .or_else(|| text.find(STEPS_MARKER))
        }
        None => text.find(STEPS_MARKER),
    };

    let first = [neg, steps].into_iter().flatten().min()?;

    let negative = match neg {
        Some(n) => {
            let start = n + NEGATIVE_MARKER.len();
            match steps {
                Some(s) if s >= start => &text[start..s],
                _ => &text[start..],
            }
        }
        None => "",
    };

    Fields {
        prompt: text[..first].trim().to_string(),
        negative: negative.trim().to_string(),
        settings: steps.map(|s| text[s..].trim()).unwrap_or("").to_string(),
    }
    .non_empty()
}

/// Text written one character at a time with a separator between
/// characters, e.g. `N e g a t i v e`.
fn is_interleaved(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    chars.len() >= 3
        && chars.iter().skip(1).step_by(2).all(|&c| c == ' ' || c == '\0')
        && chars.iter().step_by(2).any(|c| !c.is_whitespace())
}

pub fn spaced_markers(input: &SegmentInput) -> Option<Fields> {
    let trimmed = input.raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if !is_interleaved(trimmed) {
        return None;
    }
    let collapsed: String = trimmed.chars().step_by(2).collect();
    let normalized = normalize_whitespace(&collapsed);
    split_plain(after_parameters(&normalized))
}

pub fn whole_text(input: &SegmentInput) -> Option<Fields> {
    Fields {
        prompt: after_parameters(&input.normalized).to_string(),
        ..Fields::default()
    }
    .non_empty()
}
