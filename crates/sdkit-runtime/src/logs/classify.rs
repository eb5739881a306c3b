//! Classifier for stable-diffusion.cpp stdout lines.
//!
//! The classifier is an ordered rule table evaluated first-match-wins.
//! Rule order is a stability contract: overlapping patterns (a batch line
//! that also carries the seed, a `taking Ns` line that is really a tensor
//! load report) resolve by position, and reordering the table changes
//! what the UI shows.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

/// A classified backend log line. Every variant except `Empty` carries
/// the cleaned original line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// Sampling step inside a pipe-delimited progress bar.
    Progress { current: u64, total: u64, raw: String },
    /// `generating image: current/total` batch header.
    BatchProgress { current: u64, total: u64, raw: String },
    /// The generation seed.
    Seed { seed: String, raw: String },
    /// An output file was written.
    FileSaved { path: String, raw: String },
    /// `[ERROR]`-tagged line; `message` is the text after the tag.
    Error { message: String, raw: String },
    Warning { raw: String },
    Success { raw: String },
    Info { raw: String },
    /// Hardware/system capability report.
    System { raw: String },
    /// Parameter-memory summary.
    VramUsage { total_mb: f64, vram_mb: f64, ram_mb: f64, raw: String },
    /// Tensor loading completed.
    ModelLoadTime { seconds: f64, raw: String },
    /// A LoRA was applied.
    LoraApplied { path: String, seconds: f64, raw: String },
    /// UCache step-skipping statistics.
    UcacheStats { skipped: u64, total: u64, speedup: f64, raw: String },
    /// Parameter dump line (`{`, `}`, or `key: value`); display-only.
    Params { key: Option<String>, value: Option<String>, raw: String },
    Debug { raw: String },
    /// Unrecognized line, shown verbatim.
    Raw { raw: String },
    /// Blank after sanitization.
    Empty,
}

impl LogEvent {
    /// The cleaned original line, when the event carries one.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Progress { raw, .. }
            | Self::BatchProgress { raw, .. }
            | Self::Seed { raw, .. }
            | Self::FileSaved { raw, .. }
            | Self::Error { raw, .. }
            | Self::Warning { raw }
            | Self::Success { raw }
            | Self::Info { raw }
            | Self::System { raw }
            | Self::VramUsage { raw, .. }
            | Self::ModelLoadTime { raw, .. }
            | Self::LoraApplied { raw, .. }
            | Self::UcacheStats { raw, .. }
            | Self::Params { raw, .. }
            | Self::Debug { raw }
            | Self::Raw { raw } => Some(raw),
            Self::Empty => None,
        }
    }
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[\[\d;]*[a-zA-Z]").unwrap());

static RE_BAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|\s*(?P<current>\d+)/(?P<total>\d+)").unwrap());
static RE_SEED: LazyLock<Regex> = LazyLock::new(|| ci(r"seed\s+(?P<seed>\d+)"));
static RE_SAVE: LazyLock<Regex> = LazyLock::new(|| ci(r#"save.*to\s+['"](?P<path>.*?)['"]"#));
static RE_BATCH: LazyLock<Regex> =
    LazyLock::new(|| ci(r"generating image:\s*(?P<current>\d+)/(?P<total>\d+)"));
static RE_VRAM: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"total params memory size = (?P<total>[\d\.]+)MB \(VRAM (?P<vram>[\d\.]+)MB, RAM (?P<ram>[\d\.]+)MB\)")
});
static RE_LOAD_TIME: LazyLock<Regex> =
    LazyLock::new(|| ci(r"loading tensors completed, taking (?P<time>[\d\.]+)s"));
static RE_LORA_APPLIED: LazyLock<Regex> =
    LazyLock::new(|| ci(r"lora '(?P<path>.*?)' applied, taking (?P<time>[\d\.]+)s"));
static RE_UCACHE: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"UCache skipped (?P<skipped>\d+)/(?P<total>\d+) steps \((?P<speedup>[\d\.]+)x estimated speedup\)")
});
static RE_LOG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[(?P<tag>INFO|DEBUG|WARN|ERROR)\s*\]").unwrap());
static RE_PARAM_KV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?P<key>[\w\.]+):\s*(?P<value>.*?),?$").unwrap());

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap()
}

enum Matcher {
    Pattern(&'static LazyLock<Regex>),
    Predicate(fn(&str) -> bool),
}

/// One classification rule: a matcher plus an event builder. Regex rules
/// receive their captures, predicate rules receive `None`.
struct Rule {
    matcher: Matcher,
    build: fn(Option<&Captures>, &str) -> LogEvent,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule { matcher: Matcher::Pattern(&RE_BAR), build: build_progress },
        Rule { matcher: Matcher::Pattern(&RE_SAVE), build: build_file_saved },
        Rule { matcher: Matcher::Pattern(&RE_BATCH), build: build_batch },
        Rule { matcher: Matcher::Pattern(&RE_SEED), build: build_seed },
        Rule { matcher: Matcher::Pattern(&RE_VRAM), build: build_vram },
        Rule { matcher: Matcher::Pattern(&RE_LOAD_TIME), build: build_load_time },
        Rule { matcher: Matcher::Pattern(&RE_LORA_APPLIED), build: build_lora_applied },
        Rule { matcher: Matcher::Pattern(&RE_UCACHE), build: build_ucache },
        Rule { matcher: Matcher::Pattern(&RE_LOG_TAG), build: build_log_tag },
        Rule { matcher: Matcher::Predicate(is_system_info), build: build_system },
        Rule { matcher: Matcher::Predicate(is_success_keyword), build: build_success },
        Rule { matcher: Matcher::Predicate(is_info_keyword), build: build_info },
        Rule { matcher: Matcher::Predicate(is_param_structure), build: build_param_structure },
        Rule { matcher: Matcher::Pattern(&RE_PARAM_KV), build: build_param_kv },
    ]
});

/// Remove ANSI escape sequences from a line.
#[must_use]
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Classify one raw stdout line. Pure; never fails - unrecognized input
/// degrades to [`LogEvent::Raw`].
#[must_use]
pub fn classify(line: &str) -> LogEvent {
    if line.is_empty() {
        return LogEvent::Empty;
    }
    let clean = strip_ansi(line);
    let clean = clean.trim();
    if clean.is_empty() {
        return LogEvent::Empty;
    }
    for rule in RULES.iter() {
        match &rule.matcher {
            Matcher::Pattern(re) => {
                if let Some(caps) = re.captures(clean) {
                    return (rule.build)(Some(&caps), clean);
                }
            }
            Matcher::Predicate(pred) => {
                if pred(clean) {
                    return (rule.build)(None, clean);
                }
            }
        }
    }
    LogEvent::Raw {
        raw: clean.to_string(),
    }
}

fn cap_u64(caps: Option<&Captures>, name: &str) -> u64 {
    caps.and_then(|c| c.name(name))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn cap_f64(caps: Option<&Captures>, name: &str) -> f64 {
    caps.and_then(|c| c.name(name))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

fn cap_str(caps: Option<&Captures>, name: &str) -> String {
    caps.and_then(|c| c.name(name))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn build_progress(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Progress {
        current: cap_u64(caps, "current"),
        total: cap_u64(caps, "total"),
        raw: line.to_string(),
    }
}

fn build_file_saved(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::FileSaved {
        path: cap_str(caps, "path"),
        raw: line.to_string(),
    }
}

// A batch header that also names the seed is reported as the seed; the
// seed is the more valuable fact on that line.
fn build_batch(caps: Option<&Captures>, line: &str) -> LogEvent {
    if let Some(seed_caps) = RE_SEED.captures(line) {
        return LogEvent::Seed {
            seed: seed_caps["seed"].to_string(),
            raw: line.to_string(),
        };
    }
    LogEvent::BatchProgress {
        current: cap_u64(caps, "current"),
        total: cap_u64(caps, "total"),
        raw: line.to_string(),
    }
}

fn build_seed(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Seed {
        seed: cap_str(caps, "seed"),
        raw: line.to_string(),
    }
}

fn build_vram(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::VramUsage {
        total_mb: cap_f64(caps, "total"),
        vram_mb: cap_f64(caps, "vram"),
        ram_mb: cap_f64(caps, "ram"),
        raw: line.to_string(),
    }
}

fn build_load_time(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::ModelLoadTime {
        seconds: cap_f64(caps, "time"),
        raw: line.to_string(),
    }
}

fn build_lora_applied(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::LoraApplied {
        path: cap_str(caps, "path"),
        seconds: cap_f64(caps, "time"),
        raw: line.to_string(),
    }
}

fn build_ucache(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::UcacheStats {
        skipped: cap_u64(caps, "skipped"),
        total: cap_u64(caps, "total"),
        speedup: cap_f64(caps, "speedup"),
        raw: line.to_string(),
    }
}

fn build_log_tag(caps: Option<&Captures>, line: &str) -> LogEvent {
    let raw = line.to_string();
    let Some(caps) = caps else {
        return LogEvent::Info { raw };
    };
    let tag_end = caps.get(0).map_or(0, |m| m.end());
    match caps.name("tag").map(|m| m.as_str()) {
        Some("DEBUG") => LogEvent::Debug { raw },
        Some("WARN") => LogEvent::Warning { raw },
        Some("ERROR") => LogEvent::Error {
            message: line[tag_end..].trim().to_string(),
            raw,
        },
        _ => {
            let upper = line.to_uppercase();
            if upper.contains("COMPLETED") || upper.contains("DONE IN") {
                LogEvent::Success { raw }
            } else {
                LogEvent::Info { raw }
            }
        }
    }
}

fn is_system_info(line: &str) -> bool {
    let upper = line.to_uppercase();
    upper.contains("SYSTEM INFO") || upper.contains("AVX =") || upper.contains("VULKAN DEVICES")
}

fn is_success_keyword(line: &str) -> bool {
    let upper = line.to_uppercase();
    ["COMPLETED", "DONE IN", "TAKING"]
        .iter()
        .any(|kw| upper.contains(kw))
}

fn is_info_keyword(line: &str) -> bool {
    let upper = line.to_uppercase();
    ["USING", "LOAD", "INIT", "BACKEND", "VRAM", "INFO"]
        .iter()
        .any(|kw| upper.contains(kw))
}

fn is_param_structure(line: &str) -> bool {
    line.ends_with('{') || line == "}"
}

fn build_system(_caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::System {
        raw: line.to_string(),
    }
}

fn build_success(_caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Success {
        raw: line.to_string(),
    }
}

fn build_info(_caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Info {
        raw: line.to_string(),
    }
}

fn build_param_structure(_caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Params {
        key: None,
        value: None,
        raw: line.to_string(),
    }
}

fn build_param_kv(caps: Option<&Captures>, line: &str) -> LogEvent {
    LogEvent::Params {
        key: caps.and_then(|c| c.name("key")).map(|m| m.as_str().to_string()),
        value: caps
            .and_then(|c| c.name("value"))
            .map(|m| m.as_str().to_string()),
        raw: line.to_string(),
    }
}
