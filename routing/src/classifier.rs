//! Task Classifier: complexity and capability requirements from text alone
//!
//! No model is consulted. The score starts at a neutral 0.5 and each
//! signal nudges it up or down:
//!
//! | Signal | Effect |
//! |--------|--------|
//! | Very short prompt (< 20 tokens) | −0.25 |
//! | Long prompt (> `long_prompt_tokens`) | +0.20 |
//! | Fenced code block | +0.15 |
//! | Multi-step instructions (≥ 3 list items or sequencing words) | +0.15 |
//! | Reasoning keywords | +0.05 each, max +0.15 |
//! | Lightweight-task keywords | −0.05 each, max −0.15 |
//!
//! The sum is clamped to [0, 1]. Classification is a pure function of the
//! task, so a retried task routes the same way.

use crate::config::ClassifierConfig;
use crate::profile::ComplexityBucket;
use crate::task::{Capability, Task};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

const NEUTRAL_COMPLEXITY: f64 = 0.5;
const SHORT_PROMPT_TOKENS: u64 = 20;

static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*])\s+\S").expect("LIST_ITEM_RE regex should compile")
});

static SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:first|then|next|after that|finally)\b")
        .expect("SEQUENCE_RE regex should compile")
});

static VISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:image|images|photo|photos|picture|screenshot|diagram)\b")
        .expect("VISION_RE regex should compile")
});

static TOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:tool call|function call|call the \w+ tool|use the \w+ tool)\b")
        .expect("TOOL_RE regex should compile")
});

static JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bjson\b").expect("JSON_RE regex should compile"));

const REASONING_KEYWORDS: &[&str] = &[
    "prove",
    "analyze",
    "analyse",
    "architecture",
    "optimize",
    "debug",
    "refactor",
    "concurrency",
    "derive",
    "trade-off",
    "algorithm",
];

const LIGHTWEIGHT_KEYWORDS: &[&str] = &[
    "translate",
    "summarize",
    "summarise",
    "rephrase",
    "define",
    "spell",
    "hello",
];

/// Per-signal contributions, kept for logging and debugging routing decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub length: f64,
    pub code_blocks: f64,
    pub multi_step: f64,
    pub reasoning_terms: f64,
    pub lightweight_terms: f64,
}

impl SignalBreakdown {
    pub fn total(&self) -> f64 {
        self.length + self.code_blocks + self.multi_step + self.reasoning_terms
            + self.lightweight_terms
    }
}

/// Classifier output for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Complexity in [0, 1]
    pub complexity: f64,
    pub bucket: ComplexityBucket,
    /// Declared capabilities plus any inferred from the text
    pub required_capabilities: BTreeSet<Capability>,
    pub signals: SignalBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct TaskClassifier {
    config: ClassifierConfig,
}

impl TaskClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a task. Never fails.
    pub fn classify(&self, task: &Task) -> Classification {
        let signals = self.signals(&task.description, task.estimated_input_size);
        let complexity = (NEUTRAL_COMPLEXITY + signals.total()).clamp(0.0, 1.0);

        let mut required_capabilities = task.required_capabilities.clone();
        required_capabilities.extend(self.inferred_capabilities(task));

        Classification {
            complexity,
            bucket: ComplexityBucket::from_complexity(complexity),
            required_capabilities,
            signals,
        }
    }

    fn signals(&self, text: &str, tokens: u64) -> SignalBreakdown {
        if text.trim().is_empty() {
            return SignalBreakdown::default();
        }

        let lower = text.to_lowercase();

        let length = if tokens < SHORT_PROMPT_TOKENS {
            -0.25
        } else if tokens > self.config.long_prompt_tokens {
            0.2
        } else {
            0.0
        };

        let code_blocks = if text.contains("```") { 0.15 } else { 0.0 };

        let list_items = LIST_ITEM_RE.find_iter(text).count();
        let sequence_words = SEQUENCE_RE.find_iter(text).count();
        let multi_step = if list_items >= 3 || sequence_words >= 2 {
            0.15
        } else {
            0.0
        };

        let reasoning_hits = REASONING_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        let lightweight_hits = LIGHTWEIGHT_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();

        SignalBreakdown {
            length,
            code_blocks,
            multi_step,
            reasoning_terms: (reasoning_hits as f64 * 0.05).min(0.15),
            lightweight_terms: -(lightweight_hits as f64 * 0.05).min(0.15),
        }
    }

    fn inferred_capabilities(&self, task: &Task) -> Vec<Capability> {
        let text = &task.description;
        let mut caps = Vec::new();
        if VISION_RE.is_match(text) {
            caps.push(Capability::Vision);
        }
        if TOOL_RE.is_match(text) {
            caps.push(Capability::ToolUse);
        }
        if JSON_RE.is_match(text) {
            caps.push(Capability::JsonMode);
        }
        if task.estimated_input_size > self.config.long_context_tokens {
            caps.push(Capability::LongContext);
        }
        caps
    }
}
