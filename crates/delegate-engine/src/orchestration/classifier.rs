//! Failure classification.
//!
//! Failures are classified by case-insensitive phrase matching over the
//! captured error text. Kinds are checked in a fixed precedence order, so
//! text matching several kinds resolves to the earliest one.

use std::fmt;

use regex::{RegexSet, RegexSetBuilder};
use serde::Serialize;
use tracing::warn;

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserInterrupted,
    ProviderNotSupported,
    UnknownModel,
    RateLimited,
    TransientTransport,
    GenericFailure,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInterrupted => "user_interrupted",
            Self::ProviderNotSupported => "provider_not_supported",
            Self::UnknownModel => "unknown_model",
            Self::RateLimited => "rate_limited",
            Self::TransientTransport => "transient_transport",
            Self::GenericFailure => "generic_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps failure text to a [`FailureKind`].
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, text: &str) -> FailureKind;
}

const USER_INTERRUPTED: &[&str] = &[
    "interrupted by user",
    "user interrupted",
    "cancelled by user",
    "canceled by user",
    "aborted by user",
];

const PROVIDER_NOT_SUPPORTED: &[&str] = &[
    "provider not supported",
    "provider is not supported",
    "unsupported provider",
    "not supported by provider",
    "no provider configured",
];

const UNKNOWN_MODEL: &[&str] = &[
    "unknown model",
    "model not found",
    "no such model",
    "invalid model",
    "model does not exist",
    "model_not_found",
];

const RATE_LIMITED: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "429",
    "quota exceeded",
    "overloaded",
];

const TRANSIENT_TRANSPORT: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "econnreset",
    "econnrefused",
    "etimedout",
    "timed out",
    "socket hang up",
    "network error",
    "broken pipe",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "temporarily unavailable",
    "502",
    "503",
    "504",
];

/// Precedence order; the first matching kind wins.
const PRECEDENCE: [FailureKind; 5] = [
    FailureKind::UserInterrupted,
    FailureKind::ProviderNotSupported,
    FailureKind::UnknownModel,
    FailureKind::RateLimited,
    FailureKind::TransientTransport,
];

struct PhraseTable {
    kind: FailureKind,
    phrases: Vec<String>,
    set: RegexSet,
}

impl PhraseTable {
    fn new(kind: FailureKind, phrases: Vec<String>) -> Self {
        let set = compile(&phrases);
        Self { kind, phrases, set }
    }
}

/// Status codes only match as whole numbers, so "429" misses "14290ms".
fn phrase_pattern(phrase: &str) -> String {
    let escaped = regex::escape(phrase);
    if !phrase.is_empty() && phrase.bytes().all(|b| b.is_ascii_digit()) {
        format!(r"\b{escaped}\b")
    } else {
        escaped
    }
}

fn compile(phrases: &[String]) -> RegexSet {
    RegexSetBuilder::new(phrases.iter().map(|p| phrase_pattern(p)))
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compile failure phrases");
            RegexSet::empty()
        })
}

/// Phrase-based classifier with an extensible phrase list per kind.
pub struct PhraseClassifier {
    tables: Vec<PhraseTable>,
}

impl PhraseClassifier {
    pub fn new() -> Self {
        let tables = PRECEDENCE
            .iter()
            .map(|&kind| {
                let phrases = default_phrases(kind)
                    .iter()
                    .map(|p| (*p).to_string())
                    .collect();
                PhraseTable::new(kind, phrases)
            })
            .collect();
        Self { tables }
    }

    /// Add phrases for `kind`. Phrases are matched literally.
    #[must_use]
    pub fn with_phrases<I, S>(mut self, kind: FailureKind, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(table) = self.tables.iter_mut().find(|t| t.kind == kind) {
            let mut all = std::mem::take(&mut table.phrases);
            all.extend(phrases.into_iter().map(Into::into));
            *table = PhraseTable::new(kind, all);
        }
        self
    }
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureClassifier for PhraseClassifier {
    fn classify(&self, text: &str) -> FailureKind {
        self.tables
            .iter()
            .find(|t| t.set.is_match(text))
            .map_or(FailureKind::GenericFailure, |t| t.kind)
    }
}

const fn default_phrases(kind: FailureKind) -> &'static [&'static str] {
    match kind {
        FailureKind::UserInterrupted => USER_INTERRUPTED,
        FailureKind::ProviderNotSupported => PROVIDER_NOT_SUPPORTED,
        FailureKind::UnknownModel => UNKNOWN_MODEL,
        FailureKind::RateLimited => RATE_LIMITED,
        FailureKind::TransientTransport => TRANSIENT_TRANSPORT,
        FailureKind::GenericFailure => &[],
    }
}
