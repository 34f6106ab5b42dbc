//! Spam scoring of assembled messages.
//!
//! Scoring itself is delegated to a [`SpamScorer`] (typically a spamd client
//! owned by the host). This module only renders the digest a scorer reads and
//! interprets the result.

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::DispatchResult;
use crate::types::MessageSpec;

/// Score at or above which a message is considered spam, unless the scorer
/// reports its own threshold.
pub const DEFAULT_THRESHOLD: f32 = 5.0;

/// Outcome of scoring a message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpamReport {
    /// Score reported by the scorer.
    pub score: f32,
    /// Threshold the score was compared with.
    pub threshold: f32,
    /// True when `score >= threshold`.
    pub is_spam: bool,
}

impl SpamReport {
    /// Creates a report, deriving `is_spam` from the score and threshold.
    pub fn new(score: f32, threshold: f32) -> Self {
        Self {
            score,
            threshold,
            is_spam: score >= threshold,
        }
    }

    /// Creates a report against [`DEFAULT_THRESHOLD`].
    pub fn with_default_threshold(score: f32) -> Self {
        Self::new(score, DEFAULT_THRESHOLD)
    }
}

/// Scores a rendered message digest.
#[async_trait]
pub trait SpamScorer: Send + Sync {
    /// Scores `digest`, as produced by [`scoring_digest`].
    async fn score(&self, digest: &str) -> DispatchResult<SpamReport>;
}

/// Renders the header and body digest handed to a scorer.
///
/// Only the fields that influence content scoring are included: sender,
/// subject, primary recipients, content type, custom headers and body.
pub fn scoring_digest(spec: &MessageSpec) -> String {
    let recipients = spec
        .to
        .iter()
        .map(|a| a.to_header())
        .collect::<Vec<_>>()
        .join(", ");

    let mut digest = String::new();
    digest.push_str(&format!("From: {}\n", strip_newlines(&spec.from.to_header())));
    digest.push_str(&format!("Subject: {}\n", strip_newlines(&spec.subject)));
    digest.push_str(&format!("To: {}\n", strip_newlines(&recipients)));

    if spec.content_type.is_html() {
        digest.push_str("Content-Type: text/html\n");
    }
    digest.push_str(&format!("X-Content-Type: {}\n", spec.content_type.mime_type()));

    for (name, value) in &spec.custom_headers {
        digest.push_str(&format!("{}: {}\n", name, value));
    }

    let body = spec.body_html.as_deref().unwrap_or(&spec.body_plain);
    digest.push_str(&format!("Message Body: {}\n", body));
    digest
}

/// Scores an assembled message.
pub async fn check(scorer: &dyn SpamScorer, spec: &MessageSpec) -> DispatchResult<SpamReport> {
    let report = scorer.score(&scoring_digest(spec)).await?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        score = report.score,
        threshold = report.threshold,
        is_spam = report.is_spam,
        "Message scored"
    );

    Ok(report)
}

fn strip_newlines(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}
