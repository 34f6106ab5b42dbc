//! Observability for mail dispatch.
//!
//! Provides dispatch counters, a timer and a per-dispatch context used for
//! structured log fields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use serde::Serialize;

use crate::errors::ErrorCategory;

/// Dispatch metrics collector.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Dispatches started.
    pub dispatches: AtomicU64,
    /// Messages accepted by the transport.
    pub sent: AtomicU64,
    /// Dispatches that failed for any reason.
    pub failed: AtomicU64,
    /// Failures while parsing input.
    pub parse_failures: AtomicU64,
    /// Failures while assembling the message.
    pub assembly_failures: AtomicU64,
    /// Failures while resolving configuration.
    pub config_failures: AtomicU64,
    /// Failures reported by the transport.
    pub transport_failures: AtomicU64,
    /// Envelope recipients of sent messages.
    pub recipients: AtomicU64,
    /// Attachments of sent messages.
    pub attachments: AtomicU64,
}

impl DispatchMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a dispatch.
    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful send.
    pub fn record_sent(&self, recipients: usize, attachments: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.recipients.fetch_add(recipients as u64, Ordering::Relaxed);
        self.attachments.fetch_add(attachments as u64, Ordering::Relaxed);
    }

    /// Records a failed dispatch.
    pub fn record_failure(&self, category: ErrorCategory) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let counter = match category {
            ErrorCategory::Parse => &self.parse_failures,
            ErrorCategory::Assembly => &self.assembly_failures,
            ErrorCategory::Config => &self.config_failures,
            ErrorCategory::Transport => &self.transport_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            assembly_failures: self.assembly_failures.load(Ordering::Relaxed),
            config_failures: self.config_failures.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            recipients: self.recipients.load(Ordering::Relaxed),
            attachments: self.attachments.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.dispatches,
            &self.sent,
            &self.failed,
            &self.parse_failures,
            &self.assembly_failures,
            &self.config_failures,
            &self.transport_failures,
            &self.recipients,
            &self.attachments,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Dispatches started.
    pub dispatches: u64,
    /// Messages accepted by the transport.
    pub sent: u64,
    /// Dispatches that failed.
    pub failed: u64,
    /// Parse failures.
    pub parse_failures: u64,
    /// Assembly failures.
    pub assembly_failures: u64,
    /// Configuration failures.
    pub config_failures: u64,
    /// Transport failures.
    pub transport_failures: u64,
    /// Envelope recipients of sent messages.
    pub recipients: u64,
    /// Attachments of sent messages.
    pub attachments: u64,
}

impl MetricsSnapshot {
    /// Returns the send success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.sent + self.failed;
        if total == 0 {
            1.0
        } else {
            self.sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the timer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = %self.name(),
            duration_ms = elapsed.as_millis(),
            "Timer stopped"
        );

        elapsed
    }
}

/// Identifies one dispatch in log output.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchContext {
    /// Unique dispatch ID.
    pub dispatch_id: String,
    /// SMTP host, once configured.
    pub host: Option<String>,
    /// Envelope recipient count, once built.
    pub recipient_count: usize,
    /// Attachment count, once built.
    pub attachment_count: usize,
}

impl DispatchContext {
    /// Creates a context with a fresh dispatch ID.
    pub fn new() -> Self {
        Self {
            dispatch_id: uuid::Uuid::new_v4().to_string(),
            host: None,
            recipient_count: 0,
            attachment_count: 0,
        }
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the message counts.
    pub fn with_message(mut self, recipients: usize, attachments: usize) -> Self {
        self.recipient_count = recipients;
        self.attachment_count = attachments;
        self
    }
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}
