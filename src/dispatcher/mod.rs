//! Dispatch orchestration.
//!
//! [`MailDispatcher`] is the entry point a host calls in place of its generic
//! "send mail" function. Every send walks the same sequence:
//!
//! `Init → Configuring → Building → Sending → {Sent | Failed}`
//!
//! Nothing is retried. A failure at any stage is caught here, handed to the
//! failure hooks and returned as a [`FailurePayload`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::builder::MessageBuilder;
use crate::config::{configure, TransportSettings};
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::hooks::Hooks;
use crate::observability::{DispatchContext, DispatchMetrics, MetricsSnapshot, Timer};
use crate::site::{SiteInfo, StaticSiteInfo};
use crate::spam::{self, SpamReport, SpamScorer};
use crate::transport::{SmtpTransportFactory, TransportFactory};
use crate::types::{
    BatchSendResult, DispatchState, FailurePayload, MessageSpec, SendReceipt, SendRequest,
    SendResult,
};

/// Sends mail through a freshly configured transport per request.
pub struct MailDispatcher {
    /// Transport settings, resolved on every send.
    settings: Arc<TransportSettings>,
    /// Transport factory.
    factory: Arc<dyn TransportFactory>,
    /// Site information for sender defaults.
    site: Arc<dyn SiteInfo>,
    /// Registered hooks.
    hooks: Arc<Hooks>,
    /// Optional spam scorer.
    spam_scorer: Option<Arc<dyn SpamScorer>>,
    /// Metrics collector.
    metrics: Arc<DispatchMetrics>,
}

/// What a successful dispatch produced.
struct Delivered {
    message_id: Option<String>,
    recipients: usize,
    attachments: usize,
}

impl MailDispatcher {
    /// Creates a dispatcher sending over SMTP with the given settings.
    pub fn new(settings: TransportSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    /// Creates a builder for the dispatcher.
    pub fn builder() -> MailDispatcherBuilder {
        MailDispatcherBuilder::default()
    }

    /// Sends one message.
    ///
    /// Never panics on bad input: every failure comes back as `Err` after the
    /// failure hooks have seen it.
    pub async fn send(&self, request: SendRequest) -> SendResult {
        let timer = Timer::start("dispatch");
        let original = request.clone();
        let mut context = DispatchContext::new();
        let mut stage = DispatchState::Init;

        self.metrics.record_dispatch();

        #[cfg(feature = "tracing")]
        tracing::debug!(dispatch_id = %context.dispatch_id, "Dispatch started");

        match self.dispatch(request, &mut stage, &mut context).await {
            Ok(delivered) => {
                self.metrics
                    .record_sent(delivered.recipients, delivered.attachments);

                #[cfg(feature = "tracing")]
                tracing::info!(
                    dispatch_id = %context.dispatch_id,
                    host = context.host.as_deref().unwrap_or_default(),
                    recipients = delivered.recipients,
                    message_id = delivered.message_id.as_deref().unwrap_or_default(),
                    "Message sent"
                );

                Ok(SendReceipt {
                    message_id: delivered.message_id,
                    recipients: delivered.recipients,
                    duration: timer.stop(),
                })
            }
            Err(error) => Err(self.fail(error, stage, original, &context)),
        }
    }

    /// Sends one message, reporting only whether it went out.
    pub async fn send_legacy(&self, request: SendRequest) -> bool {
        self.send(request).await.is_ok()
    }

    /// Sends several messages one after another.
    pub async fn send_batch(&self, requests: Vec<SendRequest>) -> BatchSendResult {
        let start = Instant::now();
        let total = requests.len();
        let mut results = Vec::with_capacity(total);
        let mut succeeded = 0;
        let mut failed = 0;

        for request in requests {
            let result = self.send(request).await;
            if result.is_ok() {
                succeeded += 1;
            } else {
                failed += 1;
            }
            results.push(result);
        }

        BatchSendResult {
            results,
            total,
            succeeded,
            failed,
            duration: start.elapsed(),
        }
    }

    /// Assembles the message a request would produce, without sending it.
    pub fn preview(&self, request: &SendRequest) -> DispatchResult<MessageSpec> {
        let request = self.hooks.apply_request(request.clone());
        MessageBuilder::new(self.site.as_ref(), &self.hooks).build(&request)
    }

    /// Scores the message a request would produce.
    ///
    /// Returns `None` when no scorer is configured.
    pub async fn spam_report(&self, request: &SendRequest) -> DispatchResult<Option<SpamReport>> {
        let Some(scorer) = &self.spam_scorer else {
            return Ok(None);
        };
        let spec = self.preview(request)?;
        spam::check(scorer.as_ref(), &spec).await.map(Some)
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Returns a metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the transport settings.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    async fn dispatch(
        &self,
        request: SendRequest,
        stage: &mut DispatchState,
        context: &mut DispatchContext,
    ) -> DispatchResult<Delivered> {
        let request = self.hooks.apply_request(request);

        *stage = DispatchState::Configuring;
        let config = configure(&self.settings)?;
        context.host = Some(config.host.clone());
        let mut transport = self.factory.create(&config)?;

        *stage = DispatchState::Building;
        let spec = MessageBuilder::new(self.site.as_ref(), &self.hooks).build(&request)?;
        context.recipient_count = spec.recipient_count();
        context.attachment_count = spec.attachments.len();
        spec.bind(transport.as_mut()).await?;

        *stage = DispatchState::Sending;
        self.hooks.run_pre_send(transport.as_mut()).await?;

        if !transport.send().await? {
            return Err(DispatchError::new(
                DispatchErrorKind::SendRejected,
                "Transport declined the message",
            ));
        }

        *stage = DispatchState::Sent;
        Ok(Delivered {
            message_id: transport.message_id(),
            recipients: context.recipient_count,
            attachments: context.attachment_count,
        })
    }

    fn fail(
        &self,
        error: DispatchError,
        stage: DispatchState,
        request: SendRequest,
        context: &DispatchContext,
    ) -> FailurePayload {
        self.metrics.record_failure(error.category());

        if self.settings.global_debug {
            #[cfg(feature = "tracing")]
            tracing::error!(
                dispatch_id = %context.dispatch_id,
                host = context.host.as_deref().unwrap_or_default(),
                stage = %stage,
                kind = %error.kind(),
                code = error.transport_code(),
                error = ?error,
                "Mail dispatch failed"
            );
        }
        #[cfg(not(feature = "tracing"))]
        let _ = context;

        let payload = FailurePayload {
            error,
            stage,
            request,
        };
        self.hooks.notify_failure(&payload);
        payload
    }
}

impl fmt::Debug for MailDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailDispatcher")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks)
            .field("spam_scorer", &self.spam_scorer.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`MailDispatcher`].
#[derive(Default)]
pub struct MailDispatcherBuilder {
    settings: Option<TransportSettings>,
    factory: Option<Arc<dyn TransportFactory>>,
    site: Option<Arc<dyn SiteInfo>>,
    hooks: Option<Hooks>,
    spam_scorer: Option<Arc<dyn SpamScorer>>,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl MailDispatcherBuilder {
    /// Sets the transport settings.
    pub fn settings(mut self, settings: TransportSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the transport factory. Defaults to SMTP.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the site information.
    pub fn site(mut self, site: Arc<dyn SiteInfo>) -> Self {
        self.site = Some(site);
        self
    }

    /// Sets the hooks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Sets the spam scorer.
    pub fn spam_scorer(mut self, scorer: Arc<dyn SpamScorer>) -> Self {
        self.spam_scorer = Some(scorer);
        self
    }

    /// Shares a metrics collector.
    pub fn metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the dispatcher.
    pub fn build(self) -> MailDispatcher {
        MailDispatcher {
            settings: Arc::new(self.settings.unwrap_or_default()),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(SmtpTransportFactory::new())),
            site: self
                .site
                .unwrap_or_else(|| Arc::new(StaticSiteInfo::default())),
            hooks: Arc::new(self.hooks.unwrap_or_default()),
            spam_scorer: self.spam_scorer,
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}
