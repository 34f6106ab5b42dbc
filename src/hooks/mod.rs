//! Extension points around a dispatch.
//!
//! Hosts customize a send by registering callbacks on a [`Hooks`] value that
//! is handed to the dispatcher at construction. Each extension point holds an
//! ordered list; filters are chained so that the output of one is the input
//! of the next, and the last one wins.

use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::transport::MailTransport;
use crate::types::{FailurePayload, SendRequest};

/// Rewrites a request before anything else looks at it.
pub type RequestFilter = Arc<dyn Fn(SendRequest) -> SendRequest + Send + Sync>;

/// Rewrites a single resolved string value.
pub type ValueFilter = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Observes a failed dispatch.
pub type FailureHook = Arc<dyn Fn(&FailurePayload) + Send + Sync>;

/// Last-chance access to the bound transport before it sends.
#[async_trait]
pub trait PreSendHook: Send + Sync {
    /// Inspects or mutates the transport. An error fails the dispatch.
    async fn before_send(&self, transport: &mut dyn MailTransport) -> DispatchResult<()>;
}

/// Registered callbacks for every extension point.
#[derive(Clone, Default)]
pub struct Hooks {
    request_filters: Vec<RequestFilter>,
    from_filters: Vec<ValueFilter>,
    from_name_filters: Vec<ValueFilter>,
    content_type_filters: Vec<ValueFilter>,
    charset_filters: Vec<ValueFilter>,
    pre_send: Vec<Arc<dyn PreSendHook>>,
    on_failure: Vec<FailureHook>,
}

impl Hooks {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request filter.
    pub fn filter_request<F>(mut self, filter: F) -> Self
    where
        F: Fn(SendRequest) -> SendRequest + Send + Sync + 'static,
    {
        self.request_filters.push(Arc::new(filter));
        self
    }

    /// Registers a sender address filter.
    pub fn filter_from<F>(mut self, filter: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.from_filters.push(Arc::new(filter));
        self
    }

    /// Registers a sender name filter.
    pub fn filter_from_name<F>(mut self, filter: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.from_name_filters.push(Arc::new(filter));
        self
    }

    /// Registers a content type filter, applied to the MIME type string.
    pub fn filter_content_type<F>(mut self, filter: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.content_type_filters.push(Arc::new(filter));
        self
    }

    /// Registers a charset filter.
    pub fn filter_charset<F>(mut self, filter: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.charset_filters.push(Arc::new(filter));
        self
    }

    /// Registers a pre-send hook.
    pub fn before_send(mut self, hook: impl PreSendHook + 'static) -> Self {
        self.pre_send.push(Arc::new(hook));
        self
    }

    /// Registers a failure hook.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FailurePayload) + Send + Sync + 'static,
    {
        self.on_failure.push(Arc::new(hook));
        self
    }

    /// Runs the request filters.
    pub fn apply_request(&self, request: SendRequest) -> SendRequest {
        self.request_filters.iter().fold(request, |req, f| f(req))
    }

    /// Runs the sender address filters.
    pub fn apply_from(&self, value: String) -> String {
        chain(&self.from_filters, value)
    }

    /// Runs the sender name filters.
    pub fn apply_from_name(&self, value: String) -> String {
        chain(&self.from_name_filters, value)
    }

    /// Runs the content type filters.
    pub fn apply_content_type(&self, value: String) -> String {
        chain(&self.content_type_filters, value)
    }

    /// Runs the charset filters.
    pub fn apply_charset(&self, value: String) -> String {
        chain(&self.charset_filters, value)
    }

    /// Runs the pre-send hooks in registration order, stopping at the first error.
    pub async fn run_pre_send(&self, transport: &mut dyn MailTransport) -> DispatchResult<()> {
        for hook in &self.pre_send {
            hook.before_send(transport).await?;
        }
        Ok(())
    }

    /// Notifies every failure hook.
    pub fn notify_failure(&self, payload: &FailurePayload) {
        for hook in &self.on_failure {
            hook(payload);
        }
    }
}

fn chain(filters: &[ValueFilter], value: String) -> String {
    filters.iter().fold(value, |v, f| f(v))
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("request_filters", &self.request_filters.len())
            .field("from_filters", &self.from_filters.len())
            .field("from_name_filters", &self.from_name_filters.len())
            .field("content_type_filters", &self.content_type_filters.len())
            .field("charset_filters", &self.charset_filters.len())
            .field("pre_send", &self.pre_send.len())
            .field("on_failure", &self.on_failure.len())
            .finish()
    }
}
