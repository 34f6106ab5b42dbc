//! Mock implementations for testing.
//!
//! Provides recording collaborators for London-School TDD: a transport that
//! records every call made on it, a factory handing out that transport, site
//! information that counts lookups, and in-memory attachment and spam
//! collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{TransportConfig, TransportSettings};
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::site::SiteInfo;
use crate::spam::{SpamReport, SpamScorer};
use crate::transport::{AttachmentLoader, MailTransport, TransportFactory};
use crate::types::{Address, AttachmentRef, ContentType, RecipientKind, SendRequest};

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `add_recipient`.
    AddRecipient(RecipientKind, Address),
    /// `set_from`.
    SetFrom(Address),
    /// `add_reply_to`.
    AddReplyTo(Address),
    /// `set_subject`.
    SetSubject(String),
    /// `set_body`.
    SetBody {
        /// HTML body.
        html: String,
        /// Plain-text alternative.
        alternative: String,
    },
    /// `set_plain_body`.
    SetPlainBody(String),
    /// `set_content_type`.
    SetContentType(ContentType, String),
    /// `add_custom_header`.
    AddCustomHeader(String, String),
    /// `add_attachment`.
    AddAttachment(AttachmentRef),
    /// `send`.
    Send,
}

/// What the next `send` does.
#[derive(Debug, Clone, Default)]
enum SendOutcome {
    #[default]
    Accept,
    Reject,
    Fail {
        message: String,
        code: Option<u16>,
    },
}

/// Mock mail transport for testing.
///
/// Clones share their recorded state, so a test can keep a handle while the
/// dispatcher owns the boxed transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// Recorded calls.
    calls: Arc<Mutex<Vec<TransportCall>>>,
    /// Outcome of `send`.
    outcome: Arc<Mutex<SendOutcome>>,
    /// Message ID reported after a successful send.
    message_id: Arc<Mutex<Option<String>>>,
}

impl MockTransport {
    /// Creates a new mock transport that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `send` return `Ok(false)`.
    pub fn reject(&self) -> &Self {
        *self.outcome.lock().unwrap() = SendOutcome::Reject;
        self
    }

    /// Makes `send` fail with a transport error.
    pub fn fail_with(&self, message: &str, code: Option<u16>) -> &Self {
        *self.outcome.lock().unwrap() = SendOutcome::Fail {
            message: message.to_string(),
            code,
        };
        self
    }

    /// Returns recorded calls.
    pub fn recorded_calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the recipients recorded for `kind`.
    pub fn recipients(&self, kind: RecipientKind) -> Vec<Address> {
        self.recorded_calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddRecipient(k, address) if k == kind => Some(address),
                _ => None,
            })
            .collect()
    }

    /// Returns the sender, if one was set.
    pub fn from(&self) -> Option<Address> {
        self.recorded_calls().into_iter().rev().find_map(|call| match call {
            TransportCall::SetFrom(address) => Some(address),
            _ => None,
        })
    }

    /// Returns the subject, if one was set.
    pub fn subject(&self) -> Option<String> {
        self.recorded_calls().into_iter().rev().find_map(|call| match call {
            TransportCall::SetSubject(subject) => Some(subject),
            _ => None,
        })
    }

    /// Returns the custom headers in the order they were added.
    pub fn custom_headers(&self) -> Vec<(String, String)> {
        self.recorded_calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddCustomHeader(name, value) => Some((name, value)),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of `send` calls.
    pub fn send_count(&self) -> usize {
        self.recorded_calls()
            .iter()
            .filter(|call| **call == TransportCall::Send)
            .count()
    }

    /// Clears recorded calls and restores the accepting outcome.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        *self.outcome.lock().unwrap() = SendOutcome::Accept;
        *self.message_id.lock().unwrap() = None;
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn add_recipient(
        &mut self,
        kind: RecipientKind,
        address: &Address,
    ) -> DispatchResult<()> {
        self.record(TransportCall::AddRecipient(kind, address.clone()));
        Ok(())
    }

    async fn set_from(&mut self, address: &Address) -> DispatchResult<()> {
        self.record(TransportCall::SetFrom(address.clone()));
        Ok(())
    }

    async fn add_reply_to(&mut self, address: &Address) -> DispatchResult<()> {
        self.record(TransportCall::AddReplyTo(address.clone()));
        Ok(())
    }

    async fn set_subject(&mut self, subject: &str) -> DispatchResult<()> {
        self.record(TransportCall::SetSubject(subject.to_string()));
        Ok(())
    }

    async fn set_body(&mut self, html: &str, alternative: &str) -> DispatchResult<()> {
        self.record(TransportCall::SetBody {
            html: html.to_string(),
            alternative: alternative.to_string(),
        });
        Ok(())
    }

    async fn set_plain_body(&mut self, text: &str) -> DispatchResult<()> {
        self.record(TransportCall::SetPlainBody(text.to_string()));
        Ok(())
    }

    async fn set_content_type(
        &mut self,
        content_type: &ContentType,
        charset: &str,
    ) -> DispatchResult<()> {
        self.record(TransportCall::SetContentType(content_type.clone(), charset.to_string()));
        Ok(())
    }

    async fn add_custom_header(&mut self, name: &str, value: &str) -> DispatchResult<()> {
        self.record(TransportCall::AddCustomHeader(name.to_string(), value.to_string()));
        Ok(())
    }

    async fn add_attachment(&mut self, attachment: &AttachmentRef) -> DispatchResult<()> {
        self.record(TransportCall::AddAttachment(attachment.clone()));
        Ok(())
    }

    async fn send(&mut self) -> DispatchResult<bool> {
        self.record(TransportCall::Send);

        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            SendOutcome::Accept => {
                *self.message_id.lock().unwrap() = Some(format!("{}@mock", uuid::Uuid::new_v4()));
                Ok(true)
            }
            SendOutcome::Reject => Ok(false),
            SendOutcome::Fail { message, code } => {
                let mut error = DispatchError::transport(message);
                if let Some(code) = code {
                    error = error.with_transport_code(code);
                }
                Err(error)
            }
        }
    }

    fn message_id(&self) -> Option<String> {
        self.message_id.lock().unwrap().clone()
    }
}

/// Factory handing out clones of one [`MockTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    transport: MockTransport,
    configs: Arc<Mutex<Vec<TransportConfig>>>,
    fail_create: Arc<Mutex<Option<String>>>,
}

impl MockTransportFactory {
    /// Creates a factory with a fresh accepting transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory around an existing transport handle.
    pub fn with_transport(transport: MockTransport) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Returns the shared transport handle.
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    /// Makes `create` fail with a transport error.
    pub fn fail_create_with(&self, message: &str) -> &Self {
        *self.fail_create.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Returns every configuration `create` was called with.
    pub fn configs(&self) -> Vec<TransportConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &TransportConfig) -> DispatchResult<Box<dyn MailTransport>> {
        self.configs.lock().unwrap().push(config.clone());
        if let Some(message) = self.fail_create.lock().unwrap().clone() {
            return Err(DispatchError::transport(message));
        }
        Ok(Box::new(self.transport.clone()))
    }
}

/// Site information that counts admin address lookups.
#[derive(Debug, Default)]
pub struct MockSiteInfo {
    admin_email: Option<String>,
    name: Option<String>,
    home_url: Option<String>,
    admin_lookups: AtomicUsize,
}

impl MockSiteInfo {
    /// Creates site information for `https://www.example.com/`.
    pub fn new() -> Self {
        Self {
            admin_email: Some("admin@example.com".to_string()),
            name: Some("Example Site".to_string()),
            home_url: Some("https://www.example.com/".to_string()),
            admin_lookups: AtomicUsize::new(0),
        }
    }

    /// Removes the admin address.
    pub fn without_admin(mut self) -> Self {
        self.admin_email = None;
        self
    }

    /// Returns how often the admin address was looked up.
    pub fn admin_lookups(&self) -> usize {
        self.admin_lookups.load(Ordering::SeqCst)
    }
}

impl SiteInfo for MockSiteInfo {
    fn admin_email(&self) -> Option<String> {
        self.admin_lookups.fetch_add(1, Ordering::SeqCst);
        self.admin_email.clone()
    }

    fn site_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn home_url(&self) -> Option<String> {
        self.home_url.clone()
    }
}

/// In-memory attachment loader.
#[derive(Debug, Clone, Default)]
pub struct MockAttachmentLoader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MockAttachmentLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    pub fn with_file(mut self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }
}

#[async_trait]
impl AttachmentLoader for MockAttachmentLoader {
    async fn load(&self, attachment: &AttachmentRef) -> io::Result<Vec<u8>> {
        self.files.get(&attachment.source).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", attachment.source.display()),
            )
        })
    }
}

/// Spam scorer returning a fixed score and recording digests.
#[derive(Debug, Clone, Default)]
pub struct MockSpamScorer {
    score: f32,
    digests: Arc<Mutex<Vec<String>>>,
}

impl MockSpamScorer {
    /// Creates a scorer that always reports `score`.
    pub fn new(score: f32) -> Self {
        Self {
            score,
            digests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the digests scored so far.
    pub fn digests(&self) -> Vec<String> {
        self.digests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpamScorer for MockSpamScorer {
    async fn score(&self, digest: &str) -> DispatchResult<SpamReport> {
        self.digests.lock().unwrap().push(digest.to_string());
        if self.score.is_nan() {
            return Err(DispatchError::new(DispatchErrorKind::Unknown, "Scorer unavailable"));
        }
        Ok(SpamReport::with_default_threshold(self.score))
    }
}

/// Creates a test request.
pub fn test_request() -> SendRequest {
    SendRequest::new("recipient@example.com", "Test Subject", "Test body")
}

/// Creates test transport settings pointing at a local relay.
pub fn test_settings() -> TransportSettings {
    TransportSettings::builder()
        .host("smtp.example.com")
        .port(2525)
        .build()
}
