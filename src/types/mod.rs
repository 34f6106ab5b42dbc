//! Core types for mail dispatch.
//!
//! This module provides:
//! - Address types with validation
//! - The inbound [`SendRequest`] and its loosely-typed input forms
//! - The resolved [`MessageSpec`] handed to a transport
//! - Send receipts and failure payloads

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address;
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::transport::MailTransport;

/// Default message charset.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Mailbox with display name.
///
/// Equality and hashing consider the address only; the name is cosmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    /// Display name (may be empty).
    pub name: String,
    /// Mailbox (`local@domain`).
    pub address: String,
}

impl Address {
    /// Creates a validated address.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> DispatchResult<Self> {
        let address = address.into();
        if !address::is_valid_mailbox(&address) {
            return Err(DispatchError::parse(
                DispatchErrorKind::InvalidAddress,
                format!("Invalid mailbox: {}", address),
            ));
        }
        Ok(Self {
            name: name.into(),
            address,
        })
    }

    /// Parses a single `Name <local@domain>` or bare `local@domain` entry.
    pub fn parse(s: &str) -> DispatchResult<Self> {
        address::parse_one(s)
    }

    /// Returns the mailbox.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name, if not empty.
    pub fn name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }

    /// Returns the domain part of the mailbox.
    pub fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or_default()
    }

    /// Formats the address for email headers.
    pub fn to_header(&self) -> String {
        if self.name.is_empty() {
            return self.address.clone();
        }

        // Quote name if it contains RFC 5322 specials
        if self.name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) {
            let escaped = self.name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\" <{}>", escaped, self.address)
        } else {
            format!("{} <{}>", self.name, self.address)
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = DispatchError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

/// Recipient slot on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    /// Primary recipient.
    To,
    /// Carbon copy.
    Cc,
    /// Blind carbon copy.
    Bcc,
}

/// Reference to an attachment, resolved by the transport at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Source path.
    pub source: PathBuf,
    /// Display name; empty means the file name of `source`.
    #[serde(default)]
    pub display_name: String,
}

impl AttachmentRef {
    /// Creates an attachment reference without a display name.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            display_name: String::new(),
        }
    }

    /// Sets the display name.
    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Returns the name shown to recipients.
    pub fn file_name(&self) -> String {
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string())
    }

    /// Returns the MIME type guessed from the file name.
    pub fn mime_type(&self) -> String {
        mime_guess::from_path(self.file_name())
            .first_or_octet_stream()
            .to_string()
    }
}

/// Resolved MIME content type of the message body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// `text/plain`.
    #[default]
    Plain,
    /// `text/html`.
    Html,
    /// `multipart/<subtype>`, boundary supplied by the caller.
    Multipart(String),
}

impl ContentType {
    /// Classifies a MIME essence such as `text/html`.
    ///
    /// Anything that is neither HTML nor multipart is treated as plain text.
    pub fn from_essence(essence: &str) -> Self {
        let parsed = match essence.trim().parse::<mime::Mime>() {
            Ok(m) => m,
            Err(_) => return ContentType::Plain,
        };

        if parsed.type_() == mime::TEXT && parsed.subtype() == mime::HTML {
            ContentType::Html
        } else if parsed.type_() == mime::MULTIPART {
            ContentType::Multipart(parsed.subtype().as_str().to_ascii_lowercase())
        } else {
            ContentType::Plain
        }
    }

    /// Returns the MIME type string.
    pub fn mime_type(&self) -> String {
        match self {
            ContentType::Plain => mime::TEXT_PLAIN.essence_str().to_string(),
            ContentType::Html => mime::TEXT_HTML.essence_str().to_string(),
            ContentType::Multipart(subtype) => format!("multipart/{}", subtype),
        }
    }

    /// Returns true for `text/html`.
    pub fn is_html(&self) -> bool {
        matches!(self, ContentType::Html)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

/// Recipient input: one comma-joined string or a list of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressInput {
    /// Comma-separated addresses.
    Single(String),
    /// One address (or comma-separated group) per entry.
    List(Vec<String>),
}

impl AddressInput {
    /// Returns true when no entry carries any text.
    pub fn is_empty(&self) -> bool {
        match self {
            AddressInput::Single(s) => s.trim().is_empty(),
            AddressInput::List(list) => list.iter().all(|s| s.trim().is_empty()),
        }
    }
}

impl Default for AddressInput {
    fn default() -> Self {
        AddressInput::Single(String::new())
    }
}

impl From<&str> for AddressInput {
    fn from(s: &str) -> Self {
        AddressInput::Single(s.to_string())
    }
}

impl From<String> for AddressInput {
    fn from(s: String) -> Self {
        AddressInput::Single(s)
    }
}

impl From<Vec<String>> for AddressInput {
    fn from(list: Vec<String>) -> Self {
        AddressInput::List(list)
    }
}

impl From<Vec<&str>> for AddressInput {
    fn from(list: Vec<&str>) -> Self {
        AddressInput::List(list.into_iter().map(str::to_string).collect())
    }
}

/// Header input: a raw block or individual `Name: value` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderInput {
    /// CRLF or LF separated block.
    Raw(String),
    /// One header per entry.
    Lines(Vec<String>),
}

impl HeaderInput {
    /// Returns true when there is nothing to parse.
    pub fn is_empty(&self) -> bool {
        match self {
            HeaderInput::Raw(s) => s.trim().is_empty(),
            HeaderInput::Lines(lines) => lines.iter().all(|l| l.trim().is_empty()),
        }
    }
}

impl Default for HeaderInput {
    fn default() -> Self {
        HeaderInput::Raw(String::new())
    }
}

impl From<&str> for HeaderInput {
    fn from(s: &str) -> Self {
        HeaderInput::Raw(s.to_string())
    }
}

impl From<Vec<&str>> for HeaderInput {
    fn from(lines: Vec<&str>) -> Self {
        HeaderInput::Lines(lines.into_iter().map(str::to_string).collect())
    }
}

/// Attachment input: newline-delimited paths or structured references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentInput {
    /// Newline-delimited file paths.
    Paths(String),
    /// Structured references.
    List(Vec<AttachmentRef>),
}

impl Default for AttachmentInput {
    fn default() -> Self {
        AttachmentInput::Paths(String::new())
    }
}

impl From<&str> for AttachmentInput {
    fn from(s: &str) -> Self {
        AttachmentInput::Paths(s.to_string())
    }
}

impl From<Vec<AttachmentRef>> for AttachmentInput {
    fn from(list: Vec<AttachmentRef>) -> Self {
        AttachmentInput::List(list)
    }
}

/// A caller's send request, as received from the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Primary recipients.
    #[serde(default)]
    pub to: AddressInput,
    /// Subject line.
    #[serde(default)]
    pub subject: Option<String>,
    /// Message body (HTML or plain depending on the resolved content type).
    #[serde(default)]
    pub message: Option<String>,
    /// Additional headers.
    #[serde(default)]
    pub headers: HeaderInput,
    /// Files to attach.
    #[serde(default)]
    pub attachments: AttachmentInput,
    /// Render the body as HTML regardless of the content-type header.
    #[serde(default)]
    pub html: bool,
}

impl SendRequest {
    /// Creates a request with recipients, subject and body.
    pub fn new(
        to: impl Into<AddressInput>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: Some(subject.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Sets the headers.
    pub fn headers(mut self, headers: impl Into<HeaderInput>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Sets the attachments.
    pub fn attachments(mut self, attachments: impl Into<AttachmentInput>) -> Self {
        self.attachments = attachments.into();
        self
    }

    /// Requests HTML rendering of the body.
    pub fn html(mut self) -> Self {
        self.html = true;
        self
    }
}

/// Canonical, fully-resolved message prior to transport submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSpec {
    /// Primary recipients (never empty).
    pub to: Vec<Address>,
    /// Sender.
    pub from: Address,
    /// CC recipients.
    pub cc: Vec<Address>,
    /// BCC recipients.
    pub bcc: Vec<Address>,
    /// Reply-to addresses.
    pub reply_to: Vec<Address>,
    /// Subject with whitespace collapsed.
    pub subject: String,
    /// Plain text body.
    pub body_plain: String,
    /// HTML body, present iff the content type is HTML.
    pub body_html: Option<String>,
    /// Resolved content type.
    pub content_type: ContentType,
    /// Resolved charset.
    pub charset: String,
    /// Unrecognized headers in encountered order.
    pub custom_headers: Vec<(String, String)>,
    /// Attachments.
    pub attachments: Vec<AttachmentRef>,
}

impl MessageSpec {
    /// Returns all envelope recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns the count of all envelope recipients.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Returns true if the message has attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Pushes every field of the message onto a transport.
    pub async fn bind(&self, transport: &mut dyn MailTransport) -> DispatchResult<()> {
        transport.set_from(&self.from).await?;

        for address in &self.to {
            transport.add_recipient(RecipientKind::To, address).await?;
        }
        for address in &self.cc {
            transport.add_recipient(RecipientKind::Cc, address).await?;
        }
        for address in &self.bcc {
            transport.add_recipient(RecipientKind::Bcc, address).await?;
        }
        for address in &self.reply_to {
            transport.add_reply_to(address).await?;
        }

        transport.set_subject(&self.subject).await?;
        match &self.body_html {
            Some(html) => transport.set_body(html, &self.body_plain).await?,
            None => transport.set_plain_body(&self.body_plain).await?,
        }
        transport
            .set_content_type(&self.content_type, &self.charset)
            .await?;

        for (name, value) in &self.custom_headers {
            transport.add_custom_header(name, value).await?;
        }
        for attachment in &self.attachments {
            transport.add_attachment(attachment).await?;
        }

        Ok(())
    }
}

/// Stage of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Request received.
    Init,
    /// Resolving transport configuration.
    Configuring,
    /// Assembling the message.
    Building,
    /// Handing off to the transport.
    Sending,
    /// Transport accepted the message.
    Sent,
    /// Dispatch failed.
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Init => write!(f, "init"),
            DispatchState::Configuring => write!(f, "configuring"),
            DispatchState::Building => write!(f, "building"),
            DispatchState::Sending => write!(f, "sending"),
            DispatchState::Sent => write!(f, "sent"),
            DispatchState::Failed => write!(f, "failed"),
        }
    }
}

/// Successful dispatch.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message ID reported by the transport, if any.
    pub message_id: Option<String>,
    /// Number of envelope recipients.
    pub recipients: usize,
    /// Dispatch duration.
    pub duration: Duration,
}

/// Failed dispatch, handed to failure hooks and returned to the caller.
#[derive(Error, Debug, Serialize)]
#[error("mail dispatch failed while {stage}: {error}")]
pub struct FailurePayload {
    /// Triggering error.
    pub error: DispatchError,
    /// Stage that was active when the error occurred.
    pub stage: DispatchState,
    /// The caller's original request.
    pub request: SendRequest,
}

impl FailurePayload {
    /// Returns the transport status code, if the transport reported one.
    pub fn transport_code(&self) -> Option<u16> {
        self.error.transport_code()
    }

    /// Formats the payload as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.error.to_string())
    }
}

/// Outcome of [`MailDispatcher::send`](crate::MailDispatcher::send).
pub type SendResult = Result<SendReceipt, FailurePayload>;

/// Outcome of a batch of sends.
#[derive(Debug)]
pub struct BatchSendResult {
    /// Per-request results, in request order.
    pub results: Vec<SendResult>,
    /// Requests in the batch.
    pub total: usize,
    /// Requests sent.
    pub succeeded: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl BatchSendResult {
    /// Returns true if every request was sent.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
