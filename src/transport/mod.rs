//! Transport seam and the SMTP adapter.
//!
//! [`MailTransport`] is the stateful, per-send surface a message is bound
//! onto. [`SmtpMailTransport`] implements it over `lettre`'s async SMTP
//! transport: state is accumulated locally, rendered with [`MimeEncoder`] and
//! handed over as raw bytes with an explicit envelope.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::{AsyncTransport, Tokio1Executor};

use crate::config::{SecurityMode, TransportConfig};
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::mime::{EncodedAttachment, MimeEncoder, MimeMessage};
use crate::types::{Address, AttachmentRef, ContentType, RecipientKind};

/// Per-send mail transport.
///
/// One instance carries exactly one message. Setters are async so that
/// adapters may validate against or stream to a remote end as they go.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Adds a recipient.
    async fn add_recipient(&mut self, kind: RecipientKind, address: &Address) -> DispatchResult<()>;

    /// Sets the sender.
    async fn set_from(&mut self, address: &Address) -> DispatchResult<()>;

    /// Adds a reply-to address.
    async fn add_reply_to(&mut self, address: &Address) -> DispatchResult<()>;

    /// Sets the subject.
    async fn set_subject(&mut self, subject: &str) -> DispatchResult<()>;

    /// Sets an HTML body and its plain-text alternative.
    async fn set_body(&mut self, html: &str, alternative: &str) -> DispatchResult<()>;

    /// Sets a plain-text body.
    async fn set_plain_body(&mut self, text: &str) -> DispatchResult<()>;

    /// Sets the content type and charset.
    async fn set_content_type(
        &mut self,
        content_type: &ContentType,
        charset: &str,
    ) -> DispatchResult<()>;

    /// Adds a header that is passed through verbatim.
    async fn add_custom_header(&mut self, name: &str, value: &str) -> DispatchResult<()>;

    /// Adds an attachment.
    async fn add_attachment(&mut self, attachment: &AttachmentRef) -> DispatchResult<()>;

    /// Sends the message. `Ok(false)` means the server refused it.
    async fn send(&mut self) -> DispatchResult<bool>;

    /// Returns the message ID of the last send, if known.
    fn message_id(&self) -> Option<String> {
        None
    }
}

/// Creates a fresh transport for each dispatch.
pub trait TransportFactory: Send + Sync {
    /// Creates a transport for `config`.
    fn create(&self, config: &TransportConfig) -> DispatchResult<Box<dyn MailTransport>>;
}

/// Reads attachment content.
#[async_trait]
pub trait AttachmentLoader: Send + Sync {
    /// Loads the bytes behind `attachment`.
    async fn load(&self, attachment: &AttachmentRef) -> io::Result<Vec<u8>>;
}

/// Loads attachments from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAttachmentLoader;

#[async_trait]
impl AttachmentLoader for FsAttachmentLoader {
    async fn load(&self, attachment: &AttachmentRef) -> io::Result<Vec<u8>> {
        let path: &Path = &attachment.source;
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a readable file", path.display()),
            ));
        }
        tokio::fs::read(path).await
    }
}

type LettreTransport = AsyncSmtpTransport<Tokio1Executor>;

/// SMTP transport backed by `lettre`.
pub struct SmtpMailTransport {
    inner: LettreTransport,
    loader: Arc<dyn AttachmentLoader>,
    message: MimeMessage,
    attachments: Vec<AttachmentRef>,
    debug: bool,
    host: String,
}

impl fmt::Debug for SmtpMailTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailTransport")
            .field("host", &self.host)
            .field("recipients", &self.message.envelope_recipients().count())
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl SmtpMailTransport {
    /// Creates a transport for `config`, loading attachments through `loader`.
    pub fn new(
        config: &TransportConfig,
        loader: Arc<dyn AttachmentLoader>,
    ) -> DispatchResult<Self> {
        Ok(Self {
            inner: build_lettre_transport(config)?,
            loader,
            message: MimeMessage::default(),
            attachments: Vec::new(),
            debug: config.debug_enabled(),
            host: config.host.clone(),
        })
    }

    /// Returns the accumulated message state.
    pub fn message(&self) -> &MimeMessage {
        &self.message
    }

    async fn load_attachments(&self) -> DispatchResult<Vec<EncodedAttachment>> {
        let mut loaded = Vec::with_capacity(self.attachments.len());
        for attachment in &self.attachments {
            let data = self.loader.load(attachment).await.map_err(|e| {
                DispatchError::attachment(format!(
                    "Could not read attachment {}",
                    attachment.source.display()
                ))
                .with_cause(e)
            })?;
            loaded.push(EncodedAttachment {
                filename: attachment.file_name(),
                content_type: attachment.mime_type(),
                data,
            });
        }
        Ok(loaded)
    }

    fn envelope(&self) -> DispatchResult<lettre::address::Envelope> {
        let from = self
            .message
            .from
            .as_ref()
            .map(to_lettre_address)
            .transpose()?;
        let recipients = self
            .message
            .envelope_recipients()
            .map(to_lettre_address)
            .collect::<DispatchResult<Vec<_>>>()?;

        lettre::address::Envelope::new(from, recipients).map_err(|e| {
            DispatchError::assembly(DispatchErrorKind::NoValidRecipients, "Envelope rejected")
                .with_cause(e)
        })
    }
}

fn to_lettre_address(address: &Address) -> DispatchResult<lettre::Address> {
    address.address().parse::<lettre::Address>().map_err(|e| {
        DispatchError::parse(
            DispatchErrorKind::InvalidAddress,
            format!("Address not accepted by transport: {}", address.address()),
        )
        .with_cause(e)
    })
}

fn build_lettre_transport(config: &TransportConfig) -> DispatchResult<LettreTransport> {
    let tls_error = |e: lettre::transport::smtp::Error| {
        DispatchError::transport(format!("Cannot set up TLS for {}", config.host)).with_cause(e)
    };

    let builder = match config.security {
        SecurityMode::None => LettreTransport::builder_dangerous(&config.host),
        #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
        SecurityMode::Tls => LettreTransport::relay(&config.host).map_err(tls_error)?,
        #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
        SecurityMode::StartTls => LettreTransport::starttls_relay(&config.host).map_err(tls_error)?,
        #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
        SecurityMode::Tls | SecurityMode::StartTls => {
            let _ = tls_error;
            return Err(DispatchError::configuration(
                DispatchErrorKind::InvalidSecurityMode,
                "TLS support is not compiled in",
            ));
        }
    };

    let mut builder = builder
        .port(config.port)
        .timeout(Some(config.command_timeout.max(config.connect_timeout)));

    if let Some((username, password)) = config.credentials() {
        builder = builder.credentials(Credentials::new(username, password));
    }
    if let Some(name) = &config.hello_name {
        builder = builder.hello_name(ClientId::Domain(name.clone()));
    }

    Ok(builder.build())
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn add_recipient(
        &mut self,
        kind: RecipientKind,
        address: &Address,
    ) -> DispatchResult<()> {
        let list = match kind {
            RecipientKind::To => &mut self.message.to,
            RecipientKind::Cc => &mut self.message.cc,
            RecipientKind::Bcc => &mut self.message.bcc,
        };
        list.push(address.clone());
        Ok(())
    }

    async fn set_from(&mut self, address: &Address) -> DispatchResult<()> {
        self.message.from = Some(address.clone());
        Ok(())
    }

    async fn add_reply_to(&mut self, address: &Address) -> DispatchResult<()> {
        self.message.reply_to.push(address.clone());
        Ok(())
    }

    async fn set_subject(&mut self, subject: &str) -> DispatchResult<()> {
        self.message.subject = subject.to_string();
        Ok(())
    }

    async fn set_body(&mut self, html: &str, alternative: &str) -> DispatchResult<()> {
        self.message.html = Some(html.to_string());
        self.message.text = alternative.to_string();
        Ok(())
    }

    async fn set_plain_body(&mut self, text: &str) -> DispatchResult<()> {
        self.message.html = None;
        self.message.text = text.to_string();
        Ok(())
    }

    async fn set_content_type(
        &mut self,
        content_type: &ContentType,
        charset: &str,
    ) -> DispatchResult<()> {
        self.message.content_type = content_type.clone();
        self.message.charset = charset.to_string();
        Ok(())
    }

    async fn add_custom_header(&mut self, name: &str, value: &str) -> DispatchResult<()> {
        self.message.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn add_attachment(&mut self, attachment: &AttachmentRef) -> DispatchResult<()> {
        self.attachments.push(attachment.clone());
        Ok(())
    }

    async fn send(&mut self) -> DispatchResult<bool> {
        let domain = self
            .message
            .from
            .as_ref()
            .map(|a| a.domain().to_string())
            .unwrap_or_else(|| "localhost".to_string());
        let encoder = MimeEncoder::new(domain);
        if self.message.message_id.is_none() {
            self.message.message_id = Some(encoder.generate_message_id());
        }

        let attachments = self.load_attachments().await?;
        let envelope = self.envelope()?;
        let bytes = encoder.encode(&self.message, &attachments)?;

        if self.debug {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                host = %self.host,
                bytes = bytes.len(),
                recipients = envelope.to().len(),
                "Submitting message"
            );
        }

        match self.inner.send_raw(&envelope, &bytes).await {
            Ok(response) => {
                if self.debug {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(code = %response.code(), "Server accepted message");
                }
                Ok(response.is_positive())
            }
            Err(e) => {
                let code = e.status().and_then(|c| c.to_string().parse::<u16>().ok());
                let mut error = DispatchError::transport(format!(
                    "SMTP delivery via {} failed: {}",
                    self.host, e
                ));
                if let Some(code) = code {
                    error = error.with_transport_code(code);
                }
                Err(error.with_cause(e))
            }
        }
    }

    fn message_id(&self) -> Option<String> {
        self.message.message_id.clone()
    }
}

/// Factory producing [`SmtpMailTransport`] instances.
#[derive(Clone)]
pub struct SmtpTransportFactory {
    loader: Arc<dyn AttachmentLoader>,
}

impl SmtpTransportFactory {
    /// Creates a factory that reads attachments from the file system.
    pub fn new() -> Self {
        Self {
            loader: Arc::new(FsAttachmentLoader),
        }
    }

    /// Creates a factory with a custom attachment loader.
    pub fn with_loader(loader: Arc<dyn AttachmentLoader>) -> Self {
        Self { loader }
    }
}

impl Default for SmtpTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SmtpTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransportFactory").finish_non_exhaustive()
    }
}

impl TransportFactory for SmtpTransportFactory {
    fn create(&self, config: &TransportConfig) -> DispatchResult<Box<dyn MailTransport>> {
        Ok(Box::new(SmtpMailTransport::new(config, self.loader.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::config::{configure, TransportSettings};
    use crate::errors::ErrorCategory;

    fn config() -> TransportConfig {
        configure(&TransportSettings::builder().url("smtp://127.0.0.1:1").build()).unwrap()
    }

    #[tokio::test]
    async fn test_fs_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"attachment body").unwrap();

        let data = FsAttachmentLoader
            .load(&AttachmentRef::new(file.path()))
            .await
            .unwrap();
        assert_eq!(data, b"attachment body");
    }

    #[tokio::test]
    async fn test_fs_loader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsAttachmentLoader
            .load(&AttachmentRef::new(dir.path().join("missing.pdf")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err = FsAttachmentLoader
            .load(&AttachmentRef::new(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_setters_accumulate_state() {
        let mut transport =
            SmtpMailTransport::new(&config(), Arc::new(FsAttachmentLoader)).unwrap();
        let to = Address::new("", "to@example.com").unwrap();
        let bcc = Address::new("", "bcc@example.com").unwrap();

        transport.set_from(&Address::new("Site", "site@example.com").unwrap()).await.unwrap();
        transport.add_recipient(RecipientKind::To, &to).await.unwrap();
        transport.add_recipient(RecipientKind::Bcc, &bcc).await.unwrap();
        transport.set_body("<b>Hi</b>", "Hi").await.unwrap();
        transport.set_content_type(&ContentType::Html, "UTF-8").await.unwrap();
        transport.add_custom_header("X-Tag", "one").await.unwrap();

        let message = transport.message();
        assert_eq!(message.to, vec![to]);
        assert_eq!(message.bcc, vec![bcc]);
        assert_eq!(message.html.as_deref(), Some("<b>Hi</b>"));
        assert_eq!(message.headers, vec![("X-Tag".to_string(), "one".to_string())]);

        let envelope = transport.envelope().unwrap();
        assert_eq!(envelope.to().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_attachment_fails_before_connect() {
        let mut transport =
            SmtpMailTransport::new(&config(), Arc::new(FsAttachmentLoader)).unwrap();
        transport.set_from(&Address::new("", "site@example.com").unwrap()).await.unwrap();
        transport
            .add_recipient(RecipientKind::To, &Address::new("", "to@example.com").unwrap())
            .await
            .unwrap();
        transport
            .add_attachment(&AttachmentRef::new("/nonexistent/report.pdf"))
            .await
            .unwrap();

        let err = transport.send().await.unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::AttachmentError);
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_factory_builds_each_security_mode() {
        let factory = SmtpTransportFactory::new();
        for url in [
            "smtp://mail.example.com",
            "smtps://mail.example.com",
            "smtp+tls://mail.example.com",
        ] {
            let config = configure(&TransportSettings::builder().url(url).build()).unwrap();
            assert!(factory.create(&config).is_ok(), "{}", url);
        }
    }
}
