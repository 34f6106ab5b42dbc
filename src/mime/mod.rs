//! MIME encoding for outgoing messages.
//!
//! Renders the state a transport has accumulated into RFC 5322 bytes:
//! - RFC 2047 encoded words for non-ASCII subjects and display names
//! - 7bit or quoted-printable text parts, base64 attachments
//! - `multipart/alternative` for HTML with a plain-text fallback
//! - `multipart/mixed` when attachments are present

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::types::{Address, ContentType, DEFAULT_CHARSET};

/// Longest line allowed in a 7bit part.
const MAX_7BIT_LINE: usize = 998;

/// Headers the encoder writes itself; custom headers with these names are skipped.
const RESERVED_HEADERS: [&str; 11] = [
    "date",
    "from",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII (no encoding).
    SevenBit,
    /// Quoted-printable encoding.
    #[default]
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }

    /// Picks the lightest encoding able to carry `text`.
    pub fn for_text(text: &str) -> Self {
        let plain = text.is_ascii()
            && text.lines().all(|line| line.len() <= MAX_7BIT_LINE)
            && !text.chars().any(|c| c.is_ascii_control() && c != '\r' && c != '\n' && c != '\t');
        if plain {
            TransferEncoding::SevenBit
        } else {
            TransferEncoding::QuotedPrintable
        }
    }
}

/// Message state accumulated by a transport before rendering.
#[derive(Debug, Clone, Default)]
pub struct MimeMessage {
    /// Sender.
    pub from: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// CC recipients.
    pub cc: Vec<Address>,
    /// BCC recipients (envelope only, never rendered).
    pub bcc: Vec<Address>,
    /// Reply-to addresses.
    pub reply_to: Vec<Address>,
    /// Subject.
    pub subject: String,
    /// Plain text body, or the alternative to `html`.
    pub text: String,
    /// HTML body.
    pub html: Option<String>,
    /// Declared content type.
    pub content_type: ContentType,
    /// Declared charset.
    pub charset: String,
    /// Extra headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Message ID without angle brackets.
    pub message_id: Option<String>,
}

impl MimeMessage {
    /// Returns the declared charset, or the default when none was set.
    pub fn charset(&self) -> &str {
        if self.charset.is_empty() {
            DEFAULT_CHARSET
        } else {
            &self.charset
        }
    }

    /// Returns every envelope recipient (to, cc, bcc).
    pub fn envelope_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

/// Attachment content ready for encoding.
#[derive(Debug, Clone)]
pub struct EncodedAttachment {
    /// File name shown to recipients.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

/// MIME encoder for outgoing messages.
pub struct MimeEncoder {
    /// Date for the message.
    date: DateTime<Utc>,
    /// Domain for message IDs.
    domain: String,
}

impl MimeEncoder {
    /// Creates a new encoder.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            domain: domain.into(),
        }
    }

    /// Encodes a message to RFC 5322 format.
    pub fn encode(
        &self,
        message: &MimeMessage,
        attachments: &[EncodedAttachment],
    ) -> DispatchResult<Vec<u8>> {
        let from = message.from.as_ref().ok_or_else(|| {
            DispatchError::assembly(DispatchErrorKind::InvalidSender, "Message has no sender")
        })?;

        let mut output = Vec::new();
        let message_id = message
            .message_id
            .clone()
            .unwrap_or_else(|| self.generate_message_id());

        self.write_header(&mut output, "Date", &self.format_date())?;
        self.write_header(&mut output, "From", &self.encode_address(from))?;

        if !message.to.is_empty() {
            self.write_header(&mut output, "To", &self.encode_address_list(&message.to))?;
        }
        if !message.cc.is_empty() {
            self.write_header(&mut output, "Cc", &self.encode_address_list(&message.cc))?;
        }
        if !message.reply_to.is_empty() {
            self.write_header(
                &mut output,
                "Reply-To",
                &self.encode_address_list(&message.reply_to),
            )?;
        }

        self.write_encoded_header(&mut output, "Subject", &message.subject)?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;

        for (name, value) in &message.headers {
            if RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    header = %name,
                    "Skipping custom header that shadows a generated one"
                );
                continue;
            }
            self.write_encoded_header(&mut output, name, value)?;
        }

        self.write_header(&mut output, "MIME-Version", "1.0")?;

        if attachments.is_empty() {
            self.write_body_part(&mut output, message)?;
        } else {
            let mixed_boundary = self.generate_boundary();
            self.write_header(
                &mut output,
                "Content-Type",
                &format!("multipart/mixed; boundary=\"{}\"", mixed_boundary),
            )?;
            output.extend_from_slice(b"\r\n");

            output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
            self.write_body_part(&mut output, message)?;
            output.extend_from_slice(b"\r\n");

            for attachment in attachments {
                output.extend_from_slice(format!("--{}\r\n", mixed_boundary).as_bytes());
                self.write_attachment(&mut output, attachment)?;
            }

            output.extend_from_slice(format!("--{}--\r\n", mixed_boundary).as_bytes());
        }

        Ok(output)
    }

    /// Writes the body: single text part or multipart/alternative.
    fn write_body_part(&self, output: &mut Vec<u8>, message: &MimeMessage) -> DispatchResult<()> {
        match &message.html {
            Some(html) if !message.text.trim().is_empty() => {
                let alt_boundary = self.generate_boundary();
                self.write_header(
                    output,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{}\"", alt_boundary),
                )?;
                output.extend_from_slice(b"\r\n");

                output.extend_from_slice(format!("--{}\r\n", alt_boundary).as_bytes());
                self.write_text_part(output, "text/plain", message.charset(), &message.text)?;
                output.extend_from_slice(b"\r\n");

                output.extend_from_slice(format!("--{}\r\n", alt_boundary).as_bytes());
                self.write_text_part(output, "text/html", message.charset(), html)?;
                output.extend_from_slice(b"\r\n");

                output.extend_from_slice(format!("--{}--\r\n", alt_boundary).as_bytes());
            }
            Some(html) => {
                self.write_text_part(output, "text/html", message.charset(), html)?;
            }
            None => {
                // A caller-declared multipart type carries no usable boundary
                let mime_type = match &message.content_type {
                    ContentType::Html => "text/html",
                    ContentType::Plain | ContentType::Multipart(_) => "text/plain",
                };
                self.write_text_part(output, mime_type, message.charset(), &message.text)?;
            }
        }
        Ok(())
    }

    fn write_text_part(
        &self,
        output: &mut Vec<u8>,
        mime_type: &str,
        charset: &str,
        text: &str,
    ) -> DispatchResult<()> {
        let text = normalize_line_endings(text);
        let encoding = TransferEncoding::for_text(&text);

        self.write_header(output, "Content-Type", &format!("{}; charset={}", mime_type, charset))?;
        self.write_header(output, "Content-Transfer-Encoding", encoding.header_value())?;
        output.extend_from_slice(b"\r\n");

        match encoding {
            TransferEncoding::SevenBit => output.extend_from_slice(text.as_bytes()),
            _ => output.extend_from_slice(&self.encode_quoted_printable(&text)),
        }
        if !output.ends_with(b"\r\n") {
            output.extend_from_slice(b"\r\n");
        }
        Ok(())
    }

    /// Writes a header line whose raw value may need RFC 2047 encoding.
    ///
    /// Line breaks are rejected before encoding so they cannot be smuggled
    /// through inside an encoded word.
    fn write_encoded_header(
        &self,
        output: &mut Vec<u8>,
        name: &str,
        value: &str,
    ) -> DispatchResult<()> {
        check_header_value(name, value)?;
        self.write_header(output, name, &self.encode_header(value))
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> DispatchResult<()> {
        if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':' || c == ' ') {
            return Err(DispatchError::assembly(
                DispatchErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }
        check_header_value(name, value)?;

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(self.fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Folds a header line at 78 characters.
    fn fold_header(&self, header: &str) -> String {
        if header.len() <= 78 {
            return header.to_string();
        }

        let mut result = String::new();
        let mut current_line = String::new();

        for word in header.split(' ') {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + 1 + word.len() <= 76 {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push_str(&current_line);
                result.push_str("\r\n ");
                current_line = word.to_string();
            }
        }

        result.push_str(&current_line);
        result
    }

    /// Encodes a header value using RFC 2047.
    ///
    /// Values that need encoding are split on character boundaries into
    /// encoded words of at most 75 characters, separated by spaces so the
    /// header can be folded between them.
    pub fn encode_header(&self, value: &str) -> String {
        if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
            return value.to_string();
        }

        let mut words = Vec::new();
        let mut chunk = String::new();
        for c in value.chars() {
            if chunk.len() + c.len_utf8() > MAX_ENCODED_WORD_BYTES {
                words.push(encoded_word(&chunk));
                chunk.clear();
            }
            chunk.push(c);
        }
        if !chunk.is_empty() {
            words.push(encoded_word(&chunk));
        }
        words.join(" ")
    }

    /// Formats an address, encoding a non-ASCII display name.
    pub fn encode_address(&self, address: &Address) -> String {
        match address.name() {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", self.encode_header(name), address.address())
            }
            _ => address.to_header(),
        }
    }

    fn encode_address_list(&self, addresses: &[Address]) -> String {
        addresses
            .iter()
            .map(|a| self.encode_address(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Encodes text using quoted-printable.
    fn encode_quoted_printable(&self, text: &str) -> Vec<u8> {
        quoted_printable::encode(text.as_bytes())
    }

    /// Generates a unique message ID.
    pub fn generate_message_id(&self) -> String {
        let uuid = Uuid::new_v4();
        format!("{}.{}@{}", uuid.simple(), self.date.timestamp(), self.domain)
    }

    /// Generates a unique boundary.
    fn generate_boundary(&self) -> String {
        format!("----=_Part_{}", Uuid::new_v4().simple())
    }

    /// Formats the date for the Date header.
    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }

    /// Writes an attachment.
    fn write_attachment(
        &self,
        output: &mut Vec<u8>,
        attachment: &EncodedAttachment,
    ) -> DispatchResult<()> {
        let filename = self.encode_header(&attachment.filename.replace('"', "'"));
        self.write_header(
            output,
            "Content-Type",
            &format!("{}; name=\"{}\"", attachment.content_type, filename),
        )?;
        self.write_header(
            output,
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.header_value(),
        )?;
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", filename),
        )?;
        output.extend_from_slice(b"\r\n");

        // Base64 encode with line wrapping
        let encoded = BASE64.encode(&attachment.data);
        for chunk in encoded.as_bytes().chunks(76) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Input bytes per encoded word: 45 bytes encode to 60 base64 characters,
/// which with the `=?UTF-8?B?` and `?=` delimiters stays within 75.
const MAX_ENCODED_WORD_BYTES: usize = 45;

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes()))
}

fn check_header_value(name: &str, value: &str) -> DispatchResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(DispatchError::assembly(
            DispatchErrorKind::InvalidHeader,
            format!("Line break in value of header {}", name),
        ));
    }
    Ok(())
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}
