//! Message assembly.
//!
//! [`MessageBuilder`] turns a loosely-typed [`SendRequest`] into a fully
//! resolved [`MessageSpec`]: recipients parsed, recognized headers consumed,
//! sender defaulted and filtered, body and content type settled. Nothing
//! here touches the network.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::address;
use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::headers;
use crate::hooks::Hooks;
use crate::site::{self, SiteInfo};
use crate::types::{
    Address, AttachmentInput, AttachmentRef, ContentType, MessageSpec, SendRequest,
    DEFAULT_CHARSET,
};

/// Local part used when the sender must be derived from the site domain.
pub const FALLBACK_LOCAL_PART: &str = "website";

/// Builds [`MessageSpec`] values from requests.
pub struct MessageBuilder<'a> {
    site: &'a dyn SiteInfo,
    hooks: &'a Hooks,
}

/// Content type and charset taken from a `Content-Type` header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypeHeader {
    /// Classified MIME type, if the header named one.
    pub content_type: Option<ContentType>,
    /// Charset parameter, or the default when a boundary was given.
    pub charset: Option<String>,
}

impl<'a> MessageBuilder<'a> {
    /// Creates a builder using `site` for sender defaults and `hooks` for filters.
    pub fn new(site: &'a dyn SiteInfo, hooks: &'a Hooks) -> Self {
        Self { site, hooks }
    }

    /// Assembles a message from `request`.
    pub fn build(&self, request: &SendRequest) -> DispatchResult<MessageSpec> {
        let to = address::parse(&request.to);
        if to.is_empty() {
            let message = if request.to.is_empty() {
                "No recipients supplied".to_string()
            } else {
                format!("No valid recipients in {:?}", request.to)
            };
            return Err(DispatchError::assembly(
                DispatchErrorKind::NoValidRecipients,
                message,
            ));
        }

        let header_map = headers::normalize(&request.headers);

        let mut header_from: Option<Address> = None;
        let mut cc = Vec::new();
        let mut bcc = Vec::new();
        let mut reply_to = Vec::new();
        let mut content_type: Option<ContentType> = None;
        let mut charset: Option<String> = None;

        for (name, value) in header_map.iter() {
            match name.as_str() {
                "content-type" => {
                    let parsed = parse_content_type(value);
                    content_type = parsed.content_type.or(content_type);
                    charset = parsed.charset.or(charset);
                }
                "from" => header_from = address::parse_str(value).into_iter().next(),
                "cc" => cc.extend(address::parse_str(value)),
                "bcc" => bcc.extend(address::parse_str(value)),
                "reply-to" => reply_to.extend(address::parse_str(value)),
                _ => {}
            }
        }

        let custom_headers = header_map
            .custom()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect();

        let from = self.resolve_sender(header_from)?;

        let mut content_type = content_type.unwrap_or_default();
        if request.html && content_type == ContentType::Plain {
            content_type = ContentType::Html;
        }
        let content_type =
            ContentType::from_essence(&self.hooks.apply_content_type(content_type.mime_type()));
        let charset = self
            .hooks
            .apply_charset(charset.unwrap_or_else(|| DEFAULT_CHARSET.to_string()));

        let subject = collapse_whitespace(request.subject.as_deref().unwrap_or_default());
        let message = request.message.clone().unwrap_or_default();

        if subject.is_empty() && message.trim().is_empty() {
            return Err(DispatchError::assembly(
                DispatchErrorKind::MissingContent,
                "Message has neither subject nor body",
            ));
        }

        let (body_plain, body_html) = if content_type.is_html() {
            (html_to_text(&message), Some(message))
        } else {
            (message, None)
        };

        let attachments = resolve_attachments(&request.attachments);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            to = to.len(),
            cc = cc.len(),
            bcc = bcc.len(),
            content_type = %content_type,
            attachments = attachments.len(),
            "Message assembled"
        );

        Ok(MessageSpec {
            to,
            from,
            cc,
            bcc,
            reply_to,
            subject,
            body_plain,
            body_html,
            content_type,
            charset,
            custom_headers,
            attachments,
        })
    }

    /// Picks the sender and runs it through the from filters.
    fn resolve_sender(&self, header_from: Option<Address>) -> DispatchResult<Address> {
        let (mut email, mut name) = match header_from {
            Some(addr) => (addr.address, addr.name),
            None => (String::new(), String::new()),
        };

        if email.is_empty() {
            email = self.default_sender_address();
        }
        if name.is_empty() {
            name = self.site.site_name().unwrap_or_default();
        }

        let email = self.hooks.apply_from(email);
        let name = self.hooks.apply_from_name(name);

        Address::new(name, email.trim()).map_err(|e| {
            DispatchError::assembly(
                DispatchErrorKind::InvalidSender,
                format!("Sender address is not usable: {}", email),
            )
            .with_cause(e)
        })
    }

    fn default_sender_address(&self) -> String {
        if let Some(admin) = self.site.admin_email().filter(|a| !a.trim().is_empty()) {
            return admin.trim().to_string();
        }

        let domain = self
            .site
            .home_url()
            .and_then(|url| site::site_domain(&url))
            .unwrap_or_else(|| "localhost".to_string());
        format!("{}@{}", FALLBACK_LOCAL_PART, domain)
    }
}

/// Parses a `Content-Type` header value.
///
/// The part before the first `;` is the MIME essence. A `charset=` parameter
/// sets the charset, quotes stripped; failing that, a `boundary=` parameter
/// implies the default charset.
pub fn parse_content_type(value: &str) -> ContentTypeHeader {
    let (essence, params) = match value.split_once(';') {
        Some((essence, params)) => (essence.trim(), Some(params)),
        None => (value.trim(), None),
    };

    let content_type = if essence.is_empty() {
        None
    } else {
        Some(ContentType::from_essence(essence))
    };

    let mut charset = None;
    let mut has_boundary = false;
    for param in params.into_iter().flat_map(split_params) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("charset") {
            let val = val.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            if !val.is_empty() {
                charset = Some(val.to_string());
                break;
            }
        } else if key.eq_ignore_ascii_case("boundary") {
            has_boundary = true;
        }
    }

    if charset.is_none() && has_boundary {
        charset = Some(DEFAULT_CHARSET.to_string());
    }

    ContentTypeHeader {
        content_type,
        charset,
    }
}

/// Splits a parameter list on `;` outside double-quoted values.
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut escaped = false;

    for (i, c) in params.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' && in_quote {
            escaped = true;
        } else if c == '"' {
            in_quote = !in_quote;
        } else if c == ';' && !in_quote {
            parts.push(&params[start..i]);
            start = i + 1;
        }
    }
    parts.push(&params[start..]);
    parts
}

/// Trims `s` and collapses every internal whitespace run to one space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_attachments(input: &AttachmentInput) -> Vec<AttachmentRef> {
    match input {
        AttachmentInput::Paths(paths) => paths
            .replace("\r\n", "\n")
            .split('\n')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(AttachmentRef::new)
            .collect(),
        AttachmentInput::List(list) => list
            .iter()
            .filter(|a| !a.source.as_os_str().is_empty())
            .cloned()
            .collect(),
    }
}

static INVISIBLE_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:head|title|style|script)\b[^>]*>.*?</(?:head|title|style|script)\s*>")
        .expect("static regex")
});
static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|h[1-6]|li|tr|blockquote|pre|table|ul|ol)\s*>")
        .expect("static regex")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").expect("static regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Derives a plain-text alternative from an HTML body.
pub fn html_to_text(html: &str) -> String {
    let text = INVISIBLE_BLOCKS.replace_all(html, "");
    let text = LINE_BREAKS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let text = lines.join("\n");
    BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY.replace_all(text, |caps: &Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    // &amp; goes last so "&amp;lt;" decodes to "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSiteInfo;
    use crate::site::StaticSiteInfo;
    use proptest::prelude::*;
    use rstest::rstest;

    fn site() -> StaticSiteInfo {
        StaticSiteInfo::new("admin@example.com", "Example Site")
            .with_home_url("https://www.example.com/")
    }

    fn build(request: &SendRequest) -> DispatchResult<MessageSpec> {
        let site = site();
        let hooks = Hooks::new();
        MessageBuilder::new(&site, &hooks).build(request)
    }

    #[test]
    fn test_minimal_request() {
        let spec = build(&SendRequest::new("a@b.com", "Hi", "Body")).unwrap();
        assert_eq!(spec.to.len(), 1);
        assert_eq!(spec.from.address, "admin@example.com");
        assert_eq!(spec.from.name, "Example Site");
        assert_eq!(spec.content_type, ContentType::Plain);
        assert_eq!(spec.charset, "UTF-8");
        assert_eq!(spec.body_plain, "Body");
        assert!(spec.body_html.is_none());
    }

    #[test]
    fn test_invalid_recipients_fail() {
        let err = build(&SendRequest::new("not-an-email", "Hi", "Body")).unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::NoValidRecipients);

        let err = build(&SendRequest::new("", "Hi", "Body")).unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::NoValidRecipients);
    }

    #[test]
    fn test_recognized_headers_consumed() {
        let request = SendRequest::new("a@b.com", "Hi", "Body").headers(
            "From: Sender <sender@example.org>\r\n\
             Cc: c1@x.com, C Two <c2@x.com>\r\n\
             Bcc: b@x.com\r\n\
             Reply-To: reply@x.com\r\n\
             X-Priority: 1\r\n\
             List-Unsubscribe: <mailto:unsub@x.com>",
        );
        let spec = build(&request).unwrap();

        assert_eq!(spec.from.to_header(), "Sender <sender@example.org>");
        assert_eq!(spec.cc.len(), 2);
        assert_eq!(spec.bcc.len(), 1);
        assert_eq!(spec.reply_to[0].address, "reply@x.com");
        assert_eq!(
            spec.custom_headers,
            vec![
                ("X-Priority".to_string(), "1".to_string()),
                ("List-Unsubscribe".to_string(), "<mailto:unsub@x.com>".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_header_takes_first_address() {
        let request = SendRequest::new("a@b.com", "Hi", "Body")
            .headers("From: first@x.com, second@x.com");
        let spec = build(&request).unwrap();
        assert_eq!(spec.from.address, "first@x.com");
        assert_eq!(spec.from.name, "Example Site");
    }

    #[test]
    fn test_explicit_from_skips_default_lookup() {
        let site = MockSiteInfo::new();
        let hooks = Hooks::new();
        let request =
            SendRequest::new("a@b.com", "Hi", "Body").headers("From: Me <me@example.org>");
        let spec = MessageBuilder::new(&site, &hooks).build(&request).unwrap();

        assert_eq!(spec.from.address, "me@example.org");
        assert_eq!(site.admin_lookups(), 0);
    }

    #[test]
    fn test_sender_falls_back_to_site_domain() {
        let site = StaticSiteInfo {
            admin_email: None,
            name: Some("Shop".into()),
            home_url: Some("https://www.shop.example.com/".into()),
        };
        let hooks = Hooks::new();
        let spec = MessageBuilder::new(&site, &hooks)
            .build(&SendRequest::new("a@b.com", "Hi", "Body"))
            .unwrap();
        assert_eq!(spec.from.address, "website@shop.example.com");
        assert_eq!(spec.from.name, "Shop");
    }

    #[test]
    fn test_sender_without_site_is_invalid() {
        let site = StaticSiteInfo::default();
        let hooks = Hooks::new();
        let err = MessageBuilder::new(&site, &hooks)
            .build(&SendRequest::new("a@b.com", "Hi", "Body"))
            .unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::InvalidSender);
    }

    #[test]
    fn test_from_filters_override_header() {
        let site = site();
        let hooks = Hooks::new()
            .filter_from(|_| "noreply@filtered.com".to_string())
            .filter_from_name(|name| format!("{} (via site)", name));
        let request =
            SendRequest::new("a@b.com", "Hi", "Body").headers("From: Me <me@example.org>");
        let spec = MessageBuilder::new(&site, &hooks).build(&request).unwrap();

        assert_eq!(spec.from.address, "noreply@filtered.com");
        assert_eq!(spec.from.name, "Me (via site)");
    }

    #[test]
    fn test_filtered_sender_must_be_valid() {
        let site = site();
        let hooks = Hooks::new().filter_from(|_| "broken".to_string());
        let err = MessageBuilder::new(&site, &hooks)
            .build(&SendRequest::new("a@b.com", "Hi", "Body"))
            .unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::InvalidSender);
    }

    #[test]
    fn test_content_type_and_charset_from_header() {
        let request = SendRequest::new("a@b.com", "Hi", "<p>Hello &amp; welcome</p>")
            .headers("Content-Type: text/html; charset=\"ISO-8859-1\"");
        let spec = build(&request).unwrap();

        assert_eq!(spec.content_type, ContentType::Html);
        assert_eq!(spec.charset, "ISO-8859-1");
        assert_eq!(spec.body_html.as_deref(), Some("<p>Hello &amp; welcome</p>"));
        assert_eq!(spec.body_plain, "Hello & welcome");
    }

    #[test]
    fn test_html_flag_promotes_plain() {
        let spec = build(&SendRequest::new("a@b.com", "Hi", "<b>Bold</b>").html()).unwrap();
        assert!(spec.content_type.is_html());
        assert_eq!(spec.body_plain, "Bold");
    }

    #[test]
    fn test_content_type_and_charset_filters() {
        let site = site();
        let hooks = Hooks::new()
            .filter_content_type(|_| "text/html".to_string())
            .filter_charset(|_| "ISO-2022-JP".to_string());
        let spec = MessageBuilder::new(&site, &hooks)
            .build(&SendRequest::new("a@b.com", "Hi", "Body"))
            .unwrap();
        assert_eq!(spec.content_type, ContentType::Html);
        assert_eq!(spec.charset, "ISO-2022-JP");
    }

    #[rstest]
    #[case("text/plain", Some(ContentType::Plain), None)]
    #[case("text/html; charset=utf-8", Some(ContentType::Html), Some("utf-8"))]
    #[case("text/html; charset='latin1'", Some(ContentType::Html), Some("latin1"))]
    #[case(
        "multipart/mixed; boundary=\"XYZ\"",
        Some(ContentType::Multipart("mixed".into())),
        Some("UTF-8")
    )]
    #[case("text/plain; format=flowed", Some(ContentType::Plain), None)]
    #[case("; charset=us-ascii", None, Some("us-ascii"))]
    #[case(
        "multipart/mixed; boundary=\"a;charset=evil\"",
        Some(ContentType::Multipart("mixed".into())),
        Some("UTF-8")
    )]
    #[case(
        "text/html; boundary=\"x;y\"; charset=koi8-r",
        Some(ContentType::Html),
        Some("koi8-r")
    )]
    fn test_parse_content_type(
        #[case] value: &str,
        #[case] content_type: Option<ContentType>,
        #[case] charset: Option<&str>,
    ) {
        let parsed = parse_content_type(value);
        assert_eq!(parsed.content_type, content_type);
        assert_eq!(parsed.charset.as_deref(), charset);
    }

    #[rstest]
    #[case("  Hello   World  ", "Hello World")]
    #[case("Line\r\nBcc: evil@x.com", "Line Bcc: evil@x.com")]
    #[case("\tTabs\tinside\t", "Tabs inside")]
    #[case("", "")]
    fn test_subject_whitespace(#[case] raw: &str, #[case] expected: &str) {
        let spec = build(&SendRequest::new("a@b.com", raw, "Body")).unwrap();
        assert_eq!(spec.subject, expected);
    }

    #[test]
    fn test_missing_content() {
        let err = build(&SendRequest::new("a@b.com", "   ", "\n")).unwrap_err();
        assert_eq!(err.kind(), DispatchErrorKind::MissingContent);
    }

    #[test]
    fn test_attachment_paths_split_on_newlines() {
        let request = SendRequest::new("a@b.com", "Hi", "Body")
            .attachments("/tmp/a.pdf\r\n/tmp/b.png\n\n  /tmp/c.txt  ");
        let spec = build(&request).unwrap();
        let sources: Vec<_> = spec
            .attachments
            .iter()
            .map(|a| a.source.to_string_lossy().into_owned())
            .collect();
        assert_eq!(sources, vec!["/tmp/a.pdf", "/tmp/b.png", "/tmp/c.txt"]);
    }

    #[test]
    fn test_attachment_list_kept() {
        let request = SendRequest::new("a@b.com", "Hi", "Body").attachments(vec![
            AttachmentRef::new("/tmp/report.csv").named("Report.csv"),
            AttachmentRef::new(""),
        ]);
        let spec = build(&request).unwrap();
        assert_eq!(spec.attachments.len(), 1);
        assert_eq!(spec.attachments[0].file_name(), "Report.csv");
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><h1>Title</h1><p>First&nbsp;line<br/>second</p>\
                    <script>alert(1)</script><p>&lt;tag&gt; &#233;&#x41;</p></body></html>";
        assert_eq!(html_to_text(html), "Title\nFirst line\nsecond\n<tag> éA");
    }

    #[test]
    fn test_html_to_text_collapses_blank_lines() {
        assert_eq!(html_to_text("<p>a</p>\n\n\n\n<p>b</p>"), "a\n\nb");
    }

    proptest! {
        #[test]
        fn collapse_whitespace_is_idempotent(s in "\\PC*") {
            let once = collapse_whitespace(&s);
            prop_assert_eq!(collapse_whitespace(&once), once.clone());
            prop_assert!(!once.contains("  "));
            prop_assert!(!once.contains('\n'));
        }
    }
}
