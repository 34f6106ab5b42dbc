//! End-to-end dispatch tests against the recording mocks.

use std::sync::{Arc, Mutex};

use integrations_mail_dispatch::mocks::{
    test_request, test_settings, MockSiteInfo, MockTransportFactory, TransportCall,
};
use integrations_mail_dispatch::{
    Address, AttachmentRef, ContentType, DispatchErrorKind, DispatchState, ErrorCategory, Hooks,
    MailDispatcher, RecipientKind, SecurityMode, SendRequest, TransportSettings,
};
use rstest::rstest;

fn dispatcher_with(
    factory: &MockTransportFactory,
    settings: TransportSettings,
    hooks: Hooks,
) -> MailDispatcher {
    MailDispatcher::builder()
        .settings(settings)
        .transport_factory(Arc::new(factory.clone()))
        .site(Arc::new(MockSiteInfo::new()))
        .hooks(hooks)
        .build()
}

fn html_request() -> SendRequest {
    SendRequest::new("a@b.com", "Hi  there", "<p>hello</p>")
        .headers("Content-Type: text/html; charset=UTF-8\nCc: c@d.com")
}

#[test]
fn html_request_assembles_expected_message() {
    let factory = MockTransportFactory::new();
    let dispatcher = dispatcher_with(&factory, test_settings(), Hooks::new());

    let spec = dispatcher.preview(&html_request()).unwrap();

    assert_eq!(spec.to, vec![Address::new("", "a@b.com").unwrap()]);
    assert_eq!(spec.subject, "Hi there");
    assert_eq!(spec.content_type, ContentType::Html);
    assert_eq!(spec.charset, "UTF-8");
    assert_eq!(spec.cc, vec![Address::new("", "c@d.com").unwrap()]);
    assert_eq!(spec.body_html.as_deref(), Some("<p>hello</p>"));
    assert_eq!(spec.body_plain, "hello");
}

#[tokio::test]
async fn html_request_is_bound_onto_transport() {
    let factory = MockTransportFactory::new();
    let dispatcher = dispatcher_with(&factory, test_settings(), Hooks::new());

    let receipt = dispatcher.send(html_request()).await.unwrap();
    assert_eq!(receipt.recipients, 2);

    let transport = factory.transport();
    assert_eq!(transport.recipients(RecipientKind::To)[0].address(), "a@b.com");
    assert_eq!(transport.recipients(RecipientKind::Cc)[0].address(), "c@d.com");
    assert!(transport.recorded_calls().contains(&TransportCall::SetBody {
        html: "<p>hello</p>".to_string(),
        alternative: "hello".to_string(),
    }));
    assert!(transport
        .recorded_calls()
        .contains(&TransportCall::SetContentType(ContentType::Html, "UTF-8".to_string())));
}

#[tokio::test]
async fn transport_failure_is_returned_not_raised() {
    let factory = MockTransportFactory::new();
    factory.transport().fail_with("451 temporary local problem", Some(451));

    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let hooks = Hooks::new().on_failure(move |failure| {
        seen.lock().unwrap().push(failure.to_json());
    });

    let dispatcher = dispatcher_with(&factory, test_settings(), hooks);
    let failure = dispatcher.send(test_request()).await.unwrap_err();

    assert_eq!(failure.stage, DispatchState::Sending);
    assert_eq!(failure.error.kind(), DispatchErrorKind::TransportFailed);
    assert_eq!(failure.error.category(), ErrorCategory::Transport);
    assert_eq!(failure.transport_code(), Some(451));

    let recorded = failures.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].contains("\"transport_code\":451"));
    assert!(recorded[0].contains("recipient@example.com"));

    assert_eq!(dispatcher.metrics_snapshot().transport_failures, 1);
}

#[tokio::test]
async fn explicit_sender_skips_site_lookup() {
    let factory = MockTransportFactory::new();
    let site = Arc::new(MockSiteInfo::new());
    let dispatcher = MailDispatcher::builder()
        .settings(test_settings())
        .transport_factory(Arc::new(factory.clone()))
        .site(site.clone())
        .build();

    let request = test_request().headers("From: Sales <sales@shop.example.com>");
    dispatcher.send(request).await.unwrap();

    let from = factory.transport().from().unwrap();
    assert_eq!(from.address(), "sales@shop.example.com");
    assert_eq!(from.name(), Some("Sales"));
    assert_eq!(site.admin_lookups(), 0);
}

#[tokio::test]
async fn header_lines_and_attachment_string() {
    let factory = MockTransportFactory::new();
    let dispatcher = dispatcher_with(&factory, test_settings(), Hooks::new());

    let to = vec!["one@example.com", "bad entry", "two@example.com"];
    let request = SendRequest::new(to, "Report", "See attached")
        .headers(vec![
            "X-Campaign: autumn",
            "Bcc: audit@example.com",
            "Reply-To: help@example.com",
        ])
        .attachments("/var/reports/a.pdf\r\n/var/reports/b.csv");

    dispatcher.send(request).await.unwrap();
    let transport = factory.transport();

    assert_eq!(transport.recipients(RecipientKind::To).len(), 2);
    assert_eq!(transport.recipients(RecipientKind::Bcc).len(), 1);
    assert_eq!(
        transport.custom_headers(),
        vec![("X-Campaign".to_string(), "autumn".to_string())]
    );

    let attachments: Vec<AttachmentRef> = transport
        .recorded_calls()
        .into_iter()
        .filter_map(|call| match call {
            TransportCall::AddAttachment(a) => Some(a),
            _ => None,
        })
        .collect();
    assert_eq!(
        attachments,
        vec![
            AttachmentRef::new("/var/reports/a.pdf"),
            AttachmentRef::new("/var/reports/b.csv"),
        ]
    );
}

#[rstest]
#[case("smtp://mail.example.com", "mail.example.com", 25, SecurityMode::None)]
#[case("smtps://mail.example.com", "mail.example.com", 465, SecurityMode::Tls)]
#[case(
    "smtp+starttls://u:p@mail.example.com:2587",
    "mail.example.com",
    2587,
    SecurityMode::StartTls
)]
#[tokio::test]
async fn connection_string_reaches_factory(
    #[case] url: &str,
    #[case] host: &str,
    #[case] port: u16,
    #[case] security: SecurityMode,
) {
    let factory = MockTransportFactory::new();
    let settings = TransportSettings::builder().url(url).build();
    let dispatcher = dispatcher_with(&factory, settings, Hooks::new());

    dispatcher.send(test_request()).await.unwrap();

    let config = &factory.configs()[0];
    assert_eq!(config.host, host);
    assert_eq!(config.port, port);
    assert_eq!(config.security, security);
}

#[tokio::test]
async fn filters_shape_sender_and_charset() {
    let factory = MockTransportFactory::new();
    let hooks = Hooks::new()
        .filter_from(|_| "noreply@example.com".to_string())
        .filter_from_name(|name| format!("{} Team", name))
        .filter_charset(|_| "ISO-8859-1".to_string());
    let dispatcher = dispatcher_with(&factory, test_settings(), hooks);

    dispatcher.send(test_request()).await.unwrap();
    let transport = factory.transport();

    let from = transport.from().unwrap();
    assert_eq!(from.address(), "noreply@example.com");
    assert_eq!(from.name(), Some("Example Site Team"));
    assert!(transport
        .recorded_calls()
        .contains(&TransportCall::SetContentType(ContentType::Plain, "ISO-8859-1".to_string())));
}
