//! Address list parsing and mailbox validation.
//!
//! Recipient fields arrive from callers in many shapes: bare mailboxes,
//! `Name <mailbox>` pairs, quoted names containing commas, or legacy lists
//! where a naive comma split has torn entries apart. [`parse`] turns any of
//! these into an ordered list of validated [`Address`] values. Entries that
//! fail validation are skipped, never reported as errors.
//!
//! # Mailbox syntax
//!
//! The validator accepts a practical subset of RFC 5322 `addr-spec`:
//! - exactly one `local@domain` split, at most 254 octets overall
//! - local part of 1-64 octets: `atext` characters with single, inner dots,
//!   or a quoted string of printable ASCII
//! - domain of at most 253 octets with at least one dot; labels of 1-63
//!   ASCII alphanumerics or `-`, not starting or ending with `-`; the last
//!   label is not purely numeric
//!
//! Comments, domain literals and internationalized domains are rejected.

use crate::errors::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::types::{Address, AddressInput};

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Parses recipient input into validated addresses, preserving order.
///
/// Duplicates are kept; invalid entries are dropped.
pub fn parse(input: &AddressInput) -> Vec<Address> {
    match input {
        AddressInput::Single(s) => parse_str(s),
        AddressInput::List(entries) => entries.iter().flat_map(|e| parse_str(e)).collect(),
    }
}

/// Parses a comma-separated address list.
pub fn parse_str(input: &str) -> Vec<Address> {
    split_entries(input)
        .iter()
        .filter_map(|entry| match parse_one(entry) {
            Ok(address) => Some(address),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(entry = %entry, error = %_e, "Dropping invalid address entry");
                None
            }
        })
        .collect()
}

/// Parses a single `Name <mailbox>` or bare `mailbox` entry.
pub fn parse_one(entry: &str) -> DispatchResult<Address> {
    let entry = entry.trim();

    let (name, mailbox) = match find_unquoted(entry, '<') {
        Some(open) => {
            let rest = &entry[open + 1..];
            let mailbox = match rest.find('>') {
                Some(close) => &rest[..close],
                None => rest,
            };
            (unquote_name(&entry[..open]), mailbox.trim())
        }
        None => (String::new(), entry),
    };

    if mailbox.is_empty() {
        return Err(DispatchError::parse(
            DispatchErrorKind::InvalidAddress,
            format!("No mailbox in entry: {}", entry),
        ));
    }

    Address::new(name, mailbox)
}

/// Returns the byte offset of the first `needle` outside double quotes.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' && in_quote {
            escaped = true;
        } else if c == '"' {
            in_quote = !in_quote;
        } else if c == needle && !in_quote {
            return Some(i);
        }
    }
    None
}

/// Splits an address list on top-level commas.
///
/// Commas inside quoted display names do not split. Fragments that lost
/// their closing `>` get it back. A bare name fragment torn off by an
/// unquoted comma (`Doe, John <jd@example.com>`) is rejoined with the entry
/// that carries its mailbox, but only while no complete mailbox precedes it;
/// after one, a bare fragment is its own (invalid) entry.
pub fn split_entries(input: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quote = !in_quote;
            }
            ',' if !in_quote => fragments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fragments.push(current);

    let mut entries: Vec<String> = Vec::with_capacity(fragments.len());
    let mut pending_name: Option<String> = None;

    for fragment in fragments {
        let mut fragment = fragment.trim().to_string();
        if fragment.is_empty() {
            continue;
        }

        if fragment.contains('<') && !fragment.contains('>') {
            fragment.push('>');
        }

        if let Some(name) = pending_name.take() {
            if has_display_name(&fragment) {
                entries.push(format!("{}, {}", name, fragment));
                continue;
            }
            entries.push(name);
        }

        let after_mailbox = entries.last().is_some_and(|e| e.contains('@'));
        if !fragment.contains('@') && !fragment.contains('<') && !after_mailbox {
            pending_name = Some(fragment);
        } else {
            entries.push(fragment);
        }
    }

    if let Some(name) = pending_name {
        entries.push(name);
    }

    entries
}

fn has_display_name(fragment: &str) -> bool {
    match find_unquoted(fragment, '<') {
        Some(open) => {
            let name = fragment[..open].trim();
            !name.is_empty() && !name.starts_with('"') && !name.contains('@')
        }
        None => false,
    }
}

/// Trims a display name and unwraps one pair of matching quotes.
fn unquote_name(raw: &str) -> String {
    let name = raw.trim();
    let quoted = name.len() >= 2
        && ((name.starts_with('"') && name.ends_with('"'))
            || (name.starts_with('\'') && name.ends_with('\'')));

    if !quoted {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut chars = name[1..name.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out.trim().to_string()
}

/// Returns true if `mailbox` is a valid `local@domain` address.
pub fn is_valid_mailbox(mailbox: &str) -> bool {
    if mailbox.is_empty() || mailbox.len() > MAX_ADDRESS_LEN {
        return false;
    }
    if mailbox.chars().any(|c| c.is_control() || c.is_whitespace()) && !mailbox.starts_with('"') {
        return false;
    }

    let (local, domain) = match mailbox.rsplit_once('@') {
        Some(parts) => parts,
        None => return false,
    };

    is_valid_local(local) && is_valid_domain(domain)
}

fn is_valid_local(local: &str) -> bool {
    if local.is_empty() || local.len() > MAX_LOCAL_LEN {
        return false;
    }

    if local.len() >= 2 && local.starts_with('"') && local.ends_with('"') {
        return is_valid_quoted_local(&local[1..local.len() - 1]);
    }

    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    local.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || is_atext_special(c))
}

fn is_atext_special(c: char) -> bool {
    matches!(
        c,
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
            | '`' | '{' | '|' | '}' | '~'
    )
}

fn is_valid_quoted_local(inner: &str) -> bool {
    let mut escaped = false;
    for c in inner.chars() {
        if !(' '..='~').contains(&c) {
            return false;
        }
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return false;
        }
    }
    !escaped
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !domain.contains('.') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    // Rejects dotted IPv4 literals written without brackets
    let tld_ok = labels
        .last()
        .map(|tld| !tld.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);

    labels_ok && tld_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mailboxes(list: &[Address]) -> Vec<&str> {
        list.iter().map(|a| a.address.as_str()).collect()
    }

    #[test]
    fn test_named_address() {
        let list = parse_str("Name <a@b.com>");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Name");
        assert_eq!(list[0].address, "a@b.com");
    }

    #[test]
    fn test_invalid_entries_dropped() {
        let list = parse_str("good@x.com, not-an-email, also@y.com");
        assert_eq!(mailboxes(&list), vec!["good@x.com", "also@y.com"]);
    }

    #[test]
    fn test_quoted_name_with_comma() {
        let list = parse_str("\"Doe, John\" <john@example.com>, jane@example.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Doe, John");
        assert_eq!(list[1].address, "jane@example.com");
    }

    #[test]
    fn test_escaped_quotes_in_name() {
        let list = parse_str(r#""John \"JD\" Doe" <jd@example.com>"#);
        assert_eq!(list[0].name, "John \"JD\" Doe");

        let list = parse_str("'Single Quoted' <sq@example.com>");
        assert_eq!(list[0].name, "Single Quoted");
    }

    #[test]
    fn test_legacy_unquoted_comma_name() {
        let list = parse_str("Doe, John <john@example.com>, jane@example.com");
        assert_eq!(mailboxes(&list), vec!["john@example.com", "jane@example.com"]);
        assert_eq!(list[0].name, "Doe, John");
    }

    #[test]
    fn test_invalid_entry_not_glued_to_next_name() {
        let list = parse_str("good@x.com, not-an-email, Also <also@y.com>");
        assert_eq!(mailboxes(&list), vec!["good@x.com", "also@y.com"]);
        assert_eq!(list[1].name, "Also");
    }

    #[test]
    fn test_angle_bracket_inside_quoted_name() {
        let address = parse_one(r#""a<b" <c@d.com>"#).unwrap();
        assert_eq!(address.name, "a<b");
        assert_eq!(address.address, "c@d.com");

        let list = parse_str(r#""x<y" <x@example.com>, z@example.com"#);
        assert_eq!(mailboxes(&list), vec!["x@example.com", "z@example.com"]);
    }

    #[test]
    fn test_missing_closing_bracket_reattached() {
        let entries = split_entries("A <a@x.com>,B <b@y.com");
        assert_eq!(entries, vec!["A <a@x.com>", "B <b@y.com>"]);

        let list = parse_str("A <a@x.com>,B <b@y.com");
        assert_eq!(mailboxes(&list), vec!["a@x.com", "b@y.com"]);
    }

    #[test]
    fn test_bracket_then_bare_entries() {
        let list = parse_str("First <first@x.com>, second@y.com,third@z.org");
        assert_eq!(
            mailboxes(&list),
            vec!["first@x.com", "second@y.com", "third@z.org"]
        );
        assert_eq!(list[1].name, "");
    }

    #[test]
    fn test_duplicates_kept_in_order() {
        let list = parse_str("b@x.com, a@x.com, b@x.com");
        assert_eq!(mailboxes(&list), vec!["b@x.com", "a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_list_input() {
        let input = AddressInput::from(vec!["a@x.com, b@x.com", "Bad", "C <c@x.com>"]);
        let list = parse(&input);
        assert_eq!(mailboxes(&list), vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_str("").is_empty());
        assert!(parse_str(" , ,").is_empty());
        assert!(parse_one("Name <>").is_err());
    }

    #[rstest]
    #[case("simple@example.com")]
    #[case("first.last@sub.example.co.uk")]
    #[case("user+tag@example.com")]
    #[case("o'reilly@example.ie")]
    #[case("x@a-b.io")]
    #[case("\"john doe\"@example.com")]
    fn test_valid_mailboxes(#[case] mailbox: &str) {
        assert!(is_valid_mailbox(mailbox), "{} should be valid", mailbox);
    }

    #[rstest]
    #[case("")]
    #[case("plainaddress")]
    #[case("@example.com")]
    #[case("user@")]
    #[case("user@localhost")]
    #[case("two@@example.com")]
    #[case(".dot@example.com")]
    #[case("dot.@example.com")]
    #[case("do..t@example.com")]
    #[case("user@-example.com")]
    #[case("user@example..com")]
    #[case("user@192.168.0.1")]
    #[case("us er@example.com")]
    #[case("user@exa_mple.com")]
    fn test_invalid_mailboxes(#[case] mailbox: &str) {
        assert!(!is_valid_mailbox(mailbox), "{} should be invalid", mailbox);
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(65);
        assert!(!is_valid_mailbox(&format!("{}@example.com", local)));

        let label = "b".repeat(64);
        assert!(!is_valid_mailbox(&format!("a@{}.com", label)));
    }
}
