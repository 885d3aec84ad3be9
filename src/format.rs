//! String `format` checks.

use chrono::{DateTime, NaiveDate};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// A string that does not match its declared format. Displays as the
/// violation message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("expected string to be {0}")]
    Invalid(&'static str),

    #[error("expected string to be {0}: {1}")]
    Diagnosed(&'static str, String),
}

/// Checks `s` against a named format. Unknown formats always pass.
pub fn check(format: &str, s: &str) -> Result<(), FormatError> {
    use FormatError::*;

    match format {
        "date-time" => DateTime::parse_from_rfc3339(s)
            .map(drop)
            .map_err(|_| Invalid("RFC 3339 date-time")),
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(drop)
            .map_err(|_| Invalid("RFC 3339 date")),
        "time" => DateTime::parse_from_rfc3339(&format!("1970-01-01T{}", s))
            .map(drop)
            .map_err(|_| Invalid("RFC 3339 time")),
        "email" | "idn-email" => email(s).map_err(|e| Diagnosed("RFC 5322 email", e.to_owned())),
        "hostname" => ok_if(is_hostname(s), "RFC 5890 hostname"),
        "idn-hostname" => ok_if(is_idn_hostname(s), "RFC 5890 hostname"),
        "ipv4" => ok_if(s.parse::<Ipv4Addr>().is_ok(), "RFC 2673 ipv4"),
        "ipv6" => ok_if(s.parse::<Ipv6Addr>().is_ok(), "RFC 2373 ipv6"),
        "uri" | "iri" => Url::parse(s)
            .map(drop)
            .map_err(|e| Diagnosed("RFC 3986 uri", e.to_string())),
        "uri-template" => {
            let expanded = expand_template(s).ok_or(Invalid("RFC 6570 uri-template"))?;
            uri_reference(&expanded).map_err(|e| Diagnosed("RFC 3986 uri", e))
        }
        "uuid" => uuid::Uuid::parse_str(s)
            .map(drop)
            .map_err(|e| Diagnosed("RFC 4122 uuid", e.to_string())),
        "json-pointer" => ok_if(is_json_pointer(s), "RFC 6901 json-pointer"),
        "relative-json-pointer" => {
            ok_if(is_relative_json_pointer(s), "RFC 6901 relative-json-pointer")
        }
        "regex" => regex::Regex::new(s)
            .map(drop)
            .map_err(|e| Diagnosed("regex", regex_diagnostic(e))),
        _ => Ok(()),
    }
}

fn ok_if(valid: bool, standard: &'static str) -> Result<(), FormatError> {
    if valid {
        Ok(())
    } else {
        Err(FormatError::Invalid(standard))
    }
}

/// Accepts `local@domain` or `Display Name <local@domain>`.
fn email(s: &str) -> Result<(), &'static str> {
    let addr = match (s.find('<'), s.strip_suffix('>')) {
        (Some(open), Some(rest)) => &rest[open + 1..],
        (Some(_), None) => return Err("unclosed angle-addr"),
        _ => s.trim(),
    };

    let at = addr.rfind('@').ok_or("missing '@' or angle-addr")?;
    let (local, domain) = (&addr[..at], &addr[at + 1..]);

    if local.is_empty() {
        return Err("no local part");
    }
    let quoted = local.len() >= 2 && local.starts_with('"') && local.ends_with('"');
    if !quoted {
        if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
            return Err("misplaced '.' in local part");
        }
        if !local.chars().all(is_atext_or_dot) {
            return Err("invalid character in local part");
        }
    }

    if domain.is_empty() {
        return Err("no domain");
    }
    if let Some(literal) = domain.strip_prefix('[').and_then(|d| d.strip_suffix(']')) {
        let ip = literal.strip_prefix("IPv6:").unwrap_or(literal);
        if ip.parse::<std::net::IpAddr>().is_err() {
            return Err("invalid domain literal");
        }
        return Ok(());
    }
    if !is_idn_hostname(domain) {
        return Err("invalid domain");
    }
    Ok(())
}

fn is_atext_or_dot(c: char) -> bool {
    c.is_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c)
}

fn is_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

fn is_idn_hostname(s: &str) -> bool {
    match Host::parse(s) {
        Ok(Host::Domain(ascii)) => is_hostname(&ascii),
        Ok(Host::Ipv4(_)) => is_hostname(s),
        _ => false,
    }
}

/// Replaces every `{expression}` with a plain token, or returns `None` if
/// the braces are unbalanced or an expression is empty.
fn expand_template(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find(|c| c == '{' || c == '}') {
        if rest.as_bytes()[open] == b'}' {
            return None;
        }
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let close = tail.find('}')?;
        let expr = &tail[..close];
        if expr.is_empty() || expr.contains('{') {
            return None;
        }
        out.push('x');
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// Accepts absolute URIs and relative references.
fn uri_reference(s: &str) -> Result<(), String> {
    match Url::parse(s) {
        Ok(_) => Ok(()),
        Err(url::ParseError::RelativeUrlWithoutBase) if !s.starts_with(':') => {
            let base = Url::parse("http://localhost/").map_err(|e| e.to_string())?;
            base.join(s).map(drop).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn is_json_pointer(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if !s.starts_with('/') {
        return false;
    }
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '~' && !matches!(chars.next(), Some('0') | Some('1')) {
            return false;
        }
    }
    true
}

fn is_relative_json_pointer(s: &str) -> bool {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || (digits > 1 && s.starts_with('0')) {
        return false;
    }
    let rest = &s[digits..];
    rest == "#" || is_json_pointer(rest)
}

// Syntax errors render over several lines; keep the one naming the problem.
fn regex_diagnostic(err: regex::Error) -> String {
    let text = err.to_string();
    let line = text
        .lines()
        .rev()
        .find_map(|l| l.strip_prefix("error: "))
        .map(str::to_owned);
    line.unwrap_or(text)
}
