//! Cookie text interface.
//!
//! Cookies cross the host boundary as plain text: a `Set-Cookie`-style
//! string on write and a `name=value; name2=value2` header on read. This
//! module builds and parses that text and provides [`MemoryCookieJar`], a
//! jar with the same observable semantics as a browser document.

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::debug;

/// Expiry used to delete a cookie.
pub const EXPIRED_DATE: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// Second-level labels that form part of a registrable suffix
/// (`co.uk`, `com.au`, ...).
const SECOND_LEVEL_LABELS: &[&str] = &[
    "ac", "co", "com", "edu", "gob", "go", "gov", "mil", "ne", "net", "or", "org",
];

/// Host-side cookie storage.
///
/// Mirrors the `document.cookie` accessor pair: reading yields every visible
/// cookie as one header string, writing applies a single cookie text.
pub trait CookieJar: Send + Sync {
    /// All visible cookies as `name=value` pairs joined by `"; "`.
    fn cookie_header(&self) -> String;

    /// Apply one cookie text (`name=value; expires=...; path=/...`).
    fn apply(&self, cookie_text: &str);
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    /// Attribute value as written into the cookie text.
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

impl std::fmt::Display for SameSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lax" => Ok(SameSite::Lax),
            "strict" => Ok(SameSite::Strict),
            "none" => Ok(SameSite::None),
            _ => Err(format!("Unknown samesite mode: {}", s)),
        }
    }
}

/// Attributes applied to every cookie written by the storage adapter.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub days_to_live: u32,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            domain: None,
            secure: false,
            same_site: None,
            days_to_live: 365,
        }
    }
}

/// Format a timestamp as an RFC 1123 HTTP date.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an RFC 1123 / RFC 2822 date as found in an `expires` attribute.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Build the text that sets `name=value` with the configured attributes.
pub fn set_cookie_text(
    name: &str,
    value: &str,
    options: &CookieOptions,
    now: DateTime<Utc>,
) -> String {
    let expires = now + Duration::days(i64::from(options.days_to_live));
    let mut text = format!(
        "{}={}; expires={}; path=/",
        name,
        value,
        format_http_date(expires)
    );
    if let Some(domain) = &options.domain {
        text.push_str("; domain=");
        text.push_str(domain);
    }
    if options.secure {
        text.push_str("; secure");
    }
    if let Some(same_site) = options.same_site {
        text.push_str("; samesite=");
        text.push_str(same_site.as_str());
    }
    text
}

/// Build the text that expires `name`.
pub fn delete_cookie_text(name: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) => format!(
            "{}=; expires={}; path=/; domain={}",
            name, EXPIRED_DATE, domain
        ),
        None => format!("{}=; expires={}; path=/", name, EXPIRED_DATE),
    }
}

/// Find the value of `name` in a cookie header.
///
/// Each pair is percent-decoded on its own; a malformed pair is skipped so
/// it cannot hide a well-formed one.
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    for bit in header.split(';') {
        let Some(decoded) = percent_decode(bit) else {
            debug!(cookie = %bit.trim(), "Skipping undecodable cookie");
            continue;
        };
        let decoded = decoded.trim_start_matches(' ');
        if let Some(value) = decoded.strip_prefix(&prefix) {
            return Some(value.to_string());
        }
    }

    None
}

/// Strict percent-decoding: a truncated escape or invalid UTF-8 yields `None`.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b))?;
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b))?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Collapse a page host to the domain cookies should be scoped to.
///
/// `www.constructor.co.uk` becomes `constructor.co.uk` and
/// `a.b.constructor.com.au` becomes `constructor.com.au`. Single-label
/// hosts and IP addresses have no root domain.
pub fn root_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.contains(':') || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let n = labels.len();
    if n < 2 {
        return None;
    }

    let tld = labels[n - 1];
    let sld = labels[n - 2];
    let keep = if n >= 3 && tld.len() == 2 && SECOND_LEVEL_LABELS.contains(&sld) {
        3
    } else {
        2
    };

    Some(labels[n - keep..].join("."))
}

/// In-memory cookie jar with document-cookie semantics.
///
/// Cookies keep their creation order; writing an expired cookie removes it.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemoryCookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a jar pre-populated from cookie texts.
    pub fn with_cookies<I, S>(cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let jar = Self::new();
        for cookie in cookies {
            jar.apply(cookie.as_ref());
        }
        jar
    }

    /// Raw stored value of `name`, without decoding.
    pub fn get(&self, name: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// Number of stored cookies.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the jar holds no cookies.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header(&self) -> String {
        self.lock()
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn apply(&self, cookie_text: &str) {
        let mut parts = cookie_text.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut expired = false;
        for attribute in parts {
            let Some((key, attr_value)) = attribute.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "expires" => {
                    if let Some(at) = parse_http_date(attr_value) {
                        expired = at <= now;
                    }
                }
                "max-age" => {
                    if let Ok(seconds) = attr_value.trim().parse::<i64>() {
                        expired = seconds <= 0;
                    }
                }
                _ => {}
            }
        }

        let mut entries = self.lock();
        let position = entries.iter().position(|(n, _)| *n == name);
        match (position, expired) {
            (Some(index), true) => {
                entries.remove(index);
            }
            (Some(index), false) => entries[index].1 = value.trim().to_string(),
            (None, false) => entries.push((name, value.trim().to_string())),
            (None, true) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_set_cookie_text_has_expiry_and_path() {
        let text = set_cookie_text("mewantcookie", "meeatcookie", &CookieOptions::default(), fixed_now());
        assert_eq!(
            text,
            "mewantcookie=meeatcookie; expires=Sat, 01 Mar 2025 12:00:00 GMT; path=/"
        );
    }

    #[test]
    fn test_set_cookie_text_with_all_attributes() {
        let options = CookieOptions {
            domain: Some("constructor.co.uk".to_string()),
            secure: true,
            same_site: Some(SameSite::Strict),
            days_to_live: 1,
        };
        let text = set_cookie_text("id", "abc", &options, fixed_now());
        assert_eq!(
            text,
            "id=abc; expires=Sat, 02 Mar 2024 12:00:00 GMT; path=/; domain=constructor.co.uk; secure; samesite=Strict"
        );
    }

    #[test]
    fn test_find_cookie() {
        let header = "melikecookie=omnomnom; other=1";
        assert_eq!(find_cookie(header, "melikecookie"), Some("omnomnom".to_string()));
        assert_eq!(find_cookie(header, "other"), Some("1".to_string()));
        assert_eq!(find_cookie(header, "missing"), None);
        assert_eq!(find_cookie("", "missing"), None);
    }

    #[test]
    fn test_find_cookie_skips_badly_encoded_neighbour() {
        let header = "badly=encoded%cookie; melikecookie=omnomnom";
        assert_eq!(find_cookie(header, "melikecookie"), Some("omnomnom".to_string()));
        assert_eq!(find_cookie(header, "badly"), None);
    }

    #[test]
    fn test_find_cookie_decodes_values() {
        let header = "session=%7B%22sessionId%22%3A3%7D";
        assert_eq!(find_cookie(header, "session"), Some("{\"sessionId\":3}".to_string()));
    }

    #[test]
    fn test_find_cookie_requires_exact_name() {
        let header = "ConstructorioAB_client_id_old=x; ConstructorioAB_client_id=y";
        assert_eq!(find_cookie(header, "ConstructorioAB_client_id"), Some("y".to_string()));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), Some("a b".to_string()));
        assert_eq!(percent_decode("%E2%9C%93"), Some("\u{2713}".to_string()));
        assert_eq!(percent_decode("bad%zz"), None);
        assert_eq!(percent_decode("trailing%2"), None);
        assert_eq!(percent_decode("%FF"), None);
    }

    #[test]
    fn test_root_domain() {
        assert_eq!(root_domain("www.constructor.co.uk"), Some("constructor.co.uk".to_string()));
        assert_eq!(
            root_domain("subdomain1.subdomain2.constructor.com.au"),
            Some("constructor.com.au".to_string())
        );
        assert_eq!(root_domain("shop.example.com"), Some("example.com".to_string()));
        assert_eq!(root_domain("example.com"), Some("example.com".to_string()));
        assert_eq!(root_domain("localhost"), None);
        assert_eq!(root_domain("127.0.0.1"), None);
        assert_eq!(root_domain(""), None);
    }

    #[test]
    fn test_http_date_roundtrip_parse() {
        let parsed = parse_http_date("Tue, 19 Jan 2038 03:14:07 GMT").unwrap();
        assert_eq!(format_http_date(parsed), "Tue, 19 Jan 2038 03:14:07 GMT");
        assert!(parse_http_date(EXPIRED_DATE).is_some());
        assert!(parse_http_date("not a date").is_none());
    }

    #[test]
    fn test_samesite_from_str() {
        assert_eq!("lax".parse::<SameSite>(), Ok(SameSite::Lax));
        assert_eq!("Strict".parse::<SameSite>(), Ok(SameSite::Strict));
        assert!("sometimes".parse::<SameSite>().is_err());
    }

    #[test]
    fn test_memory_jar_set_and_read() {
        let jar = MemoryCookieJar::new();
        jar.apply("mewantcookie=meeatcookie; expires=Tue, 19 Jan 2038 03:14:07 GMT; path=/");
        assert_eq!(jar.cookie_header(), "mewantcookie=meeatcookie");
    }

    #[test]
    fn test_memory_jar_delete_matching_cookie() {
        let jar = MemoryCookieJar::with_cookies([
            "dummyname=dummyid; expires=Tue, 19 Jan 2038 03:14:07 GMT; path=/",
            "deleteme=now; expires=Tue, 19 Jan 2038 03:14:07 GMT; path=/",
        ]);
        jar.apply(&delete_cookie_text("deleteme", None));
        assert_eq!(jar.cookie_header(), "dummyname=dummyid");
    }

    #[test]
    fn test_memory_jar_delete_skips_non_matching_cookie() {
        let jar = MemoryCookieJar::with_cookies([
            "dummyname=dummyid; expires=Tue, 19 Jan 2038 03:14:07 GMT; path=/",
            "skipme=now; expires=Tue, 19 Jan 2038 03:14:07 GMT; path=/",
        ]);
        jar.apply(&delete_cookie_text("deleteme", None));
        assert_eq!(jar.cookie_header(), "dummyname=dummyid; skipme=now");
    }

    #[test]
    fn test_memory_jar_overwrite_keeps_order() {
        let jar = MemoryCookieJar::with_cookies(["a=1", "b=2"]);
        jar.apply("a=3; path=/");
        assert_eq!(jar.cookie_header(), "a=3; b=2");
        assert_eq!(jar.len(), 2);
    }
}
