//! Reference patterns
//!
//! Fixed allow-lists of reference-carrying keys, the identifier and URL
//! token patterns, and URL helpers shared by extraction and rewriting.

use regex::Regex;
use std::sync::LazyLock;

/// Keys whose string value is an item identifier
pub const IDENTIFIER_KEYS: &[&str] = &[
    "itemId",
    "webmap",
    "webscene",
    "portalItemId",
    "sourceItemId",
    "targetItemId",
    "serviceItemId",
    "appid",
    "appId",
    "id",
];

/// Keys whose string value is a URL
pub const URL_KEYS: &[&str] = &[
    "url",
    "serviceUrl",
    "sourceUrl",
    "sourceServiceUrl",
    "layerUrl",
    "src",
    "embedUrl",
    "iframeSrc",
    "href",
];

/// Keys whose string value is a group identifier
pub const GROUP_KEYS: &[&str] = &[
    "groupId",
    "contentGroupId",
    "collaborationGroupId",
    "followersGroupId",
];

/// Keys whose string value is a bare hostname
pub const DOMAIN_KEYS: &[&str] = &["domain", "hostname", "customHostname", "defaultHostname"];

/// Keys whose string values are free text (scripts, markup)
pub const TEXT_KEYS: &[&str] = &[
    "script",
    "expression",
    "embedCode",
    "text",
    "markdown",
    "html",
    "content",
    "source",
];

/// What a key says about the value stored under it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Identifier,
    Url,
    Group,
    Domain,
    Text,
    Other,
}

impl KeyClass {
    /// Classifies a definition key against the allow-lists
    pub fn of(key: Option<&str>) -> Self {
        let Some(key) = key else {
            return KeyClass::Other;
        };
        if IDENTIFIER_KEYS.contains(&key) {
            KeyClass::Identifier
        } else if URL_KEYS.contains(&key) {
            KeyClass::Url
        } else if GROUP_KEYS.contains(&key) {
            KeyClass::Group
        } else if DOMAIN_KEYS.contains(&key) {
            KeyClass::Domain
        } else if TEXT_KEYS.contains(&key) {
            KeyClass::Text
        } else {
            KeyClass::Other
        }
    }
}

/// Identifier-shaped token on word boundaries
pub static ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-f]{32}\b").expect("valid identifier pattern"));

/// Either a URL or a bare identifier token, whichever starts first
pub static TEXT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<url>https?://[^\s<>"'{}|\\^`\[\]]+)|(?P<id>\b[0-9a-f]{32}\b)"#)
        .expect("valid text token pattern")
});

/// Alphanumeric runs too long to be a single identifier
pub static LONG_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9A-Za-z_]{33,}").expect("valid long run pattern"));

static SERVICE_BASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(.*?/(?:Feature|Map|VectorTile|Vector|Image|Scene|Geocode|GP)Server)(?:[/?#].*)?$",
    )
    .expect("valid service base pattern")
});

static DASHBOARD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/apps/(?:dashboards/(?:#/)?|opsdashboard/index\.html#/)([0-9a-f]{32})")
        .expect("valid dashboard link pattern")
});

static APPLICATION_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(?:apps|home)/[^?#\s]*[?&#](?:appid|id|webmap|webscene|portalItem)=([0-9a-f]{32})",
    )
    .expect("valid application link pattern")
});

/// Experiences, stories and collections addressed by path
static HOSTED_APP_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(?:experience|stories|collections|briefings)/([0-9a-f]{32})\b")
        .expect("valid hosted app link pattern")
});

static ITEM_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/home/item\.html\?id=|/items/)([0-9a-f]{32})")
        .expect("valid item link pattern")
});

/// Path shape of a URL found in free text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlShape {
    /// Item details page or content endpoint
    ItemLink,
    DashboardLink,
    ApplicationLink,
    /// REST service endpoint
    ServiceLink,
    Other,
}

impl UrlShape {
    /// Classifies a URL by its path shape
    pub fn classify(url: &str) -> Self {
        if DASHBOARD_LINK.is_match(url) {
            UrlShape::DashboardLink
        } else if APPLICATION_LINK.is_match(url) || HOSTED_APP_LINK.is_match(url) {
            UrlShape::ApplicationLink
        } else if ITEM_LINK.is_match(url) {
            UrlShape::ItemLink
        } else if url.contains("/rest/services/") || SERVICE_BASE.is_match(url) {
            UrlShape::ServiceLink
        } else {
            UrlShape::Other
        }
    }

    /// Returns true if the shape carries an item identifier
    pub fn carries_identifier(&self) -> bool {
        matches!(
            self,
            UrlShape::ItemLink | UrlShape::DashboardLink | UrlShape::ApplicationLink
        )
    }
}

/// Returns the (scheme://authority, rest) split of an absolute URL
fn split_authority(url: &str) -> Option<(&str, &str)> {
    let scheme_end = url.find("://")? + 3;
    let rest = &url[scheme_end..];
    let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(url.split_at(scheme_end + authority_len))
}

/// Normalizes a URL for table keys: lowercase scheme and host, no trailing slash
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let mut normalized = match split_authority(url) {
        Some((head, rest)) => format!("{}{}", head.to_ascii_lowercase(), rest),
        None => url.to_string(),
    };
    while normalized.ends_with('/') && !normalized.ends_with("://") {
        normalized.pop();
    }
    normalized
}

/// Returns the lowercase host of an absolute URL
pub fn host_of(url: &str) -> Option<String> {
    let (head, _) = split_authority(url)?;
    let authority = &head[head.find("://")? + 3..];
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Replaces the host of an absolute URL, keeping scheme, port and path
pub fn replace_host(url: &str, new_host: &str) -> Option<String> {
    let (head, rest) = split_authority(url)?;
    let scheme_end = head.find("://")? + 3;
    let authority = &head[scheme_end..];
    let port = authority.rsplit_once(':').map(|(_, p)| p).filter(|p| p.chars().all(|c| c.is_ascii_digit()));
    Some(match port {
        Some(port) => format!("{}{}:{}{}", &head[..scheme_end], new_host, port, rest),
        None => format!("{}{}{}", &head[..scheme_end], new_host, rest),
    })
}

/// Splits a URL ending in a numeric path segment into (parent, index)
pub fn numeric_tail(url: &str) -> Option<(&str, u32)> {
    let trimmed = url.trim_end_matches('/');
    let (parent, last) = trimmed.rsplit_once('/')?;
    if parent.ends_with(':') || parent.ends_with('/') {
        return None;
    }
    // Layer indexes are short; a long digit run is an identifier
    if last.is_empty() || last.len() > 9 || !last.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = last.parse().ok()?;
    Some((parent, index))
}

/// Derives the service base URL of an item or layer URL
///
/// The base ends at the `/<Type>Server` segment when one is present;
/// otherwise a trailing numeric layer segment is dropped. URLs of neither
/// shape have no service base.
pub fn service_base(url: &str) -> Option<String> {
    let normalized = normalize_url(url);
    if let Some(caps) = SERVICE_BASE.captures(&normalized) {
        return Some(caps[1].to_string());
    }
    numeric_tail(&normalized).map(|(parent, _)| parent.to_string())
}

/// Returns true if `url` addresses a service or one of its layers
pub fn is_service_url(url: &str) -> bool {
    UrlShape::classify(url) == UrlShape::ServiceLink || service_base(url).is_some()
}

/// Splits trailing sentence punctuation off a URL matched in prose
pub fn trim_url_punctuation(url: &str) -> (&str, &str) {
    let trimmed = url.trim_end_matches(['.', ',', ';', ':', ')', '!']);
    url.split_at(trimmed.len())
}
