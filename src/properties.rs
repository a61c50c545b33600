//! URL property extraction.
//!
//! Rule conditions are evaluated against the properties of the visited URL:
//! the usual URL components plus the domain hierarchy derived from the
//! public suffix list.
//!
//! ```text
//! foo.bar.example.com     QLD = bar     RLD = foo.bar   SLD = example.com   TLD = com
//! search.yahoo.co.jp      QLD = search  RLD = search    SLD = yahoo.co.jp   TLD = co.jp
//! ```

use crate::error::ResolveError;
use crate::expression::Value;
use url::Url;

/// Names a rule may refer to through a `Property` expression.
pub const PROPERTY_NAMES: &[&str] = &[
    "URL", "href", "protocol", "auth", "host", "hostname", "port", "pathname", "search", "query",
    "path", "hash", "TLD", "SLD", "RLD", "QLD",
];

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet {
    /// The URL exactly as it was supplied.
    pub url: String,
    pub href: String,
    /// Scheme including the trailing colon, e.g. `https:`.
    pub protocol: String,
    pub auth: Option<String>,
    pub host: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub pathname: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
    /// Query string without the leading `?`, or empty.
    pub query: String,
    /// Path plus search.
    pub path: String,
    /// Fragment including the leading `#`, or empty.
    pub hash: String,
    pub tld: String,
    pub sld: String,
    pub rld: String,
    pub qld: String,
}

/// The public suffix, registered domain and subdomain chain of a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    pub tld: String,
    pub sld: String,
    pub rld: String,
}

impl DomainParts {
    /// Split a host against the public suffix list.
    ///
    /// Returns `None` when the host has no known public suffix or no
    /// registrable domain under it (bare suffixes, IP addresses, `localhost`).
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_lowercase();
        if host.is_empty() {
            return None;
        }

        let domain = psl::domain(host.as_bytes())?;
        let suffix = domain.suffix();
        if !suffix.is_known() {
            return None;
        }

        let sld = std::str::from_utf8(domain.as_bytes()).ok()?.to_string();
        let tld = std::str::from_utf8(suffix.as_bytes()).ok()?.to_string();
        if sld.is_empty() || tld.is_empty() {
            return None;
        }

        let rld = host
            .strip_suffix(sld.as_str())
            .map(|prefix| prefix.trim_end_matches('.').to_string())
            .unwrap_or_default();

        Some(Self { tld, sld, rld })
    }
}

impl PropertySet {
    pub fn from_url(location: &str) -> Result<Self, ResolveError> {
        let parsed =
            Url::parse(location).map_err(|e| ResolveError::InvalidUrl(format!("{location}: {e}")))?;

        let hostname = parsed
            .host_str()
            .ok_or_else(|| ResolveError::InvalidUrl(format!("{location}: no host")))?
            .to_lowercase();

        let parts = DomainParts::from_host(&hostname).ok_or_else(|| {
            ResolveError::InvalidUrl(format!("{location}: no public suffix for {hostname}"))
        })?;

        let qld = parts
            .rld
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string();

        let port = parsed.port();
        let host = match port {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.clone(),
        };

        let auth = match (parsed.username(), parsed.password()) {
            ("", None) => None,
            (user, None) => Some(user.to_string()),
            (user, Some(password)) => Some(format!("{user}:{password}")),
        };

        let query = parsed.query().unwrap_or_default().to_string();
        let search = if query.is_empty() {
            String::new()
        } else {
            format!("?{query}")
        };
        let hash = parsed
            .fragment()
            .filter(|f| !f.is_empty())
            .map(|f| format!("#{f}"))
            .unwrap_or_default();
        let pathname = parsed.path().to_string();

        Ok(Self {
            url: location.to_string(),
            href: parsed.as_str().to_string(),
            protocol: format!("{}:", parsed.scheme()),
            auth,
            path: format!("{pathname}{search}"),
            host,
            hostname,
            port,
            pathname,
            search,
            query,
            hash,
            tld: parts.tld,
            sld: parts.sld,
            rld: parts.rld,
            qld,
        })
    }

    /// Look up a property by the name rules use for it.
    pub fn get(&self, name: &str) -> Value {
        let text = |s: &str| Value::Str(s.to_string());
        match name {
            "URL" => text(&self.url),
            "href" => text(&self.href),
            "protocol" => text(&self.protocol),
            "auth" => self.auth.as_deref().map(text).unwrap_or(Value::Null),
            "host" => text(&self.host),
            "hostname" => text(&self.hostname),
            "port" => self
                .port
                .map(|p| Value::Str(p.to_string()))
                .unwrap_or(Value::Null),
            "pathname" => text(&self.pathname),
            "search" => text(&self.search),
            "query" => text(&self.query),
            "path" => text(&self.path),
            "hash" => text(&self.hash),
            "TLD" => text(&self.tld),
            "SLD" => text(&self.sld),
            "RLD" => text(&self.rld),
            "QLD" => text(&self.qld),
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_hierarchy() {
        let props = PropertySet::from_url("https://foo.bar.example.com/a?b=c#d").unwrap();
        assert_eq!(props.tld, "com");
        assert_eq!(props.sld, "example.com");
        assert_eq!(props.rld, "foo.bar");
        assert_eq!(props.qld, "bar");
        assert_eq!(props.pathname, "/a");
        assert_eq!(props.search, "?b=c");
        assert_eq!(props.query, "b=c");
        assert_eq!(props.hash, "#d");
        assert_eq!(props.path, "/a?b=c");
    }

    #[test]
    fn test_multi_label_suffix() {
        let props = PropertySet::from_url("https://search.yahoo.co.jp/").unwrap();
        assert_eq!(props.tld, "co.jp");
        assert_eq!(props.sld, "yahoo.co.jp");
        assert_eq!(props.rld, "search");
        assert_eq!(props.qld, "search");
    }

    #[test]
    fn test_no_subdomain() {
        let props = PropertySet::from_url("http://example.org:8080/").unwrap();
        assert_eq!(props.rld, "");
        assert_eq!(props.qld, "");
        assert_eq!(props.host, "example.org:8080");
        assert_eq!(props.hostname, "example.org");
        assert_eq!(props.get("port"), Value::Str("8080".to_string()));
        assert_eq!(props.get("protocol"), Value::Str("http:".to_string()));
    }

    #[test]
    fn test_invalid_hosts() {
        for location in [
            "not a url",
            "https://localhost/",
            "http://127.0.0.1/page",
            "https://com/",
            "https://example.notarealsuffix/",
            "mailto:someone@example.com",
        ] {
            assert!(
                matches!(PropertySet::from_url(location), Err(ResolveError::InvalidUrl(_))),
                "{location} should be invalid"
            );
        }
    }

    #[test]
    fn test_get_unknown_property() {
        let props = PropertySet::from_url("https://example.com/").unwrap();
        assert_eq!(props.get("nope"), Value::Null);
        assert_eq!(props.get("URL"), Value::Str("https://example.com/".to_string()));
    }
}
