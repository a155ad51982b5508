//! URL handling for archived snapshots
//!
//! This module projects archive URLs into the two identities the scheduler
//! cares about (`UrlKey` for cross-timestamp grouping, `UrlHost` for
//! diversity constraints), extracts media file extensions, and parses and
//! composes archive snapshot URLs of the form
//! `<base>/<timestamp><modifier>/<original-url>`.

use crate::UrlError;
use url::Url;

/// Common two-part public suffixes that need three labels for a registered domain.
///
/// A full public-suffix list is overkill for an archived web that is mostly
/// 1990s-2000s hosting; this covers the suffixes that actually appear there.
const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "co.jp", "ne.jp", "or.jp", "ac.jp", "com.au", "net.au",
    "org.au", "com.br", "com.mx", "co.kr", "co.nz", "com.tw", "co.za",
];

/// Computes a snapshot's `UrlKey`: the URL with its query and fragment
/// stripped, host lowercased, and default port removed.
///
/// Snapshots of the same resource captured at different timestamps share a
/// `UrlKey`, which is what the publish recency cool-down groups on.
///
/// # Examples
///
/// ```
/// use waymark::url::url_key;
///
/// let key = url_key("http://www.example.com/page.html?cache=123#top").unwrap();
/// assert_eq!(key, "http://www.example.com/page.html");
/// ```
pub fn url_key(url_str: &str) -> Result<String, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(e.to_string()))?;

    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Extracts the full lowercase host from a URL.
pub fn url_host(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    url.host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingHost)
}

/// Reduces a host to its registered domain (e.g. `pages.example.co.uk`
/// becomes `example.co.uk`).
///
/// Used for the host-diversity cool-down and for cross-subdomain asset
/// recovery, where `media.example.com` and `www.example.com` must count as
/// the same site.
pub fn registered_domain(host: &str) -> String {
    let host = host.to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();

    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let take = if TWO_PART_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };

    if labels.len() <= take {
        host
    } else {
        labels[labels.len() - take..].join(".")
    }
}

/// Retrieves the lowercase file extension from a media URL's path, or None
/// if the path has no extension.
pub fn media_extension(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let path = url.path().to_lowercase();
    let filename = path.rsplit('/').next()?;
    let (stem, extension) = filename.rsplit_once('.')?;

    if stem.is_empty() || extension.is_empty() {
        None
    } else {
        Some(extension.to_string())
    }
}

/// The components of an archive snapshot URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUrl {
    /// 14-digit capture timestamp (YYYYMMDDHHMMSS)
    pub timestamp: String,

    /// Optional rendering modifier (e.g. "if_" for frame pages, "oe_" for media)
    pub modifier: Option<String>,

    /// The original URL as captured
    pub url: String,
}

/// Modifier that renders a snapshot without the archive's toolbar chrome.
pub const FRAME_MODIFIER: &str = "if_";

/// Modifier that serves a media snapshot as its raw bytes.
pub const MEDIA_MODIFIER: &str = "oe_";

impl SnapshotUrl {
    /// Divides an archive snapshot URL into its components.
    ///
    /// Expects `<base>/<timestamp><modifier>/<original-url>` where the base
    /// is the configured playback endpoint.
    pub fn parse(base: &str, url_str: &str) -> Result<Self, UrlError> {
        let base = base.trim_end_matches('/');
        let rest = url_str
            .strip_prefix(base)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| UrlError::NotSnapshotUrl(url_str.to_string()))?;

        let (stamp_part, original) = rest
            .split_once('/')
            .ok_or_else(|| UrlError::NotSnapshotUrl(url_str.to_string()))?;

        let digits: String = stamp_part.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(UrlError::NotSnapshotUrl(url_str.to_string()));
        }

        let modifier_part = &stamp_part[digits.len()..];
        let modifier = if modifier_part.is_empty() {
            None
        } else {
            Some(modifier_part.to_string())
        };

        Ok(Self {
            timestamp: digits,
            modifier,
            url: original.to_string(),
        })
    }

    /// Combines the components back into a playback URL under `base`.
    pub fn compose(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        let modifier = self.modifier.as_deref().unwrap_or("");
        format!("{}/{}{}/{}", base, self.timestamp, modifier, self.url)
    }
}

/// Extracts the four-digit year from a 14-digit capture timestamp.
pub fn timestamp_year(timestamp: &str) -> Option<i32> {
    timestamp.get(0..4)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_key_strips_query_and_fragment() {
        let key = url_key("http://example.com/a/b.html?x=1&y=2#frag").unwrap();
        assert_eq!(key, "http://example.com/a/b.html");
    }

    #[test]
    fn test_url_key_lowercases_host_only() {
        let key = url_key("http://WWW.Example.COM/Path/File.HTML").unwrap();
        assert_eq!(key, "http://www.example.com/Path/File.HTML");
    }

    #[test]
    fn test_url_key_groups_timestamp_variants() {
        let a = url_key("http://example.com/game.swf?1234").unwrap();
        let b = url_key("http://example.com/game.swf?5678").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_url_key_rejects_other_schemes() {
        assert!(url_key("ftp://example.com/file").is_err());
        assert!(url_key("javascript:void(0)").is_err());
    }

    #[test]
    fn test_url_host() {
        assert_eq!(
            url_host("http://Media.Example.com:8080/x").unwrap(),
            "media.example.com"
        );
    }

    #[test]
    fn test_registered_domain_simple() {
        assert_eq!(registered_domain("example.com"), "example.com");
        assert_eq!(registered_domain("www.example.com"), "example.com");
        assert_eq!(registered_domain("a.b.example.com"), "example.com");
    }

    #[test]
    fn test_registered_domain_two_part_suffix() {
        assert_eq!(registered_domain("www.example.co.uk"), "example.co.uk");
        assert_eq!(registered_domain("example.co.jp"), "example.co.jp");
    }

    #[test]
    fn test_media_extension() {
        assert_eq!(
            media_extension("http://example.com/sounds/theme.MID"),
            Some("mid".to_string())
        );
        assert_eq!(
            media_extension("http://example.com/movie.swf?cache=1"),
            Some("swf".to_string())
        );
        assert_eq!(media_extension("http://example.com/plain"), None);
        assert_eq!(media_extension("http://example.com/"), None);
    }

    #[test]
    fn test_snapshot_url_roundtrip() {
        let base = "https://archive.example.org/web";
        let parts = SnapshotUrl::parse(
            base,
            "https://archive.example.org/web/19961022173245if_/http://www.geocities.com/",
        )
        .unwrap();

        assert_eq!(parts.timestamp, "19961022173245");
        assert_eq!(parts.modifier.as_deref(), Some("if_"));
        assert_eq!(parts.url, "http://www.geocities.com/");

        assert_eq!(
            parts.compose(base),
            "https://archive.example.org/web/19961022173245if_/http://www.geocities.com/"
        );
    }

    #[test]
    fn test_snapshot_url_without_modifier() {
        let base = "https://archive.example.org/web";
        let parts =
            SnapshotUrl::parse(base, "https://archive.example.org/web/20010101000000/http://a.com/b")
                .unwrap();

        assert_eq!(parts.timestamp, "20010101000000");
        assert_eq!(parts.modifier, None);
        assert_eq!(parts.url, "http://a.com/b");
    }

    #[test]
    fn test_snapshot_url_rejects_foreign_urls() {
        let base = "https://archive.example.org/web";
        assert!(SnapshotUrl::parse(base, "http://example.com/page").is_err());
        assert!(SnapshotUrl::parse(base, "https://archive.example.org/web/notatimestamp/x").is_err());
    }

    #[test]
    fn test_timestamp_year() {
        assert_eq!(timestamp_year("19961022173245"), Some(1996));
        assert_eq!(timestamp_year("123"), None);
    }
}
