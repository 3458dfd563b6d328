// Storage path helpers
// Storage paths are slash-separated strings relative to the storage root, the
// first segment being the owning user's name ("testuser/docs/a.txt").

use url::Url;

use crate::error::BError;

/// Normalize a storage path into its key form: no empty segments, no leading
/// or trailing slash. The root is the empty string.
pub fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// The folder that contains `path`, in key form. The parent of a top-level
/// entry (and of the root) is the root.
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(idx) => normalized[..idx].to_string(),
        None => String::new(),
    }
}

/// The last segment of a path, if any.
pub fn file_name(path: &str) -> Option<&str> {
    segments(path).last()
}

/// Join a folder and an entry name.
pub fn join(folder: &str, name: &str) -> String {
    let folder = normalize(folder);
    let name = normalize(name);
    match (folder.is_empty(), name.is_empty()) {
        (true, _) => name,
        (_, true) => folder,
        _ => format!("{}/{}", folder, name),
    }
}

/// Parse a site base URL. An empty or unparseable site is `SiteUnset`.
pub fn parse_site(site: &str) -> Result<Url, BError> {
    let trimmed = site.trim();
    if trimmed.is_empty() {
        return Err(BError::site_unset("no site configured"));
    }
    let url = Url::parse(trimmed).map_err(|e| BError::site_unset(format!("{}: {}", trimmed, e)))?;
    if url.cannot_be_a_base() {
        return Err(BError::site_unset(format!("{} cannot be a base URL", trimmed)));
    }
    Ok(url)
}

/// Build `{site}/{endpoint...}/{path...}`. Each path segment is percent-encoded
/// on its own so names containing `?` or `#` survive.
pub fn endpoint_url(site: &Url, endpoint: &[&str], path: &str) -> Result<Url, BError> {
    let mut url = site.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut parts = url
            .path_segments_mut()
            .map_err(|_| BError::site_unset(format!("{} cannot be a base URL", site)))?;
        parts.pop_if_empty();
        parts.extend(endpoint.iter().copied());
        parts.extend(segments(path));
    }
    Ok(url)
}

/// `{site}/storage/{path}`
pub fn storage_url(site: &Url, path: &str) -> Result<Url, BError> {
    endpoint_url(site, &["storage"], path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/testuser//docs/"), "testuser/docs");
        assert_eq!(normalize("testuser"), "testuser");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("testuser/docs/a.txt"), "testuser/docs");
        assert_eq!(parent("testuser/docs/"), "testuser");
        assert_eq!(parent("testuser"), "");
        assert_eq!(parent("/"), "");
    }

    #[test]
    fn test_join_and_file_name() {
        assert_eq!(join("testuser/docs", "a.txt"), "testuser/docs/a.txt");
        assert_eq!(join("", "testuser"), "testuser");
        assert_eq!(join("testuser/", ""), "testuser");
        assert_eq!(file_name("testuser/docs/a.txt"), Some("a.txt"));
        assert_eq!(file_name("/"), None);
    }

    #[test]
    fn test_parse_site_rejects_empty() {
        assert!(parse_site("").is_err());
        assert!(parse_site("   ").is_err());
        assert!(parse_site("not a url").is_err());
        assert!(parse_site("mailto:someone@example.com").is_err());
        assert!(parse_site("https://bulgur.example.com").is_ok());
    }

    #[test]
    fn test_storage_url_encodes_segments() {
        let site = parse_site("https://bulgur.example.com/").unwrap();
        let url = storage_url(&site, "testuser/my docs/what?.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://bulgur.example.com/storage/testuser/my%20docs/what%3F.txt"
        );
    }

    #[test]
    fn test_endpoint_url_keeps_site_prefix() {
        let site = parse_site("https://example.com/bulgur").unwrap();
        let url = endpoint_url(&site, &["auth", "login"], "").unwrap();
        assert_eq!(url.as_str(), "https://example.com/bulgur/auth/login");
    }
}
