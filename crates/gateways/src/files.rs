//! Public URL resolution for stored files.

/// Turns stored file paths into URLs an external provider can fetch.
#[derive(Debug, Clone)]
pub struct PublicUrlResolver {
    base_url: String,
}

impl PublicUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolves a stored path.
    ///
    /// Absolute `http(s)` URLs pass through untouched. Relative paths are
    /// joined to the base with each segment percent-encoded; the `/`
    /// separators are kept as is. An empty path resolves to an empty string.
    pub fn resolve(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        if path.starts_with("http") {
            return path.to_string();
        }

        let encoded = path
            .trim_start_matches('/')
            .split('/')
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{encoded}", self.base_url)
    }
}

/// Percent-encodes everything except the URI-component unreserved set.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
