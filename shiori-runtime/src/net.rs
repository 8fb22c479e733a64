//! Request lifecycle and the cookie jar
//!
//! A request descriptor starts in the building state, accumulates url,
//! headers, and body, and transitions to sent when the plugin calls
//! `net.send`. Only `send` may block: it invokes the injected bridge.

use crate::abi::NetError;
use crate::bridge::{HttpBridge, HttpRequest, HttpResponse};
use std::collections::BTreeMap;
use url::Url;

/// Fixed method index mapping across the ABI. Unknown indices map to GET.
pub fn method_name(index: i32) -> &'static str {
    match index {
        1 => "POST",
        2 => "PUT",
        3 => "HEAD",
        4 => "DELETE",
        5 => "PATCH",
        6 => "OPTIONS",
        7 => "CONNECT",
        8 => "TRACE",
        _ => "GET",
    }
}

/// Hostname-scoped Set-Cookie cache
///
/// Best-effort only: the first `name=value` token of each Set-Cookie
/// header is stored keyed by `hostname:name`, with no expiry or path
/// handling. Stored entries apply to the exact host and to subdomains.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the first name=value token of a Set-Cookie header value.
    pub fn store(&mut self, host: &str, set_cookie: &str) {
        let token = set_cookie.split(';').next().unwrap_or_default().trim();
        let Some((name, value)) = token.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.entries
            .insert(format!("{host}:{name}"), value.trim().to_string());
    }

    /// Cookies applicable to `host`: entries stored for the host itself or
    /// for any parent domain.
    pub fn cookies_for(&self, host: &str) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| {
                let (cookie_host, name) = key.rsplit_once(':')?;
                let applies = host == cookie_host
                    || host
                        .strip_suffix(cookie_host)
                        .is_some_and(|prefix| prefix.ends_with('.'));
                applies.then(|| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Build a Cookie header merging stored cookies with an explicit one.
    /// Stored cookies come first.
    pub fn header_for(&self, host: &str, explicit: Option<&str>) -> Option<String> {
        let mut parts: Vec<String> = self
            .cookies_for(host)
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if let Some(explicit) = explicit {
            if !explicit.is_empty() {
                parts.push(explicit.to_string());
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A completed exchange held by a sent request descriptor
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    /// Keys lowercased on ingestion; same-key values joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Legacy streaming cursor into `body`.
    pub bytes_read: usize,
}

impl StoredResponse {
    fn from_bridge(response: HttpResponse) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers {
            let name = name.to_ascii_lowercase();
            match headers.get_mut(&name) {
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                None => {
                    headers.insert(name, value);
                }
            }
        }
        Self {
            status: response.status,
            headers,
            body: response.body,
            bytes_read: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.body.len().saturating_sub(self.bytes_read)
    }
}

/// State machine behind one request descriptor
#[derive(Debug)]
pub struct RequestState {
    pub method: String,
    pub url: Option<Url>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub response: Option<StoredResponse>,
}

impl RequestState {
    pub fn new(method_index: i32, default_user_agent: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), default_user_agent.to_string());
        Self {
            method: method_name(method_index).to_string(),
            url: None,
            headers,
            body: None,
            response: None,
        }
    }

    pub fn set_url(&mut self, url: &str) -> Result<(), NetError> {
        self.url = Some(Url::parse(url).map_err(|_| NetError::InvalidUrl)?);
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        // A later set with the same (case-sensitive) name overwrites.
        self.headers.insert(name.to_string(), value.to_string());
    }

    fn explicit_cookie(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .map(|(_, value)| value.as_str())
    }

    /// Execute the request through the bridge.
    ///
    /// On bridge failure an empty response is left behind so subsequent
    /// inspections do not observe stale state.
    pub fn send(&mut self, bridge: &dyn HttpBridge, jar: &mut CookieJar) -> Result<(), NetError> {
        let url = self.url.as_ref().ok_or(NetError::MissingUrl)?.clone();
        let host = url.host_str().unwrap_or_default().to_string();

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if let Some(cookie) = jar.header_for(&host, self.explicit_cookie()) {
            headers.push(("Cookie".to_string(), cookie));
        }

        tracing::debug!(method = %self.method, url = %url, "sending plugin request");
        let response = bridge.request(&HttpRequest {
            url: url.to_string(),
            method: self.method.clone(),
            headers,
            body: self.body.clone(),
        });

        for (name, value) in &response.headers {
            if name.eq_ignore_ascii_case("set-cookie") {
                jar.store(&host, value);
            }
        }

        let failed = response.status == 0;
        self.response = Some(StoredResponse::from_bridge(response));
        if failed {
            return Err(NetError::RequestError);
        }
        Ok(())
    }

    pub fn response(&self) -> Result<&StoredResponse, NetError> {
        self.response.as_ref().ok_or(NetError::MissingResponse)
    }

    pub fn response_mut(&mut self) -> Result<&mut StoredResponse, NetError> {
        self.response.as_mut().ok_or(NetError::MissingResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct CannedBridge {
        response: HttpResponse,
        seen: Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl HttpBridge for CannedBridge {
        fn request(&self, request: &HttpRequest) -> HttpResponse {
            self.seen.lock().push(request.clone());
            self.response.clone()
        }
    }

    #[test]
    fn test_method_mapping() {
        let names: Vec<&str> = (0..9).map(method_name).collect();
        assert_eq!(
            names,
            vec!["GET", "POST", "PUT", "HEAD", "DELETE", "PATCH", "OPTIONS", "CONNECT", "TRACE"]
        );
        assert_eq!(method_name(99), "GET");
        assert_eq!(method_name(-1), "GET");
    }

    #[test]
    fn test_cookie_scope() {
        let mut jar = CookieJar::new();
        jar.store("x.y", "a=1; Path=/; HttpOnly");
        assert_eq!(jar.cookies_for("x.y"), vec![("a".into(), "1".into())]);
        assert_eq!(jar.cookies_for("sub.x.y"), vec![("a".into(), "1".into())]);
        assert!(jar.cookies_for("z").is_empty());
        // "notx.y" is not a subdomain of "x.y"
        assert!(jar.cookies_for("notx.y").is_empty());
    }

    #[test]
    fn test_send_merges_jar_cookies_before_explicit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bridge = CannedBridge {
            response: HttpResponse {
                status: 200,
                headers: vec![("Set-Cookie".into(), "b=2".into())],
                body: b"ok".to_vec(),
            },
            seen: seen.clone(),
        };
        let mut jar = CookieJar::new();
        jar.store("x.y", "a=1");

        let mut request = RequestState::new(0, "test-agent");
        request.set_url("https://x.y/page").unwrap();
        request.set_header("Cookie", "c=3");
        request.send(&bridge, &mut jar).unwrap();

        let sent = seen.lock();
        let cookie = sent[0]
            .headers
            .iter()
            .find(|(name, _)| name == "Cookie")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert_eq!(cookie, "a=1; c=3");
        // The response's Set-Cookie landed in the jar.
        assert_eq!(jar.cookies_for("x.y").len(), 2);
    }

    #[test]
    fn test_send_without_url() {
        let mut request = RequestState::new(0, "ua");
        let mut jar = CookieJar::new();
        let bridge = crate::bridge::OfflineBridge;
        assert_eq!(request.send(&bridge, &mut jar), Err(NetError::MissingUrl));
    }

    #[test]
    fn test_failed_send_leaves_empty_response() {
        let mut request = RequestState::new(0, "ua");
        request.set_url("https://x.y/").unwrap();
        let mut jar = CookieJar::new();
        let bridge = crate::bridge::OfflineBridge;
        assert_eq!(
            request.send(&bridge, &mut jar),
            Err(NetError::RequestError)
        );
        let response = request.response().unwrap();
        assert_eq!(response.status, 0);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_response_headers_lowercased_and_joined() {
        let response = StoredResponse::from_bridge(HttpResponse {
            status: 200,
            headers: vec![
                ("X-Thing".into(), "a".into()),
                ("x-thing".into(), "b".into()),
            ],
            body: vec![],
        });
        assert_eq!(response.headers.get("x-thing").map(String::as_str), Some("a, b"));
    }
}
