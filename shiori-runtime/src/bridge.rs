//! Injected collaborator contracts
//!
//! The core delegates every outbound request to an injected synchronous
//! HTTP bridge and every settings lookup to an injected store. How those
//! collaborators achieve synchrony or persistence is immaterial here.

use parking_lot::RwLock;
use std::collections::HashMap;

/// An outbound request handed to the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// The bridge's answer
///
/// A transport failure is reported as status 0 with an empty body, never
/// as a panic or an error type; ordinary HTTP error statuses come back
/// as themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// The conventional transport-error response.
    pub fn transport_error() -> Self {
        Self::default()
    }
}

/// Synchronous HTTP bridge contract
///
/// `request` blocks until the response is received. The core makes no
/// assumption about how that synchrony is achieved.
pub trait HttpBridge: Send + Sync {
    fn request(&self, request: &HttpRequest) -> HttpResponse;
}

/// A typed settings value crossing the `defaults` boundary
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Null,
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
    StringArray(Vec<String>),
    Data(Vec<u8>),
}

/// Settings lookup and write-back, injected by the embedder
///
/// The core is not the persistence layer; it only encodes whatever comes
/// back for plugin consumption.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> SettingValue;
    fn set(&self, key: &str, value: SettingValue);
}

/// In-memory settings store, the default collaborator for tests and
/// embedders without persistence
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, SettingValue>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(values: impl IntoIterator<Item = (String, SettingValue)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> SettingValue {
        self.values
            .read()
            .get(key)
            .cloned()
            .unwrap_or(SettingValue::Null)
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.values.write().insert(key.to_string(), value);
    }
}

/// A bridge that answers every request with a transport error. Useful as
/// a placeholder in offline embedders and tests.
#[derive(Debug, Default)]
pub struct OfflineBridge;

impl HttpBridge for OfflineBridge {
    fn request(&self, request: &HttpRequest) -> HttpResponse {
        tracing::debug!(url = %request.url, "offline bridge refused request");
        HttpResponse::transport_error()
    }
}

/// Blocking bridge backed by `ureq`
#[cfg(feature = "bridge-ureq")]
pub struct UreqBridge {
    agent: ureq::Agent,
}

#[cfg(feature = "bridge-ureq")]
impl UreqBridge {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(30))
            .redirects(5)
            .build();
        Self { agent }
    }
}

#[cfg(feature = "bridge-ureq")]
impl Default for UreqBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "bridge-ureq")]
impl HttpBridge for UreqBridge {
    fn request(&self, request: &HttpRequest) -> HttpResponse {
        let mut req = self.agent.request(&request.method, &request.url);
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }
        let result = match &request.body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        };
        let response = match result {
            Ok(response) => response,
            // HTTP error statuses are still responses.
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                tracing::warn!(url = %request.url, %err, "bridge transport failure");
                return HttpResponse::transport_error();
            }
        };

        let status = response.status();
        let headers = response
            .headers_names()
            .into_iter()
            .flat_map(|name| {
                response
                    .all(&name)
                    .into_iter()
                    .map(|v| (name.clone(), v.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let mut body = Vec::new();
        if let Err(err) = std::io::Read::read_to_end(&mut response.into_reader(), &mut body) {
            tracing::warn!(url = %request.url, %err, "bridge body read failure");
        }
        HttpResponse {
            status,
            headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_settings_roundtrip() {
        let store = MemorySettings::new();
        assert_eq!(store.get("missing"), SettingValue::Null);
        store.set("langs", SettingValue::StringArray(vec!["en".into()]));
        assert_eq!(
            store.get("langs"),
            SettingValue::StringArray(vec!["en".into()])
        );
    }

    #[test]
    fn test_offline_bridge_reports_transport_error() {
        let bridge = OfflineBridge;
        let response = bridge.request(&HttpRequest {
            url: "https://example.com".into(),
            method: "GET".into(),
            headers: vec![],
            body: None,
        });
        assert_eq!(response.status, 0);
        assert!(response.body.is_empty());
    }
}
