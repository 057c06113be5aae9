//! Remote HTTP collaborators: document metadata client and file-system
//! client, plus the real and in-memory implementations used by tests.

use std::sync::{Arc, Mutex};

use crate::errors::CoreError;
use crate::proxy::ResolvedProxy;

/// Operations that need a document-repository view of the remote server.
/// A fresh instance is constructed per call — see spec §4.4's "never
/// cached" rule, since these calls (binding, token exchange, root
/// registration) are infrequent and must always see current credentials.
pub trait RemoteDocumentClient: Send + Sync {
    fn request_token(&self, username: &str, password: &str) -> Result<String, CoreError>;
    fn revoke_token(&self, token: &str) -> Result<(), CoreError>;
    fn register_as_root(&self, remote_ref: &str) -> Result<(), CoreError>;
    fn unregister_as_root(&self, remote_ref: &str) -> Result<(), CoreError>;
}

/// Operations against the remote file-system view, the hot path cached by
/// `ClientCache`.
pub trait RemoteFileSystemClient: Send + Sync {
    fn fetch_root_ref(&self) -> Result<String, CoreError>;
    fn server_url(&self) -> &str;
}

/// Is `err` one of the transient network failures that callers should
/// retry rather than surface as a hard failure? Connect/timeout/request
/// level errors qualify; HTTP-status errors (4xx/5xx) do not, since those
/// indicate the request reached the server and was meaningfully rejected.
pub fn is_network_error(err: &CoreError) -> bool {
    match err {
        CoreError::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        _ => false,
    }
}

/// `reqwest::blocking`-backed implementation speaking a small REST dialect.
pub struct HttpRemoteClient {
    server_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRemoteClient {
    pub fn new(
        server_url: &str,
        cookie_jar: Arc<reqwest::cookie::Jar>,
        proxy: &ResolvedProxy,
    ) -> Result<Self, CoreError> {
        let mut builder = reqwest::blocking::Client::builder().cookie_provider(cookie_jar);

        match &proxy.map {
            None => {} // ambient detection applies, reqwest's default
            Some(map) if map.is_empty() => {
                builder = builder.no_proxy();
            }
            Some(map) => {
                for url in map.values() {
                    if let Ok(p) = reqwest::Proxy::all(url) {
                        builder = builder.proxy(p);
                    }
                }
            }
        }

        let client = builder.build()?;
        Ok(HttpRemoteClient {
            server_url: server_url.to_string(),
            client,
        })
    }
}

impl RemoteDocumentClient for HttpRemoteClient {
    fn request_token(&self, username: &str, password: &str) -> Result<String, CoreError> {
        let resp = self
            .client
            .post(format!("{}token", self.server_url))
            .basic_auth(username, Some(password))
            .send()?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::Unauthorized);
        }
        let token = resp.error_for_status()?.text()?;
        Ok(token)
    }

    fn revoke_token(&self, token: &str) -> Result<(), CoreError> {
        self.client
            .delete(format!("{}token", self.server_url))
            .bearer_auth(token)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn register_as_root(&self, remote_ref: &str) -> Result<(), CoreError> {
        self.client
            .post(format!("{}root/register", self.server_url))
            .json(&serde_json::json!({ "ref": remote_ref }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn unregister_as_root(&self, remote_ref: &str) -> Result<(), CoreError> {
        self.client
            .post(format!("{}root/unregister", self.server_url))
            .json(&serde_json::json!({ "ref": remote_ref }))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl RemoteFileSystemClient for HttpRemoteClient {
    fn fetch_root_ref(&self) -> Result<String, CoreError> {
        let resp = self
            .client
            .get(format!("{}fs/root", self.server_url))
            .send()?
            .error_for_status()?;
        Ok(resp.text()?)
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// In-memory stand-in used by tests, with optional injectable fault so test
/// scenarios can exercise `ClientCache`'s tombstone-invalidation path and
/// the controller's network-error swallowing without real I/O.
pub struct MockRemoteClient {
    server_url: String,
    root_ref: String,
    fail_with: Mutex<Option<MockFailure>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    Network,
    Unauthorized,
}

impl MockRemoteClient {
    pub fn new(server_url: &str) -> Self {
        MockRemoteClient {
            server_url: server_url.to_string(),
            root_ref: "root-doc".to_string(),
            fail_with: Mutex::new(None),
        }
    }

    pub fn make_raise(&self, failure: Option<MockFailure>) {
        *self.fail_with.lock().unwrap() = failure;
    }

    fn check_fault(&self) -> Result<(), CoreError> {
        match *self.fail_with.lock().unwrap() {
            Some(MockFailure::Unauthorized) => Err(CoreError::Unauthorized),
            Some(MockFailure::Network) => Err(simulated_network_error()),
            None => Ok(()),
        }
    }
}

/// A real `CoreError::Network` for fault injection, so `is_network_error`
/// classifies it the same way it would a genuine connection failure.
/// Connecting to the loopback address on a port nothing listens on refuses
/// immediately, so this stays fast and deterministic without reaching the
/// network.
fn simulated_network_error() -> CoreError {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_millis(200))
        .build()
        .expect("building a minimal client cannot fail");
    let err = client
        .get("http://127.0.0.1:1/")
        .send()
        .expect_err("connecting to a closed loopback port always fails");
    CoreError::Network(err)
}

impl RemoteDocumentClient for MockRemoteClient {
    fn request_token(&self, _username: &str, _password: &str) -> Result<String, CoreError> {
        self.check_fault()?;
        Ok("mock-token".to_string())
    }

    fn revoke_token(&self, _token: &str) -> Result<(), CoreError> {
        self.check_fault()
    }

    fn register_as_root(&self, _remote_ref: &str) -> Result<(), CoreError> {
        self.check_fault()
    }

    fn unregister_as_root(&self, _remote_ref: &str) -> Result<(), CoreError> {
        self.check_fault()
    }
}

impl RemoteFileSystemClient for MockRemoteClient {
    fn fetch_root_ref(&self) -> Result<String, CoreError> {
        self.check_fault()?;
        Ok(self.root_ref.clone())
    }

    fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_client_succeeds_by_default() {
        let client = MockRemoteClient::new("https://example.com/");
        assert_eq!(client.request_token("u", "p").unwrap(), "mock-token");
        assert_eq!(client.fetch_root_ref().unwrap(), "root-doc");
    }

    #[test]
    fn mock_client_raises_injected_fault() {
        let client = MockRemoteClient::new("https://example.com/");
        client.make_raise(Some(MockFailure::Unauthorized));
        assert!(matches!(
            client.request_token("u", "p"),
            Err(CoreError::Unauthorized)
        ));
    }

    #[test]
    fn clearing_fault_restores_normal_behavior() {
        let client = MockRemoteClient::new("https://example.com/");
        client.make_raise(Some(MockFailure::Unauthorized));
        client.make_raise(None);
        assert!(client.request_token("u", "p").is_ok());
    }

    #[test]
    fn injected_network_fault_is_recognized_by_is_network_error() {
        let client = MockRemoteClient::new("https://example.com/");
        client.make_raise(Some(MockFailure::Network));
        let err = client.revoke_token("tok").unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
        assert!(is_network_error(&err));
    }
}
