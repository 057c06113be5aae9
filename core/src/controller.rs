//! Top-level façade composing the store, binding manager, state navigator,
//! pending queue, and client cache into the single entry point a sync
//! worker or CLI talks to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::binding_manager::{BindingManager, ServerBindingSettings};
use crate::client_cache::{CacheKey, ClientCache};
use crate::errors::CoreError;
use crate::models::{DeviceConfig, LastKnownState, PairState, ServerBinding};
use crate::pending_queue::{PendingQueue, PendingQuery};
use crate::proxy::{decode_proxy_password, encode_proxy_password, ProxyResolver, ResolvedProxy};
use crate::remote::{MockRemoteClient, RemoteDocumentClient, RemoteFileSystemClient};
use crate::state_navigator::StateNavigator;
use crate::store::StateStore;

/// Constructs document and file-system clients for a server, given its
/// resolved proxy settings. Production code uses `HttpClientFactory`;
/// tests inject `MockClientFactory` so scenarios can flip fault injection
/// on a client the controller already holds a reference to.
pub trait RemoteClientFactory: Send + Sync {
    fn document_client(
        &self,
        server_url: &str,
        proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteDocumentClient>, CoreError>;

    fn fs_client(
        &self,
        server_url: &str,
        proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteFileSystemClient>, CoreError>;
}

pub struct HttpClientFactory {
    cookie_jar: Arc<reqwest::cookie::Jar>,
}

impl HttpClientFactory {
    pub fn new() -> Self {
        HttpClientFactory {
            cookie_jar: Arc::new(reqwest::cookie::Jar::default()),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteClientFactory for HttpClientFactory {
    fn document_client(
        &self,
        server_url: &str,
        proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteDocumentClient>, CoreError> {
        let client = crate::remote::HttpRemoteClient::new(server_url, self.cookie_jar.clone(), proxy)?;
        Ok(Arc::new(client))
    }

    fn fs_client(
        &self,
        server_url: &str,
        proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteFileSystemClient>, CoreError> {
        let client = crate::remote::HttpRemoteClient::new(server_url, self.cookie_jar.clone(), proxy)?;
        Ok(Arc::new(client))
    }
}

/// Keeps one `MockRemoteClient` per server URL so a test can fetch it back
/// out and call `make_raise` on the instance the controller is actually
/// using.
#[derive(Default)]
pub struct MockClientFactory {
    clients: Mutex<HashMap<String, Arc<MockRemoteClient>>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_for(&self, server_url: &str) -> Arc<MockRemoteClient> {
        self.clients
            .lock()
            .unwrap()
            .entry(server_url.to_string())
            .or_insert_with(|| Arc::new(MockRemoteClient::new(server_url)))
            .clone()
    }
}

impl RemoteClientFactory for MockClientFactory {
    fn document_client(
        &self,
        server_url: &str,
        _proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteDocumentClient>, CoreError> {
        Ok(self.client_for(server_url) as Arc<dyn RemoteDocumentClient>)
    }

    fn fs_client(
        &self,
        server_url: &str,
        _proxy: &ResolvedProxy,
    ) -> Result<Arc<dyn RemoteFileSystemClient>, CoreError> {
        Ok(self.client_for(server_url) as Arc<dyn RemoteFileSystemClient>)
    }
}

pub struct Controller {
    store: Arc<StateStore>,
    cache: ClientCache,
    bindings: BindingManager,
    navigator: StateNavigator,
    pending: PendingQueue,
    client_factory: Arc<dyn RemoteClientFactory>,
    config_folder: PathBuf,
}

impl Controller {
    pub fn new(
        store: Arc<StateStore>,
        config_folder: PathBuf,
        client_factory: Arc<dyn RemoteClientFactory>,
    ) -> Self {
        Controller {
            bindings: BindingManager::new(store.clone()),
            navigator: StateNavigator::new(store.clone()),
            pending: PendingQueue::new(store.clone()),
            cache: ClientCache::new(),
            store,
            client_factory,
            config_folder,
        }
    }

    pub fn device_config(&self) -> Result<DeviceConfig, CoreError> {
        let session = self.store.session()?;
        self.store.get_device_config(&session)
    }

    fn current_token(&self) -> Result<Option<String>, CoreError> {
        let session = self.store.session()?;
        Ok(self
            .store
            .list_server_bindings(&session)?
            .into_iter()
            .find_map(|b| b.remote_token))
    }

    pub fn get_proxy_settings(&self) -> Result<ResolvedProxy, CoreError> {
        let config = self.device_config()?;
        let token = self.current_token()?;
        ProxyResolver::resolve(&config, token.as_deref())
    }

    /// Updates the stored proxy configuration. `raw_password`, when given,
    /// replaces the stored password — encrypted under the current token if
    /// one exists, otherwise stored under the `PlaintextUntilToken` policy
    /// and transparently re-encrypted the next time `bind_server` succeeds.
    pub fn set_proxy_settings(
        &self,
        mut config: DeviceConfig,
        raw_password: Option<&str>,
    ) -> Result<(), CoreError> {
        if let Some(password) = raw_password {
            let token = self.current_token()?;
            config.proxy_password = Some(encode_proxy_password(password, token.as_deref())?);
        }
        let session = self.store.session()?;
        self.store.save_device_config(&session, &config)?;
        session.commit()?;
        self.invalidate_client_cache(None)?;
        Ok(())
    }

    /// Re-reads proxy settings after invalidation, matching the original's
    /// `invalidate_client_cache -> refresh_proxies` coupling: a config
    /// change must be visible to the next client built for any server.
    pub fn refresh_proxies(&self) -> Result<ResolvedProxy, CoreError> {
        self.get_proxy_settings()
    }

    pub fn invalidate_client_cache(&self, server_url: Option<&str>) -> Result<ResolvedProxy, CoreError> {
        self.cache.invalidate(server_url);
        self.refresh_proxies()
    }

    pub fn bind_server(
        &self,
        local_folder: &Path,
        server_url: &str,
        username: &str,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<ServerBinding, CoreError> {
        let proxy = self.get_proxy_settings()?;
        let normalized = crate::binding_manager::normalize_url(server_url)?;
        let doc_client = self.client_factory.document_client(&normalized, &proxy)?;
        let fs_client = self.client_factory.fs_client(&normalized, &proxy)?;

        let binding = self.bindings.bind_server(
            local_folder,
            server_url,
            username,
            password,
            token,
            doc_client.as_ref(),
            fs_client.as_ref(),
        )?;

        self.reencrypt_pending_proxy_password(&binding)?;
        Ok(binding)
    }

    /// If a proxy password is stored under the plaintext-until-token
    /// policy and this bind just produced the device's first token,
    /// transparently re-encrypt it.
    fn reencrypt_pending_proxy_password(&self, binding: &ServerBinding) -> Result<(), CoreError> {
        let Some(token) = &binding.remote_token else { return Ok(()) };
        let session = self.store.session()?;
        let mut config = self.store.get_device_config(&session)?;
        if let Some(stored) = config.proxy_password.clone() {
            if stored.starts_with("plain:") {
                let plaintext = decode_proxy_password(&stored, None)?;
                config.proxy_password = Some(encode_proxy_password(&plaintext, Some(token))?);
                self.store.save_device_config(&session, &config)?;
            }
        }
        session.commit()?;
        Ok(())
    }

    pub fn unbind_server(&self, local_folder: &str) -> Result<(), CoreError> {
        let binding = self
            .bindings
            .get_server_binding(local_folder)?
            .ok_or_else(|| CoreError::NotBound(local_folder.to_string()))?;
        let proxy = self.get_proxy_settings()?;
        let doc_client = self.client_factory.document_client(&binding.server_url, &proxy)?;
        self.bindings.unbind_server(local_folder, doc_client.as_ref(), &self.cache)
    }

    pub fn unbind_all(&self) -> Result<(), CoreError> {
        for binding in self.bindings.list_server_bindings()? {
            self.unbind_server(&binding.local_folder)?;
        }
        Ok(())
    }

    pub fn get_server_binding(&self, local_folder: &str) -> Result<Option<ServerBinding>, CoreError> {
        self.bindings.get_server_binding(local_folder)
    }

    pub fn list_server_bindings(&self) -> Result<Vec<ServerBinding>, CoreError> {
        self.bindings.list_server_bindings()
    }

    pub fn get_token(&self, local_folder: &str) -> Result<Option<String>, CoreError> {
        self.bindings.get_token(local_folder)
    }

    pub fn get_server_binding_settings(&self) -> Result<ServerBindingSettings, CoreError> {
        self.bindings.get_server_binding_settings()
    }

    /// Returns a cached (if fresh) or freshly-built file-system client for
    /// `server_url`, keyed by `(server_url, remote_user, device_id)`.
    pub fn get_remote_fs_client(
        &self,
        server_url: &str,
        remote_user: &str,
    ) -> Result<Arc<dyn RemoteFileSystemClient>, CoreError> {
        let device_id = self.device_config()?.device_id;
        let key = CacheKey {
            server_url: server_url.to_string(),
            remote_user: remote_user.to_string(),
            device_id,
        };
        let proxy = self.get_proxy_settings()?;
        let factory = self.client_factory.clone();
        let url = server_url.to_string();
        self.cache.get_or_create(&key, || factory.fs_client(&url, &proxy))
    }

    /// Always constructs a fresh document client — these calls are
    /// infrequent enough (binding, root registration) that caching would
    /// only risk serving stale credentials.
    pub fn get_remote_doc_client(&self, server_url: &str) -> Result<Arc<dyn RemoteDocumentClient>, CoreError> {
        let proxy = self.get_proxy_settings()?;
        self.client_factory.document_client(server_url, &proxy)
    }

    pub fn children_states(
        &self,
        local_folder: &str,
        state: &LastKnownState,
    ) -> Result<Vec<LastKnownState>, CoreError> {
        self.navigator.children_states(local_folder, state)
    }

    pub fn pair_state_recursive(
        &self,
        local_folder: &str,
        state: &LastKnownState,
    ) -> Result<PairState, CoreError> {
        self.navigator.pair_state_recursive(local_folder, state)
    }

    pub fn get_state_for_local_path(&self, path: &Path) -> Result<Option<LastKnownState>, CoreError> {
        let (binding, rel_path) = self.navigator.binding_for_path(path)?;
        let session = self.store.session()?;
        self.store.get_state_by_local_path(&session, &binding.local_folder, &rel_path)
    }

    pub fn get_state(&self, server_url: &str, remote_ref: &str) -> Result<Option<LastKnownState>, CoreError> {
        let session = self.store.session()?;
        for binding in self.store.list_server_bindings(&session)? {
            if binding.server_url == server_url {
                if let Some(state) = self.store.get_state_by_remote_ref(&session, &binding.local_folder, remote_ref)? {
                    return Ok(Some(state));
                }
            }
        }
        Ok(None)
    }

    pub fn list_pending(&self, query: &PendingQuery) -> Result<Vec<LastKnownState>, CoreError> {
        self.pending.list_pending(query)
    }

    pub fn next_pending(&self, query: &PendingQuery) -> Result<Option<LastKnownState>, CoreError> {
        self.pending.next_pending(query)
    }

    pub fn launch_file_editor(&self, path: &Path) {
        crate::platform::open_local_file(path);
    }

    /// Writes the process-stop marker a co-located sync worker polls for.
    pub fn stop(&self) -> Result<(), CoreError> {
        crate::config::write_stop_marker(&self.config_folder, std::process::id())
    }

    /// Releases resources held by the controller. Dropping the controller
    /// achieves the same thing; this exists as an explicit call site for
    /// callers (like the CLI) that want a clear shutdown point in logs.
    pub fn dispose(&self) {
        tracing::info!("controller disposed");
    }
}
