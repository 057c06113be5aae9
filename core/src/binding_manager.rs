//! Binds and unbinds local folders to remote servers, and answers the
//! small set of settings-screen queries that read binding state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client_cache::ClientCache;
use crate::errors::CoreError;
use crate::models::{LastKnownState, ServerBinding, SideState};
use crate::remote::{is_network_error, RemoteDocumentClient, RemoteFileSystemClient};
use crate::store::StateStore;

pub struct BindingManager {
    store: Arc<StateStore>,
}

#[derive(Debug, Clone)]
pub struct ServerBindingSettings {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub local_folder: PathBuf,
    pub initialized: bool,
    pub pwd_update_required: bool,
}

impl BindingManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        BindingManager { store }
    }

    /// Binds `local_folder` to `server_url`. Token precedence: an explicit
    /// `token` skips the password exchange entirely; otherwise `password`
    /// is exchanged for a token via `doc_client`. Binding the same folder
    /// to the same server/user again is a no-op that returns the existing
    /// binding; binding it to a different server or user is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_server(
        &self,
        local_folder: &Path,
        server_url: &str,
        username: &str,
        password: Option<&str>,
        token: Option<&str>,
        doc_client: &dyn RemoteDocumentClient,
        fs_client: &dyn RemoteFileSystemClient,
    ) -> Result<ServerBinding, CoreError> {
        let server_url = normalize_url(server_url)?;
        crate::local_client::LocalClient::ensure_folder(local_folder)?;
        crate::platform::register_folder_link(local_folder);

        let folder_key = local_folder.to_string_lossy().to_string();
        let session = self.store.session()?;

        if let Some(existing) = self.store.get_server_binding(&session, &folder_key)? {
            session.rollback()?;
            if existing.server_url == server_url && existing.remote_user == username {
                return Ok(existing);
            }
            return Err(CoreError::AlreadyBound(folder_key));
        }

        let resolved_token = match (token, password) {
            (Some(t), _) => t.to_string(),
            (None, Some(p)) => doc_client.request_token(username, p)?,
            (None, None) => {
                session.rollback()?;
                return Err(CoreError::NoToken);
            }
        };

        let binding = ServerBinding {
            local_folder: folder_key.clone(),
            server_url: server_url.clone(),
            remote_user: username.to_string(),
            remote_password: None,
            remote_token: Some(resolved_token),
        };
        self.store.add_server_binding(&session, &binding)?;

        let root_ref = fs_client.fetch_root_ref()?;
        let toplevel = LastKnownState {
            id: 0,
            local_folder: folder_key.clone(),
            local_path: Some("/".to_string()),
            remote_ref: Some(root_ref),
            local_parent_path: None,
            remote_parent_ref: None,
            local_name: Some(folder_key.clone()),
            remote_name: Some(folder_key.clone()),
            remote_parent_path: None,
            folderish: true,
            local_state: SideState::Synchronized,
            remote_state: SideState::Synchronized,
            last_sync_error_date: None,
        };
        self.store.add_state(&session, &toplevel)?;
        session.commit()?;
        Ok(binding)
    }

    /// Revokes the token (best-effort — network/auth failures while
    /// revoking are logged and ignored, since the local unbind must still
    /// proceed) then invalidates any cached clients and deletes the
    /// binding and its pair states (cascade).
    pub fn unbind_server(
        &self,
        local_folder: &str,
        doc_client: &dyn RemoteDocumentClient,
        cache: &ClientCache,
    ) -> Result<(), CoreError> {
        let session = self.store.session()?;
        let binding = self
            .store
            .get_server_binding(&session, local_folder)?
            .ok_or_else(|| CoreError::NotBound(local_folder.to_string()))?;

        if let Some(token) = &binding.remote_token {
            if let Err(e) = doc_client.revoke_token(token) {
                if is_network_error(&e) || matches!(e, CoreError::Unauthorized) {
                    tracing::warn!(error = %e, "token revocation failed during unbind, continuing");
                } else {
                    session.rollback()?;
                    return Err(e);
                }
            }
        }

        cache.invalidate(Some(&binding.server_url));
        self.store.delete_server_binding(&session, local_folder)?;
        session.commit()?;
        Ok(())
    }

    /// Unbinds every known binding, continuing past per-binding failures
    /// and returning the first fatal (non-network/auth) error encountered,
    /// if any.
    pub fn unbind_all(
        &self,
        doc_client: &dyn RemoteDocumentClient,
        cache: &ClientCache,
    ) -> Result<(), CoreError> {
        let folders: Vec<String> = {
            let session = self.store.session()?;
            let bindings = self.store.list_server_bindings(&session)?;
            session.rollback()?;
            bindings.into_iter().map(|b| b.local_folder).collect()
        };
        for folder in folders {
            self.unbind_server(&folder, doc_client, cache)?;
        }
        Ok(())
    }

    pub fn bind_root(&self, remote_ref: &str, doc_client: &dyn RemoteDocumentClient) -> Result<(), CoreError> {
        doc_client.register_as_root(remote_ref)
    }

    pub fn unbind_root(&self, remote_ref: &str, doc_client: &dyn RemoteDocumentClient) -> Result<(), CoreError> {
        doc_client.unregister_as_root(remote_ref)
    }

    pub fn get_server_binding(&self, local_folder: &str) -> Result<Option<ServerBinding>, CoreError> {
        let session = self.store.session()?;
        self.store.get_server_binding(&session, local_folder)
    }

    pub fn list_server_bindings(&self) -> Result<Vec<ServerBinding>, CoreError> {
        let session = self.store.session()?;
        self.store.list_server_bindings(&session)
    }

    pub fn get_token(&self, local_folder: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .get_server_binding(local_folder)?
            .and_then(|b| b.remote_token))
    }

    /// Summarizes the (at most one, in this client) active binding for a
    /// settings screen, defaulting to an unbound placeholder.
    pub fn get_server_binding_settings(&self) -> Result<ServerBindingSettings, CoreError> {
        let bindings = self.list_server_bindings()?;
        match bindings.into_iter().next() {
            Some(b) => Ok(ServerBindingSettings {
                pwd_update_required: b.remote_token.is_none(),
                server_url: Some(b.server_url),
                username: Some(b.remote_user),
                local_folder: PathBuf::from(b.local_folder),
                initialized: true,
            }),
            None => Ok(ServerBindingSettings {
                server_url: None,
                username: None,
                local_folder: crate::config::default_sync_folder(),
                initialized: false,
                pwd_update_required: false,
            }),
        }
    }
}

/// Rejects an empty URL; appends a trailing slash if missing so every
/// downstream path join is unambiguous.
pub fn normalize_url(url: &str) -> Result<String, CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("server url must not be empty".into()));
    }
    if trimmed.ends_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/"))
    }
}
