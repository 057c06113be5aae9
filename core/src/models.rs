//! Row types for the state store and the pure `PairState` rollup.

use serde::{Deserialize, Serialize};

/// One side of a synchronized pair's life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideState {
    Unknown,
    Created,
    Modified,
    Synchronized,
    Deleted,
}

impl SideState {
    pub fn as_str(self) -> &'static str {
        match self {
            SideState::Unknown => "unknown",
            SideState::Created => "created",
            SideState::Modified => "modified",
            SideState::Synchronized => "synchronized",
            SideState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "created" => SideState::Created,
            "modified" => SideState::Modified,
            "synchronized" => SideState::Synchronized,
            "deleted" => SideState::Deleted,
            _ => SideState::Unknown,
        }
    }
}

/// Derived rollup of `(local_state, remote_state)`, never stored directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Synchronized,
    LocallyCreated,
    LocallyModified,
    LocallyDeleted,
    RemotelyCreated,
    RemotelyModified,
    RemotelyDeleted,
    Conflicted,
    ChildrenModified,
    Unknown,
}

impl PairState {
    pub fn as_str(self) -> &'static str {
        match self {
            PairState::Synchronized => "synchronized",
            PairState::LocallyCreated => "locally_created",
            PairState::LocallyModified => "locally_modified",
            PairState::LocallyDeleted => "locally_deleted",
            PairState::RemotelyCreated => "remotely_created",
            PairState::RemotelyModified => "remotely_modified",
            PairState::RemotelyDeleted => "remotely_deleted",
            PairState::Conflicted => "conflicted",
            PairState::ChildrenModified => "children_modified",
            PairState::Unknown => "unknown",
        }
    }

    /// Total function from a pair of side states to a rollup, per the
    /// derivation table: creation paired with unknown/deleted on the other
    /// side is checked before the deletion wildcards, so a fresh local or
    /// remote creation is never masked by the other side still reading
    /// `deleted`; modification and both-synchronized follow.
    pub fn derive(local: SideState, remote: SideState) -> PairState {
        use SideState::*;
        match (local, remote) {
            (Synchronized, Synchronized) => PairState::Synchronized,
            (Created, Unknown) | (Created, Deleted) => PairState::LocallyCreated,
            (Unknown, Created) | (Deleted, Created) => PairState::RemotelyCreated,
            (Deleted, _) => PairState::LocallyDeleted,
            (_, Deleted) => PairState::RemotelyDeleted,
            (Modified, Modified) => PairState::Conflicted,
            (Modified, Synchronized) => PairState::LocallyModified,
            (Synchronized, Modified) => PairState::RemotelyModified,
            _ => PairState::Unknown,
        }
    }

    pub fn is_synchronized(self) -> bool {
        matches!(self, PairState::Synchronized)
    }
}

/// Singleton row holding the device identity and proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: String,
    pub proxy_config: ProxyConfig,
    pub proxy_type: Option<String>,
    pub proxy_server: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    /// Encrypted-at-rest when a token exists; see `ProxyPasswordPolicy`.
    pub proxy_password: Option<String>,
    pub proxy_authenticated: bool,
    pub proxy_exceptions: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_id: uuid::Uuid::new_v4().to_string(),
            proxy_config: ProxyConfig::System,
            proxy_type: None,
            proxy_server: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
            proxy_authenticated: false,
            proxy_exceptions: None,
        }
    }
}

/// Replaces the original's stringly-typed `proxy_config` field with a tagged
/// enum so `Manual` details are only reachable when the mode actually is
/// manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyConfig {
    /// Defer to whatever the OS/environment already configures; resolved
    /// proxy map is `None` so ambient detection in the HTTP layer applies.
    System,
    /// Force no proxy; resolved proxy map is an empty map so ambient
    /// detection is suppressed.
    None,
    /// Use the explicit `proxy_*` fields on `DeviceConfig`.
    Manual,
}

impl ProxyConfig {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyConfig::System => "System",
            ProxyConfig::None => "None",
            ProxyConfig::Manual => "Manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "None" => ProxyConfig::None,
            "Manual" => ProxyConfig::Manual,
            _ => ProxyConfig::System,
        }
    }
}

/// A bound local folder and the server credentials that sync it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBinding {
    pub local_folder: String,
    pub server_url: String,
    pub remote_user: String,
    pub remote_password: Option<String>,
    pub remote_token: Option<String>,
}

impl ServerBinding {
    pub fn has_token(&self) -> bool {
        self.remote_token.is_some()
    }
}

/// One tracked local/remote file or folder pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastKnownState {
    pub id: i64,
    pub local_folder: String,
    pub local_path: Option<String>,
    pub remote_ref: Option<String>,
    pub local_parent_path: Option<String>,
    pub remote_parent_ref: Option<String>,
    pub local_name: Option<String>,
    pub remote_name: Option<String>,
    pub remote_parent_path: Option<String>,
    pub folderish: bool,
    pub local_state: SideState,
    pub remote_state: SideState,
    pub last_sync_error_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl LastKnownState {
    pub fn pair_state(&self) -> PairState {
        PairState::derive(self.local_state, self.remote_state)
    }
}
