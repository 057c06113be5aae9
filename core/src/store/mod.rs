//! Persistent relational store for device configuration, server bindings,
//! and synchronization pair state.

mod schema;
mod session;

pub use session::Session;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::CoreError;
use crate::models::{DeviceConfig, LastKnownState, ProxyConfig, ServerBinding, SideState};

pub struct StateStore {
    conn: Mutex<Connection>,
    echo: bool,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        schema::ensure_schema(&conn)?;
        let echo = std::env::var("DOCSYNC_LOG_SQL")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);
        Ok(StateStore {
            conn: Mutex::new(conn),
            echo,
        })
    }

    pub fn session(&self) -> Result<Session<'_>, CoreError> {
        Session::begin(self.conn.lock())
    }

    fn trace(&self, sql: &str) {
        if self.echo {
            tracing::debug!(sql, "executing statement");
        }
    }

    // -- device config ----------------------------------------------------

    /// Returns the singleton device config row, creating it with defaults
    /// on first access.
    pub fn get_device_config(&self, session: &Session) -> Result<DeviceConfig, CoreError> {
        let sql = "SELECT device_id, proxy_config, proxy_type, proxy_server, proxy_port, \
                    proxy_username, proxy_password, proxy_authenticated, proxy_exceptions \
                    FROM device_config WHERE id = 1";
        self.trace(sql);
        let existing = session
            .connection()
            .query_row(sql, [], Self::row_to_device_config)
            .optional()?;

        if let Some(config) = existing {
            return Ok(config);
        }

        let config = DeviceConfig::default();
        self.save_device_config(session, &config)?;
        Ok(config)
    }

    pub fn save_device_config(&self, session: &Session, config: &DeviceConfig) -> Result<(), CoreError> {
        let sql = "INSERT INTO device_config \
                    (id, device_id, proxy_config, proxy_type, proxy_server, proxy_port, \
                     proxy_username, proxy_password, proxy_authenticated, proxy_exceptions) \
                    VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                    ON CONFLICT(id) DO UPDATE SET \
                    device_id=excluded.device_id, proxy_config=excluded.proxy_config, \
                    proxy_type=excluded.proxy_type, proxy_server=excluded.proxy_server, \
                    proxy_port=excluded.proxy_port, proxy_username=excluded.proxy_username, \
                    proxy_password=excluded.proxy_password, \
                    proxy_authenticated=excluded.proxy_authenticated, \
                    proxy_exceptions=excluded.proxy_exceptions";
        self.trace(sql);
        session.connection().execute(
            sql,
            params![
                config.device_id,
                config.proxy_config.as_str(),
                config.proxy_type,
                config.proxy_server,
                config.proxy_port,
                config.proxy_username,
                config.proxy_password,
                config.proxy_authenticated as i64,
                config.proxy_exceptions,
            ],
        )?;
        Ok(())
    }

    fn row_to_device_config(row: &Row) -> rusqlite::Result<DeviceConfig> {
        Ok(DeviceConfig {
            device_id: row.get(0)?,
            proxy_config: ProxyConfig::parse(&row.get::<_, String>(1)?),
            proxy_type: row.get(2)?,
            proxy_server: row.get(3)?,
            proxy_port: row.get::<_, Option<i64>>(4)?.map(|p| p as u16),
            proxy_username: row.get(5)?,
            proxy_password: row.get(6)?,
            proxy_authenticated: row.get::<_, i64>(7)? != 0,
            proxy_exceptions: row.get(8)?,
        })
    }

    // -- server bindings ---------------------------------------------------

    pub fn get_server_binding(
        &self,
        session: &Session,
        local_folder: &str,
    ) -> Result<Option<ServerBinding>, CoreError> {
        let sql = "SELECT local_folder, server_url, remote_user, remote_password, remote_token \
                    FROM server_bindings WHERE local_folder = ?1";
        self.trace(sql);
        Ok(session
            .connection()
            .query_row(sql, params![local_folder], Self::row_to_binding)
            .optional()?)
    }

    pub fn list_server_bindings(&self, session: &Session) -> Result<Vec<ServerBinding>, CoreError> {
        let sql = "SELECT local_folder, server_url, remote_user, remote_password, remote_token \
                    FROM server_bindings ORDER BY local_folder ASC";
        self.trace(sql);
        let mut stmt = session.connection().prepare(sql)?;
        let rows = stmt.query_map([], Self::row_to_binding)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn add_server_binding(&self, session: &Session, binding: &ServerBinding) -> Result<(), CoreError> {
        let sql = "INSERT INTO server_bindings \
                    (local_folder, server_url, remote_user, remote_password, remote_token) \
                    VALUES (?1, ?2, ?3, ?4, ?5)";
        self.trace(sql);
        session.connection().execute(
            sql,
            params![
                binding.local_folder,
                binding.server_url,
                binding.remote_user,
                binding.remote_password,
                binding.remote_token,
            ],
        )?;
        Ok(())
    }

    pub fn update_server_binding(&self, session: &Session, binding: &ServerBinding) -> Result<(), CoreError> {
        let sql = "UPDATE server_bindings SET server_url=?2, remote_user=?3, \
                    remote_password=?4, remote_token=?5 WHERE local_folder=?1";
        self.trace(sql);
        session.connection().execute(
            sql,
            params![
                binding.local_folder,
                binding.server_url,
                binding.remote_user,
                binding.remote_password,
                binding.remote_token,
            ],
        )?;
        Ok(())
    }

    pub fn delete_server_binding(&self, session: &Session, local_folder: &str) -> Result<(), CoreError> {
        let sql = "DELETE FROM server_bindings WHERE local_folder = ?1";
        self.trace(sql);
        session.connection().execute(sql, params![local_folder])?;
        Ok(())
    }

    fn row_to_binding(row: &Row) -> rusqlite::Result<ServerBinding> {
        Ok(ServerBinding {
            local_folder: row.get(0)?,
            server_url: row.get(1)?,
            remote_user: row.get(2)?,
            remote_password: row.get(3)?,
            remote_token: row.get(4)?,
        })
    }

    // -- last known states --------------------------------------------------

    pub fn add_state(&self, session: &Session, state: &LastKnownState) -> Result<i64, CoreError> {
        let sql = "INSERT INTO last_known_states \
                    (local_folder, local_path, remote_ref, local_parent_path, remote_parent_ref, \
                     local_name, remote_name, remote_parent_path, folderish, local_state, \
                     remote_state, last_sync_error_date) \
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";
        self.trace(sql);
        session.connection().execute(
            sql,
            params![
                state.local_folder,
                state.local_path,
                state.remote_ref,
                state.local_parent_path,
                state.remote_parent_ref,
                state.local_name,
                state.remote_name,
                state.remote_parent_path,
                state.folderish as i64,
                state.local_state.as_str(),
                state.remote_state.as_str(),
                state.last_sync_error_date.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(session.connection().last_insert_rowid())
    }

    pub fn update_state(&self, session: &Session, state: &LastKnownState) -> Result<(), CoreError> {
        let sql = "UPDATE last_known_states SET local_path=?2, remote_ref=?3, \
                    local_parent_path=?4, remote_parent_ref=?5, local_name=?6, remote_name=?7, \
                    remote_parent_path=?8, folderish=?9, local_state=?10, remote_state=?11, \
                    last_sync_error_date=?12 WHERE id=?1";
        self.trace(sql);
        session.connection().execute(
            sql,
            params![
                state.id,
                state.local_path,
                state.remote_ref,
                state.local_parent_path,
                state.remote_parent_ref,
                state.local_name,
                state.remote_name,
                state.remote_parent_path,
                state.folderish as i64,
                state.local_state.as_str(),
                state.remote_state.as_str(),
                state.last_sync_error_date.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn delete_state(&self, session: &Session, id: i64) -> Result<(), CoreError> {
        let sql = "DELETE FROM last_known_states WHERE id = ?1";
        self.trace(sql);
        session.connection().execute(sql, params![id])?;
        Ok(())
    }

    pub fn get_state_by_local_path(
        &self,
        session: &Session,
        local_folder: &str,
        local_path: &str,
    ) -> Result<Option<LastKnownState>, CoreError> {
        let sql = "SELECT * FROM last_known_states WHERE local_folder=?1 AND local_path=?2";
        self.trace(sql);
        Ok(session
            .connection()
            .query_row(sql, params![local_folder, local_path], Self::row_to_state)
            .optional()?)
    }

    pub fn get_state_by_remote_ref(
        &self,
        session: &Session,
        local_folder: &str,
        remote_ref: &str,
    ) -> Result<Option<LastKnownState>, CoreError> {
        let sql = "SELECT * FROM last_known_states WHERE local_folder=?1 AND remote_ref=?2";
        self.trace(sql);
        Ok(session
            .connection()
            .query_row(sql, params![local_folder, remote_ref], Self::row_to_state)
            .optional()?)
    }

    /// Direct children of a folder pair, selected by whichever identity is
    /// known: when both the local path and the remote ref are known, a
    /// child matching either one qualifies (a remote-side move not yet
    /// reflected in `local_parent_path` must still surface as a child, per
    /// the recursive aggregation contract). Ordered by name on both sides
    /// ascending.
    pub fn query_children(
        &self,
        session: &Session,
        local_folder: &str,
        local_parent_path: Option<&str>,
        remote_parent_ref: Option<&str>,
    ) -> Result<Vec<LastKnownState>, CoreError> {
        let sql = match (local_parent_path, remote_parent_ref) {
            (Some(_), Some(_)) => {
                "SELECT * FROM last_known_states WHERE local_folder=?1 \
                 AND (local_parent_path=?2 OR remote_parent_ref=?3) \
                 ORDER BY local_name ASC, remote_name ASC"
            }
            (Some(_), None) => {
                "SELECT * FROM last_known_states WHERE local_folder=?1 AND local_parent_path=?2 \
                 ORDER BY local_name ASC, remote_name ASC"
            }
            (None, Some(_)) => {
                "SELECT * FROM last_known_states WHERE local_folder=?1 AND remote_parent_ref=?2 \
                 ORDER BY local_name ASC, remote_name ASC"
            }
            (None, None) => {
                "SELECT * FROM last_known_states WHERE local_folder=?1 AND local_parent_path IS NULL \
                 AND remote_parent_ref IS NULL ORDER BY local_name ASC, remote_name ASC"
            }
        };
        self.trace(sql);
        let mut stmt = session.connection().prepare(sql)?;
        let rows = match (local_parent_path, remote_parent_ref) {
            (Some(l), Some(r)) => stmt.query_map(params![local_folder, l, r], Self::row_to_state)?,
            (Some(l), None) => stmt.query_map(params![local_folder, l], Self::row_to_state)?,
            (None, Some(r)) => stmt.query_map(params![local_folder, r], Self::row_to_state)?,
            (None, None) => stmt.query_map(params![local_folder], Self::row_to_state)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pairs awaiting synchronization: not both sides `synchronized`,
    /// optionally filtered to one binding, with an optional back-off window
    /// excluding pairs that errored within `ignore_in_error` seconds.
    pub fn query_pending(
        &self,
        session: &Session,
        local_folder: Option<&str>,
        ignore_in_error: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<LastKnownState>, CoreError> {
        let mut sql = String::from(
            "SELECT * FROM last_known_states WHERE (local_state != 'synchronized' OR remote_state != 'synchronized')",
        );
        let mut folder_owned: Option<String> = None;
        let mut cutoff_owned: Option<String> = None;

        if let Some(folder) = local_folder {
            sql.push_str(" AND local_folder = ?");
            folder_owned = Some(folder.to_string());
        }
        if let Some(secs) = ignore_in_error {
            let cutoff = Utc::now() - chrono::Duration::seconds(secs);
            sql.push_str(" AND (last_sync_error_date IS NULL OR last_sync_error_date <= ?)");
            cutoff_owned = Some(cutoff.to_rfc3339());
        }
        sql.push_str(
            " ORDER BY remote_parent_path ASC, remote_name ASC, remote_ref ASC, local_path ASC",
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        self.trace(&sql);
        let mut stmt = session.connection().prepare(&sql)?;
        let mut param_values: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(f) = &folder_owned {
            param_values.push(f);
        }
        if let Some(c) = &cutoff_owned {
            param_values.push(c);
        }
        let rows = stmt.query_map(param_values.as_slice(), Self::row_to_state)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_state(row: &Row) -> rusqlite::Result<LastKnownState> {
        let error_date: Option<String> = row.get("last_sync_error_date")?;
        Ok(LastKnownState {
            id: row.get("id")?,
            local_folder: row.get("local_folder")?,
            local_path: row.get("local_path")?,
            remote_ref: row.get("remote_ref")?,
            local_parent_path: row.get("local_parent_path")?,
            remote_parent_ref: row.get("remote_parent_ref")?,
            local_name: row.get("local_name")?,
            remote_name: row.get("remote_name")?,
            remote_parent_path: row.get("remote_parent_path")?,
            folderish: row.get::<_, i64>("folderish")? != 0,
            local_state: SideState::parse(&row.get::<_, String>("local_state")?),
            remote_state: SideState::parse(&row.get::<_, String>("remote_state")?),
            last_sync_error_date: error_date
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(folder: &str) -> ServerBinding {
        ServerBinding {
            local_folder: folder.to_string(),
            server_url: "https://example.com/".to_string(),
            remote_user: "alice".to_string(),
            remote_password: None,
            remote_token: Some("tok".to_string()),
        }
    }

    #[test]
    fn device_config_is_created_on_first_access() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        let config = store.get_device_config(&session).unwrap();
        session.commit().unwrap();
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn device_config_persists_across_sessions() {
        let store = StateStore::open_in_memory().unwrap();
        let id = {
            let session = store.session().unwrap();
            let config = store.get_device_config(&session).unwrap();
            session.commit().unwrap();
            config.device_id
        };
        let session = store.session().unwrap();
        let config = store.get_device_config(&session).unwrap();
        assert_eq!(config.device_id, id);
    }

    #[test]
    fn server_binding_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        store.add_server_binding(&session, &binding("/home/alice/Docs")).unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        let fetched = store.get_server_binding(&session, "/home/alice/Docs").unwrap();
        assert_eq!(fetched.unwrap().remote_user, "alice");
    }

    #[test]
    fn uncommitted_binding_does_not_persist() {
        let store = StateStore::open_in_memory().unwrap();
        {
            let session = store.session().unwrap();
            store.add_server_binding(&session, &binding("/home/alice/Docs")).unwrap();
        }
        let session = store.session().unwrap();
        assert!(store.get_server_binding(&session, "/home/alice/Docs").unwrap().is_none());
    }

    #[test]
    fn pending_query_excludes_fully_synchronized_pairs() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        store.add_server_binding(&session, &binding("/f")).unwrap();

        let mut synced = state_row("/f");
        synced.local_state = SideState::Synchronized;
        synced.remote_state = SideState::Synchronized;
        store.add_state(&session, &synced).unwrap();

        let mut pending = state_row("/f");
        pending.local_state = SideState::Modified;
        pending.remote_state = SideState::Synchronized;
        store.add_state(&session, &pending).unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        let results = store.query_pending(&session, None, None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].local_state, SideState::Modified);
    }

    #[test]
    fn pending_query_respects_error_backoff() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        store.add_server_binding(&session, &binding("/f")).unwrap();

        let mut recent_error = state_row("/f");
        recent_error.local_state = SideState::Modified;
        recent_error.last_sync_error_date = Some(Utc::now());
        store.add_state(&session, &recent_error).unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        let results = store.query_pending(&session, None, Some(3600), None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn deleting_a_binding_cascades_to_its_states() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        store.add_server_binding(&session, &binding("/f")).unwrap();
        store.add_state(&session, &state_row("/f")).unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        store.delete_server_binding(&session, "/f").unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        let remaining = store.query_children(&session, "/f", None, None).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn query_children_matches_on_either_known_identity() {
        let store = StateStore::open_in_memory().unwrap();
        let session = store.session().unwrap();
        store.add_server_binding(&session, &binding("/f")).unwrap();

        let mut local_child = state_row("/f");
        local_child.local_path = Some("/local-linked".to_string());
        local_child.local_parent_path = Some("/parent".to_string());
        local_child.remote_parent_ref = Some("other-parent-ref".to_string());
        store.add_state(&session, &local_child).unwrap();

        let mut remote_linked_child = state_row("/f");
        remote_linked_child.local_path = Some("/remote-linked".to_string());
        remote_linked_child.local_parent_path = Some("/stale-parent".to_string());
        remote_linked_child.remote_parent_ref = Some("parent-ref".to_string());
        store.add_state(&session, &remote_linked_child).unwrap();
        session.commit().unwrap();

        let session = store.session().unwrap();
        let children = store
            .query_children(&session, "/f", Some("/parent"), Some("parent-ref"))
            .unwrap();
        let paths: Vec<_> = children.iter().filter_map(|c| c.local_path.clone()).collect();
        assert!(paths.contains(&"/local-linked".to_string()));
        assert!(paths.contains(&"/remote-linked".to_string()));
    }

    fn state_row(folder: &str) -> LastKnownState {
        LastKnownState {
            id: 0,
            local_folder: folder.to_string(),
            local_path: Some("/f/a.txt".to_string()),
            remote_ref: Some("doc-1".to_string()),
            local_parent_path: None,
            remote_parent_ref: None,
            local_name: Some("a.txt".to_string()),
            remote_name: Some("a.txt".to_string()),
            remote_parent_path: None,
            folderish: false,
            local_state: SideState::Unknown,
            remote_state: SideState::Unknown,
            last_sync_error_date: None,
        }
    }
}
