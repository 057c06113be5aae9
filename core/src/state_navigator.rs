//! Resolves local paths to their covering binding, and aggregates a
//! folder's pair state from its descendants.

use std::path::Path;
use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::{LastKnownState, PairState, ServerBinding};
use crate::store::{Session, StateStore};

pub struct StateNavigator {
    store: Arc<StateStore>,
}

impl StateNavigator {
    pub fn new(store: Arc<StateStore>) -> Self {
        StateNavigator { store }
    }

    /// Finds the binding that covers `path` and the path's location
    /// relative to that binding's root. An exact match on a bound folder
    /// wins outright, with `rel_path` `"/"`; otherwise exactly one binding
    /// must be a proper prefix (followed by a path separator) of `path`,
    /// and `rel_path` is what remains after stripping that prefix, with OS
    /// separators normalized to `/` and the leading `/` preserved. Zero
    /// matches is `NotFound`; more than one prefix match is
    /// `AmbiguousBinding` — bindings are never supposed to nest, but
    /// nothing in the data model forbids it, so callers get a clear error
    /// instead of a silently-arbitrary pick.
    pub fn binding_for_path(&self, path: &Path) -> Result<(ServerBinding, String), CoreError> {
        let session = self.store.session()?;
        let bindings = self.store.list_server_bindings(&session)?;
        let path_str = path.to_string_lossy().to_string();

        if let Some(exact) = bindings.iter().find(|b| b.local_folder == path_str) {
            return Ok((exact.clone(), "/".to_string()));
        }

        let mut matches = bindings.iter().filter(|b| {
            let prefix = format!("{}{}", b.local_folder, std::path::MAIN_SEPARATOR);
            path_str.starts_with(&prefix)
        });

        let Some(first) = matches.next() else {
            return Err(CoreError::NotFound(path_str));
        };
        if matches.next().is_some() {
            return Err(CoreError::AmbiguousBinding(path_str));
        }

        let prefix = format!("{}{}", first.local_folder, std::path::MAIN_SEPARATOR);
        let stripped = &path_str[prefix.len()..];
        let rel_path = format!("/{}", stripped.replace(std::path::MAIN_SEPARATOR, "/"));
        Ok((first.clone(), rel_path))
    }

    /// Direct children of `state` within its binding.
    pub fn children_states(
        &self,
        local_folder: &str,
        state: &LastKnownState,
    ) -> Result<Vec<LastKnownState>, CoreError> {
        let session = self.store.session()?;
        self.store
            .query_children(&session, local_folder, state.local_path.as_deref(), state.remote_ref.as_deref())
    }

    /// A folderish pair's rolled-up state: its own derived `PairState` if
    /// it has no descendants, `PairState::ChildrenModified` if any
    /// descendant (at any depth) is not synchronized, `Synchronized`
    /// otherwise. Non-folderish pairs report their own derived state
    /// unchanged.
    pub fn pair_state_recursive(
        &self,
        local_folder: &str,
        state: &LastKnownState,
    ) -> Result<PairState, CoreError> {
        let session = self.store.session()?;
        self.aggregate(&session, local_folder, state)
    }

    fn aggregate(&self, session: &Session, local_folder: &str, state: &LastKnownState) -> Result<PairState, CoreError> {
        if !state.folderish {
            return Ok(state.pair_state());
        }
        let children =
            self.store
                .query_children(session, local_folder, state.local_path.as_deref(), state.remote_ref.as_deref())?;
        if children.is_empty() {
            return Ok(state.pair_state());
        }
        for child in &children {
            let child_pair = self.aggregate(session, local_folder, child)?;
            if !child_pair.is_synchronized() {
                return Ok(PairState::ChildrenModified);
            }
        }
        Ok(PairState::Synchronized)
    }
}
