//! Scoped transactional handle over the state store's connection.

use parking_lot::MutexGuard;
use rusqlite::Connection;

use crate::errors::CoreError;

/// A single unit of work against the store. Holds the connection mutex for
/// its lifetime, so operations within one session never interleave with
/// another thread's session. Uncommitted work rolls back automatically on
/// drop, including on early returns via `?`.
pub struct Session<'a> {
    guard: MutexGuard<'a, Connection>,
    open: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn begin(guard: MutexGuard<'a, Connection>) -> Result<Self, CoreError> {
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Session { guard, open: true })
    }

    pub fn connection(&self) -> &Connection {
        &self.guard
    }

    pub fn commit(mut self) -> Result<(), CoreError> {
        self.guard.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), CoreError> {
        self.guard.execute_batch("ROLLBACK")?;
        self.open = false;
        Ok(())
    }
}

impl<'a> Drop for Session<'a> {
    fn drop(&mut self) {
        if self.open {
            // Best-effort: if the connection is already in a bad state there
            // is nothing more useful to do than let the guard release.
            let _ = self.guard.execute_batch("ROLLBACK");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn test_connection() -> Mutex<Connection> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        Mutex::new(conn)
    }

    #[test]
    fn commit_persists_writes() {
        let mutex = test_connection();
        {
            let session = Session::begin(mutex.lock()).unwrap();
            session.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
            session.commit().unwrap();
        }
        let guard = mutex.lock();
        let count: i64 = guard.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let mutex = test_connection();
        {
            let session = Session::begin(mutex.lock()).unwrap();
            session.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
            // session dropped here without commit
        }
        let guard = mutex.lock();
        let count: i64 = guard.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn explicit_rollback_discards_writes() {
        let mutex = test_connection();
        {
            let session = Session::begin(mutex.lock()).unwrap();
            session.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
            session.rollback().unwrap();
        }
        let guard = mutex.lock();
        let count: i64 = guard.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}
