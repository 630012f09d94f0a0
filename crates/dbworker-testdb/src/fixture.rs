use crate::{MemDb, MemDbConfig, Result};
use core::{
    ops::Deref,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use dbworker::Connect;
use std::{process, sync::Arc};

/// Prefix of every database created by [`TestDb`].
pub const TEST_DB_PREFIX: &str = "unittest";

static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

/// A throwaway database for one test.
///
/// Each fixture gets a fresh, uniquely named database so tests running in
/// parallel never see each other's documents. [`TestDb::close`] drops the
/// database and disconnects; dropping the fixture does the same if the test
/// did not close it.
///
/// `TestDb` derefs to [`MemDb`], so database methods can be called on it
/// directly.
#[derive(Debug)]
pub struct TestDb {
    db: Arc<MemDb>,
    closed: AtomicBool,
}

impl TestDb {
    pub fn new() -> Self {
        let name = format!(
            "{TEST_DB_PREFIX}-{}-{}",
            process::id(),
            NEXT_DB.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            db: Arc::new(MemDb::open(name)),
            closed: AtomicBool::new(false),
        }
    }

    /// A shared handle, e.g. to attach a pool to this database.
    pub fn handle(&self) -> Arc<MemDb> {
        Arc::clone(&self.db)
    }

    /// Configuration that connects a new, independent handle to this database.
    pub fn config(&self) -> MemDbConfig {
        MemDbConfig::new(self.db.name())
    }

    /// Drops the database and disconnects. Only the first call does anything.
    ///
    /// # Errors
    ///
    /// Fails if the handle was already disconnected by someone else.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.drop_database()?;
        self.db.disconnect()
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestDb {
    type Target = MemDb;

    fn deref(&self) -> &MemDb {
        &self.db
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        if let Err(_err) = self.close() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to close test database: {_err}");
        }
    }
}
