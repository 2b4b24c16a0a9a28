//! In-process cache for code-master lookups.
//!
//! Read-mostly: initialization is idempotent and safe from multiple tasks;
//! the first successful load wins and later loads are no-ops.

use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::db::text;
use crate::error::EngineResult;

#[derive(Debug, Default)]
pub struct CodeMaster {
    jockey_names: HashMap<String, String>,
    trainer_names: HashMap<String, String>,
}

impl CodeMaster {
    pub fn jockey_name(&self, code: &str) -> Option<&str> {
        self.jockey_names.get(code).map(|s| s.as_str())
    }

    pub fn trainer_name(&self, code: &str) -> Option<&str> {
        self.trainer_names.get(code).map(|s| s.as_str())
    }
}

#[derive(Clone, Default)]
pub struct CodeMasterCache {
    inner: Arc<RwLock<Option<Arc<CodeMaster>>>>,
}

impl CodeMasterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the master tables once; concurrent callers race benignly and the
    /// first stored result is kept.
    pub async fn get_or_load(&self, pool: &PgPool) -> EngineResult<Arc<CodeMaster>> {
        if let Some(master) = self.inner.read().as_ref() {
            return Ok(Arc::clone(master));
        }

        let mut master = CodeMaster::default();

        let rows = sqlx::query("SELECT kishu_code, kishumei_ryakusho FROM kishu_master")
            .fetch_all(pool)
            .await?;
        for row in &rows {
            master
                .jockey_names
                .insert(text(row, "kishu_code"), text(row, "kishumei_ryakusho"));
        }

        let rows = sqlx::query("SELECT chokyoshi_code, chokyoshimei_ryakusho FROM chokyoshi_master")
            .fetch_all(pool)
            .await?;
        for row in &rows {
            master
                .trainer_names
                .insert(text(row, "chokyoshi_code"), text(row, "chokyoshimei_ryakusho"));
        }

        debug!(
            "Code master loaded: {} jockeys, {} trainers",
            master.jockey_names.len(),
            master.trainer_names.len()
        );

        let master = Arc::new(master);
        let mut slot = self.inner.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *slot = Some(Arc::clone(&master));
        Ok(master)
    }
}
