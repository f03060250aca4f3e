use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{FlowHashError, Result};
use crate::table::CuckooTable;

// Process-wide name -> table map. Entries are weak so a dropped table never
// keeps itself alive through the registry.
static TABLES: Lazy<Mutex<HashMap<String, Weak<CuckooTable>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn insert(name: &str, table: &Arc<CuckooTable>) -> Result<()> {
    let mut map = TABLES.lock();
    if let Some(existing) = map.get(name) {
        if existing.strong_count() > 0 {
            return Err(FlowHashError::Exists(name.to_owned()));
        }
    }
    map.insert(name.to_owned(), Arc::downgrade(table));
    Ok(())
}

pub(crate) fn find(name: &str) -> Option<Arc<CuckooTable>> {
    TABLES.lock().get(name).and_then(Weak::upgrade)
}

/// Remove `name` unless it has been re-registered by a live table.
pub(crate) fn remove(name: &str) {
    let mut map = TABLES.lock();
    if let Some(existing) = map.get(name) {
        if existing.strong_count() == 0 {
            map.remove(name);
        }
    }
}
