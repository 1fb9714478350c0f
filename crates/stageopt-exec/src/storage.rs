//! In-memory file store.
//!
//! A "file" is a path holding a list of rows. Datasets and stage outputs are
//! directories of part files (`{dir}/part-00000`, ...). Clones share the same
//! underlying map.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use stageopt_core::types::Row;
use stageopt_planner::estimate::FileCatalog;

use crate::runtime::ExecError;

pub fn part_path(dir: &str, index: usize) -> String {
    format!("{dir}/part-{index:05}")
}

/// Thread-safe in-memory storage keyed by path.
#[derive(Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<Mutex<BTreeMap<String, Vec<Row>>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<Row>>>, ExecError> {
        self.files
            .lock()
            .map_err(|e| ExecError::Storage(format!("file store poisoned: {e}")))
    }

    /// Store a dataset as one part file per entry of `files`.
    pub fn put_dataset(&self, dir: &str, files: Vec<Vec<Row>>) -> Result<(), ExecError> {
        let mut data = self.lock()?;
        for (i, rows) in files.into_iter().enumerate() {
            data.insert(part_path(dir, i), rows);
        }
        Ok(())
    }

    pub fn write(&self, path: &str, rows: Vec<Row>) -> Result<(), ExecError> {
        self.lock()?.insert(path.to_string(), rows);
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<Vec<Row>, ExecError> {
        self.lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| ExecError::Storage(format!("path not found: {path}")))
    }

    /// Files making up `dir`, sorted: the path itself if it is a file, else its parts.
    pub fn list(&self, dir: &str) -> Result<Vec<String>, ExecError> {
        let data = self.lock()?;
        if data.contains_key(dir) {
            return Ok(vec![dir.to_string()]);
        }
        let prefix = format!("{dir}/");
        Ok(data
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Every row under `dir`, in file order.
    pub fn read_dir(&self, dir: &str) -> Result<Vec<Row>, ExecError> {
        let mut out = Vec::new();
        for path in self.list(dir)? {
            out.extend(self.read(&path)?);
        }
        Ok(out)
    }

    /// Remove everything under `dir`; used before a stage rewrites its output.
    pub fn clear_dir(&self, dir: &str) -> Result<(), ExecError> {
        let prefix = format!("{dir}/");
        self.lock()?
            .retain(|k, _| k != dir && !k.starts_with(&prefix));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileCatalog for MemoryFileStore {
    fn file_count(&self, dataset: &str) -> Option<u32> {
        match self.list(dataset) {
            Ok(files) if !files.is_empty() => Some(files.len() as u32),
            _ => None,
        }
    }
}
