use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use tempfile::NamedTempFile;

use crate::types::{HierarchyPath, Mark};

pub type ProgressRecord = BTreeMap<String, Mark>;

/// Checkpoint file recording which parts of the tree are already downloaded.
pub struct ProgressStore {
    path: PathBuf,
    record: ProgressRecord,
}

impl ProgressStore {
    /// Reads the state file; a missing or unreadable file yields an empty record.
    pub fn load(path: &Path) -> Self {
        let record = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ProgressRecord>(&contents) {
                Ok(record) => {
                    info!("loaded {} progress entries from {:?}", record.len(), path);
                    record
                }
                Err(e) => {
                    warn!("ignoring malformed progress file {:?}: {}", path, e);
                    ProgressRecord::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => ProgressRecord::new(),
            Err(e) => {
                warn!("could not read progress file {:?}: {}", path, e);
                ProgressRecord::new()
            }
        };
        ProgressStore {
            path: path.to_path_buf(),
            record,
        }
    }

    pub fn open(path: &Path, resume: bool) -> Self {
        if resume {
            return Self::load(path);
        }
        ProgressStore {
            path: path.to_path_buf(),
            record: ProgressRecord::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mark(&mut self, key: impl Into<String>, value: Mark) {
        self.record.insert(key.into(), value);
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.record.get(key).map(Mark::is_done).unwrap_or(false)
    }

    pub fn is_path_done(&self, path: &HierarchyPath) -> bool {
        self.is_done(&path.progress_key())
    }

    pub fn get(&self, key: &str) -> Option<&Mark> {
        self.record.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.record.keys()
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Marks `path` done and writes the checkpoint. Write failures are logged only.
    pub fn complete(&mut self, path: &HierarchyPath) {
        self.mark(path.progress_key(), path.done_mark());
        if let Err(e) = self.flush() {
            error!("error saving state: {:#}", e);
        }
    }

    /// Rewrites the whole file through a temp file in the same directory.
    pub fn flush(&self) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).context(format!("could not create state directory {:?}", dir))?;

        let json = serde_json::to_string_pretty(&self.record)?;
        let mut tmp = NamedTempFile::new_in(dir).context("could not create temporary state file")?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .context(format!("could not replace state file {:?}", self.path))?;
        Ok(())
    }

    /// Forgets all progress, on disk and in memory.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.record.clear();
        match fs::remove_file(&self.path) {
            Ok(_) => {
                debug!("removed state file {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("could not remove state file {:?}", self.path)),
        }
    }
}
