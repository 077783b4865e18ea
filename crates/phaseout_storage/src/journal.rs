#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use phaseout_kernel_contracts::capacity::CapacitySettingsRecord;
use phaseout_kernel_contracts::params::{ParameterSetRecord, ResultId};
use phaseout_kernel_contracts::UnixTimeSecs;

use crate::param_store::StorageError;

pub const JOURNAL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    InsertCapacitySettings { record: CapacitySettingsRecord },
    InsertParameterSet { record: ParameterSetRecord },
    ImportParameterSet { record: ParameterSetRecord },
    TouchLastUsed { result_id: ResultId, at: UnixTimeSecs },
    MarkCalculated { result_id: ResultId, at: UnixTimeSecs },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub schema_version: u32,
    pub ops: Vec<StoreOp>,
}

impl JournalEntry {
    pub fn v1(ops: Vec<StoreOp>) -> Self {
        Self {
            schema_version: JOURNAL_SCHEMA_VERSION,
            ops,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| StorageError::Unavailable {
                reason: format!(
                    "failed to create journal directory '{}': {}",
                    parent.display(),
                    err
                ),
            })?;
        }
        if !path.exists() {
            File::create(&path).map_err(|err| StorageError::Unavailable {
                reason: format!("failed to create journal '{}': {}", path.display(), err),
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A line is committed once its trailing newline is synced. A failed write is cut back off.
    pub fn append(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(entry).map_err(|err| StorageError::Unavailable {
            reason: format!("failed to encode journal entry: {err}"),
        })?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| StorageError::Unavailable {
                reason: format!(
                    "failed opening journal '{}' for append: {}",
                    self.path.display(),
                    err
                ),
            })?;
        let committed_len = file
            .metadata()
            .map_err(|err| StorageError::Unavailable {
                reason: format!("failed to stat journal '{}': {}", self.path.display(), err),
            })?
            .len();
        if let Err(err) = file.write_all(&line).and_then(|_| file.sync_data()) {
            if let Err(cut) = file.set_len(committed_len).and_then(|_| file.sync_data()) {
                warn!(
                    "journal '{}' keeps a partial line, truncate to {} failed: {}",
                    self.path.display(),
                    committed_len,
                    cut
                );
            }
            return Err(StorageError::Unavailable {
                reason: format!("failed writing journal '{}': {}", self.path.display(), err),
            });
        }
        Ok(())
    }

    /// Feeds every op to `apply` in file order. Returns the number of entries read.
    /// An unterminated last line was never committed: it is dropped and the file truncated.
    pub fn replay<F>(&self, mut apply: F) -> Result<usize, StorageError>
    where
        F: FnMut(StoreOp) -> Result<(), StorageError>,
    {
        let bytes = fs::read(&self.path).map_err(|err| StorageError::Unavailable {
            reason: format!("failed to open journal '{}': {}", self.path.display(), err),
        })?;
        let mut entries = 0usize;
        let mut offset = 0usize;
        let mut line_no = 0usize;
        while offset < bytes.len() {
            line_no += 1;
            let Some(len) = bytes[offset..].iter().position(|b| *b == b'\n') else {
                warn!(
                    "journal '{}' line {}: dropping {} bytes of unterminated tail",
                    self.path.display(),
                    line_no,
                    bytes.len() - offset
                );
                self.truncate_to(offset as u64)?;
                break;
            };
            let raw = &bytes[offset..offset + len];
            offset += len + 1;
            let line = std::str::from_utf8(raw).map_err(|err| StorageError::JournalCorrupt {
                line: line_no,
                reason: format!("read failed: {err}"),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry =
                serde_json::from_str(line).map_err(|err| StorageError::JournalCorrupt {
                    line: line_no,
                    reason: format!("parse failed: {err}"),
                })?;
            if entry.schema_version != JOURNAL_SCHEMA_VERSION {
                return Err(StorageError::JournalCorrupt {
                    line: line_no,
                    reason: format!("unsupported schema_version={}", entry.schema_version),
                });
            }
            for op in entry.ops {
                apply(op).map_err(|err| StorageError::JournalCorrupt {
                    line: line_no,
                    reason: err.to_string(),
                })?;
            }
            entries += 1;
        }
        Ok(entries)
    }

    fn truncate_to(&self, len: u64) -> Result<(), StorageError> {
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|file| file.set_len(len).and_then(|_| file.sync_data()))
            .map_err(|err| StorageError::Unavailable {
                reason: format!(
                    "failed to truncate journal '{}' to {} bytes: {}",
                    self.path.display(),
                    len,
                    err
                ),
            })
    }

    pub fn rewrite(&self, entry: &JournalEntry) -> Result<(), StorageError> {
        let json = serde_json::to_string(entry).map_err(|err| StorageError::Unavailable {
            reason: format!("failed to encode journal snapshot: {err}"),
        })?;
        let tmp = self.tmp_path();
        let unavailable = |what: &str, err: std::io::Error| StorageError::Unavailable {
            reason: format!("{what} '{}': {}", tmp.display(), err),
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|err| unavailable("failed creating journal snapshot", err))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|err| unavailable("failed writing journal snapshot", err))?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::Unavailable {
                reason: format!(
                    "failed replacing journal '{}': {}",
                    self.path.display(),
                    err
                ),
            });
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = fsync_dir(parent);
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "journal".to_string());
        self.path
            .with_file_name(format!("{name}.{}.compact.tmp", std::process::id()))
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
