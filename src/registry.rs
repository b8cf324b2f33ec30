//! Durable record of the background processes mdc started.
//!
//! One pretty-printed JSON array per (group, project) pair. A missing file and
//! an empty list mean the same thing; files are deleted once they empty out.
//! Writers are not synchronised: two invocations appending to the same
//! project at once can lose one of the appends.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::MdcError;
use crate::paths::Layout;
use crate::process::{self, ProcessController};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: String,
    pub dir: String,
}

/// Projects of one group, each with its entries in insertion order.
pub type GroupEntries = BTreeMap<String, Vec<ProcessEntry>>;

/// A registry hit: where the entry lives and the entry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedProcess {
    pub group: String,
    pub project: String,
    pub entry: ProcessEntry,
}

#[derive(Debug, Clone)]
pub struct Registry {
    layout: Layout,
}

impl Registry {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn append(&self, group: &str, project: &str, entry: ProcessEntry) -> Result<()> {
        let mut entries = self.load(group, project)?.unwrap_or_default();
        entries.push(entry);
        self.save(group, project, &entries)
    }

    pub fn save(&self, group: &str, project: &str, entries: &[ProcessEntry]) -> Result<()> {
        let path = self.layout.registry_file(group, project);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    /// `Ok(None)` when the project has no registry file.
    pub fn load(&self, group: &str, project: &str) -> Result<Option<Vec<ProcessEntry>>> {
        let path = self.layout.registry_file(group, project);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        parse_entries(&raw, &path).map(Some)
    }

    /// Every project file in `group`. A missing group directory is empty.
    pub fn load_all(&self, group: &str) -> Result<GroupEntries> {
        let dir = self.layout.pids_dir(group);
        let mut result = GroupEntries::new();

        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(result),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", dir.display()));
            }
        };

        for item in read_dir {
            let item = item.with_context(|| format!("failed to read {}", dir.display()))?;
            let path = item.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(project) = path.file_stem().map(|stem| stem.to_string_lossy().to_string())
            else {
                continue;
            };

            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            result.insert(project, parse_entries(&raw, &path)?);
        }

        Ok(result)
    }

    /// Every group that still has at least one project file.
    pub fn load_all_groups(&self) -> Result<BTreeMap<String, GroupEntries>> {
        let root = self.layout.pids_root();
        let mut result = BTreeMap::new();

        let read_dir = match fs::read_dir(&root) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(result),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", root.display()));
            }
        };

        for item in read_dir {
            let item = item.with_context(|| format!("failed to read {}", root.display()))?;
            if !item.path().is_dir() {
                continue;
            }

            let group = item.file_name().to_string_lossy().to_string();
            let projects = self.load_all(&group)?;
            if !projects.is_empty() {
                result.insert(group, projects);
            }
        }

        Ok(result)
    }

    pub fn find_by_pid(&self, pid: u32) -> Result<TrackedProcess> {
        for (group, projects) in self.load_all_groups()? {
            for (project, entries) in projects {
                if let Some(entry) = entries.into_iter().find(|entry| entry.pid == pid) {
                    return Ok(TrackedProcess {
                        group,
                        project,
                        entry,
                    });
                }
            }
        }

        Err(MdcError::ProcessNotFound(pid).into())
    }

    /// Drops `pid` from the project's file, deleting the file and then the
    /// group directory when they become empty.
    pub fn remove_entry(&self, group: &str, project: &str, pid: u32) -> Result<()> {
        let Some(entries) = self.load(group, project)? else {
            return Ok(());
        };

        let remaining: Vec<ProcessEntry> = entries
            .into_iter()
            .filter(|entry| entry.pid != pid)
            .collect();
        if !remaining.is_empty() {
            return self.save(group, project, &remaining);
        }

        let path = self.layout.registry_file(group, project);
        remove_file_if_exists(&path)?;
        remove_dir_if_empty(&self.layout.pids_dir(group))
    }

    /// Stops every tracked process of `group`, then forgets the group: its
    /// registry directory and log directory are deleted even when some kill
    /// did not take.
    pub fn kill_all_with_callback<F>(
        &self,
        group: &str,
        controller: &dyn ProcessController,
        timeout: Duration,
        mut on_before_kill: F,
    ) -> Result<()>
    where
        F: FnMut(&str, &ProcessEntry),
    {
        for (project, entries) in self.load_all(group)? {
            for entry in &entries {
                on_before_kill(&project, entry);
                let outcome = process::graceful_kill(controller, entry.pid, timeout);
                tracing::debug!(group, project = %project, pid = entry.pid, ?outcome, "stopped tracked process");
            }
        }

        let pids_result = remove_dir_all_if_exists(&self.layout.pids_dir(group));
        let logs_result = remove_dir_all_if_exists(&self.layout.logs_dir(group));
        pids_result.and(logs_result)
    }
}

fn parse_entries(raw: &str, path: &Path) -> Result<Vec<ProcessEntry>> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
        _ => Ok(()),
    }
}

fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
        _ => Ok(()),
    }
}

fn remove_dir_if_empty(path: &Path) -> Result<()> {
    let mut read_dir = match fs::read_dir(path) {
        Ok(read_dir) => read_dir,
        Err(_) => return Ok(()),
    };
    if read_dir.next().is_none() {
        fs::remove_dir(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}
