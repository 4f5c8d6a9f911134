//! Destination planning.
//!
//! Maps each dated file to `root/YYYY/MM/DD/<name>` and resolves name
//! collisions before any worker sees the plan. Planning runs on a single
//! thread, so the set of claimed destinations needs no locking.
//!
//! Collisions are resolved first-claimed-wins in planning order: the first
//! `clip.wav` of a day keeps its name, the next becomes `clip_1.wav`, then
//! `clip_2.wav`, and so on. Files already present at the destination count
//! as claimed.

use crate::date_extractor::SortedDate;
use crate::transfer::{OperationKind, TransferPlan};
use crate::walker::FileRecord;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Answers whether a destination path is already occupied.
pub trait DestinationProbe {
    fn exists(&self, path: &Path) -> bool;
}

/// Probes the real filesystem with a metadata lookup.
///
/// Lookup errors other than "not found" count as occupied, so an
/// unreadable destination is never overwritten.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl DestinationProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        match fs::symlink_metadata(path) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }
}

/// Builds unique [`TransferPlan`]s for one run.
pub struct DestinationPlanner<P = FsProbe> {
    root: PathBuf,
    kind: OperationKind,
    readonly: bool,
    probe: P,
    claimed: HashSet<PathBuf>,
    next_suffix: HashMap<PathBuf, u32>,
}

impl DestinationPlanner<FsProbe> {
    pub fn new(root: PathBuf, kind: OperationKind, readonly: bool) -> Self {
        Self::with_probe(root, kind, readonly, FsProbe)
    }
}

impl<P: DestinationProbe> DestinationPlanner<P> {
    pub fn with_probe(root: PathBuf, kind: OperationKind, readonly: bool, probe: P) -> Self {
        Self {
            root,
            kind,
            readonly,
            probe,
            claimed: HashSet::new(),
            next_suffix: HashMap::new(),
        }
    }

    /// Number of destinations claimed so far in this run.
    pub fn claimed(&self) -> usize {
        self.claimed.len()
    }

    /// Plans the transfer of `record` into the bucket for `date`.
    pub fn plan(&mut self, record: &FileRecord, date: SortedDate) -> TransferPlan {
        let dir = self.root.join(date.bucket());
        let name = record
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("unnamed"));
        let destination = self.claim(&dir, &name);

        TransferPlan {
            source: record.path.clone(),
            destination,
            kind: self.kind,
            readonly: self.readonly,
            size: record.size,
        }
    }

    fn is_free(&self, candidate: &Path) -> bool {
        !self.claimed.contains(candidate) && !self.probe.exists(candidate)
    }

    fn claim(&mut self, dir: &Path, name: &OsString) -> PathBuf {
        let base = dir.join(name);
        if self.is_free(&base) {
            self.claimed.insert(base.clone());
            return base;
        }

        let name_path = Path::new(name);
        let stem = name_path
            .file_stem()
            .map(OsString::from)
            .unwrap_or_else(|| name.clone());
        let extension = name_path.extension();

        let mut counter = self.next_suffix.get(&base).copied().unwrap_or(1);
        let chosen = loop {
            let mut candidate_name = stem.clone();
            candidate_name.push(format!("_{counter}"));
            if let Some(ext) = extension {
                candidate_name.push(".");
                candidate_name.push(ext);
            }
            let candidate = dir.join(candidate_name);
            counter += 1;
            if self.is_free(&candidate) {
                break candidate;
            }
        };

        tracing::debug!(
            wanted = %base.display(),
            chosen = %chosen.display(),
            "destination name taken, disambiguated"
        );
        self.next_suffix.insert(base, counter);
        self.claimed.insert(chosen.clone());
        chosen
    }
}
