//! Applied-set tracking.
//!
//! Each deployment record (AppliedManifestWork) publishes the objects it
//! applied. The tracker keeps the last observed set per record plus a reverse
//! index from object UID to the owning record. Whenever a record is observed
//! again, its set is replaced wholesale and the diff against the previous set
//! tells the caller which watches to acquire and release. A UID that leaves
//! one record while another still lists it is handed to that record rather
//! than released.

use crds::AppliedResource;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Objects one deployment record currently applies, keyed by UID.
///
/// Entries carry their own UID and resource coordinates, so each UID stays
/// paired with its kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSet {
    entries: Vec<AppliedResource>,
}

impl AppliedSet {
    /// Builds a set from published resources. Entries without a UID are
    /// skipped and a repeated UID keeps its first entry.
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a AppliedResource>) -> Self {
        let mut seen = HashSet::new();
        let entries = resources
            .into_iter()
            .filter(|r| !r.uid.is_empty() && seen.insert(r.uid.clone()))
            .cloned()
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[AppliedResource] {
        &self.entries
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.iter().any(|e| e.uid == uid)
    }

    pub fn uids(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.uid.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of comparing two applied sets of the same record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSetDiff {
    pub added: AppliedSet,
    pub removed: AppliedSet,
}

impl AppliedSetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compares two sets by UID. UIDs present in both are kept and appear in
/// neither half of the result.
pub fn diff(old: &AppliedSet, new: &AppliedSet) -> AppliedSetDiff {
    if old == new {
        return AppliedSetDiff::default();
    }
    if old.is_empty() {
        return AppliedSetDiff {
            added: new.clone(),
            removed: AppliedSet::default(),
        };
    }
    if new.is_empty() {
        return AppliedSetDiff {
            added: AppliedSet::default(),
            removed: old.clone(),
        };
    }

    let old_uids = old.uids();
    let new_uids = new.uids();
    AppliedSetDiff {
        added: AppliedSet::from_resources(new.entries.iter().filter(|e| !old_uids.contains(e.uid.as_str()))),
        removed: AppliedSet::from_resources(old.entries.iter().filter(|e| !new_uids.contains(e.uid.as_str()))),
    }
}

/// Who claims a tracked object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOwner {
    /// Name of the AppliedManifestWork on this cluster
    pub applied_work: String,
    /// Name of the ManifestWork on the hub
    pub manifest_work: String,
}

#[derive(Debug)]
struct TrackedWork {
    manifest_work: String,
    applied: AppliedSet,
}

#[derive(Debug, Default)]
struct TrackerState {
    works: HashMap<String, TrackedWork>,
    owners: HashMap<String, String>,
}

impl TrackerState {
    /// Another record, besides `except`, whose set lists `uid`.
    fn other_claimant(&self, uid: &str, except: &str) -> Option<String> {
        self.works
            .iter()
            .filter(|(name, work)| name.as_str() != except && work.applied.contains(uid))
            .map(|(name, _)| name.clone())
            .min()
    }

    /// Withdraws `applied_work`'s claim on each entry of `dropped`. Returns
    /// the entries nobody claims any more.
    fn withdraw(&mut self, applied_work: &str, dropped: &AppliedSet) -> AppliedSet {
        let mut released = Vec::new();
        for entry in dropped.entries() {
            match self.other_claimant(&entry.uid, applied_work) {
                Some(other) => {
                    if self.owners.get(&entry.uid).is_some_and(|owner| owner == applied_work) {
                        self.owners.insert(entry.uid.clone(), other);
                    }
                }
                None => {
                    self.owners.remove(&entry.uid);
                    released.push(entry);
                }
            }
        }
        AppliedSet::from_resources(released)
    }
}

/// Applied sets per deployment record plus the UID reverse index.
///
/// Both maps sit behind one lock so a set and its index entries always
/// change together.
#[derive(Debug, Default)]
pub struct AppliedSetTracker {
    state: Mutex<TrackerState>,
}

impl AppliedSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the set tracked for `applied_work` and returns what changed.
    ///
    /// `removed` holds only the entries no record claims any more. The
    /// record that replaces its set last owns a UID listed by several.
    pub fn replace(&self, applied_work: &str, manifest_work: &str, applied: AppliedSet) -> AppliedSetDiff {
        let mut state = self.lock();
        let previous = state
            .works
            .get(applied_work)
            .map(|w| w.applied.clone())
            .unwrap_or_default();
        let changes = diff(&previous, &applied);

        let removed = state.withdraw(applied_work, &changes.removed);
        for entry in changes.added.entries() {
            state.owners.insert(entry.uid.clone(), applied_work.to_string());
        }

        if applied.is_empty() {
            state.works.remove(applied_work);
        } else {
            state.works.insert(
                applied_work.to_string(),
                TrackedWork {
                    manifest_work: manifest_work.to_string(),
                    applied,
                },
            );
        }
        AppliedSetDiff {
            added: changes.added,
            removed,
        }
    }

    /// Stops tracking `applied_work`, returning the entries of its set that
    /// no other record claims.
    pub fn remove(&self, applied_work: &str) -> Option<AppliedSet> {
        let mut state = self.lock();
        let work = state.works.remove(applied_work)?;
        Some(state.withdraw(applied_work, &work.applied))
    }

    /// Owner of the object with `uid`, if any record claims it.
    pub fn owner_of(&self, uid: &str) -> Option<TrackedOwner> {
        let state = self.lock();
        let applied_work = state.owners.get(uid)?;
        let work = state.works.get(applied_work)?;
        Some(TrackedOwner {
            applied_work: applied_work.clone(),
            manifest_work: work.manifest_work.clone(),
        })
    }

    pub fn is_tracked(&self, uid: &str) -> bool {
        self.lock().owners.contains_key(uid)
    }

    pub fn applied_set(&self, applied_work: &str) -> Option<AppliedSet> {
        self.lock().works.get(applied_work).map(|w| w.applied.clone())
    }

    /// Number of UIDs in the reverse index.
    pub fn tracked_count(&self) -> usize {
        self.lock().owners.len()
    }
}
