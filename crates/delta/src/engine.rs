use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tagsync_core::{Checksum, DeltaResult, ProjectId, ResultId};
use tracing::debug;

/// The single retained snapshot for one project.
struct Slot {
  result_id: ResultId,
  checksums: Arc<HashSet<Checksum>>,
}

type SlotCell = Arc<Mutex<Option<Slot>>>;

/// What a caller observed before computing a diff: the retained id and
/// set, if any. Used to detect a racing commit at commit time.
struct Observed {
  result_id: Option<ResultId>,
  checksums: Option<Arc<HashSet<Checksum>>>,
}

/// Per-project version history of checksum sets.
///
/// Exactly one `(result_id, checksum_set)` snapshot is retained per
/// project. Diffing is pure and runs outside any lock; only the commit
/// is serialized, and only per project, so cross-project callers never
/// contend.
#[derive(Default)]
pub struct DeltaEngine {
  projects: DashMap<ProjectId, SlotCell>,
}

impl DeltaEngine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Compute the add/remove delta between the caller's last known
  /// version and `current`.
  ///
  /// A caller whose `last` does not match the retained snapshot (or a
  /// first-ever caller) gets a full baseline: `is_incremental = false`
  /// and the entire current set as `added`. A caller polling with no
  /// real change keeps its stable result id.
  pub fn get_delta(
    &self,
    project: &ProjectId,
    last: Option<ResultId>,
    current: &HashSet<Checksum>,
  ) -> DeltaResult {
    let cell = self.cell(project);

    let observed = Self::observe(&lock_cell(&cell));
    let (mut baseline, mut added, mut removed) = Self::diff_observed(&observed, last, current);

    let mut guard = lock_cell(&cell);
    if Self::changed_since(&observed, &guard) {
      // A commit raced us between observe and lock; rediff against the
      // committed state (diffing is pure, redundancy is harmless)
      let reread = Self::observe(&guard);
      (baseline, added, removed) = Self::diff_observed(&reread, last, current);
    }

    // No change for an up-to-date caller keeps the id stable
    if let Some(result_id) = baseline
      && added.is_empty()
      && removed.is_empty()
    {
      return DeltaResult {
        is_incremental: true,
        result_id,
        added,
        removed,
      };
    }

    let result_id = match guard.as_ref() {
      Some(slot) => slot.result_id.next(),
      None => ResultId::FIRST,
    };
    *guard = Some(Slot {
      result_id,
      checksums: Arc::new(current.clone()),
    });

    debug!(
      project = %project,
      result_id = %result_id,
      added = added.len(),
      removed = removed.len(),
      incremental = baseline.is_some(),
      "committed descriptor snapshot"
    );

    DeltaResult {
      is_incremental: baseline.is_some(),
      result_id,
      added,
      removed,
    }
  }

  /// Retire the retained snapshot for a removed project.
  pub fn remove_project(&self, project: &ProjectId) {
    if self.projects.remove(project).is_some() {
      debug!(project = %project, "retired descriptor snapshot");
    }
  }

  /// Number of projects with a retained snapshot.
  pub fn project_count(&self) -> usize {
    self.projects.len()
  }

  fn cell(&self, project: &ProjectId) -> SlotCell {
    self
      .projects
      .entry(project.clone())
      .or_insert_with(|| Arc::new(Mutex::new(None)))
      .clone()
  }

  fn observe(guard: &MutexGuard<'_, Option<Slot>>) -> Observed {
    match guard.as_ref() {
      Some(slot) => Observed {
        result_id: Some(slot.result_id),
        checksums: Some(Arc::clone(&slot.checksums)),
      },
      None => Observed {
        result_id: None,
        checksums: None,
      },
    }
  }

  fn changed_since(observed: &Observed, guard: &MutexGuard<'_, Option<Slot>>) -> bool {
    match (&observed.checksums, guard.as_ref()) {
      (None, None) => false,
      (Some(seen), Some(slot)) => {
        observed.result_id != Some(slot.result_id) || !Arc::ptr_eq(seen, &slot.checksums)
      }
      _ => true,
    }
  }

  /// Diff `current` against what the caller may validly build on.
  ///
  /// Returns the matched baseline id (None = full baseline) and the
  /// added/removed sets. A stale or absent `last` means the cached set
  /// is treated as empty, so the whole current set comes back as added.
  fn diff_observed(
    observed: &Observed,
    last: Option<ResultId>,
    current: &HashSet<Checksum>,
  ) -> (Option<ResultId>, Vec<Checksum>, Vec<Checksum>) {
    let baseline = match (observed.result_id, last) {
      (Some(retained), Some(last)) if retained == last => Some(retained),
      _ => None,
    };

    let empty = HashSet::new();
    let cached: &HashSet<Checksum> = match (baseline, &observed.checksums) {
      (Some(_), Some(set)) => set,
      _ => &empty,
    };

    let (added, removed) = diff_sets(cached, current);
    (baseline, added, removed)
  }
}

/// Set difference in both directions, comparing sizes first so a pure
/// grow or pure shrink only walks one set.
fn diff_sets(cached: &HashSet<Checksum>, current: &HashSet<Checksum>) -> (Vec<Checksum>, Vec<Checksum>) {
  if current.len() >= cached.len() {
    let added: Vec<Checksum> = current.difference(cached).cloned().collect();
    if added.len() == current.len() - cached.len() {
      // The growth accounts for the whole size delta
      return (added, Vec::new());
    }
    let removed = cached.difference(current).cloned().collect();
    (added, removed)
  } else {
    let removed: Vec<Checksum> = cached.difference(current).cloned().collect();
    if removed.len() == cached.len() - current.len() {
      return (Vec::new(), removed);
    }
    let added = current.difference(cached).cloned().collect();
    (added, removed)
  }
}

fn lock_cell(cell: &SlotCell) -> MutexGuard<'_, Option<Slot>> {
  match cell.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}
