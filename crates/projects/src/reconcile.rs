//! Reconciliation of scan candidates against the active registry rows.
//!
//! [`plan`] is a pure function from (active rows, candidates) to the diff;
//! [`Reconciler::sync`] loads, plans and applies under a single-writer gate.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Conflict, Result},
    identity::IdentityKey,
    store::ProjectRegistry,
    types::{Candidate, Project, ScanReport, ScanWarning, SyncResult},
};

/// A matched row whose directory moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub id: String,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A path-matched row that gains the candidate's identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backfill {
    pub id: String,
    pub identity_key: IdentityKey,
}

/// The mutations one reconciliation pass wants to apply.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub inserts: Vec<Candidate>,
    pub relocations: Vec<Relocation>,
    pub backfills: Vec<Backfill>,
    /// Ids of active rows with no candidate.
    pub archives: Vec<String>,
    pub unchanged: u32,
    pub conflicts: Vec<Conflict>,
}

impl SyncPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.relocations.is_empty()
            && self.backfills.is_empty()
            && self.archives.is_empty()
    }
}

/// Compute the diff between `active` rows and scan `candidates`.
///
/// Candidates are de-duplicated by path and visited in path order. Identity
/// key matches are resolved for every candidate before falling back to exact
/// path matches, so a rename never loses its row to an unrelated path hit.
/// Only active rows may be passed in; archived rows never match.
pub fn plan(active: &[Project], mut candidates: Vec<Candidate>) -> SyncPlan {
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates.dedup_by(|later, first| {
        let duplicate = later.path == first.path;
        if duplicate {
            debug!(path = %later.path.display(), "dropping duplicate candidate");
        }
        duplicate
    });

    let by_key: HashMap<&IdentityKey, usize> = active
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.identity_key.as_ref().map(|k| (k, i)))
        .collect();
    let by_path: HashMap<&Path, usize> = active
        .iter()
        .enumerate()
        .map(|(i, p)| (p.path.as_path(), i))
        .collect();

    // owner[row] = candidate claiming the row; matched[candidate] = row.
    let mut owner: Vec<Option<usize>> = vec![None; active.len()];
    let mut matched: Vec<Option<usize>> = vec![None; candidates.len()];

    // Key matches that also sit at the row's path win first, so a second
    // checkout of the same remote never steals a row from the original.
    for exact in [true, false] {
        for (ci, candidate) in candidates.iter().enumerate() {
            if matched[ci].is_none()
                && let Some(key) = &candidate.identity_key
                && let Some(&ri) = by_key.get(key)
                && owner[ri].is_none()
                && (!exact || active[ri].path == candidate.path)
            {
                owner[ri] = Some(ci);
                matched[ci] = Some(ri);
            }
        }
    }
    for (ci, candidate) in candidates.iter().enumerate() {
        if matched[ci].is_none()
            && let Some(&ri) = by_path.get(candidate.path.as_path())
            && owner[ri].is_none()
        {
            owner[ri] = Some(ci);
            matched[ci] = Some(ri);
        }
    }

    // Every relocation target is free once the plan applies. A row sitting
    // at a candidate's path either belongs to that candidate, moves away to
    // its own candidate, or has no candidate and is archived first.
    let mut conflicts = Vec::new();

    let mut plan = SyncPlan::default();
    // Keys in use once the plan applies, with the directory holding each.
    let mut claimed_keys: HashMap<IdentityKey, PathBuf> = active
        .iter()
        .filter_map(|p| p.identity_key.clone().map(|k| (k, p.path.clone())))
        .collect();

    for (ci, candidate) in candidates.iter().enumerate() {
        match matched[ci] {
            Some(ri) => {
                let row = &active[ri];
                if row.path == candidate.path {
                    plan.unchanged += 1;
                    if row.identity_key.is_none()
                        && let Some(key) = &candidate.identity_key
                        && !claimed_keys.contains_key(key)
                    {
                        claimed_keys.insert(key.clone(), candidate.path.clone());
                        plan.backfills.push(Backfill {
                            id: row.id.clone(),
                            identity_key: key.clone(),
                        });
                    }
                } else {
                    plan.relocations.push(Relocation {
                        id: row.id.clone(),
                        from: row.path.clone(),
                        to: candidate.path.clone(),
                    });
                }
            },
            None => {
                if let Some(key) = &candidate.identity_key {
                    if let Some(holder_path) = claimed_keys.get(key) {
                        conflicts.push(Conflict::IdentityKey {
                            identity_key: key.clone(),
                            path: candidate.path.clone(),
                            holder_path: holder_path.clone(),
                        });
                        continue;
                    }
                    claimed_keys.insert(key.clone(), candidate.path.clone());
                }
                plan.inserts.push(candidate.clone());
            },
        }
    }

    plan.archives = active
        .iter()
        .enumerate()
        .filter(|(ri, _)| owner[*ri].is_none())
        .map(|(_, p)| p.id.clone())
        .collect();
    plan.conflicts = conflicts;
    plan
}

/// Applies scan results to the registry.
///
/// Calls to [`Reconciler::sync`] are serialized: a second caller waits for
/// the first to finish and then diffs against the updated registry.
pub struct Reconciler {
    registry: Arc<dyn ProjectRegistry>,
    gate: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn ProjectRegistry>) -> Self {
        Self {
            registry,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Reconcile `report` against the active rows and apply the diff in one
    /// transaction.
    ///
    /// Dropping the returned future before the write gate is acquired has no
    /// effect on the registry. Once acquired, loading, planning and applying
    /// run on a spawned task and always complete.
    pub async fn sync(&self, report: ScanReport) -> Result<SyncResult> {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let result = apply_report(registry.as_ref(), report).await;
            drop(guard);
            result
        })
        .await?
    }
}

async fn apply_report(registry: &dyn ProjectRegistry, report: ScanReport) -> Result<SyncResult> {
    let ScanReport {
        candidates,
        mut warnings,
    } = report;
    let (candidates, unstorable): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.path.to_str().is_some());
    warnings.extend(unstorable.into_iter().map(|c| ScanWarning {
        path: c.path,
        message: "path is not valid UTF-8".into(),
    }));

    let active = registry.list_active().await?;
    let plan = plan(&active, candidates);
    let added = if plan.is_empty() {
        Vec::new()
    } else {
        registry.apply(&plan).await?
    };
    Ok(summarize(&active, plan, added, warnings))
}

fn summarize(
    active: &[Project],
    plan: SyncPlan,
    added: Vec<Project>,
    warnings: Vec<ScanWarning>,
) -> SyncResult {
    let by_id: HashMap<&str, &Project> = active.iter().map(|p| (p.id.as_str(), p)).collect();
    let updated: Vec<Project> = plan
        .relocations
        .iter()
        .filter_map(|r| {
            by_id.get(r.id.as_str()).map(|p| Project {
                path: r.to.clone(),
                ..(*p).clone()
            })
        })
        .collect();

    for r in &plan.relocations {
        info!(id = %r.id, from = %r.from.display(), to = %r.to.display(), "project relocated");
    }
    for conflict in &plan.conflicts {
        warn!(%conflict, "sync conflict, candidate skipped");
    }
    let result = SyncResult {
        added,
        updated,
        archived_count: plan.archives.len() as u32,
        unchanged_count: plan.unchanged,
        conflicts: plan.conflicts,
        warnings,
    };
    info!(
        added = result.added.len(),
        updated = result.updated.len(),
        archived = result.archived_count,
        unchanged = result.unchanged_count,
        conflicts = result.conflicts.len(),
        "sync complete"
    );
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteProjectRegistry, tests::memory_registry};

    fn candidate(path: &str, key: Option<&str>) -> Candidate {
        let c = Candidate::new(path, path.rsplit('/').next().unwrap_or(path));
        match key {
            Some(key) => c.with_identity_key(key),
            None => c,
        }
    }

    fn row(id: &str, path: &str, key: Option<&str>) -> Project {
        Project {
            id: id.into(),
            name: id.into(),
            path: path.into(),
            tags: Vec::new(),
            color: None,
            identity_key: key.map(IdentityKey::from),
            sort_order: 0,
            is_archived: false,
            archived_at: None,
            created_at: 0,
        }
    }

    async fn seeded(rows: &[Candidate]) -> (Arc<SqliteProjectRegistry>, Reconciler, Vec<Project>) {
        let registry = Arc::new(memory_registry().await);
        let inserted = registry.insert(rows).await.unwrap();
        let reconciler = Reconciler::new(registry.clone());
        (registry, reconciler, inserted)
    }

    async fn sync(reconciler: &Reconciler, candidates: Vec<Candidate>) -> SyncResult {
        reconciler.sync(candidates.into()).await.unwrap()
    }

    // ── pure planning ───────────────────────────────────────────────────

    #[test]
    fn plan_on_empty_registry_adds_everything() {
        let plan = plan(&[], vec![candidate("/p/b", None), candidate("/p/a", Some("k"))]);
        let paths: Vec<_> = plan.inserts.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/p/a"), PathBuf::from("/p/b")]);
        assert!(plan.archives.is_empty());
    }

    #[test]
    fn plan_swapped_directories_relocate_both() {
        let active = [row("a", "/p/x", Some("k1")), row("b", "/p/y", Some("k2"))];
        let plan = plan(&active, vec![
            candidate("/p/x", Some("k2")),
            candidate("/p/y", Some("k1")),
        ]);
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.relocations.len(), 2);
        assert!(plan.archives.is_empty());
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn plan_rename_onto_vacated_path_archives_the_old_row() {
        // b was deleted and a renamed to b's old name in one step.
        let active = [row("a", "/p/a", Some("k1")), row("b", "/p/b", None)];
        let plan = plan(&active, vec![candidate("/p/b", Some("k1"))]);
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.relocations, vec![Relocation {
            id: "a".into(),
            from: "/p/a".into(),
            to: "/p/b".into(),
        }]);
        assert_eq!(plan.archives, vec!["b".to_string()]);
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn plan_chain_of_moves_through_an_archived_row() {
        // d moves into a's old path while a moves into c's, and c is gone.
        let active = [
            row("a", "/p/a", Some("k1")),
            row("c", "/p/b", None),
            row("d", "/p/d", Some("k4")),
        ];
        let plan = plan(&active, vec![
            candidate("/p/a", Some("k4")),
            candidate("/p/b", Some("k1")),
        ]);
        assert!(plan.conflicts.is_empty());
        let moves: Vec<_> = plan
            .relocations
            .iter()
            .map(|r| (r.id.as_str(), r.to.clone()))
            .collect();
        assert_eq!(moves, vec![
            ("d", PathBuf::from("/p/a")),
            ("a", PathBuf::from("/p/b")),
        ]);
        assert_eq!(plan.archives, vec!["c".to_string()]);
    }

    #[test]
    fn plan_duplicate_identity_keeps_first_and_reports_rest() {
        let plan = plan(&[], vec![
            candidate("/p/clone-b", Some("k")),
            candidate("/p/clone-a", Some("k")),
        ]);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].path, PathBuf::from("/p/clone-a"));
        assert_eq!(plan.conflicts, vec![Conflict::IdentityKey {
            identity_key: "k".into(),
            path: "/p/clone-b".into(),
            holder_path: "/p/clone-a".into(),
        }]);
    }

    #[test]
    fn plan_second_clone_of_tracked_repo_is_a_conflict() {
        let active = [row("a", "/p/a", Some("k"))];
        let plan = plan(&active, vec![candidate("/p/a", Some("k")), candidate("/p/a2", Some("k"))]);
        assert_eq!(plan.unchanged, 1);
        assert!(plan.inserts.is_empty());
        assert_eq!(plan.conflicts.len(), 1);
    }

    #[test]
    fn plan_backfills_missing_identity_on_path_match() {
        let active = [row("a", "/p/a", None)];
        let plan = plan(&active, vec![candidate("/p/a", Some("k"))]);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.backfills, vec![Backfill {
            id: "a".into(),
            identity_key: "k".into(),
        }]);
    }

    #[test]
    fn plan_does_not_backfill_a_claimed_key() {
        let active = [row("a", "/p/a", None), row("b", "/p/b", Some("k"))];
        let plan = plan(&active, vec![candidate("/p/a", Some("k")), candidate("/p/b", Some("k"))]);
        assert_eq!(plan.unchanged, 2);
        assert!(plan.backfills.is_empty());
    }

    #[test]
    fn plan_ignores_duplicate_candidate_paths() {
        let plan = plan(&[], vec![candidate("/p/a", None), candidate("/p/a", None)]);
        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.conflicts.is_empty());
    }

    // ── applied through the registry ────────────────────────────────────

    #[tokio::test]
    async fn sync_is_idempotent() {
        let (_, reconciler, _) = seeded(&[]).await;
        let scan = vec![
            candidate("/p/a", Some("k1")),
            candidate("/p/b", None),
            candidate("/p/c", Some("k3")),
        ];
        let first = sync(&reconciler, scan.clone()).await;
        assert_eq!(first.added.len(), 3);

        let second = sync(&reconciler, scan).await;
        assert!(second.added.is_empty());
        assert!(second.updated.is_empty());
        assert_eq!(second.archived_count, 0);
        assert_eq!(second.unchanged_count, 3);
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn rename_keeps_id() {
        let (registry, reconciler, seeded) = seeded(&[candidate("/p/a", Some("k1"))]).await;
        let result = sync(&reconciler, vec![candidate("/p/b", Some("k1"))]).await;

        assert!(result.added.is_empty());
        assert_eq!(result.archived_count, 0);
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].id, seeded[0].id);
        assert_eq!(result.updated[0].path, PathBuf::from("/p/b"));

        let stored = registry.get(&seeded[0].id).await.unwrap().unwrap();
        assert_eq!(stored.path, PathBuf::from("/p/b"));
        assert_eq!(stored.name, seeded[0].name, "metadata is never rewritten");
    }

    #[tokio::test]
    async fn keyless_rename_splits_into_archive_and_add() {
        let (registry, reconciler, seeded) = seeded(&[candidate("/p/a", None)]).await;
        let result = sync(&reconciler, vec![candidate("/p/b", None)]).await;

        assert_eq!(result.archived_count, 1);
        assert_eq!(result.added.len(), 1);
        assert_ne!(result.added[0].id, seeded[0].id);
        let archived = registry.list_archived().await.unwrap();
        assert_eq!(archived[0].id, seeded[0].id);
        assert!(archived[0].archived_at.is_some());
    }

    #[tokio::test]
    async fn missing_directory_is_archived() {
        let (registry, reconciler, seeded) =
            seeded(&[candidate("/p/a", Some("k1")), candidate("/p/b", Some("k2"))]).await;
        let result = sync(&reconciler, vec![candidate("/p/a", Some("k1"))]).await;

        assert_eq!(result.archived_count, 1);
        assert_eq!(result.unchanged_count, 1);
        let archived = registry.list_archived().await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, seeded[1].id);
        assert_eq!(archived[0].path, PathBuf::from("/p/b"), "last path is kept");
    }

    #[tokio::test]
    async fn new_directory_is_added() {
        let (_, reconciler, _) = seeded(&[candidate("/p/a", Some("k1"))]).await;
        let result = sync(&reconciler, vec![
            candidate("/p/a", Some("k1")),
            candidate("/p/b", Some("k2")),
        ])
        .await;

        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].path, PathBuf::from("/p/b"));
        assert_eq!(result.archived_count, 0);
        assert_eq!(result.unchanged_count, 1);
    }

    #[tokio::test]
    async fn archived_identity_is_never_resurrected() {
        let (registry, reconciler, seeded) = seeded(&[candidate("/p/a", Some("k1"))]).await;
        sync(&reconciler, vec![]).await;
        let result = sync(&reconciler, vec![candidate("/p/a", Some("k1"))]).await;

        assert_eq!(result.added.len(), 1);
        assert_ne!(result.added[0].id, seeded[0].id);
        assert_eq!(registry.list_archived().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn swap_applies_without_index_violation() {
        let (registry, reconciler, seeded) =
            seeded(&[candidate("/p/x", Some("k1")), candidate("/p/y", Some("k2"))]).await;
        let result = sync(&reconciler, vec![
            candidate("/p/x", Some("k2")),
            candidate("/p/y", Some("k1")),
        ])
        .await;
        assert_eq!(result.updated.len(), 2);
        let first = registry.get(&seeded[0].id).await.unwrap().unwrap();
        assert_eq!(first.path, PathBuf::from("/p/y"));
    }

    #[tokio::test]
    async fn rename_onto_deleted_sibling_converges() {
        let (registry, reconciler, seeded) =
            seeded(&[candidate("/p/a", Some("k1")), candidate("/p/b", None)]).await;
        let scan = vec![candidate("/p/b", Some("k1"))];
        let result = sync(&reconciler, scan.clone()).await;

        assert!(result.conflicts.is_empty());
        assert_eq!(result.archived_count, 1);
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].id, seeded[0].id);

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, seeded[0].id);
        assert_eq!(active[0].path, PathBuf::from("/p/b"));
        let archived = registry.list_archived().await.unwrap();
        assert_eq!(archived[0].id, seeded[1].id);

        assert!(sync(&reconciler, scan).await.is_noop());
    }

    #[tokio::test]
    async fn sync_cancelled_while_waiting_for_the_gate_changes_nothing() {
        let (registry, reconciler, _) = seeded(&[candidate("/p/a", Some("k1"))]).await;
        let reconciler = Arc::new(reconciler);
        let held = Arc::clone(&reconciler.gate).lock_owned().await;

        let pending = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.sync(vec![candidate("/p/b", None)].into()).await }
        });
        tokio::task::yield_now().await;
        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        drop(held);

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].path, PathBuf::from("/p/a"));
        assert!(registry.list_archived().await.unwrap().is_empty());

        // The gate is free again.
        let result = sync(&reconciler, vec![candidate("/p/a", Some("k1"))]).await;
        assert!(result.is_noop());
    }

    #[tokio::test]
    async fn concurrent_syncs_do_not_interleave() {
        let (registry, reconciler, _) = seeded(&[]).await;
        let reconciler = Arc::new(reconciler);
        let scan = vec![candidate("/p/a", Some("k1")), candidate("/p/b", None)];

        let a = tokio::spawn({
            let reconciler = reconciler.clone();
            let scan = scan.clone();
            async move { reconciler.sync(scan.into()).await.unwrap() }
        });
        let b = tokio::spawn({
            let reconciler = reconciler.clone();
            let scan = scan.clone();
            async move { reconciler.sync(scan.into()).await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.added.len() + b.added.len(), 2);
        assert_eq!(a.unchanged_count + b.unchanged_count, 2);
        assert_eq!(registry.list_active().await.unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_candidate_becomes_a_warning_and_sync_converges() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let (registry, reconciler, _) = seeded(&[]).await;
        let mut bad = candidate("/p/x", None);
        bad.path = Path::new("/p").join(OsStr::from_bytes(b"caf\xe9"));
        let scan = vec![bad.clone(), candidate("/p/a", None)];

        let first = sync(&reconciler, scan.clone()).await;
        assert_eq!(first.added.len(), 1);
        assert_eq!(first.warnings.len(), 1);
        assert_eq!(first.warnings[0].path, bad.path);

        let second = sync(&reconciler, scan).await;
        assert!(second.is_noop());
        assert_eq!(second.archived_count, 0);
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scan_warnings_are_carried_into_the_result() {
        let (_, reconciler, _) = seeded(&[]).await;
        let report = ScanReport {
            candidates: vec![candidate("/p/a", None)],
            warnings: vec![ScanWarning {
                path: "/p/locked".into(),
                message: "permission denied".into(),
            }],
        };
        let result = reconciler.sync(report).await.unwrap();
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
