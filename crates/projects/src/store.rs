use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions},
    },
    tracing::{debug, warn},
};

use crate::{
    error::{Conflict, Error, Result},
    identity::IdentityKey,
    reconcile::SyncPlan,
    types::{Candidate, IssueLink, PlanningItem, Project, now_ms},
};

/// Persistent store of project rows.
///
/// Every mutating method runs in a single transaction: it either commits
/// completely or leaves the registry as it was.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Active rows ordered by `sort_order`, then name.
    async fn list_active(&self) -> Result<Vec<Project>>;
    /// Archived rows ordered by name.
    async fn list_archived(&self) -> Result<Vec<Project>>;
    async fn get(&self, id: &str) -> Result<Option<Project>>;
    /// Apply a reconciliation plan. Returns the inserted rows.
    async fn apply(&self, plan: &SyncPlan) -> Result<Vec<Project>>;
    /// Insert candidates as new rows without matching. Candidates colliding
    /// with an active row are skipped.
    async fn insert(&self, candidates: &[Candidate]) -> Result<Vec<Project>>;
    /// Flip an archived row back to active.
    async fn restore(&self, id: &str) -> Result<Project>;
    /// Delete an archived row, detaching its dependents.
    async fn purge(&self, id: &str) -> Result<()>;
    async fn purge_archived(&self) -> Result<u64>;
    /// Delete every project and every dependent row.
    async fn reset(&self) -> Result<u64>;
}

/// Path a relocating row holds between the two phases of [`SyncPlan`]
/// relocation, so swaps never collide on the active-path index.
fn relocation_placeholder(id: &str) -> String {
    format!("//rootline-relocating/{id}")
}

// ── SQLite-backed implementation ────────────────────────────────────

/// Stores projects in a SQLite database.
pub struct SqliteProjectRegistry {
    pool: SqlitePool,
}

impl SqliteProjectRegistry {
    /// Create a registry using an existing pool (migrations must already be
    /// run, see [`crate::run_migrations`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io(format!("cannot create {}", parent.display()), e)
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        debug!(path = %path.display(), "opened project registry");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn add_planning_item(
        &self,
        project_id: Option<&str>,
        subject: &str,
    ) -> Result<PlanningItem> {
        let item = PlanningItem {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.map(String::from),
            subject: subject.to_string(),
            status: "backlog".into(),
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO planning_items (id, project_id, subject, status, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.project_id)
        .bind(&item.subject)
        .bind(&item.status)
        .bind(item.created_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn get_planning_item(&self, id: &str) -> Result<Option<PlanningItem>> {
        let row = sqlx::query_as::<_, PlanningItemRow>(
            "SELECT id, project_id, subject, status, created_at FROM planning_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn add_issue_link(&self, project_id: Option<&str>, url: &str) -> Result<IssueLink> {
        let link = IssueLink {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.map(String::from),
            url: url.to_string(),
            created_at: now_ms(),
        };
        sqlx::query("INSERT INTO issue_links (id, project_id, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(&link.id)
            .bind(&link.project_id)
            .bind(&link.url)
            .bind(link.created_at as i64)
            .execute(&self.pool)
            .await?;
        Ok(link)
    }

    pub async fn get_issue_link(&self, id: &str) -> Result<Option<IssueLink>> {
        let row = sqlx::query_as::<_, IssueLinkRow>(
            "SELECT id, project_id, url, created_at FROM issue_links WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

async fn fetch_row(conn: &mut SqliteConnection, id: &str) -> Result<Option<Project>> {
    let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Into::into))
}

/// Next `sort_order` value: strictly above every row ever kept.
async fn next_sort_order(conn: &mut SqliteConnection) -> Result<i64> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(sort_order) FROM projects")
        .fetch_one(conn)
        .await?;
    Ok(max.map_or(0, |m| m + 1))
}

/// Find an active row other than `exclude_id` that already holds `path` or
/// `identity_key`.
async fn active_conflict(
    conn: &mut SqliteConnection,
    path: &Path,
    identity_key: Option<&IdentityKey>,
    exclude_id: Option<&str>,
) -> Result<Option<Conflict>> {
    let path_str = path_text(path)?;
    let holder: Option<String> = sqlx::query_scalar(
        "SELECT id FROM projects WHERE is_archived = 0 AND path = ? AND id != COALESCE(?, '')",
    )
    .bind(path_str)
    .bind(exclude_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(holder) = holder {
        return Ok(Some(Conflict::Path {
            path: path.to_path_buf(),
            holder,
            project: exclude_id.map(String::from),
        }));
    }

    let Some(key) = identity_key else {
        return Ok(None);
    };
    let holder_path: Option<String> = sqlx::query_scalar(
        "SELECT path FROM projects
         WHERE is_archived = 0 AND identity_key = ? AND id != COALESCE(?, '')",
    )
    .bind(key.as_str())
    .bind(exclude_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(holder_path.map(|holder_path| Conflict::IdentityKey {
        identity_key: key.clone(),
        path: path.to_path_buf(),
        holder_path: PathBuf::from(holder_path),
    }))
}

async fn insert_row(
    conn: &mut SqliteConnection,
    candidate: &Candidate,
    sort_order: i64,
) -> Result<Project> {
    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        name: candidate.name.clone(),
        path: candidate.path.clone(),
        tags: candidate.tags.clone(),
        color: candidate.color.clone(),
        identity_key: candidate.identity_key.clone(),
        sort_order,
        is_archived: false,
        archived_at: None,
        created_at: now_ms(),
    };
    let tags = serde_json::to_string(&project.tags)?;
    sqlx::query(
        r#"INSERT INTO projects (id, name, path, tags, color, identity_key, sort_order, is_archived, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(path_text(&project.path)?)
    .bind(&tags)
    .bind(&project.color)
    .bind(project.identity_key.as_ref().map(IdentityKey::as_str))
    .bind(project.sort_order)
    .bind(project.created_at as i64)
    .execute(&mut *conn)
    .await?;
    Ok(project)
}

/// Detach dependents of the projects selected by `filter` (a `WHERE` clause
/// on `projects`).
async fn detach_dependents(
    conn: &mut SqliteConnection,
    filter: &str,
    id: Option<&str>,
) -> Result<u64> {
    let mut detached = 0;
    for table in ["planning_items", "issue_links"] {
        let sql = format!(
            "UPDATE {table} SET project_id = NULL
             WHERE project_id IN (SELECT id FROM projects WHERE {filter})"
        );
        let mut query = sqlx::query(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        detached += query.execute(&mut *conn).await?.rows_affected();
    }
    Ok(detached)
}

/// Paths are stored as text; a lossy conversion would never match on the
/// next scan.
fn path_text(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| Error::non_utf8_path(path))
}

/// Fail the surrounding transaction when a row changed under a plan.
fn ensure_one(rows_affected: u64, id: &str, what: &str) -> Result<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(Error::message(format!(
            "project {id} changed during sync ({what}); nothing was applied"
        )))
    }
}

#[async_trait]
impl ProjectRegistry for SqliteProjectRegistry {
    async fn list_active(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT * FROM projects WHERE is_archived = 0 ORDER BY sort_order, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_archived(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT * FROM projects WHERE is_archived = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let mut conn = self.pool.acquire().await?;
        fetch_row(&mut conn, id).await
    }

    async fn apply(&self, plan: &SyncPlan) -> Result<Vec<Project>> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms() as i64;

        for id in &plan.archives {
            fetch_row(&mut tx, id)
                .await?
                .ok_or_else(|| Error::not_found(id))?
                .state()
                .archive(id)?;
            sqlx::query("UPDATE projects SET is_archived = 1, archived_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for relocation in &plan.relocations {
            let done = sqlx::query("UPDATE projects SET path = ? WHERE id = ? AND is_archived = 0")
                .bind(relocation_placeholder(&relocation.id))
                .bind(&relocation.id)
                .execute(&mut *tx)
                .await?;
            ensure_one(done.rows_affected(), &relocation.id, "relocate")?;
        }
        for relocation in &plan.relocations {
            sqlx::query("UPDATE projects SET path = ? WHERE id = ?")
                .bind(path_text(&relocation.to)?)
                .bind(&relocation.id)
                .execute(&mut *tx)
                .await?;
        }

        for backfill in &plan.backfills {
            let done = sqlx::query(
                "UPDATE projects SET identity_key = ?
                 WHERE id = ? AND is_archived = 0 AND identity_key IS NULL",
            )
            .bind(backfill.identity_key.as_str())
            .bind(&backfill.id)
            .execute(&mut *tx)
            .await?;
            ensure_one(done.rows_affected(), &backfill.id, "backfill identity")?;
        }

        let mut added = Vec::with_capacity(plan.inserts.len());
        let mut sort_order = next_sort_order(&mut tx).await?;
        for candidate in &plan.inserts {
            added.push(insert_row(&mut tx, candidate, sort_order).await?);
            sort_order += 1;
        }

        tx.commit().await?;
        debug!(
            added = added.len(),
            relocated = plan.relocations.len(),
            archived = plan.archives.len(),
            "applied sync plan"
        );
        Ok(added)
    }

    async fn insert(&self, candidates: &[Candidate]) -> Result<Vec<Project>> {
        let mut tx = self.pool.begin().await?;
        let mut sort_order = next_sort_order(&mut tx).await?;
        let mut inserted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.path.to_str().is_none() {
                warn!(path = %candidate.path.display(), "skipping import of non-UTF-8 path");
                continue;
            }
            if let Some(conflict) =
                active_conflict(&mut tx, &candidate.path, candidate.identity_key.as_ref(), None)
                    .await?
            {
                warn!(%conflict, "skipping import");
                continue;
            }
            inserted.push(insert_row(&mut tx, candidate, sort_order).await?);
            sort_order += 1;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn restore(&self, id: &str) -> Result<Project> {
        let mut tx = self.pool.begin().await?;
        let mut project = fetch_row(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(id))?;
        project.state().restore(id)?;

        if let Some(conflict) =
            active_conflict(&mut tx, &project.path, project.identity_key.as_ref(), Some(id)).await?
        {
            return Err(conflict.into());
        }

        sqlx::query("UPDATE projects SET is_archived = 0, archived_at = NULL WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        project.is_archived = false;
        project.archived_at = None;
        Ok(project)
    }

    async fn purge(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let state = fetch_row(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(id))?
            .state();
        state.purge(id)?;

        let detached = detach_dependents(&mut tx, "id = ?", Some(id)).await?;
        sqlx::query("DELETE FROM projects WHERE id = ? AND is_archived = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(id, detached, "purged project");
        Ok(())
    }

    async fn purge_archived(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        detach_dependents(&mut tx, "is_archived = 1", None).await?;
        let purged = sqlx::query("DELETE FROM projects WHERE is_archived = 1")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(purged)
    }

    async fn reset(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM planning_items")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM issue_links").execute(&mut *tx).await?;
        let deleted = sqlx::query("DELETE FROM projects")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted)
    }
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    path: String,
    tags: String,
    color: Option<String>,
    identity_key: Option<String>,
    sort_order: i64,
    is_archived: i32,
    archived_at: Option<i64>,
    created_at: i64,
}

impl From<ProjectRow> for Project {
    fn from(r: ProjectRow) -> Self {
        Self {
            tags: serde_json::from_str(&r.tags).unwrap_or_default(),
            id: r.id,
            name: r.name,
            path: PathBuf::from(r.path),
            color: r.color,
            identity_key: r.identity_key.map(IdentityKey::from),
            sort_order: r.sort_order,
            is_archived: r.is_archived != 0,
            archived_at: r.archived_at.map(|t| t as u64),
            created_at: r.created_at as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlanningItemRow {
    id: String,
    project_id: Option<String>,
    subject: String,
    status: String,
    created_at: i64,
}

impl From<PlanningItemRow> for PlanningItem {
    fn from(r: PlanningItemRow) -> Self {
        Self {
            id: r.id,
            project_id: r.project_id,
            subject: r.subject,
            status: r.status,
            created_at: r.created_at as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IssueLinkRow {
    id: String,
    project_id: Option<String>,
    url: String,
    created_at: i64,
}

impl From<IssueLinkRow> for IssueLink {
    fn from(r: IssueLinkRow) -> Self {
        Self {
            id: r.id,
            project_id: r.project_id,
            url: r.url,
            created_at: r.created_at as u64,
        }
    }
}
