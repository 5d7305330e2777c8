use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{DeployedContract, Project, ProjectStatus};

/// Async-safe handle to the project database.
///
/// Wraps `ProjectDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous
/// SQLite I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ProjectDb>>,
}

impl DbHandle {
    pub fn new(db: ProjectDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ProjectDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Derive a display name from a repository URL: final path segment,
/// `.git` suffix stripped.
pub fn project_name_from_url(repo_url: &str) -> String {
    repo_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(repo_url)
        .trim_end_matches(".git")
        .to_string()
}

pub struct ProjectDb {
    conn: Connection,
}

impl ProjectDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    repo_url TEXT NOT NULL UNIQUE,
                    deployed_contracts TEXT NOT NULL DEFAULT '[]',
                    last_deployment TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Project, String)> {
        let contracts_json: String = row.get(3)?;
        let status_str: String = row.get(5)?;
        Ok((
            Project {
                id: row.get(0)?,
                name: row.get(1)?,
                repo_url: row.get(2)?,
                deployed_contracts: Vec::new(),
                last_deployment: row.get(4)?,
                status: ProjectStatus::from_str(&status_str)
                    .unwrap_or(ProjectStatus::Active),
                created_at: row.get(6)?,
            },
            contracts_json,
        ))
    }

    fn query_project(&self, sql: &str, p: impl rusqlite::Params) -> Result<Option<Project>> {
        let row = self
            .conn
            .query_row(sql, p, Self::row_to_project)
            .optional()
            .context("Failed to query project")?;
        match row {
            Some((mut project, contracts_json)) => {
                project.deployed_contracts = serde_json::from_str(&contracts_json)
                    .context("Corrupt deployed_contracts column")?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    const SELECT: &'static str = "SELECT id, name, repo_url, deployed_contracts, \
                                  last_deployment, status, created_at FROM projects";

    /// Fetch the project for `repo_url`, creating it if absent. At most
    /// one project exists per distinct URL (unique index enforced).
    pub fn upsert_project(&self, repo_url: &str) -> Result<Project> {
        if let Some(existing) =
            self.query_project(&format!("{} WHERE repo_url = ?1", Self::SELECT), params![repo_url])?
        {
            return Ok(existing);
        }
        let name = project_name_from_url(repo_url);
        self.conn
            .execute(
                "INSERT INTO projects (name, repo_url) VALUES (?1, ?2)",
                params![name, repo_url],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    /// Replace the project's contract list with this deployment's full
    /// result set and stamp the deployment time. Results are not merged
    /// with earlier deployments.
    pub fn finalize_deployment(
        &self,
        id: i64,
        contracts: &[DeployedContract],
    ) -> Result<Project> {
        let contracts_json =
            serde_json::to_string(contracts).context("Failed to serialize contracts")?;
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .execute(
                "UPDATE projects SET deployed_contracts = ?1, last_deployment = ?2 WHERE id = ?3",
                params![contracts_json, now, id],
            )
            .context("Failed to update project")?;
        anyhow::ensure!(updated == 1, "Project {} not found", id);
        self.get_project(id)?
            .context("Project not found after update")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.query_project(&format!("{} WHERE id = ?1", Self::SELECT), params![id])
    }

    /// Projects ordered by last deployment, newest first (never-deployed
    /// projects sort last). Archived projects are hidden by default.
    pub fn list_projects(&self, include_archived: bool) -> Result<Vec<Project>> {
        let sql = if include_archived {
            format!("{} ORDER BY last_deployment DESC", Self::SELECT)
        } else {
            format!(
                "{} WHERE status = 'active' ORDER BY last_deployment DESC",
                Self::SELECT
            )
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], Self::row_to_project)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let (mut project, contracts_json) = row.context("Failed to read project row")?;
            project.deployed_contracts = serde_json::from_str(&contracts_json)
                .context("Corrupt deployed_contracts column")?;
            projects.push(project);
        }
        Ok(projects)
    }

    /// Flip the project to archived. Returns `None` for an unknown id.
    pub fn archive_project(&self, id: i64) -> Result<Option<Project>> {
        let updated = self
            .conn
            .execute(
                "UPDATE projects SET status = 'archived' WHERE id = ?1",
                params![id],
            )
            .context("Failed to archive project")?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_project(id)
    }

    /// Find the project (and record) holding a contract at `address`.
    /// Address comparison is case-insensitive throughout.
    pub fn find_contract(&self, address: &str) -> Result<Option<(Project, DeployedContract)>> {
        let needle = address.to_lowercase();
        for project in self.list_projects(true)? {
            if let Some(contract) = project
                .deployed_contracts
                .iter()
                .find(|c| c.address.to_lowercase() == needle)
            {
                let contract = contract.clone();
                return Ok(Some((project, contract)));
            }
        }
        Ok(None)
    }
}
