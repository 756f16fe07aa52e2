//! SQLite-backed implementation of the storage ports.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::entities::{
    Author, AuthorWithCount, Commit, CommitPageRequest, NewCommit, NewRepository, Repository,
    SaveOutcome, SortDirection,
};
use super::{AuthorStore, CommitStore, RepoStore, Result, StorageError};

/// Schema DDL, executed statement by statement at startup.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_name TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        language TEXT,
        url TEXT NOT NULL DEFAULT '',
        forks INTEGER NOT NULL DEFAULT 0,
        stars INTEGER NOT NULL DEFAULT 0,
        open_issues INTEGER NOT NULL DEFAULT 0,
        watchers INTEGER NOT NULL DEFAULT 0,
        since TEXT NOT NULL,
        last_page INTEGER NOT NULL DEFAULT 1,
        last_fetched_hash TEXT NOT NULL DEFAULT '',
        indexing INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_repositories_name ON repositories(name)",
    "CREATE INDEX IF NOT EXISTS idx_repositories_owner ON repositories(owner_name)",
    "CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_authors_identity ON authors(name, email)",
    "CREATE TABLE IF NOT EXISTS commits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash TEXT NOT NULL,
        repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL REFERENCES authors(id),
        message TEXT NOT NULL,
        date TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_commits_hash ON commits(hash)",
    "CREATE INDEX IF NOT EXISTS idx_commits_repository ON commits(repository_id)",
    "CREATE INDEX IF NOT EXISTS idx_commits_author ON commits(author_id)",
];

/// SQLite storage implementing all three ports over one connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and prepare the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database, for tests and ephemeral runs.
    ///
    /// A single connection keeps every statement on the same in-memory
    /// database instance.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema ready");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RepoStore for SqliteStore {
    async fn create(&self, repo: NewRepository) -> Result<Repository> {
        let now = Utc::now();

        let result = sqlx::query_as::<_, Repository>(
            "INSERT INTO repositories
                (owner_name, name, description, language, url,
                 forks, stars, open_issues, watchers,
                 since, last_page, last_fetched_hash, indexing,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, '', 1, ?, ?)
             RETURNING *",
        )
        .bind(&repo.owner_name)
        .bind(&repo.name)
        .bind(&repo.description)
        .bind(&repo.language)
        .bind(&repo.url)
        .bind(repo.forks)
        .bind(repo.stars)
        .bind(repo.open_issues)
        .bind(repo.watchers)
        .bind(repo.since)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => Err(StorageError::AlreadyExists(repo.name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_all(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query_as::<_, Repository>("SELECT * FROM repositories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn update_checkpoint(
        &self,
        id: i64,
        last_page: i64,
        last_hash: &str,
        indexing: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE repositories
             SET last_page = ?, last_fetched_hash = ?, indexing = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(last_page.max(1))
        .bind(last_hash)
        .bind(indexing)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("repository id {}", id)));
        }
        Ok(())
    }

    async fn set_since(&self, name: &str, since: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE repositories SET since = ?, updated_at = ? WHERE name = ?")
                .bind(since)
                .bind(Utc::now())
                .bind(name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("repository {}", name)));
        }
        Ok(())
    }

    async fn set_indexing_all(&self, indexing: bool) -> Result<()> {
        sqlx::query("UPDATE repositories SET indexing = ?, updated_at = ?")
            .bind(indexing)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CommitStore for SqliteStore {
    async fn save(&self, commit: NewCommit) -> Result<SaveOutcome> {
        let result = sqlx::query(
            "INSERT INTO commits (hash, repository_id, author_id, message, date, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(hash) DO NOTHING",
        )
        .bind(&commit.hash)
        .bind(commit.repository_id)
        .bind(commit.author_id)
        .bind(&commit.message)
        .bind(commit.date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(SaveOutcome::Duplicate)
        } else {
            Ok(SaveOutcome::Committed)
        }
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Commit>> {
        let row = sqlx::query_as::<_, Commit>("SELECT * FROM commits WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_by_repo(
        &self,
        repository_id: i64,
        page: CommitPageRequest,
    ) -> Result<(Vec<Commit>, u64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_one(&self.pool)
            .await?;

        let order = match page.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let query = format!(
            "SELECT * FROM commits WHERE repository_id = ?
             ORDER BY date {order}, id {order} LIMIT ? OFFSET ?"
        );

        let rows = sqlx::query_as::<_, Commit>(&query)
            .bind(repository_id)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset()))
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total as u64))
    }
}

#[async_trait]
impl AuthorStore for SqliteStore {
    async fn get_or_create(&self, name: &str, email: &str) -> Result<Author> {
        // Insert-ignore then select: losers of a race observe the winner's
        // row thanks to the unique (name, email) index.
        sqlx::query(
            "INSERT INTO authors (name, email, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name, email) DO NOTHING",
        )
        .bind(name)
        .bind(email)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let author = sqlx::query_as::<_, Author>(
            "SELECT id, name, email FROM authors WHERE name = ? AND email = ?",
        )
        .bind(name)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(author)
    }

    async fn top_for_repo(&self, repo_name: &str, limit: u32) -> Result<Vec<AuthorWithCount>> {
        let rows = sqlx::query_as::<_, AuthorWithCount>(
            "SELECT authors.id, authors.name, authors.email,
                    COUNT(commits.id) AS commit_count
             FROM authors
             JOIN commits ON commits.author_id = authors.id
             JOIN repositories ON repositories.id = commits.repository_id
             WHERE repositories.name = ?
             GROUP BY authors.id
             ORDER BY commit_count DESC, authors.id ASC
             LIMIT ?",
        )
        .bind(repo_name)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn new_repo(name: &str) -> NewRepository {
        NewRepository {
            owner_name: "owner".to_string(),
            name: name.to_string(),
            description: Some("a repository".to_string()),
            language: Some("Rust".to_string()),
            url: format!("https://github.com/owner/{}", name),
            forks: 3,
            stars: 42,
            open_issues: 1,
            watchers: 42,
            since: Utc::now(),
        }
    }

    async fn seed_commit(
        store: &SqliteStore,
        repo_id: i64,
        hash: &str,
        author_name: &str,
    ) -> Commit {
        let author = store
            .get_or_create(author_name, &format!("{}@example.com", author_name))
            .await
            .unwrap();
        store
            .save(NewCommit {
                repository_id: repo_id,
                author_id: author.id,
                hash: hash.to_string(),
                message: format!("commit {}", hash),
                date: Utc::now(),
            })
            .await
            .unwrap();
        CommitStore::get_by_hash(store, hash).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_save_repository_sets_checkpoint_defaults() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();

        assert!(repo.id > 0);
        assert_eq!(repo.last_page, 1);
        assert_eq!(repo.last_fetched_hash, "");
        assert!(repo.indexing);
        assert_eq!(repo.stars, 42);
    }

    #[tokio::test]
    async fn test_save_repository_duplicate_name_rejected() {
        let store = store().await;
        store.create(new_repo("repo")).await.unwrap();

        let err = store.create(new_repo("repo")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(name) if name == "repo"));

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_name() {
        let store = store().await;
        store.create(new_repo("repo")).await.unwrap();

        let found = store.get_by_name("repo").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().owner_name, "owner");

        let missing = store.get_by_name("other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_checkpoint_round_trip() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();

        store
            .update_checkpoint(repo.id, 7, "abc123", false)
            .await
            .unwrap();

        let updated = store.get_by_name("repo").await.unwrap().unwrap();
        assert_eq!(updated.last_page, 7);
        assert_eq!(updated.last_fetched_hash, "abc123");
        assert!(!updated.indexing);
    }

    #[tokio::test]
    async fn test_update_checkpoint_clamps_page_to_one() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();

        store.update_checkpoint(repo.id, 0, "", false).await.unwrap();

        let updated = store.get_by_name("repo").await.unwrap().unwrap();
        assert_eq!(updated.last_page, 1);
    }

    #[tokio::test]
    async fn test_update_checkpoint_unknown_repo() {
        let store = store().await;
        let err = store.update_checkpoint(999, 2, "", true).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_since() {
        let store = store().await;
        store.create(new_repo("repo")).await.unwrap();

        let since = DateTime::parse_from_rfc3339("2015-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.set_since("repo", since).await.unwrap();

        let updated = store.get_by_name("repo").await.unwrap().unwrap();
        assert_eq!(updated.since, since);
    }

    #[tokio::test]
    async fn test_set_since_unknown_repo() {
        let store = store().await;
        let err = store.set_since("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_indexing_all() {
        let store = store().await;
        store.create(new_repo("one")).await.unwrap();
        store.create(new_repo("two")).await.unwrap();

        store.set_indexing_all(false).await.unwrap();
        assert!(store.get_all().await.unwrap().iter().all(|r| !r.indexing));

        store.set_indexing_all(true).await.unwrap();
        assert!(store.get_all().await.unwrap().iter().all(|r| r.indexing));
    }

    #[tokio::test]
    async fn test_commit_save_duplicate_is_success() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();
        let author = store.get_or_create("Alice", "alice@example.com").await.unwrap();

        let commit = NewCommit {
            repository_id: repo.id,
            author_id: author.id,
            hash: "h1".to_string(),
            message: "first".to_string(),
            date: Utc::now(),
        };

        let first = store.save(commit.clone()).await.unwrap();
        assert_eq!(first, SaveOutcome::Committed);

        let second = store.save(commit).await.unwrap();
        assert_eq!(second, SaveOutcome::Duplicate);

        let (commits, total) = store
            .list_by_repo(repo.id, CommitPageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "first");
    }

    #[tokio::test]
    async fn test_get_commit_by_hash() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();
        seed_commit(&store, repo.id, "deadbeef", "alice").await;

        let found = CommitStore::get_by_hash(&store, "deadbeef").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().repository_id, repo.id);

        let missing = CommitStore::get_by_hash(&store, "cafebabe").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_by_repo_pagination_and_order() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();
        let author = store.get_or_create("Alice", "alice@example.com").await.unwrap();

        let base = Utc::now();
        for i in 0..5 {
            store
                .save(NewCommit {
                    repository_id: repo.id,
                    author_id: author.id,
                    hash: format!("h{}", i),
                    message: format!("m{}", i),
                    date: base + chrono::Duration::seconds(i),
                })
                .await
                .unwrap();
        }

        let (page1, total) = store
            .list_by_repo(
                repo.id,
                CommitPageRequest {
                    page: 1,
                    limit: 2,
                    direction: SortDirection::Desc,
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].hash, "h4");
        assert_eq!(page1[1].hash, "h3");

        let (page3, _) = store
            .list_by_repo(
                repo.id,
                CommitPageRequest {
                    page: 3,
                    limit: 2,
                    direction: SortDirection::Desc,
                },
            )
            .await
            .unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(page3[0].hash, "h0");

        let (asc, _) = store
            .list_by_repo(
                repo.id,
                CommitPageRequest {
                    page: 1,
                    limit: 10,
                    direction: SortDirection::Asc,
                },
            )
            .await
            .unwrap();
        assert_eq!(asc[0].hash, "h0");
        assert_eq!(asc[4].hash, "h4");
    }

    #[tokio::test]
    async fn test_list_by_repo_scoped_to_repository() {
        let store = store().await;
        let repo_a = store.create(new_repo("a")).await.unwrap();
        let repo_b = store.create(new_repo("b")).await.unwrap();
        seed_commit(&store, repo_a.id, "ha", "alice").await;
        seed_commit(&store, repo_b.id, "hb", "bob").await;

        let (commits, total) = store
            .list_by_repo(repo_a.id, CommitPageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(commits[0].hash, "ha");
    }

    #[tokio::test]
    async fn test_get_or_create_author_reuses_row() {
        let store = store().await;

        let first = store.get_or_create("Alice", "alice@example.com").await.unwrap();
        let second = store.get_or_create("Alice", "alice@example.com").await.unwrap();
        assert_eq!(first.id, second.id);

        // Same name, different email is a distinct identity.
        let third = store.get_or_create("Alice", "alice@work.example").await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_get_or_create_author_concurrent() {
        let store = Arc::new(store().await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(
                    async move { store.get_or_create("Race", "race@example.com").await },
                )
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1, "all racers must observe one author row");
    }

    #[tokio::test]
    async fn test_top_for_repo_ordering_and_ties() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();

        // a x5, b x3, c x3, d x1 -- tie between b and c broken by id.
        let plan = [("a", 5), ("b", 3), ("c", 3), ("d", 1)];
        let mut n = 0;
        for (who, count) in plan {
            for _ in 0..count {
                seed_commit(&store, repo.id, &format!("h{}", n), who).await;
                n += 1;
            }
        }

        let top2 = store.top_for_repo("repo", 2).await.unwrap();
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[0].name, "a");
        assert_eq!(top2[0].commit_count, 5);
        assert_eq!(top2[1].name, "b");
        assert_eq!(top2[1].commit_count, 3);
        assert!(top2[1].id < store.get_or_create("c", "c@example.com").await.unwrap().id);

        let all = store.top_for_repo("repo", 10).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].name, "d");
        assert_eq!(all[3].commit_count, 1);
    }

    #[tokio::test]
    async fn test_top_for_repo_scoped_to_repository() {
        let store = store().await;
        let repo_a = store.create(new_repo("a")).await.unwrap();
        let repo_b = store.create(new_repo("b")).await.unwrap();

        seed_commit(&store, repo_a.id, "h1", "alice").await;
        seed_commit(&store, repo_a.id, "h2", "alice").await;
        seed_commit(&store, repo_b.id, "h3", "alice").await;

        let top_a = store.top_for_repo("a", 10).await.unwrap();
        assert_eq!(top_a.len(), 1);
        assert_eq!(top_a[0].commit_count, 2);

        let top_b = store.top_for_repo("b", 10).await.unwrap();
        assert_eq!(top_b[0].commit_count, 1);

        let top_none = store.top_for_repo("unknown", 10).await.unwrap();
        assert!(top_none.is_empty());
    }

    #[tokio::test]
    async fn test_delete_repository_cascades_to_commits() {
        let store = store().await;
        let repo = store.create(new_repo("repo")).await.unwrap();
        seed_commit(&store, repo.id, "h1", "alice").await;
        seed_commit(&store, repo.id, "h2", "bob").await;

        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(repo.id)
            .execute(store.pool())
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commits")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);

        // Authors outlive the repository.
        let authors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authors")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(authors, 2);
    }

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitpulse.db");

        let store = SqliteStore::connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        store.create(new_repo("repo")).await.unwrap();

        assert!(path.exists());

        // Reopening sees the persisted row.
        drop(store);
        let reopened = SqliteStore::connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        assert!(reopened.get_by_name("repo").await.unwrap().is_some());
    }
}
