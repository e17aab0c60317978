//! Networked SQL-backed implementation of [`TokenStore`]/[`ProjectStore`],
//! for the multi-instance deployment mode where every replica must see the
//! same token/project state instead of each keeping its own snapshot file
//! ([`super::embedded::EmbeddedStore`]). Runs against Postgres.
//!
//! Queries are built with `sqlx::query`/`query_as` rather than the
//! compile-time-checked `query!` macros, since those require a live
//! database at build time; rows are mapped by hand in [`project_from_row`]
//! and [`token_from_row`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Project, ProjectStore, StoreError, Token, TokenStore};

pub struct SqlStore {
	pool: PgPool,
}

impl SqlStore {
	/// Connects to `database_url` and ensures the schema exists.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let pool = PgPool::connect(database_url).await?;
		let store = SqlStore { pool };
		store.migrate().await?;
		Ok(store)
	}

	/// Exposes the pool so the audit sink can share the same connection
	/// pool as the store when `audit.store_in_db` is set.
	pub fn pool(&self) -> PgPool {
		self.pool.clone()
	}

	async fn migrate(&self) -> anyhow::Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS projects (
				id UUID PRIMARY KEY,
				name TEXT NOT NULL UNIQUE,
				api_key TEXT NOT NULL,
				is_active BOOLEAN NOT NULL,
				created_at TIMESTAMPTZ NOT NULL,
				updated_at TIMESTAMPTZ NOT NULL,
				deactivated_at TIMESTAMPTZ
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS tokens (
				token TEXT PRIMARY KEY,
				project_id UUID NOT NULL REFERENCES projects(id),
				expires_at TIMESTAMPTZ,
				is_active BOOLEAN NOT NULL,
				request_count BIGINT NOT NULL,
				cache_hit_count BIGINT NOT NULL,
				max_requests BIGINT,
				created_at TIMESTAMPTZ NOT NULL,
				last_used_at TIMESTAMPTZ,
				deactivated_at TIMESTAMPTZ
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query("CREATE INDEX IF NOT EXISTS tokens_project_id_idx ON tokens(project_id)")
			.execute(&self.pool)
			.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS audit_log (
				id UUID PRIMARY KEY,
				action TEXT NOT NULL,
				project_id UUID,
				token TEXT,
				actor TEXT NOT NULL,
				detail JSONB NOT NULL,
				occurred_at TIMESTAMPTZ NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	fn map_err(e: sqlx::Error) -> StoreError {
		match e {
			sqlx::Error::RowNotFound => StoreError::NotFound,
			sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueConflict(db.message().to_string()),
			other => StoreError::Transient(other.to_string()),
		}
	}
}

fn project_from_row(row: &PgRow) -> Project {
	Project {
		id: row.get("id"),
		name: row.get("name"),
		api_key: row.get("api_key"),
		is_active: row.get("is_active"),
		created_at: row.get("created_at"),
		updated_at: row.get("updated_at"),
		deactivated_at: row.get("deactivated_at"),
	}
}

fn token_from_row(row: &PgRow) -> Token {
	Token {
		token: row.get("token"),
		project_id: row.get("project_id"),
		expires_at: row.get("expires_at"),
		is_active: row.get("is_active"),
		request_count: row.get::<i64, _>("request_count") as u64,
		cache_hit_count: row.get::<i64, _>("cache_hit_count") as u64,
		max_requests: row.get::<Option<i64>, _>("max_requests").map(|v| v as u64),
		created_at: row.get("created_at"),
		last_used_at: row.get("last_used_at"),
		deactivated_at: row.get("deactivated_at"),
	}
}

async fn write_token(executor: impl sqlx::PgExecutor<'_>, t: &Token) -> Result<(), sqlx::Error> {
	sqlx::query(
		r#"
		INSERT INTO tokens (token, project_id, expires_at, is_active, request_count, cache_hit_count, max_requests, created_at, last_used_at, deactivated_at)
		VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
		ON CONFLICT (token) DO UPDATE SET
			project_id = EXCLUDED.project_id,
			expires_at = EXCLUDED.expires_at,
			is_active = EXCLUDED.is_active,
			request_count = EXCLUDED.request_count,
			cache_hit_count = EXCLUDED.cache_hit_count,
			max_requests = EXCLUDED.max_requests,
			last_used_at = EXCLUDED.last_used_at,
			deactivated_at = EXCLUDED.deactivated_at
		"#,
	)
	.bind(&t.token)
	.bind(t.project_id)
	.bind(t.expires_at)
	.bind(t.is_active)
	.bind(t.request_count as i64)
	.bind(t.cache_hit_count as i64)
	.bind(t.max_requests.map(|v| v as i64))
	.bind(t.created_at)
	.bind(t.last_used_at)
	.bind(t.deactivated_at)
	.execute(executor)
	.await?;
	Ok(())
}

#[async_trait]
impl TokenStore for SqlStore {
	async fn get_by_token(&self, token: &str) -> Result<Token, StoreError> {
		let row = sqlx::query("SELECT * FROM tokens WHERE token = $1")
			.bind(token)
			.fetch_one(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(token_from_row(&row))
	}

	async fn create(&self, token: Token) -> Result<Token, StoreError> {
		sqlx::query(
			r#"
			INSERT INTO tokens (token, project_id, expires_at, is_active, request_count, cache_hit_count, max_requests, created_at, last_used_at, deactivated_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
			"#,
		)
		.bind(&token.token)
		.bind(token.project_id)
		.bind(token.expires_at)
		.bind(token.is_active)
		.bind(token.request_count as i64)
		.bind(token.cache_hit_count as i64)
		.bind(token.max_requests.map(|v| v as i64))
		.bind(token.created_at)
		.bind(token.last_used_at)
		.bind(token.deactivated_at)
		.execute(&self.pool)
		.await
		.map_err(Self::map_err)?;
		Ok(token)
	}

	async fn update(&self, token: &str, f: Box<dyn for<'a> FnOnce(&'a mut Token) + Send + 'static>) -> Result<Token, StoreError> {
		let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
		let row = sqlx::query("SELECT * FROM tokens WHERE token = $1 FOR UPDATE")
			.bind(token)
			.fetch_one(&mut *tx)
			.await
			.map_err(Self::map_err)?;
		let mut t = token_from_row(&row);
		f(&mut t);
		write_token(&mut *tx, &t).await.map_err(Self::map_err)?;
		tx.commit().await.map_err(Self::map_err)?;
		Ok(t)
	}

	async fn revoke(&self, token: &str) -> Result<Token, StoreError> {
		TokenStore::update(
			self,
			token,
			Box::new(|t| {
				if t.is_active {
					t.is_active = false;
					t.deactivated_at = Some(Utc::now());
				}
			}),
		)
		.await
	}

	async fn revoke_batch(&self, tokens: &[String]) -> Result<usize, StoreError> {
		if tokens.is_empty() {
			return Ok(0);
		}
		let now = Utc::now();
		let result = sqlx::query("UPDATE tokens SET is_active = false, deactivated_at = $1 WHERE token = ANY($2) AND is_active")
			.bind(now)
			.bind(tokens)
			.execute(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(result.rows_affected() as usize)
	}

	async fn revoke_project(&self, project_id: Uuid) -> Result<usize, StoreError> {
		let now = Utc::now();
		let result = sqlx::query("UPDATE tokens SET is_active = false, deactivated_at = $1 WHERE project_id = $2 AND is_active")
			.bind(now)
			.bind(project_id)
			.execute(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(result.rows_affected() as usize)
	}

	async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<Vec<Token>, StoreError> {
		let rows = sqlx::query(
			"UPDATE tokens SET is_active = false, deactivated_at = $1 WHERE is_active AND expires_at IS NOT NULL AND expires_at <= $1 RETURNING *",
		)
		.bind(now)
		.fetch_all(&self.pool)
		.await
		.map_err(Self::map_err)?;
		Ok(rows.iter().map(token_from_row).collect())
	}

	async fn increment_usage_batch(&self, deltas: &[(String, u64)], now: DateTime<Utc>) -> Result<(), StoreError> {
		if deltas.is_empty() {
			return Ok(());
		}
		let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
		for (token, delta) in deltas {
			sqlx::query(
				r#"
				UPDATE tokens SET
					request_count = request_count + $2,
					last_used_at = CASE WHEN last_used_at IS NULL OR last_used_at < $3 THEN $3 ELSE last_used_at END
				WHERE token = $1
				"#,
			)
			.bind(token)
			.bind(*delta as i64)
			.bind(now)
			.execute(&mut *tx)
			.await
			.map_err(Self::map_err)?;
		}
		tx.commit().await.map_err(Self::map_err)?;
		Ok(())
	}

	async fn increment_cache_hit_batch(&self, deltas: &[(String, u64)]) -> Result<(), StoreError> {
		if deltas.is_empty() {
			return Ok(());
		}
		let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
		for (token, delta) in deltas {
			sqlx::query("UPDATE tokens SET cache_hit_count = cache_hit_count + $2 WHERE token = $1")
				.bind(token)
				.bind(*delta as i64)
				.execute(&mut *tx)
				.await
				.map_err(Self::map_err)?;
		}
		tx.commit().await.map_err(Self::map_err)?;
		Ok(())
	}

	async fn delete(&self, token: &str) -> Result<(), StoreError> {
		let result = sqlx::query("DELETE FROM tokens WHERE token = $1")
			.bind(token)
			.execute(&self.pool)
			.await
			.map_err(Self::map_err)?;
		if result.rows_affected() == 0 {
			return Err(StoreError::NotFound);
		}
		Ok(())
	}

	async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<Token>, StoreError> {
		let rows = sqlx::query("SELECT * FROM tokens WHERE project_id = $1")
			.bind(project_id)
			.fetch_all(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(rows.iter().map(token_from_row).collect())
	}
}

#[async_trait]
impl ProjectStore for SqlStore {
	async fn get(&self, id: Uuid) -> Result<Project, StoreError> {
		let row = sqlx::query("SELECT * FROM projects WHERE id = $1")
			.bind(id)
			.fetch_one(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(project_from_row(&row))
	}

	async fn get_by_name(&self, name: &str) -> Result<Project, StoreError> {
		let row = sqlx::query("SELECT * FROM projects WHERE name = $1")
			.bind(name)
			.fetch_one(&self.pool)
			.await
			.map_err(Self::map_err)?;
		Ok(project_from_row(&row))
	}

	async fn create(&self, project: Project) -> Result<Project, StoreError> {
		sqlx::query(
			r#"
			INSERT INTO projects (id, name, api_key, is_active, created_at, updated_at, deactivated_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7)
			"#,
		)
		.bind(project.id)
		.bind(&project.name)
		.bind(&project.api_key)
		.bind(project.is_active)
		.bind(project.created_at)
		.bind(project.updated_at)
		.bind(project.deactivated_at)
		.execute(&self.pool)
		.await
		.map_err(Self::map_err)?;
		Ok(project)
	}

	async fn update(&self, id: Uuid, f: Box<dyn for<'a> FnOnce(&'a mut Project) + Send + 'static>) -> Result<Project, StoreError> {
		let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
		let row = sqlx::query("SELECT * FROM projects WHERE id = $1 FOR UPDATE")
			.bind(id)
			.fetch_one(&mut *tx)
			.await
			.map_err(Self::map_err)?;
		let mut p = project_from_row(&row);
		f(&mut p);
		p.updated_at = Utc::now();
		sqlx::query(
			r#"
			UPDATE projects SET name = $2, api_key = $3, is_active = $4, updated_at = $5, deactivated_at = $6
			WHERE id = $1
			"#,
		)
		.bind(p.id)
		.bind(&p.name)
		.bind(&p.api_key)
		.bind(p.is_active)
		.bind(p.updated_at)
		.bind(p.deactivated_at)
		.execute(&mut *tx)
		.await
		.map_err(Self::map_err)?;
		tx.commit().await.map_err(Self::map_err)?;
		Ok(p)
	}

	async fn deactivate(&self, id: Uuid) -> Result<Project, StoreError> {
		ProjectStore::update(
			self,
			id,
			Box::new(|p| {
				if p.is_active {
					p.is_active = false;
					p.deactivated_at = Some(Utc::now());
				}
			}),
		)
		.await
	}

	async fn list(&self) -> Result<Vec<Project>, StoreError> {
		let rows = sqlx::query("SELECT * FROM projects").fetch_all(&self.pool).await.map_err(Self::map_err)?;
		Ok(rows.iter().map(project_from_row).collect())
	}
}
