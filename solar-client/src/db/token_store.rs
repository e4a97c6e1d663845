use sqlx::sqlite::SqliteConnection;
use sqlx::{ConnectOptions, Connection};
use tokio::sync::Mutex;

use super::{connect_options, StoreError};

/// The most recently issued gateway token and when it was obtained (unix
/// seconds).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredToken {
    pub token: String,
    pub issued_at: i64,
}

/// Single-row table holding the current bearer token so restarts can reuse it.
pub struct TokenStore {
    conn: Mutex<Option<SqliteConnection>>,
}

impl TokenStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let mut conn = connect_options(url)?.connect().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                id        INTEGER PRIMARY KEY,
                token     TEXT NOT NULL,
                issued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut conn)
        .await?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub async fn load(&self) -> Result<Option<StoredToken>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let row = sqlx::query_as::<_, StoredToken>("SELECT token, issued_at FROM tokens WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn save(&self, token: &StoredToken) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        sqlx::query("INSERT OR REPLACE INTO tokens (id, token, issued_at) VALUES (1, ?1, ?2)")
            .bind(&token.token)
            .bind(token.issued_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Release the connection; `load` and `save` fail with
    /// `StoreError::Closed` afterwards.
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await?;
        }
        Ok(())
    }
}
