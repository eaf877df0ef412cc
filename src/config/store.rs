use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::AppConfig;
use crate::error::{AppError, Result};

const CONFIG_KEY: &str = "viewer_config";

/// Configuration store backed by SQLite
///
/// Reads go through an `ArcSwap` cache and never touch the database.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        // Single writer, one process: a small pool is plenty
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let config = Self::load_config(&pool).await?;
        debug!("Loaded configuration from {}", db_path.display());
        let cache = Arc::new(ArcSwap::from_pointee(config));

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache,
            change_tx,
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))
            }
            None => {
                let config = AppConfig::default();
                Self::save_config_to_db(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save_config_to_db(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(CONFIG_KEY)
        .bind(&json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Replace the whole configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        Self::save_config_to_db(&self.pool, &config).await?;
        self.cache.store(Arc::new(config));
        self.notify();
        Ok(())
    }

    /// Read-modify-write; concurrent updates are last-write-wins
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);

        // Persist first so the cache never runs ahead of the database
        Self::save_config_to_db(&self.pool, &config).await?;
        self.cache.store(Arc::new(config));
        self.notify();

        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    fn notify(&self) {
        let _ = self.change_tx.send(ConfigChange {
            key: CONFIG_KEY.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("viewer.db");

        let store = assert_ok!(ConfigStore::new(&db_path).await);
        let mut changes = store.subscribe();

        assert_eq!(*store.get(), AppConfig::default());

        assert_ok!(
            store
                .update(|c| {
                    c.cameras.target = "lane3".to_string();
                    c.media.max_attempts = Some(4);
                })
                .await
        );

        assert_eq!(changes.recv().await.unwrap().key, CONFIG_KEY);
        let config = store.get();
        assert_eq!(config.cameras.target, "lane3");
        assert_eq!(config.media.max_attempts, Some(4));

        // Reopen and verify persistence
        drop(store);
        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.cameras.target, "lane3");
        assert_eq!(config.media.max_attempts, Some(4));
    }

    #[tokio::test]
    async fn test_set_replaces_everything() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("nested/viewer.db"))
            .await
            .unwrap();

        let mut config = AppConfig::default();
        config.channel.base_url = "ws://detector:9000/ws/".to_string();
        store.set(config.clone()).await.unwrap();

        assert_eq!(*store.get(), config);
    }
}
