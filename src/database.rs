use serde::{de::DeserializeOwned, Serialize};
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{fs, sync::RwLock, time};
use tracing::error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Codec(String),
    #[error("Database error: {0}")]
    Custom(String),
}

#[derive(Debug)]
struct DatabaseInner<T> {
    data: T,
    path: String,
}

/// A single bincode file holding `T`, loaded once and rewritten on every
/// transaction.
#[derive(Clone, Debug)]
pub struct Database<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> {
    inner: Arc<RwLock<DatabaseInner<T>>>,
}

impl<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> Database<T> {
    pub async fn new(path: impl Into<String>) -> Result<Self, DbError> {
        let path = path.into();

        if let Some(parent) = Path::new(&path).parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create database directory: {}", e);
                DbError::Io(e)
            })?;
        }

        let data = if Path::new(&path).exists() {
            match fs::read(&path).await {
                Ok(bytes) => match bincode::deserialize(&bytes) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to deserialize database {}: {}", path, e);
                        T::default()
                    }
                },
                Err(e) => {
                    error!("Failed to read database {}: {}", path, e);
                    T::default()
                }
            }
        } else {
            T::default()
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(DatabaseInner { data, path })),
        })
    }

    async fn save(path: &str, data: &T) -> Result<(), DbError> {
        let bytes = bincode::serialize(data).map_err(|e| DbError::Codec(e.to_string()))?;

        match time::timeout(Duration::from_secs(5), fs::write(path, bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Database save operation timed out");
                Err(DbError::Custom("Save operation timed out".into()))
            }
        }
    }

    /// Applies `f` to a copy of the data, persists it, then publishes it.
    ///
    /// The write guard is held for the whole read-modify-save cycle, so two
    /// concurrent transactions never start from the same snapshot. If `f`
    /// or the save fails, the in-memory data is left untouched.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut T) -> Result<R, String>,
    {
        let mut guard = self.inner.write().await;
        let mut data = guard.data.clone();
        let result = f(&mut data).map_err(DbError::Custom)?;

        Self::save(&guard.path, &data).await?;
        guard.data = data;

        Ok(result)
    }

    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().await;
        f(&guard.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Default, Clone, Debug, Serialize, Deserialize)]
    struct Counters {
        values: HashMap<u64, u64>,
    }

    #[tokio::test]
    async fn test_transaction_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counters.db");
        let path = path.to_string_lossy().to_string();

        let db: Database<Counters> = Database::new(path.clone()).await.unwrap();
        db.transaction(|d| {
            d.values.insert(1, 10);
            Ok(())
        })
        .await
        .unwrap();

        let reopened: Database<Counters> = Database::new(path).await.unwrap();
        assert_eq!(reopened.read(|d| d.values.get(&1).copied()).await, Some(10));
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_data_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.db").to_string_lossy().to_string();
        let db: Database<Counters> = Database::new(path).await.unwrap();

        let result = db
            .transaction(|d| {
                d.values.insert(7, 7);
                Err::<(), _>("rejected".to_string())
            })
            .await;

        assert!(matches!(result, Err(DbError::Custom(msg)) if msg == "rejected"));
        assert!(db.read(|d| d.values.is_empty()).await);
    }

    #[tokio::test]
    async fn test_concurrent_transactions_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.db").to_string_lossy().to_string();
        let db: Database<Counters> = Database::new(path).await.unwrap();

        let mut handles = Vec::new();
        for key in 0..16u64 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.transaction(|d| {
                    d.values.insert(key, key);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(db.read(|d| d.values.len()).await, 16);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.db");
        std::fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();

        let db: Database<Counters> = Database::new(path.to_string_lossy().to_string())
            .await
            .unwrap();
        assert!(db.read(|d| d.values.is_empty()).await);
    }
}
