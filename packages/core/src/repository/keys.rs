use super::{is_unique_violation, AggregatorRepository};
use crate::types::{KeyKind, KeyMaterial};

impl AggregatorRepository {
    /// Every stored key of `kind`. Blobs of the wrong length are skipped.
    pub async fn list_keys(&self, kind: KeyKind) -> Result<Vec<KeyMaterial>, sqlx::Error> {
        let sql = format!("SELECT key FROM {} ORDER BY key ASC", kind.table());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let keys = rows
            .into_iter()
            .filter_map(|row| {
                use sqlx::Row;
                let blob: Vec<u8> = row.try_get("key").ok()?;
                KeyMaterial::from_bytes(&blob)
            })
            .collect();

        Ok(keys)
    }

    /// Insert a key. Returns `false` when the key was already stored, which
    /// is how concurrent reconcilers racing on the same key resolve.
    pub async fn insert_key(&self, kind: KeyKind, key: &KeyMaterial) -> Result<bool, sqlx::Error> {
        let sql = format!("INSERT INTO {} (key) VALUES (?)", kind.table());

        match sqlx::query(&sql)
            .bind(key.as_bytes().as_slice())
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
