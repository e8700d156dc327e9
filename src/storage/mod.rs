// src/storage/mod.rs
use crate::types::PositionRecord;
use rust_decimal::Decimal;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, error, warn};

/// On-disk record of the currently held position. One file, one JSON object;
/// the absence of the file is the "flat" state.
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Записывает позицию через временный файл и rename, чтобы на диске
    /// никогда не лежал недописанный JSON.
    pub async fn save(&self, price: Decimal, amount: Decimal) {
        let record = PositionRecord::new(price, amount);
        let json = match serde_json::to_string(&record) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize position record: {}", e);
                return;
            }
        };

        let tmp = self.path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, &json).await {
            error!("Failed to write {}: {}", tmp.display(), e);
            return;
        }
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            error!("Failed to move {} into place: {}", tmp.display(), e);
            return;
        }
        debug!("💾 Saved position record: {}", json);
    }

    /// None означает «позиции нет»: файл отсутствует, JSON битый или значения
    /// неположительные. Бот в этом случае просто стартует флэтом.
    pub async fn load(&self) -> Option<PositionRecord> {
        let data = fs::read_to_string(&self.path).await.ok()?;
        let record: PositionRecord = match serde_json::from_str(&data) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "Corrupt position record in {} ({}); treating as flat",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        if record.price <= Decimal::ZERO || record.amount <= Decimal::ZERO {
            warn!(
                "Position record in {} has non-positive fields; treating as flat",
                self.path.display()
            );
            return None;
        }
        Some(record)
    }

    /// Removes the record; a missing file is not an error.
    pub async fn clear(&self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!("Cleared position record"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn scratch_store(name: &str) -> PositionStore {
        let dir = std::env::temp_dir().join("moonbot_store_tests");
        std::fs::create_dir_all(&dir).unwrap();
        PositionStore::new(dir.join(name))
    }

    #[tokio::test]
    async fn save_load_clear_roundtrip() {
        let store = scratch_store("roundtrip.json");
        store.clear().await;
        assert!(store.load().await.is_none());

        let price = Decimal::from_str("0.10131").unwrap();
        let amount = Decimal::from_str("49.99").unwrap();
        store.save(price, amount).await;

        let record = store.load().await.expect("record should load back");
        assert_eq!(record.price, price);
        assert_eq!(record.amount, amount);
        assert!(record.ts > 0.0);

        store.clear().await;
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let store = scratch_store("no_tmp.json");
        store.save(Decimal::ONE, Decimal::ONE).await;
        assert!(!store.path.with_extension("tmp").exists());
        store.clear().await;
    }

    #[tokio::test]
    async fn corrupt_json_reads_as_flat() {
        let store = scratch_store("corrupt.json");
        fs::write(&store.path, "not json at all {{{").await.unwrap();
        assert!(store.load().await.is_none());
        store.clear().await;
    }

    #[tokio::test]
    async fn numeric_record_from_predecessor_loads() {
        // Более ранний инструмент писал price/amount голыми числами;
        // такой файл обязан читаться, чтобы рестарт не потерял позицию.
        let store = scratch_store("bare_numbers.json");
        fs::write(&store.path, r#"{"price": 0.5, "amount": 50, "ts": 1724668800.5}"#)
            .await
            .unwrap();
        let record = store.load().await.expect("legacy record should load");
        assert_eq!(record.price, Decimal::from_str("0.5").unwrap());
        assert_eq!(record.amount, Decimal::from(50));
        store.clear().await;
    }

    #[tokio::test]
    async fn non_positive_fields_read_as_flat() {
        let store = scratch_store("nonpositive.json");
        fs::write(&store.path, r#"{"price":"0.1","amount":"0","ts":1.0}"#)
            .await
            .unwrap();
        assert!(store.load().await.is_none());

        fs::write(&store.path, r#"{"price":"-1","amount":"10","ts":1.0}"#)
            .await
            .unwrap();
        assert!(store.load().await.is_none());
        store.clear().await;
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = scratch_store("idempotent.json");
        store.clear().await;
        // Second removal of an already-missing file must stay silent.
        store.clear().await;
    }
}
