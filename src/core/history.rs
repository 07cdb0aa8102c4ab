use crate::core::io::Storage;
use crate::core::state::{
    ExplanationFormat, GeneratedContent, GenerationOutput, LearningRequest, MAX_HISTORY_ITEMS,
};
use anyhow::Result;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const HISTORY_KEY: &str = "stemSparkHistory";
pub const SELECTED_VOICE_KEY: &str = "stemSparkSelectedVoiceURI";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub topic: String,
    pub age_level: u8,
    pub format: ExplanationFormat,
    pub language: String,
    pub read_aloud: bool,
    pub output: GeneratedContent,
    pub suggested_topic: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn new(request: &LearningRequest, output: &GenerationOutput) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("{}-{:04x}", timestamp, rand::random::<u16>()),
            topic: request.topic.clone(),
            age_level: request.age_level,
            format: request.format,
            language: request.language.clone(),
            read_aloud: request.read_aloud,
            output: output.content.clone(),
            suggested_topic: output.suggested_topic.clone(),
            timestamp,
        }
    }

    /// The request that produced this entry, for re-filling the form.
    pub fn request(&self) -> LearningRequest {
        LearningRequest {
            topic: self.topic.clone(),
            age_level: self.age_level,
            format: self.format,
            language: self.language.clone(),
            read_aloud: self.read_aloud,
        }
    }

    pub fn generation_output(&self) -> GenerationOutput {
        GenerationOutput {
            content: self.output.clone(),
            suggested_topic: self.suggested_topic.clone(),
        }
    }

    pub fn created_at(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.timestamp)
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string())
    }
}

/// Most-recent-first list of past generations, capped at `capacity`.
#[derive(Clone, Debug)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY_ITEMS)
    }
}

impl HistoryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn from_entries(mut entries: Vec<HistoryEntry>, capacity: usize) -> Self {
        entries.truncate(capacity);
        Self { entries, capacity }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Persists the history log and the selected voice under fixed keys.
#[derive(Clone)]
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn Storage>, capacity: usize) -> Self {
        Self { storage, capacity }
    }

    /// Corrupt history is dropped (and its key removed) rather than failing startup.
    pub async fn load(&self) -> Result<HistoryLog> {
        let Some(content) = self.storage.read(HISTORY_KEY).await? else {
            return Ok(HistoryLog::with_capacity(self.capacity));
        };
        match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
            Ok(entries) => Ok(HistoryLog::from_entries(entries, self.capacity)),
            Err(e) => {
                error!("Failed to parse stored history, discarding it: {}", e);
                self.storage.delete(HISTORY_KEY).await?;
                Ok(HistoryLog::with_capacity(self.capacity))
            }
        }
    }

    pub async fn save(&self, log: &HistoryLog) -> Result<()> {
        if log.is_empty() {
            return self.storage.delete(HISTORY_KEY).await;
        }
        let content = serde_json::to_string(log.entries())?;
        self.storage.write(HISTORY_KEY, &content).await
    }

    pub async fn load_selected_voice(&self) -> Result<Option<String>> {
        Ok(self
            .storage
            .read(SELECTED_VOICE_KEY)
            .await?
            .filter(|uri| !uri.is_empty()))
    }

    pub async fn save_selected_voice(&self, voice_uri: Option<&str>) -> Result<()> {
        match voice_uri {
            Some(uri) => {
                info!("Selected voice: {}", uri);
                self.storage.write(SELECTED_VOICE_KEY, uri).await
            }
            None => self.storage.delete(SELECTED_VOICE_KEY).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(topic: &str) -> HistoryEntry {
        let request = LearningRequest {
            topic: topic.to_string(),
            ..Default::default()
        };
        let output = GenerationOutput {
            content: GeneratedContent::Text(format!("All about {}", topic)),
            suggested_topic: Some("Volcanoes".to_string()),
        };
        HistoryEntry::new(&request, &output)
    }

    #[test]
    fn test_record_is_most_recent_first() {
        let mut log = HistoryLog::with_capacity(5);
        log.record(entry("Rain"));
        log.record(entry("Snow"));
        let topics: Vec<_> = log.entries().iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["Snow", "Rain"]);
    }

    #[test]
    fn test_record_evicts_oldest_beyond_cap() {
        let mut log = HistoryLog::with_capacity(3);
        for topic in ["a", "b", "c", "d", "e"] {
            log.record(entry(topic));
            assert!(log.len() <= 3);
        }
        let topics: Vec<_> = log.entries().iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["e", "d", "c"]);
    }

    #[test]
    fn test_entry_roundtrips_request() {
        let e = entry("Magnets");
        assert_eq!(e.request().topic, "Magnets");
        assert_eq!(e.generation_output().suggested_topic.as_deref(), Some("Volcanoes"));
    }

    #[test]
    fn test_entry_json_shape() {
        let e = entry("Magnets");
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["ageLevel"], 8);
        assert_eq!(value["format"], "story");
        assert_eq!(value["output"], "All about Magnets");
        assert!(value["timestamp"].is_i64());
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod persistence {
        use super::*;
        use crate::core::io::NativeStorage;

        fn store(dir: &tempfile::TempDir, capacity: usize) -> (HistoryStore, Arc<dyn Storage>) {
            let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(dir.path()));
            (HistoryStore::new(storage.clone(), capacity), storage)
        }

        #[tokio::test]
        async fn test_save_and_load() {
            let dir = tempfile::tempdir().unwrap();
            let (store, _) = store(&dir, 20);

            let mut log = store.load().await.unwrap();
            assert!(log.is_empty());
            log.record(entry("Stars"));
            log.record(entry("Moon"));
            store.save(&log).await.unwrap();

            let loaded = store.load().await.unwrap();
            assert_eq!(loaded.entries(), log.entries());
        }

        #[tokio::test]
        async fn test_corrupt_history_is_discarded() {
            let dir = tempfile::tempdir().unwrap();
            let (store, storage) = store(&dir, 20);
            storage.write(HISTORY_KEY, "{not json").await.unwrap();

            let log = store.load().await.unwrap();
            assert!(log.is_empty());
            assert!(!storage.exists(HISTORY_KEY).await.unwrap());
        }

        #[tokio::test]
        async fn test_saving_empty_log_removes_key() {
            let dir = tempfile::tempdir().unwrap();
            let (store, storage) = store(&dir, 20);
            let mut log = HistoryLog::with_capacity(20);
            log.record(entry("Bees"));
            store.save(&log).await.unwrap();
            assert!(storage.exists(HISTORY_KEY).await.unwrap());

            log.clear();
            store.save(&log).await.unwrap();
            assert!(!storage.exists(HISTORY_KEY).await.unwrap());
        }

        #[tokio::test]
        async fn test_load_applies_capacity() {
            let dir = tempfile::tempdir().unwrap();
            let (big, _) = store(&dir, 10);
            let mut log = HistoryLog::with_capacity(10);
            for i in 0..6 {
                log.record(entry(&format!("topic {}", i)));
            }
            big.save(&log).await.unwrap();

            let (small, _) = store(&dir, 2);
            let loaded = small.load().await.unwrap();
            assert_eq!(loaded.len(), 2);
            assert_eq!(loaded.entries()[0].topic, "topic 5");
        }

        #[tokio::test]
        async fn test_selected_voice() {
            let dir = tempfile::tempdir().unwrap();
            let (store, _) = store(&dir, 20);
            assert_eq!(store.load_selected_voice().await.unwrap(), None);

            store.save_selected_voice(Some("urn:voice:samantha")).await.unwrap();
            assert_eq!(
                store.load_selected_voice().await.unwrap().as_deref(),
                Some("urn:voice:samantha")
            );

            store.save_selected_voice(None).await.unwrap();
            assert_eq!(store.load_selected_voice().await.unwrap(), None);
        }
    }
}
