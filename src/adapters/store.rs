//! JSON File Store
//!
//! File-backed `Store`:
//! - `tokens.json`: address → candidate map, rewritten on every upsert
//! - `analyses.jsonl`: one combined analysis per line, append-only
//!
//! Re-upserting a known token keeps its original `first_detected_at`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{CombinedAnalysis, TokenCandidate};
use crate::ports::{PersistenceError, Store};

pub const TOKENS_FILE: &str = "tokens.json";
pub const ANALYSES_FILE: &str = "analyses.jsonl";

#[derive(Debug)]
pub struct JsonlStore {
    data_dir: PathBuf,
    /// In-memory copy of `tokens.json`; the lock also serializes file writes
    tokens: Mutex<BTreeMap<String, TokenCandidate>>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let tokens = read_tokens(&data_dir.join(TOKENS_FILE))?;
        tracing::info!(
            "Store opened at {} ({} known tokens)",
            data_dir.display(),
            tokens.len()
        );

        Ok(Self {
            data_dir,
            tokens: Mutex::new(tokens),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.data_dir.join(TOKENS_FILE)
    }

    pub fn analyses_path(&self) -> PathBuf {
        self.data_dir.join(ANALYSES_FILE)
    }

    /// Every persisted token
    pub fn tokens(&self) -> Vec<TokenCandidate> {
        self.tokens.lock().values().cloned().collect()
    }

    /// Persisted analyses, oldest first; unreadable lines are skipped
    pub fn load_analyses(&self) -> Result<Vec<CombinedAnalysis>, PersistenceError> {
        let path = self.analyses_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let mut analyses = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(analysis) => analyses.push(analysis),
                Err(e) => tracing::warn!(line = line_no + 1, error = %e, "Skipping corrupt analysis record"),
            }
        }
        Ok(analyses)
    }
}

fn read_tokens(path: &Path) -> Result<BTreeMap<String, TokenCandidate>, PersistenceError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Write via a temp file and rename so readers never see a partial file
fn write_atomic(path: &Path, content: &str) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Store for JsonlStore {
    async fn upsert_token(&self, token: &TokenCandidate) -> Result<(), PersistenceError> {
        let mut tokens = self.tokens.lock();

        let mut record = token.clone();
        if let Some(existing) = tokens.get(&token.address) {
            record.first_detected_at = existing.first_detected_at.min(token.first_detected_at);
        }
        tokens.insert(record.address.clone(), record);

        let content = serde_json::to_string_pretty(&*tokens)?;
        write_atomic(&self.tokens_path(), &content)
    }

    async fn save_analysis(&self, analysis: &CombinedAnalysis) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(analysis)?;
        let _guard = self.tokens.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.analyses_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceName, SourceResult, TokenMetrics};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn analysis(address: &str, passed: bool) -> CombinedAnalysis {
        let mut sources = BTreeMap::new();
        sources.insert(SourceName::Birdeye, SourceResult::degraded("HTTP 503", 4));
        CombinedAnalysis {
            token_address: address.to_string(),
            sources,
            metrics: TokenMetrics::default(),
            overall_score: 61.5,
            risk_score: 30.0,
            opportunity_score: 53.0,
            passed,
            failed_filters: if passed { vec![] } else { vec!["minLiquidity".into()] },
            has_errors: true,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.upsert_token(&TokenCandidate::new("Mint111", "RADR", "Radar")).await.unwrap();
        store.upsert_token(&TokenCandidate::new("Mint222", "OTHR", "Other")).await.unwrap();

        let reopened = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tokens().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_detection_time() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        let first_seen = Utc::now() - Duration::hours(5);

        store
            .upsert_token(&TokenCandidate::from_address("Mint111").with_detected_at(first_seen))
            .await
            .unwrap();
        store
            .upsert_token(&TokenCandidate::new("Mint111", "RADR", "Radar"))
            .await
            .unwrap();

        let tokens = store.tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "RADR");
        assert_eq!(tokens[0].first_detected_at, first_seen);
    }

    #[tokio::test]
    async fn test_analyses_append_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.save_analysis(&analysis("Mint111", true)).await.unwrap();
        store.save_analysis(&analysis("Mint111", false)).await.unwrap();

        let content = fs::read_to_string(store.analyses_path()).unwrap();
        assert_eq!(content.lines().count(), 2);

        let loaded = store.load_analyses().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].passed);
        assert_eq!(loaded[1].failed_filters, vec!["minLiquidity"]);
        assert!(loaded[1].sources[&SourceName::Birdeye].is_degraded());
    }

    #[tokio::test]
    async fn test_corrupt_analysis_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        store.save_analysis(&analysis("Mint111", true)).await.unwrap();

        let mut file = OpenOptions::new().append(true).open(store.analyses_path()).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(store.load_analyses().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_tokens_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TOKENS_FILE), "{broken").unwrap();
        assert!(matches!(
            JsonlStore::open(dir.path()),
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonlStore::open(&nested).unwrap();
        assert!(nested.exists());
        assert!(store.tokens().is_empty());
    }
}
