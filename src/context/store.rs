//! Speaker-keyed context cache
//!
//! All speaker entries live in one `parking_lot::Mutex<HashMap<..>>`. Every
//! operation, including the periodic sweep, takes that lock for a single
//! short critical section, so an observer sees a speaker either before or
//! after an append, never in between. Reads hand out owned copies.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One remembered (source, translation) exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPair {
    pub original: String,
    pub translated: String,
}

impl ContextPair {
    pub fn new(original: impl Into<String>, translated: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            translated: translated.into(),
        }
    }
}

/// Rolling history for a single speaker
#[derive(Debug, Clone)]
struct SpeakerContext {
    buffer: VecDeque<ContextPair>,
    last_updated: DateTime<Utc>,
    created_at: DateTime<Utc>,
    total_translations: u64,
}

impl SpeakerContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            buffer: VecDeque::new(),
            last_updated: now,
            created_at: now,
            total_translations: 0,
        }
    }

    fn push(&mut self, pair: ContextPair, cap: usize, now: DateTime<Utc>) {
        self.buffer.push_back(pair);
        while self.buffer.len() > cap {
            self.buffer.pop_front();
        }
        if now > self.last_updated {
            self.last_updated = now;
        }
        self.total_translations += 1;
    }

    fn stats(&self, context_id: &str, now: DateTime<Utc>) -> SpeakerStats {
        SpeakerStats {
            context_id: context_id.to_string(),
            total_translations: self.total_translations,
            context_buffer_size: self.buffer.len(),
            last_updated: unix_seconds(self.last_updated),
            created_at: unix_seconds(self.created_at),
            active_duration: seconds_between(self.created_at, now),
        }
    }
}

/// Per-speaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerStats {
    pub context_id: String,
    pub total_translations: u64,
    pub context_buffer_size: usize,
    /// Unix seconds
    pub last_updated: f64,
    /// Unix seconds
    pub created_at: f64,
    /// Seconds since the context was created
    pub active_duration: f64,
}

/// Aggregate statistics across all speakers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_speakers: usize,
    pub total_translations: u64,
    pub total_context_entries: usize,
    pub oldest_context: Option<f64>,
    pub newest_context: Option<f64>,
    pub cleanup_interval: u64,
    pub max_context_per_speaker: usize,
}

/// Debug snapshot of one speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextExport {
    pub context_id: String,
    pub buffer: Vec<ContextPair>,
    pub stats: SpeakerStats,
}

/// Thread-safe store of speaker contexts
pub struct ContextStore {
    speakers: Mutex<HashMap<String, SpeakerContext>>,
    max_context_per_speaker: usize,
    cleanup_interval: Duration,
}

impl ContextStore {
    pub fn new(max_context_per_speaker: usize, cleanup_interval: Duration) -> Self {
        Self {
            speakers: Mutex::new(HashMap::new()),
            max_context_per_speaker,
            cleanup_interval,
        }
    }

    pub fn max_context_per_speaker(&self) -> usize {
        self.max_context_per_speaker
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Copy of the speaker's buffer, oldest first. Unknown ids yield an empty
    /// list and are not created.
    pub fn get(&self, context_id: &str) -> Vec<ContextPair> {
        self.speakers
            .lock()
            .get(context_id)
            .map(|ctx| ctx.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a translation, creating the speaker on first use
    pub fn append(&self, context_id: &str, original: &str, translated: &str) {
        let now = Utc::now();
        let pair = ContextPair::new(original, translated);
        let mut speakers = self.speakers.lock();
        let ctx = speakers
            .entry(context_id.to_string())
            .or_insert_with(|| SpeakerContext::new(now));
        ctx.push(pair, self.max_context_per_speaker, now);
        tracing::debug!(
            context_id,
            total_translations = ctx.total_translations,
            buffered = ctx.buffer.len(),
            "Updated speaker context"
        );
    }

    /// Drop a speaker entirely. Returns whether it existed.
    pub fn clear(&self, context_id: &str) -> bool {
        let removed = self.speakers.lock().remove(context_id).is_some();
        if removed {
            tracing::info!(context_id, "Cleared speaker context");
        }
        removed
    }

    /// Remove every speaker idle for longer than `max_age`
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.cleanup_at(Utc::now(), max_age)
    }

    fn cleanup_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let mut speakers = self.speakers.lock();
        let before = speakers.len();
        speakers.retain(|_, ctx| !is_expired(ctx.last_updated, now, max_age));
        let removed = before - speakers.len();
        drop(speakers);

        if removed > 0 {
            tracing::info!("Cleaned up {} expired speaker context(s)", removed);
        }
        removed
    }

    pub fn stats(&self, context_id: &str) -> Option<SpeakerStats> {
        let now = Utc::now();
        self.speakers
            .lock()
            .get(context_id)
            .map(|ctx| ctx.stats(context_id, now))
    }

    pub fn system_stats(&self) -> SystemStats {
        let speakers = self.speakers.lock();
        let created = speakers.values().map(|ctx| ctx.created_at);

        SystemStats {
            total_speakers: speakers.len(),
            total_translations: speakers.values().map(|ctx| ctx.total_translations).sum(),
            total_context_entries: speakers.values().map(|ctx| ctx.buffer.len()).sum(),
            oldest_context: created.clone().min().map(unix_seconds),
            newest_context: created.max().map(unix_seconds),
            cleanup_interval: self.cleanup_interval.as_secs(),
            max_context_per_speaker: self.max_context_per_speaker,
        }
    }

    /// All known speaker ids
    pub fn speakers(&self) -> Vec<String> {
        self.speakers.lock().keys().cloned().collect()
    }

    /// Buffer and statistics of one speaker, taken under a single lock
    pub fn export(&self, context_id: &str) -> Option<ContextExport> {
        let now = Utc::now();
        let speakers = self.speakers.lock();
        speakers.get(context_id).map(|ctx| ContextExport {
            context_id: context_id.to_string(),
            buffer: ctx.buffer.iter().cloned().collect(),
            stats: ctx.stats(context_id, now),
        })
    }

    pub fn len(&self) -> usize {
        self.speakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.lock().is_empty()
    }
}

fn is_expired(last_updated: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match (now - last_updated).to_std() {
        Ok(idle) => idle > max_age,
        // last_updated is in the future (clock stepped back): not idle
        Err(_) => false,
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

/// Wall-clock time as fractional unix seconds
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
