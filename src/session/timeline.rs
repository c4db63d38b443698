use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// Idempotency key of a feedback segment
///
/// Derived as `"<remote session id>-<segment index>"`, so a redelivered
/// `ai_feedback` for the same segment maps to the same key and is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentKey(String);

impl SegmentKey {
    pub fn derive(remote_session_id: &str, segment_index: u64) -> Self {
        Self(format!("{}-{}", remote_session_id, segment_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One coaching remark correlated to a playback range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSegment {
    pub id: SegmentKey,
    pub text: String,
    pub start_offset_seconds: f64,
    /// Never earlier than `start_offset_seconds`
    pub end_offset_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl FeedbackSegment {
    /// Build a segment, clamping the end offset so it never precedes the start
    pub fn new(
        id: SegmentKey,
        text: impl Into<String>,
        start_offset_seconds: f64,
        end_offset_seconds: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let start = if start_offset_seconds.is_finite() {
            start_offset_seconds.max(0.0)
        } else {
            0.0
        };
        let end = end_offset_seconds
            .filter(|end| end.is_finite() && *end >= start)
            .unwrap_or(start);

        Self {
            id,
            text: text.into(),
            start_offset_seconds: start,
            end_offset_seconds: end,
            created_at,
        }
    }

    /// Whether playback offset `seconds` falls inside this segment
    pub fn covers(&self, seconds: f64) -> bool {
        seconds >= self.start_offset_seconds && seconds <= self.end_offset_seconds
    }
}

/// Ordered, append-only, deduplicated feedback timeline
#[derive(Debug, Default)]
pub struct FeedbackTimeline {
    inner: Mutex<TimelineInner>,
}

#[derive(Debug, Default)]
struct TimelineInner {
    segments: Vec<FeedbackSegment>,
    keys: HashSet<SegmentKey>,
}

impl FeedbackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment unless its key is already present.
    ///
    /// `build` receives the key derived from `remote_session_id` and
    /// `segment_index`, falling back to the current timeline length when the
    /// index is missing. Returns the inserted segment, or `None` for a duplicate.
    pub fn append_with<F>(
        &self,
        remote_session_id: &str,
        segment_index: Option<u64>,
        build: F,
    ) -> Option<FeedbackSegment>
    where
        F: FnOnce(SegmentKey) -> FeedbackSegment,
    {
        let mut inner = self.lock();
        let index = segment_index.unwrap_or(inner.segments.len() as u64);
        let key = SegmentKey::derive(remote_session_id, index);
        if inner.keys.contains(&key) {
            return None;
        }

        let segment = build(key.clone());
        inner.keys.insert(key);
        inner.segments.push(segment.clone());
        Some(segment)
    }

    /// Append a fully built segment; duplicate ids are a no-op
    pub fn insert(&self, segment: FeedbackSegment) -> bool {
        let mut inner = self.lock();
        if !inner.keys.insert(segment.id.clone()) {
            return false;
        }
        inner.segments.push(segment);
        true
    }

    pub fn contains(&self, key: &SegmentKey) -> bool {
        self.lock().keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments in arrival order
    pub fn segments(&self) -> Vec<FeedbackSegment> {
        self.lock().segments.clone()
    }

    /// Segments whose playback range covers `seconds`
    pub fn active_at(&self, seconds: f64) -> Vec<FeedbackSegment> {
        self.lock()
            .segments
            .iter()
            .filter(|s| s.covers(seconds))
            .cloned()
            .collect()
    }

    /// Forget everything; only called when a new session begins
    pub(crate) fn reset(&self) {
        let mut inner = self.lock();
        inner.segments.clear();
        inner.keys.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimelineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
