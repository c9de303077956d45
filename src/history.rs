//! Bounded in-memory log of JWT sign attempts.

use crate::jwt::Claims;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// One sign attempt, success or failure, as seen by the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignAttempt {
    pub timestamp: SystemTime,
    pub common_name: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
    /// The claims exactly as the caller supplied them
    pub claims: Claims,
    /// The signed token, present only on success
    pub token: Option<String>,
}

/// Append-only log capped at `max_entries`; the oldest attempt is evicted
/// first once the cap is reached. Reads return copies, newest last.
pub struct SignHistory {
    max_entries: usize,
    entries: Mutex<VecDeque<SignAttempt>>,
}

impl SignHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(64))),
        }
    }

    /// Record one attempt, stamped with the current time.
    pub async fn record(
        &self,
        common_name: Option<&str>,
        success: bool,
        failure_reason: Option<String>,
        claims: Claims,
        token: Option<String>,
    ) {
        let attempt = SignAttempt {
            timestamp: SystemTime::now(),
            common_name: common_name.map(|s| s.to_string()),
            success,
            failure_reason,
            claims,
            token,
        };
        let mut entries = self.entries.lock().await;
        if entries.len() == self.max_entries {
            entries.pop_front();
        }
        entries.push_back(attempt);
    }

    /// All retained attempts, oldest first.
    pub async fn all(&self) -> Vec<SignAttempt> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// The most recent `limit` attempts, oldest of those first.
    pub async fn recent(&self, limit: usize) -> Vec<SignAttempt> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_for(subject: &str) -> Claims {
        let mut claims = Claims::new();
        claims.insert("sub".to_string(), json!(subject));
        claims
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let history = SignHistory::new(10);
        assert!(history.is_empty().await);

        history
            .record(
                Some("alice"),
                true,
                None,
                claims_for("alice"),
                Some("header.payload.sig".to_string()),
            )
            .await;
        history
            .record(
                Some("bob"),
                false,
                Some("certificate not found".to_string()),
                claims_for("bob"),
                None,
            )
            .await;

        let all = history.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].common_name.as_deref(), Some("alice"));
        assert!(all[0].success);
        assert!(all[0].token.is_some());
        assert_eq!(all[1].common_name.as_deref(), Some("bob"));
        assert!(!all[1].success);
        assert_eq!(
            all[1].failure_reason.as_deref(),
            Some("certificate not found")
        );
        assert!(all[0].timestamp <= all[1].timestamp);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest_first() {
        let history = SignHistory::new(3);
        for i in 0..5 {
            let name = format!("user-{}", i);
            history
                .record(Some(&name), true, None, Claims::new(), None)
                .await;
        }

        let all = history.all().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].common_name.as_deref(), Some("user-2"));
        assert_eq!(all[2].common_name.as_deref(), Some("user-4"));
    }

    #[tokio::test]
    async fn test_recent_returns_newest_entries() {
        let history = SignHistory::new(10);
        for i in 0..6 {
            let name = format!("user-{}", i);
            history
                .record(Some(&name), true, None, Claims::new(), None)
                .await;
        }

        let recent = history.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].common_name.as_deref(), Some("user-4"));
        assert_eq!(recent[1].common_name.as_deref(), Some("user-5"));

        // Asking for more than retained returns everything.
        assert_eq!(history.recent(100).await.len(), 6);
    }
}
