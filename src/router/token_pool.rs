//! Upstream Credential Pool
//!
//! Owns the loaded credentials, their activation state and the rotation cursor.
//! Every mutation happens inside one mutex, so concurrent callers never observe
//! the same cursor value.

use crate::error::{ProxyError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Errors a token may accumulate before reconciliation deactivates it
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

const REDACTED_PREFIX_CHARS: usize = 10;

/// Short, log-safe form of a credential
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(REDACTED_PREFIX_CHARS).collect();
    format!("{}...", prefix)
}

/// A single upstream credential with usage tracking
#[derive(Debug, Clone)]
pub struct Token {
    /// The opaque credential
    key: String,

    /// Whether rotation may hand this token out
    active: bool,

    /// 1-based line position in the credential file
    priority: usize,

    /// When the token was last handed out
    last_used: Option<DateTime<Utc>>,

    /// Number of times the token was handed out
    usage_count: u64,

    /// Failed upstream calls since the last reset
    error_count: u32,
}

impl Token {
    /// Create a new active token
    pub fn new(key: impl Into<String>, priority: usize) -> Self {
        Self {
            key: key.into(),
            active: true,
            priority,
            last_used: None,
            usage_count: 0,
            error_count: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        self.last_used
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn redacted(&self) -> String {
        redact_key(&self.key)
    }
}

/// A token handed out by [`TokenPool::acquire`]
///
/// Carries the credential for the upstream call and identifies the pool entry
/// the outcome is reported against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLease {
    index: usize,
    key: String,
    priority: usize,
}

impl TokenLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn redacted(&self) -> String {
        redact_key(&self.key)
    }
}

/// Redacted view of a token, safe to persist or expose
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub key_prefix: String,
    pub active: bool,
    pub usage_count: u64,
    pub error_count: u32,
    pub priority: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&Token> for TokenStatus {
    fn from(token: &Token) -> Self {
        Self {
            key_prefix: token.redacted(),
            active: token.active,
            usage_count: token.usage_count,
            error_count: token.error_count,
            priority: token.priority,
            last_used: token.last_used,
        }
    }
}

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Priorities of tokens deactivated on this pass
    pub deactivated: Vec<usize>,

    /// Whether the pass found no active token and reset the whole pool
    pub reactivated_all: bool,
}

/// Parse credentials, one per line
///
/// Blank lines and lines starting with `#` are skipped; priority is the
/// 1-based physical line number.
pub fn parse_credentials(content: &str) -> Vec<Token> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let key = line.trim();
            if key.is_empty() || key.starts_with('#') {
                None
            } else {
                Some(Token::new(key, i + 1))
            }
        })
        .collect()
}

/// Load credentials from the first source that yields any
pub fn load_credentials(sources: &[PathBuf]) -> Result<Vec<Token>> {
    for path in sources {
        if !path.exists() {
            warn!(path = %path.display(), "credential file does not exist");
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let tokens = parse_credentials(&content);
                if tokens.is_empty() {
                    warn!(path = %path.display(), "credential file holds no credentials");
                    continue;
                }
                info!(path = %path.display(), count = tokens.len(), "loaded credentials");
                return Ok(tokens);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read credential file");
            }
        }
    }

    Err(ProxyError::NoCredentialsFound {
        searched: sources.to_vec(),
    })
}

#[derive(Debug)]
struct PoolState {
    tokens: Vec<Token>,
    cursor: usize,
}

/// Pool of upstream credentials with round-robin rotation
#[derive(Debug)]
pub struct TokenPool {
    state: Mutex<PoolState>,
    error_threshold: u32,
}

impl TokenPool {
    /// Create a pool from raw keys, in priority order
    pub fn new(keys: Vec<String>) -> Self {
        Self::from_tokens(
            keys.into_iter()
                .enumerate()
                .map(|(i, key)| Token::new(key, i + 1))
                .collect(),
        )
    }

    /// Create a pool from already-parsed tokens
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self {
            state: Mutex::new(PoolState { tokens, cursor: 0 }),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    /// Load a pool from credential files in priority order
    ///
    /// Finding nothing is reported, not fatal: the pool starts empty and every
    /// acquisition fails until configuration is fixed.
    pub fn load(sources: &[PathBuf]) -> Self {
        match load_credentials(sources) {
            Ok(tokens) => Self::from_tokens(tokens),
            Err(e) => {
                error!(error = %e, "starting with an empty token pool");
                Self::from_tokens(Vec::new())
            }
        }
    }

    /// Override the deactivation threshold
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn len(&self) -> usize {
        self.state.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tokens.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().tokens.iter().filter(|t| t.active).count()
    }

    /// Hand out the next active token
    ///
    /// The cursor is taken modulo the number of tokens active *now*, so strict
    /// round-robin only holds while the active set is stable.
    pub fn acquire(&self) -> Result<TokenLease> {
        let mut state = self.state.lock();

        let active: Vec<usize> = state
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.active)
            .map(|(i, _)| i)
            .collect();

        if active.is_empty() {
            return Err(ProxyError::NoActiveToken);
        }

        let index = active[state.cursor % active.len()];
        state.cursor = (state.cursor + 1) % active.len();

        let token = &mut state.tokens[index];
        token.last_used = Some(Utc::now());
        token.usage_count += 1;

        Ok(TokenLease {
            index,
            key: token.key.clone(),
            priority: token.priority,
        })
    }

    /// Record the outcome of an upstream call made with `lease`
    ///
    /// Failures only bump the error counter; deactivation is left to
    /// [`TokenPool::reconcile`].
    pub fn report_outcome(&self, lease: &TokenLease, success: bool) {
        let mut state = self.state.lock();
        let Some(token) = state
            .tokens
            .get_mut(lease.index)
            .filter(|t| t.key == lease.key)
        else {
            return;
        };

        if !success {
            token.error_count = token.error_count.saturating_add(1);
            debug!(
                key = %token.redacted(),
                errors = token.error_count,
                "recorded token failure"
            );
        }
    }

    /// Deactivate error-prone tokens; if none remain active, reset them all
    pub fn reconcile(&self) -> ReconcileReport {
        let mut state = self.state.lock();
        let mut report = ReconcileReport::default();

        for token in state.tokens.iter_mut() {
            if token.error_count > self.error_threshold && token.active {
                token.active = false;
                warn!(
                    key = %token.redacted(),
                    errors = token.error_count,
                    "token deactivated after repeated errors"
                );
                report.deactivated.push(token.priority);
            }
        }

        if !state.tokens.is_empty() && !state.tokens.iter().any(|t| t.active) {
            warn!(count = state.tokens.len(), "all tokens inactive, reactivating them");
            for token in state.tokens.iter_mut() {
                token.active = true;
                token.error_count = 0;
            }
            report.reactivated_all = true;
        }

        report
    }

    /// Copy of every token, in priority order
    pub fn tokens(&self) -> Vec<Token> {
        self.state.lock().tokens.clone()
    }

    /// Redacted status of every token
    pub fn statuses(&self) -> Vec<TokenStatus> {
        self.state.lock().tokens.iter().map(TokenStatus::from).collect()
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> TokenPoolStats {
        let state = self.state.lock();
        let total = state.tokens.len();
        let active = state.tokens.iter().filter(|t| t.active).count();
        let total_usage: u64 = state.tokens.iter().map(|t| t.usage_count).sum();

        TokenPoolStats {
            total,
            active,
            inactive: total - active,
            total_usage,
        }
    }
}

/// Statistics about a token pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenPoolStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub total_usage: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pool(keys: &[&str]) -> TokenPool {
        TokenPool::new(keys.iter().map(|k| k.to_string()).collect())
    }

    fn fail(pool: &TokenPool, lease: &TokenLease, times: usize) {
        for _ in 0..times {
            pool.report_outcome(lease, false);
        }
    }

    #[test]
    fn test_parse_credentials_skips_blank_and_comments() {
        let tokens = parse_credentials("# header\nAAA\n\n  BBB  \n#CCC\nDDD\n");
        let keys: Vec<_> = tokens.iter().map(|t| t.key()).collect();
        let priorities: Vec<_> = tokens.iter().map(|t| t.priority()).collect();

        assert_eq!(keys, vec!["AAA", "BBB", "DDD"]);
        assert_eq!(priorities, vec![2, 4, 6]);
        assert!(tokens.iter().all(|t| t.is_active()));
    }

    #[test]
    fn test_load_falls_back_to_secondary_source() {
        let mut primary = NamedTempFile::new().unwrap();
        writeln!(primary, "# nothing here\n\n").unwrap();
        let mut fallback = NamedTempFile::new().unwrap();
        writeln!(fallback, "key-one\nkey-two").unwrap();

        let tokens = load_credentials(&[
            PathBuf::from("/definitely/missing/tokens.txt"),
            primary.path().to_path_buf(),
            fallback.path().to_path_buf(),
        ])
        .unwrap();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].key(), "key-one");
    }

    #[test]
    fn test_load_without_credentials_gives_empty_pool() {
        let sources = vec![PathBuf::from("/definitely/missing/tokens.txt")];
        assert!(matches!(
            load_credentials(&sources),
            Err(ProxyError::NoCredentialsFound { .. })
        ));

        let pool = TokenPool::load(&sources);
        assert!(pool.is_empty());
        assert!(matches!(pool.acquire(), Err(ProxyError::NoActiveToken)));
    }

    #[test]
    fn test_round_robin_with_stable_set() {
        let pool = pool(&["A", "B", "C"]);

        let picked: Vec<String> = (0..7)
            .map(|_| pool.acquire().unwrap().key().to_string())
            .collect();

        assert_eq!(picked, vec!["A", "B", "C", "A", "B", "C", "A"]);
    }

    #[test]
    fn test_lease_carries_priority() {
        let pool = pool(&["A", "B"]);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        assert_eq!((first.key(), first.priority()), ("A", 1));
        assert_eq!((second.key(), second.priority()), ("B", 2));
    }

    #[test]
    fn test_acquire_stamps_usage() {
        let pool = pool(&["A", "B"]);
        let before = Utc::now();
        pool.acquire().unwrap();

        let tokens = pool.tokens();
        assert_eq!(tokens[0].usage_count(), 1);
        assert!(tokens[0].last_used().unwrap() >= before);
        assert_eq!(tokens[1].usage_count(), 0);
        assert!(tokens[1].last_used().is_none());
    }

    #[test]
    fn test_failure_does_not_deactivate_synchronously() {
        let pool = pool(&["A"]);
        let lease = pool.acquire().unwrap();
        fail(&pool, &lease, 10);

        let token = &pool.tokens()[0];
        assert_eq!(token.error_count(), 10);
        assert!(token.is_active());
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_success_leaves_error_count() {
        let pool = pool(&["A"]);
        let lease = pool.acquire().unwrap();
        pool.report_outcome(&lease, false);
        pool.report_outcome(&lease, true);
        assert_eq!(pool.tokens()[0].error_count(), 1);
    }

    #[test]
    fn test_reconcile_deactivates_only_above_threshold() {
        let pool = pool(&["A", "B"]);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        fail(&pool, &a, 5);
        fail(&pool, &b, 6);

        // Not before the pass
        assert_eq!(pool.active_count(), 2);

        let report = pool.reconcile();
        assert_eq!(report.deactivated, vec![2]);
        assert!(!report.reactivated_all);

        let tokens = pool.tokens();
        assert!(tokens[0].is_active());
        assert!(!tokens[1].is_active());

        // A second pass logs nothing new
        assert_eq!(pool.reconcile(), ReconcileReport::default());
    }

    #[test]
    fn test_reconcile_resets_when_everything_is_inactive() {
        let pool = pool(&["A", "B"]);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        fail(&pool, &a, 6);
        fail(&pool, &b, 7);

        let report = pool.reconcile();
        assert_eq!(report.deactivated, vec![1, 2]);
        assert!(report.reactivated_all);

        for token in pool.tokens() {
            assert!(token.is_active());
            assert_eq!(token.error_count(), 0);
        }
    }

    #[test]
    fn test_reconcile_on_empty_pool_is_noop() {
        let pool = TokenPool::from_tokens(Vec::new());
        assert_eq!(pool.reconcile(), ReconcileReport::default());
    }

    #[test]
    fn test_custom_threshold() {
        let pool = pool(&["A", "B"]).with_error_threshold(1);
        let a = pool.acquire().unwrap();
        fail(&pool, &a, 2);
        assert_eq!(pool.reconcile().deactivated, vec![1]);
    }

    #[test]
    fn test_cursor_uses_current_active_count() {
        // Observed behaviour: the cursor is reduced modulo the *current* active
        // count, so shrinking the set can restart the cycle at the front.
        let pool = pool(&["A", "B", "C"]);
        pool.acquire().unwrap(); // A, cursor -> 1
        let b = pool.acquire().unwrap(); // B, cursor -> 2
        fail(&pool, &b, 6);
        pool.reconcile();

        // Active set is [A, C]; cursor 2 % 2 == 0 picks A rather than C.
        assert_eq!(pool.acquire().unwrap().key(), "A");
        assert_eq!(pool.acquire().unwrap().key(), "C");
        assert_eq!(pool.acquire().unwrap().key(), "A");
    }

    #[test]
    fn test_statuses_are_redacted() {
        let pool = pool(&["AIzaSyD-0123456789abcdef"]);
        let statuses = pool.statuses();
        assert_eq!(statuses[0].key_prefix, "AIzaSyD-01...");
        let json = serde_json::to_string(&statuses).unwrap();
        assert!(!json.contains("0123456789abcdef"));
    }

    #[test]
    fn test_stats() {
        let pool = pool(&["A", "B", "C"]);
        let a = pool.acquire().unwrap();
        pool.acquire().unwrap();
        pool.acquire().unwrap();
        fail(&pool, &a, 6);
        pool.reconcile();

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.total_usage, 3);
    }

    #[test]
    fn test_stale_lease_is_ignored() {
        let pool = pool(&["A"]);
        let other = TokenPool::new(vec!["Z".to_string()]);
        let foreign = other.acquire().unwrap();
        pool.report_outcome(&foreign, false);
        assert_eq!(pool.tokens()[0].error_count(), 0);
    }
}
