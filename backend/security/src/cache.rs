//! Anonymization cache.
//!
//! Forward map: real identifier → anonymous token.
//! Reverse map: anonymous token → original `{name, email}`.
//!
//! Both maps (plus the token ownership index used for collision checks) live
//! behind a single lock so that inserts are atomic per key and `clear` can
//! never leave one map populated while the other is empty.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hmac::{Hmac, Mac};
use lmsguard_config::PrivacyConfig;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the display form of a token.
pub const TOKEN_PREFIX: &str = "Student_";

/// Width of the opaque hex suffix.
pub const TOKEN_SUFFIX_LEN: usize = 8;

/// Suffix width used once every short derivation for an id is taken.
pub const EXTENDED_SUFFIX_LEN: usize = 16;

/// Domain used for synthetic e-mail addresses. `.invalid` never resolves.
pub const PLACEHOLDER_DOMAIN: &str = "anon.invalid";

// Bounded so a broken digest can never spin forever.
const MAX_DERIVATION_ATTEMPTS: u32 = 64;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Canonical form of a real identifier. `123` and `"123"` are the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RealId(String);

impl RealId {
    /// Canonicalise a JSON identifier. Integers, integral floats and
    /// non-blank strings are accepted; anything else yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Some(Self(u.to_string()))
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| Self(format!("{f:.0}")))
                }
            }
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Canonicalise a textual identifier; numeric strings lose leading zeros
    /// only if they parse as integers.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<i64>() {
            Ok(i) => Some(Self(i.to_string())),
            Err(_) => Some(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for RealId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for RealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Original identity data kept in the reverse map. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OriginalIdentity {
    pub name: String,
    pub email: String,
}

impl OriginalIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.email.trim().is_empty()
    }
}

/// Synthetic e-mail for a token: `Student_ab12cd34` → `student_ab12cd34@anon.invalid`.
pub fn synthetic_email(token: &str) -> String {
    format!("{}@{PLACEHOLDER_DOMAIN}", token.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub forward: usize,
    pub reverse: usize,
}

#[derive(Default)]
struct CacheState {
    forward: HashMap<RealId, String>,
    reverse: HashMap<String, OriginalIdentity>,
    owners: HashMap<String, RealId>,
}

pub struct AnonymizationCache {
    key: [u8; 32],
    persistent_key: bool,
    state: RwLock<CacheState>,
}

impl Default for AnonymizationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnonymizationCache {
    /// Session-only cache: tokens are derived from a random key drawn now.
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self {
            key,
            persistent_key: false,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Cache whose tokens are stable across restarts for the same secret.
    pub fn with_secret(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self {
            key,
            persistent_key: true,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn from_config(config: &PrivacyConfig) -> Self {
        match config.anonymization_key.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Self::with_secret(secret),
            _ => {
                debug!("[Anonymization] No key configured; tokens are session-only");
                Self::new()
            }
        }
    }

    pub fn has_persistent_key(&self) -> bool {
        self.persistent_key
    }

    /// Token for `id`, created on first use and stable afterwards.
    pub fn generate_anonymous_id(&self, id: &RealId) -> String {
        if let Some(token) = self.read().forward.get(id) {
            return token.clone();
        }
        let mut state = self.write();
        self.assign_token(&mut state, id)
    }

    /// Token for `id` plus the reverse entry, in one critical section.
    /// Blank identities get a token but no reverse entry.
    pub fn anonymize_identity(&self, id: &RealId, original: OriginalIdentity) -> String {
        let mut state = self.write();
        let token = self.assign_token(&mut state, id);
        Self::merge_original(&mut state, &token, original);
        token
    }

    /// Record original data for an already issued token. Entries whose name
    /// and email are both blank are not stored.
    pub fn store_original(&self, token: &str, original: OriginalIdentity) -> bool {
        let mut state = self.write();
        if !state.owners.contains_key(token) {
            warn!("[Anonymization] Refusing reverse entry for unknown token");
            return false;
        }
        Self::merge_original(&mut state, token, original)
    }

    /// Original data behind a token, if any was recorded.
    pub fn lookup(&self, token: &str) -> Option<OriginalIdentity> {
        self.read().reverse.get(token).cloned()
    }

    /// Token previously issued for `id`, without creating one.
    pub fn token_for(&self, id: &RealId) -> Option<String> {
        self.read().forward.get(id).cloned()
    }

    /// Drop every mapping at once.
    pub fn clear(&self) {
        let mut state = self.write();
        *state = CacheState::default();
        debug!("[Anonymization] Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            forward: state.forward.len(),
            reverse: state.reverse.len(),
        }
    }

    fn assign_token(&self, state: &mut CacheState, id: &RealId) -> String {
        if let Some(token) = state.forward.get(id) {
            return token.clone();
        }

        let token = match self.free_derivation(state, id, TOKEN_SUFFIX_LEN) {
            Some(token) => token,
            None => {
                warn!("[Anonymization] Short token space exhausted for an id; using a longer suffix");
                self.free_derivation(state, id, EXTENDED_SUFFIX_LEN)
                    .unwrap_or_else(|| Self::sequential_token(state))
            }
        };

        state.owners.insert(token.clone(), id.clone());
        state.forward.insert(id.clone(), token.clone());
        token
    }

    /// First derivation for `id` not already owned by another id.
    fn free_derivation(&self, state: &CacheState, id: &RealId, len: usize) -> Option<String> {
        (0..MAX_DERIVATION_ATTEMPTS)
            .map(|attempt| self.derive(id, attempt, len))
            .find(|token| match state.owners.get(token) {
                Some(owner) if owner != id => {
                    debug!("[Anonymization] Token collision; re-deriving");
                    false
                }
                _ => true,
            })
    }

    // Last resort when even the long derivations collide. Always terminates
    // because the owner index is finite.
    fn sequential_token(state: &CacheState) -> String {
        let mut n = state.owners.len() as u64;
        loop {
            let token = format!("{TOKEN_PREFIX}{n:0width$x}", width = EXTENDED_SUFFIX_LEN);
            if !state.owners.contains_key(&token) {
                return token;
            }
            n += 1;
        }
    }

    fn merge_original(state: &mut CacheState, token: &str, original: OriginalIdentity) -> bool {
        if original.is_blank() {
            return false;
        }
        let entry = state.reverse.entry(token.to_string()).or_default();
        if !original.name.trim().is_empty() {
            entry.name = original.name;
        }
        if !original.email.trim().is_empty() {
            entry.email = original.email;
        }
        true
    }

    fn derive(&self, id: &RealId, attempt: u32, len: usize) -> String {
        let input = if attempt == 0 {
            id.as_str().to_string()
        } else {
            format!("{}#{attempt}", id.as_str())
        };
        let digest = match HmacSha256::new_from_slice(&self.key) {
            Ok(mut mac) => {
                mac.update(input.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            // HMAC takes keys of any length.
            Err(_) => hex::encode(Sha256::new().chain_update(self.key).chain_update(&input).finalize()),
        };
        format!("{TOKEN_PREFIX}{}", &digest[..len])
    }

    /// Give every short derivation of `id` to `owner`.
    #[cfg(test)]
    pub(crate) fn squat_short_tokens(&self, id: &RealId, owner: &RealId) -> Vec<String> {
        let mut state = self.write();
        (0..MAX_DERIVATION_ATTEMPTS)
            .map(|attempt| {
                let token = self.derive(id, attempt, TOKEN_SUFFIX_LEN);
                state.owners.insert(token.clone(), owner.clone());
                token
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
