//! Validated domain primitives shared across every component.
//!
//! Every scalar that has a meaningful range or format is a `nutype` newtype
//! rather than a bare `u32`/`String`, so an out-of-range value is rejected at
//! the boundary instead of being re-checked at each call site.

use nutype::nutype;
use uuid::Uuid;

/// Identifies a single agent, local or remote.
#[nutype(
    derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display),
    default = "00000000-0000-0000-0000-000000000000"
)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// The reserved identifier used for system-originated messages.
    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }
}

/// A human-readable agent name: non-empty, at most 128 bytes.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct AgentName(String);

/// A capability tag used by peer discovery and the directory collaborator.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 64),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct CapabilityName(String);

/// A 128-bit correlation identifier rendered as 32 lowercase hex characters.
#[nutype(
    validate(len_char_min = 32, len_char_max = 32, predicate = |s| s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct TraceId(String);

/// A free-form content payload for a peer-channel or guarded message.
///
/// Non-empty and capped at 10MB, matching the bound the host platform places
/// on agent message content.
#[nutype(
    validate(predicate = |bytes: &Vec<u8>| !bytes.is_empty() && bytes.len() <= 10 * 1024 * 1024),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)
)]
pub struct MessageContent(Vec<u8>);

/// Consecutive-failure threshold before a circuit breaker opens.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    default = 5,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct FailureThreshold(u32);

/// Consecutive-success threshold before a half-open breaker closes.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    default = 2,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct SuccessThreshold(u32);

/// Milliseconds a breaker stays `OPEN` before admitting a probe.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400_000),
    default = 30_000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct ResetTimeoutMs(u64);

/// Maximum admissions allowed for one sender within one rate-limit window.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 10,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct RateLimitCount(u32);

/// Width, in milliseconds, of a sliding rate-limit window.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400_000),
    default = 60_000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct RateLimitWindowMs(u64);

/// Capacity of a peer channel's ring history buffer.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 256,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct HistorySize(usize);

/// Token-bucket capacity for a peer channel's send path.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 20,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct MaxTokens(u32);

/// Token-bucket refill rate, tokens per second.
#[nutype(
    validate(greater_or_equal = 0.01, less_or_equal = 1_000_000.0),
    default = 1.0,
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)
)]
pub struct RefillRate(f64);

/// Consecutive missed pings before a channel is declared unhealthy.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    default = 3,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct MaxMissedPings(u32);

/// A trust score in `[0, 1]` tracking how reliable a peer has been.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    default = 0.5,
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)
)]
pub struct TrustScore(f64);

impl TrustScore {
    /// Nudges the score upward after a successful delivery, capped at 1.0.
    #[must_use]
    pub fn bump(self, step: f64) -> Self {
        Self::new((self.into_inner() + step).min(1.0)).unwrap_or_default()
    }
}

/// A thread identifier grouping related messages for ordering purposes.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct ThreadId(String);

/// A repository slug (`owner/name`) a webhook registration is bound to.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct RepoSlug(String);

/// A mention handle, compared case-insensitively against comment bodies.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 64),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct MentionUser(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_generate_is_unique() {
        assert_ne!(AgentId::generate(), AgentId::generate());
    }

    #[test]
    fn agent_name_rejects_empty() {
        assert!(AgentName::try_new(String::new()).is_err());
        assert!(AgentName::try_new("  ".to_string()).is_err());
    }

    #[test]
    fn trust_score_bump_caps_at_one() {
        let score = TrustScore::try_new(0.95).unwrap();
        assert!((score.bump(0.5).into_inner() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn message_content_rejects_empty_and_oversized() {
        assert!(MessageContent::try_new(Vec::new()).is_err());
        assert!(MessageContent::try_new(vec![0u8; 11 * 1024 * 1024]).is_err());
        assert!(MessageContent::try_new(vec![0u8; 16]).is_ok());
    }

    #[test]
    fn trace_id_requires_lowercase_hex_32() {
        assert!(TraceId::try_new("a".repeat(32)).is_ok());
        assert!(TraceId::try_new("A".repeat(32)).is_err());
        assert!(TraceId::try_new("a".repeat(31)).is_err());
    }
}
