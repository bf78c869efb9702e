use std::fmt;
use std::hash::Hasher;
use std::process;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use fnv::FnvHasher;
use serde::{Serialize, Deserialize};

static HOSTNAME: LazyLock<String> = LazyLock::new(|| gethostname::gethostname().to_string_lossy().into_owned());

// separates ids generated within the same microsecond
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 调用树关联 ID
/// 同一棵调用树上的所有任务共享同一个值，用于在日志中串联一次逻辑请求。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Builds a fresh id in the two-part hex layout expected by downstream trace tooling:
    /// the FNV-1a hash of `hostname + pid + epoch_seconds + micros` (plus a process-local
    /// sequence number), followed by a second hex-encoded microsecond sample.
    pub fn generate() -> Self {
        let now = epoch_now();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{}{}{}{}{}", *HOSTNAME, process::id(), now.as_secs(), now.subsec_micros(), sequence);

        let mut hasher = FnvHasher::default();
        hasher.write(seed.as_bytes());

        let entropy = epoch_now().subsec_micros();
        Self(format!("{:x}{:x}", hasher.finish(), entropy))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn epoch_now() -> Duration {
    // pre-epoch clocks read as zero
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
