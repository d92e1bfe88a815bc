//! Utility functions

use std::time::Duration;

/// Generate a time-based attempt identifier, unique per invocation.
///
/// Sorts lexicographically by creation time so attempt logs and backups
/// can be ordered by filename alone.
pub fn generate_attempt_id(now: chrono::DateTime<chrono::Utc>) -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &short[..8])
}

/// Calculate SHA256 hash of data
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Backoff options for bounded retry loops
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    pub base_delay: Duration,
    pub linear: bool,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            linear: false,
        }
    }
}

/// Calculate the delay before the given retry attempt (0-based).
///
/// Fixed backoff by default; linear backoff grows the base delay by the
/// attempt number.
pub fn calc_backoff(options: &BackoffOptions, attempt: u32) -> Duration {
    if options.linear {
        options.base_delay * (attempt + 1)
    } else {
        options.base_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_id_ordering() {
        let earlier = generate_attempt_id(chrono::Utc::now());
        let later = generate_attempt_id(chrono::Utc::now() + chrono::Duration::seconds(2));
        assert!(earlier < later);
    }

    #[test]
    fn test_backoff_fixed_and_linear() {
        let fixed = BackoffOptions {
            base_delay: Duration::from_secs(10),
            linear: false,
        };
        assert_eq!(calc_backoff(&fixed, 0), Duration::from_secs(10));
        assert_eq!(calc_backoff(&fixed, 4), Duration::from_secs(10));

        let linear = BackoffOptions {
            base_delay: Duration::from_secs(5),
            linear: true,
        };
        assert_eq!(calc_backoff(&linear, 0), Duration::from_secs(5));
        assert_eq!(calc_backoff(&linear, 2), Duration::from_secs(15));
    }
}
