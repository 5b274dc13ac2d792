use std::fmt;
use std::time::Duration;

/// Identifies one live client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Interval between two snapshots of the same container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence(Duration);

impl Cadence {
    pub const DEFAULT_MILLIS: u64 = 2000;

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Resolve a client supplied interval; absent or zero falls back to `default`
    pub fn requested(millis: Option<u64>, default: Cadence) -> Self {
        match millis {
            Some(0) | None => default,
            Some(ms) => Self::from_millis(ms),
        }
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::from_millis(Self::DEFAULT_MILLIS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_cadence_falls_back_on_missing_or_zero() {
        let default = Cadence::default();
        assert_eq!(Cadence::requested(None, default), default);
        assert_eq!(Cadence::requested(Some(0), default), default);
        assert_eq!(Cadence::requested(Some(500), default).as_millis(), 500);
    }
}
