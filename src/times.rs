//! Call-count quantifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubstituteError};
use crate::matcher::RangeKind;

/// Closed range `[min, max]` of acceptable call counts; `max = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Times {
    min: usize,
    max: Option<usize>,
}

impl Times {
    pub fn never() -> Self {
        Self::exactly(0)
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }

    pub fn at_most_once() -> Self {
        Self::at_most(1)
    }

    pub fn at_least_once() -> Self {
        Self::at_least(1)
    }

    pub fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    pub fn at_most(n: usize) -> Self {
        Self { min: 0, max: Some(n) }
    }

    pub fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    /// An exclusive range drops both endpoints.
    ///
    /// Fails when `a > b` or when an exclusive range leaves no count between them.
    pub fn between(a: usize, b: usize, kind: RangeKind) -> Result<Self> {
        let invalid = |reason: &str| SubstituteError::InvalidTimes {
            range: match kind {
                RangeKind::Inclusive => format!("[{}, {}]", a, b),
                RangeKind::Exclusive => format!("({}, {})", a, b),
            },
            reason: reason.to_string(),
        };
        if a > b {
            return Err(invalid("lower bound exceeds upper bound"));
        }
        match kind {
            RangeKind::Inclusive => Ok(Self { min: a, max: Some(b) }),
            RangeKind::Exclusive => match a.checked_add(1) {
                Some(min) if min < b => Ok(Self { min, max: Some(b - 1) }),
                _ => Err(invalid("no count lies strictly between the bounds")),
            },
        }
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn verify(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::at_least_once()
    }
}

impl fmt::Display for Times {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (0, Some(0)) => write!(f, "never"),
            (1, Some(1)) => write!(f, "exactly once"),
            (n, Some(m)) if n == m => write!(f, "exactly {} times", n),
            (0, Some(m)) => write!(f, "at most {} times", m),
            (n, None) => write!(f, "at least {} times", n),
            (n, Some(m)) => write!(f, "between {} and {} times (inclusive)", n, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_hold_for_every_constructor() {
        let cases = [
            Times::never(),
            Times::once(),
            Times::at_most_once(),
            Times::at_least(2),
            Times::at_most(3),
            Times::exactly(4),
            Times::between(1, 3, RangeKind::Inclusive).unwrap(),
            Times::between(1, 5, RangeKind::Exclusive).unwrap(),
        ];
        for times in cases {
            assert!(times.verify(times.min()), "{} accepts min", times);
            if times.min() > 0 {
                assert!(!times.verify(times.min() - 1), "{} rejects min-1", times);
            }
            if let Some(max) = times.max() {
                assert!(times.verify(max), "{} accepts max", times);
                assert!(!times.verify(max + 1), "{} rejects max+1", times);
            } else {
                assert!(times.verify(usize::MAX));
            }
        }
    }

    #[test]
    fn test_exclusive_between_drops_endpoints() {
        let t = Times::between(1, 4, RangeKind::Exclusive).unwrap();
        assert_eq!((t.min(), t.max()), (2, Some(3)));
    }

    #[test]
    fn test_empty_or_inverted_ranges_are_rejected() {
        let empty = Times::between(1, 2, RangeKind::Exclusive).unwrap_err();
        assert!(matches!(empty, SubstituteError::InvalidTimes { ref range, .. } if range == "(1, 2)"));
        assert!(Times::between(3, 1, RangeKind::Inclusive).is_err());
        assert!(Times::between(usize::MAX, usize::MAX, RangeKind::Exclusive).is_err());
        assert_eq!(Times::between(5, 5, RangeKind::Inclusive).unwrap(), Times::exactly(5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Times::once().to_string(), "exactly once");
        assert_eq!(Times::at_least(2).to_string(), "at least 2 times");
        assert_eq!(Times::never().to_string(), "never");
    }
}
