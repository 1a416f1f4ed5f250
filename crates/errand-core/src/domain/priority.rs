use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling priority. Lower value = more urgent.
///
/// The three named levels cover what callers use day to day; any other
/// value is accepted and slots in numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HIGH => f.write_str("high"),
            Self::MEDIUM => f.write_str("medium"),
            Self::LOW => f.write_str("low"),
            Self(other) => write!(f, "p{other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_levels_sort_most_urgent_first() {
        let mut levels = vec![Priority::LOW, Priority::HIGH, Priority::MEDIUM];
        levels.sort();
        assert_eq!(levels, vec![Priority::HIGH, Priority::MEDIUM, Priority::LOW]);
    }

    #[test]
    fn default_is_medium() {
        assert_eq!(Priority::default(), Priority::MEDIUM);
    }

    #[test]
    fn display_names_known_levels() {
        assert_eq!(Priority::HIGH.to_string(), "high");
        assert_eq!(Priority::new(7).to_string(), "p7");
    }
}
