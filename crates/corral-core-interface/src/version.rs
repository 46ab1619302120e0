use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version {0:?}")]
pub struct VersionError(pub String);

/// A controller agent version.
///
/// Ordering is lexicographic over `(major, minor, patch)`. The zero value is
/// what callers get when no version is known.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut nums = [0u32; 3];
        let mut parts = s.split('.');
        for slot in nums.iter_mut() {
            *slot = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| VersionError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(VersionError(s.to_string()));
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| s.parse::<Version>().unwrap();
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.9.9") < v("2.0.0"));
        assert!(v("2.1.0") > v("2.0.10"));
        assert_eq!(v("2.0.0").to_string(), "2.0.0");
    }

    #[test]
    fn test_version_zero_default() {
        assert!(Version::default().is_zero());
        assert!(!Version::new(0, 0, 1).is_zero());
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
    }
}
