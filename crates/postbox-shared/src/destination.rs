//! Destination classification for the compose path.
//!
//! A destination string either names a single user or a group. The default
//! policy is deliberately coarse: anything containing an address separator is
//! treated as a user, everything else as a group name. Swap in another
//! [`DestinationPolicy`] once a real directory lookup exists.

use serde::{Deserialize, Serialize};

use crate::constants::ADDRESS_SEPARATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Individual,
    Group,
}

impl Destination {
    /// Classify with the default address-separator policy.
    pub fn classify(destination: &str) -> Self {
        if destination.contains(ADDRESS_SEPARATOR) {
            Self::Individual
        } else {
            Self::Group
        }
    }

    pub fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }
}

/// Pluggable classification seam consulted by the send path.
pub trait DestinationPolicy: Send + Sync {
    fn classify(&self, destination: &str) -> Destination;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressSeparatorPolicy;

impl DestinationPolicy for AddressSeparatorPolicy {
    fn classify(&self, destination: &str) -> Destination {
        Destination::classify(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_individual() {
        assert_eq!(Destination::classify("user2@domain.com"), Destination::Individual);
        assert_eq!(Destination::classify("@"), Destination::Individual);
    }

    #[test]
    fn test_bare_name_is_group() {
        assert_eq!(Destination::classify("python"), Destination::Group);
        assert_eq!(Destination::classify("all"), Destination::Group);
        assert!(Destination::classify("").is_group());
    }

    #[test]
    fn test_policy_matches_default() {
        let policy = AddressSeparatorPolicy;
        assert_eq!(policy.classify("a@b"), Destination::Individual);
        assert_eq!(policy.classify("java"), Destination::Group);
    }
}
