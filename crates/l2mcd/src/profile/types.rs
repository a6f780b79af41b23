//! Channel-profile rule types.

use mcast_types::{AddrRange, GroupAddr, IpFamily};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action of a profile rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Permit,
    Deny,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Permit => write!(f, "permit"),
            RuleAction::Deny => write!(f, "deny"),
        }
    }
}

/// One ordered profile rule: an address range plus a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRule {
    pub range: AddrRange,
    pub action: RuleAction,
}

impl ProfileRule {
    pub fn permit(range: AddrRange) -> Self {
        Self {
            range,
            action: RuleAction::Permit,
        }
    }

    pub fn deny(range: AddrRange) -> Self {
        Self {
            range,
            action: RuleAction::Deny,
        }
    }
}

/// A named, ordered permit/deny rule list restricting which groups a VLAN
/// instance may register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub rules: Vec<ProfileRule>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: ProfileRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Packet-path admission check: linear ordered scan, first matching rule
    /// wins, default deny.
    pub fn permit(&self, group: GroupAddr) -> bool {
        for rule in &self.rules {
            if rule.range.contains(group) {
                return rule.action == RuleAction::Permit;
            }
        }
        false
    }

    pub fn has_family_rule(&self, family: IpFamily) -> bool {
        self.rules.iter().any(|r| r.range.family() == family)
    }

    pub fn has_permit_rule(&self, family: IpFamily) -> bool {
        self.rules
            .iter()
            .any(|r| r.action == RuleAction::Permit && r.range.family() == family)
    }

    /// Permit ranges for one family, for cross-instance overlap checks.
    pub fn permit_ranges(&self, family: IpFamily) -> Vec<AddrRange> {
        self.rules
            .iter()
            .filter(|r| r.action == RuleAction::Permit && r.range.family() == family)
            .map(|r| r.range)
            .collect()
    }

    /// Indices of permit rules shadowed by an earlier deny rule. A fully
    /// covered permit can never match; a partial overlap silently narrows
    /// the permitted range. Neither is an error; both are surfaced as the
    /// unreachable-permit warning.
    pub fn unreachable_permits(&self) -> Vec<usize> {
        let mut unreachable = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.action != RuleAction::Permit {
                continue;
            }
            let shadowed = self.rules[..i].iter().any(|earlier| {
                earlier.action == RuleAction::Deny && earlier.range.overlaps(&rule.range)
            });
            if shadowed {
                unreachable.push(i);
            }
        }
        unreachable
    }

    /// True if any permit range of `self` overlaps any permit range of
    /// `other` in the given family.
    pub fn permits_overlap(&self, other: &Profile, family: IpFamily) -> bool {
        let mine = self.permit_ranges(family);
        let theirs = other.permit_ranges(family);
        mine.iter().any(|a| theirs.iter().any(|b| a.overlaps(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(addr: &str, len: u8) -> AddrRange {
        AddrRange::from_prefix(addr.parse().unwrap(), len).unwrap()
    }

    fn group(s: &str) -> GroupAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        // deny 224.0.0.0/24 before permit 224.0.0.0/8: the deny shadows the
        // narrow range even though a broader permit follows.
        let profile = Profile::new("tv")
            .with_rule(ProfileRule::deny(prefix("224.0.0.0", 24)))
            .with_rule(ProfileRule::permit(prefix("224.0.0.0", 8)));

        assert!(!profile.permit(group("224.0.0.5")));
        assert!(profile.permit(group("224.0.1.5")));
    }

    #[test]
    fn test_default_deny() {
        let profile = Profile::new("empty");
        assert!(!profile.permit(group("239.1.1.1")));

        let profile = Profile::new("narrow").with_rule(ProfileRule::permit(prefix("232.0.0.0", 8)));
        assert!(!profile.permit(group("239.1.1.1")));
    }

    #[test]
    fn test_unreachable_permit_detection() {
        let profile = Profile::new("tv")
            .with_rule(ProfileRule::deny(prefix("224.0.0.0", 8)))
            .with_rule(ProfileRule::permit(prefix("224.0.0.0", 24)))
            .with_rule(ProfileRule::permit(prefix("232.0.0.0", 8)));

        assert_eq!(profile.unreachable_permits(), vec![1]);
    }

    #[test]
    fn test_partially_shadowed_permit_is_flagged() {
        let profile = Profile::new("tv")
            .with_rule(ProfileRule::deny(prefix("224.0.0.0", 24)))
            .with_rule(ProfileRule::permit(prefix("224.0.0.0", 8)));
        assert_eq!(profile.unreachable_permits(), vec![1]);
    }

    #[test]
    fn test_disjoint_deny_does_not_flag() {
        let profile = Profile::new("tv")
            .with_rule(ProfileRule::deny(prefix("224.0.0.0", 24)))
            .with_rule(ProfileRule::permit(prefix("232.0.0.0", 8)));
        assert!(profile.unreachable_permits().is_empty());
    }

    #[test]
    fn test_family_checks() {
        let profile = Profile::new("v6only").with_rule(ProfileRule::permit(prefix("ff05::", 16)));
        assert!(profile.has_family_rule(IpFamily::Ipv6));
        assert!(profile.has_permit_rule(IpFamily::Ipv6));
        assert!(!profile.has_family_rule(IpFamily::Ipv4));
        assert!(!profile.has_permit_rule(IpFamily::Ipv4));
    }

    #[test]
    fn test_permit_overlap() {
        let a = Profile::new("a").with_rule(ProfileRule::permit(prefix("239.0.0.0", 8)));
        let b = Profile::new("b").with_rule(ProfileRule::permit(prefix("239.1.0.0", 16)));
        let c = Profile::new("c").with_rule(ProfileRule::permit(prefix("232.0.0.0", 8)));

        assert!(a.permits_overlap(&b, IpFamily::Ipv4));
        assert!(!a.permits_overlap(&c, IpFamily::Ipv4));
        // Deny rules never contribute to overlap.
        let d = Profile::new("d").with_rule(ProfileRule::deny(prefix("239.0.0.0", 8)));
        assert!(!a.permits_overlap(&d, IpFamily::Ipv4));
    }
}
