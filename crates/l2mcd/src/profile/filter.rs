//! The profile table and its admission checks.

use super::types::Profile;
use crate::error::{L2mcError, Result};
use log::info;
use std::collections::BTreeMap;

/// Named filtering profiles, shared by all VLAN instances.
#[derive(Debug, Default)]
pub struct ProfileTable {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces a profile.
    pub fn set(&mut self, profile: Profile) -> Result<()> {
        if profile.name.is_empty() {
            return Err(L2mcError::Validation("profile name must not be empty".into()));
        }
        info!(
            "profile {} installed with {} rule(s)",
            profile.name,
            profile.rules.len()
        );
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Profile> {
        self.profiles
            .remove(name)
            .ok_or_else(|| L2mcError::NotFound(format!("profile {}", name)))
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Profile)> {
        self.profiles.iter()
    }
}
