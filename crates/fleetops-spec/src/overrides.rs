//! Override instructions applied by the spec mutator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Entry key that, inside a log driver's override map, removes the driver.
pub const DRIVER_KNOCKOUT_KEY: &str = "";

/// Role value that clears the task role on the command line.
pub const ROLE_KNOCKOUT: &str = "None";

/// What to do with one keyed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Override {
    /// Overwrite the entry, or append it when missing.
    Set(String),
    /// Remove the entry if present.
    Delete,
}

impl Override {
    /// Command-line form: an empty value means delete.
    pub fn from_flag(value: &str) -> Self {
        if value.is_empty() {
            Self::Delete
        } else {
            Self::Set(value.to_string())
        }
    }
}

/// Entry key → override.
pub type EntryOverrides = BTreeMap<String, Override>;

/// Log driver → entry overrides for that driver.
pub type DriverOverrides = BTreeMap<String, EntryOverrides>;

/// Task-role instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleOverride {
    #[default]
    Keep,
    Clear,
    Set(String),
}

impl RoleOverride {
    /// Command-line form: empty keeps, [`ROLE_KNOCKOUT`] clears.
    pub fn from_flag(value: &str) -> Self {
        match value {
            "" => Self::Keep,
            ROLE_KNOCKOUT => Self::Clear,
            role => Self::Set(role.to_string()),
        }
    }
}

/// All overrides for one mutation, keyed by container name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecOverrides {
    /// Container → image.
    pub images: BTreeMap<String, String>,
    /// Container → environment overrides.
    pub environment: BTreeMap<String, EntryOverrides>,
    /// Container → secret overrides.
    pub secrets: BTreeMap<String, EntryOverrides>,
    /// Container → driver → log option overrides.
    pub log_options: BTreeMap<String, DriverOverrides>,
    /// Container → driver → log secret-option overrides.
    pub log_secrets: BTreeMap<String, DriverOverrides>,
    pub task_role: RoleOverride,
}

impl SpecOverrides {
    /// Every container named by at least one override map.
    pub fn container_names(&self) -> BTreeSet<&String> {
        self.images
            .keys()
            .chain(self.environment.keys())
            .chain(self.secrets.keys())
            .chain(self.log_options.keys())
            .chain(self.log_secrets.keys())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values_map_to_overrides() {
        assert_eq!(Override::from_flag(""), Override::Delete);
        assert_eq!(Override::from_flag("v"), Override::Set("v".into()));
        assert_eq!(RoleOverride::from_flag(""), RoleOverride::Keep);
        assert_eq!(RoleOverride::from_flag("None"), RoleOverride::Clear);
        assert_eq!(
            RoleOverride::from_flag("arn:aws:iam::1:role/web"),
            RoleOverride::Set("arn:aws:iam::1:role/web".into())
        );
    }

    #[test]
    fn overrides_deserialize_from_json() {
        let overrides: SpecOverrides = serde_json::from_str(
            r#"{"environment":{"app":{"DEBUG":"delete","LEVEL":{"set":"info"}}}}"#,
        )
        .unwrap();
        let app = &overrides.environment["app"];
        assert_eq!(app["DEBUG"], Override::Delete);
        assert_eq!(app["LEVEL"], Override::Set("info".into()));
    }

    #[test]
    fn container_names_are_collected_once() {
        let mut overrides = SpecOverrides::default();
        overrides.images.insert("app".into(), "nginx:1".into());
        overrides.environment.insert("app".into(), EntryOverrides::new());
        overrides.log_secrets.insert("sidecar".into(), DriverOverrides::new());
        let names: Vec<_> = overrides.container_names().into_iter().cloned().collect();
        assert_eq!(names, vec!["app".to_string(), "sidecar".to_string()]);
    }
}
