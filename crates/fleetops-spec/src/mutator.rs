//! Spec mutator — pure transformation of a task spec.
//!
//! Each stage takes the previous spec by reference and returns a fresh
//! copy, so the original and every intermediate stage stay inspectable.
//! The final result is compared with the original to decide whether a
//! new revision has to be registered at all.

use fleetops_core::{EnvEntry, SecretEntry, TaskSpec};
use tracing::debug;

use crate::logsink::alter_log_sinks;
use crate::overrides::{EntryOverrides, Override, RoleOverride, SpecOverrides};

/// Apply every override to a copy of `original`.
pub fn mutate(original: &TaskSpec, overrides: &SpecOverrides) -> TaskSpec {
    let spec = alter_images(original, overrides);
    let spec = alter_environments(&spec, overrides);
    let spec = alter_secrets(&spec, overrides);
    let spec = alter_log_sinks(&spec, &overrides.log_options, &overrides.log_secrets);
    alter_task_role(&spec, &overrides.task_role)
}

/// Swap container images. Unknown container names are ignored.
pub fn alter_images(spec: &TaskSpec, overrides: &SpecOverrides) -> TaskSpec {
    let mut copy = spec.clone();
    for container in &mut copy.containers {
        if let Some(image) = overrides.images.get(&container.name) {
            debug!(container = %container.name, %image, "overriding image");
            container.image = image.clone();
        }
    }
    copy
}

pub fn alter_environments(spec: &TaskSpec, overrides: &SpecOverrides) -> TaskSpec {
    let mut copy = spec.clone();
    for container in &mut copy.containers {
        if let Some(env) = overrides.environment.get(&container.name) {
            apply_entries(&mut container.environment, env);
        }
    }
    copy
}

pub fn alter_secrets(spec: &TaskSpec, overrides: &SpecOverrides) -> TaskSpec {
    let mut copy = spec.clone();
    for container in &mut copy.containers {
        if let Some(secrets) = overrides.secrets.get(&container.name) {
            apply_entries(&mut container.secrets, secrets);
        }
    }
    copy
}

pub fn alter_task_role(spec: &TaskSpec, role: &RoleOverride) -> TaskSpec {
    let mut copy = spec.clone();
    match role {
        RoleOverride::Keep => {}
        RoleOverride::Clear => copy.task_role = None,
        RoleOverride::Set(arn) => copy.task_role = Some(arn.clone()),
    }
    copy
}

/// A named entry in an ordered, name-keyed collection.
pub(crate) trait NamedEntry {
    fn new(name: &str, value: &str) -> Self;
    fn name(&self) -> &str;
    fn set_value(&mut self, value: &str);
}

impl NamedEntry for EnvEntry {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }
}

impl NamedEntry for SecretEntry {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value_from: value.to_string(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_value(&mut self, value: &str) {
        self.value_from = value.to_string();
    }
}

/// Upsert-or-delete over an ordered collection.
///
/// Existing entries are updated in place; new ones are appended; deleting
/// a missing key does nothing.
pub(crate) fn apply_entries<E: NamedEntry>(entries: &mut Vec<E>, overrides: &EntryOverrides) {
    for (key, action) in overrides {
        match action {
            Override::Delete => entries.retain(|e| e.name() != key.as_str()),
            Override::Set(value) => {
                let mut found = false;
                for entry in entries.iter_mut().filter(|e| e.name() == key.as_str()) {
                    entry.set_value(value);
                    found = true;
                }
                if !found {
                    entries.push(E::new(key, value));
                }
            }
        }
    }
}

/// Names of containers an override map refers to that the spec lacks.
pub fn unknown_containers<'a>(spec: &TaskSpec, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| spec.container(name).is_none())
        .cloned()
        .collect()
}
