//! Log-sink mutation with driver-switch semantics.
//!
//! A container has at most one active log driver. Overrides name one or
//! more candidate drivers:
//!
//! - Entries for the active driver are applied with upsert-or-delete.
//! - The [`DRIVER_KNOCKOUT_KEY`] entry on the active driver removes the
//!   driver itself, whatever else the call edits.
//! - With no active driver left, a single remaining candidate (one that
//!   is not being knocked out) becomes the active driver and its entries
//!   are applied on top of whatever options survived.
//! - A container left without a driver loses its log-sink config entirely.
//!
//! Options and secret-options run as two independent passes of the same
//! algorithm; the second pass sees the driver chosen by the first.

use std::collections::BTreeMap;

use fleetops_core::{LogSinkConfig, TaskSpec};
use tracing::{debug, info};

use crate::mutator::apply_entries;
use crate::overrides::{DriverOverrides, EntryOverrides, Override, DRIVER_KNOCKOUT_KEY};

/// Which collection of the log-sink config a pass edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPass {
    Options,
    SecretOptions,
}

impl SinkPass {
    fn apply(self, sink: &mut LogSinkConfig, entries: &EntryOverrides) {
        let entries: EntryOverrides = entries
            .iter()
            .filter(|(key, _)| key.as_str() != DRIVER_KNOCKOUT_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match self {
            Self::Options => apply_option_map(&mut sink.options, &entries),
            Self::SecretOptions => apply_entries(&mut sink.secret_options, &entries),
        }
    }
}

fn apply_option_map(options: &mut BTreeMap<String, String>, entries: &EntryOverrides) {
    for (key, action) in entries {
        match action {
            Override::Set(value) => {
                options.insert(key.clone(), value.clone());
            }
            Override::Delete => {
                options.remove(key);
            }
        }
    }
}

/// Apply driver overrides to one log-sink config.
pub fn alter_log_sink(sink: &LogSinkConfig, overrides: &DriverOverrides, pass: SinkPass) -> LogSinkConfig {
    let mut copy = sink.clone();
    let mut knocked_out = None;

    if let Some(driver) = copy.driver.clone()
        && let Some(entries) = overrides.get(&driver)
    {
        if entries.contains_key(DRIVER_KNOCKOUT_KEY) {
            knocked_out = Some(driver.clone());
        }
        pass.apply(&mut copy, entries);
    }

    if let Some(driver) = &knocked_out {
        debug!(%driver, "log driver knocked out");
        copy.driver = None;
    }

    if copy.has_no_driver() {
        let mut candidates = overrides.iter().filter(|(driver, entries)| {
            Some(*driver) != knocked_out.as_ref() && !entries.contains_key(DRIVER_KNOCKOUT_KEY)
        });
        if let (Some((driver, entries)), None) = (candidates.next(), candidates.next()) {
            info!(from = ?knocked_out, to = %driver, "switching log driver");
            copy.driver = Some(driver.clone());
            pass.apply(&mut copy, entries);
        }
    }

    copy
}

/// Apply option and secret-option overrides to every named container.
pub fn alter_log_sinks(
    spec: &TaskSpec,
    options: &BTreeMap<String, DriverOverrides>,
    secrets: &BTreeMap<String, DriverOverrides>,
) -> TaskSpec {
    let mut copy = spec.clone();
    for container in &mut copy.containers {
        for (overrides, pass) in [
            (options.get(&container.name), SinkPass::Options),
            (secrets.get(&container.name), SinkPass::SecretOptions),
        ] {
            let Some(overrides) = overrides else {
                continue;
            };
            let current = container.log_sink.clone().unwrap_or_default();
            let altered = alter_log_sink(&current, overrides, pass);
            container.log_sink = if altered.has_no_driver() {
                None
            } else {
                Some(altered)
            };
        }
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_core::{ContainerSpec, SecretEntry};
    use pretty_assertions::assert_eq;

    fn set(v: &str) -> Override {
        Override::Set(v.to_string())
    }

    fn entries(pairs: &[(&str, Override)]) -> EntryOverrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn drivers(pairs: &[(&str, EntryOverrides)]) -> DriverOverrides {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn secret(name: &str, value_from: &str) -> SecretEntry {
        SecretEntry {
            name: name.into(),
            value_from: value_from.into(),
        }
    }

    fn sink(driver: &str, opts: &[(&str, &str)]) -> LogSinkConfig {
        LogSinkConfig {
            driver: Some(driver.into()),
            options: options(opts),
            secret_options: vec![],
        }
    }

    fn container(name: &str, log_sink: Option<LogSinkConfig>) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: format!("registry/{name}:1"),
            log_sink,
            ..Default::default()
        }
    }

    #[test]
    fn options_upsert_and_delete_on_active_driver() {
        let altered = alter_log_sink(
            &sink(
                "mydriver",
                &[("untouched", "orig"), ("touched", "orig"), ("deleted", "orig")],
            ),
            &drivers(&[(
                "mydriver",
                entries(&[("touched", set("new")), ("deleted", Override::Delete)]),
            )]),
            SinkPass::Options,
        );
        assert_eq!(altered, sink("mydriver", &[("touched", "new"), ("untouched", "orig")]));
    }

    #[test]
    fn overrides_for_inactive_driver_are_ignored() {
        let original = sink("driver8", &[("a", "1")]);
        let altered = alter_log_sink(
            &original,
            &drivers(&[("newDriver8", entries(&[("b", set("2"))]))]),
            SinkPass::Options,
        );
        assert_eq!(altered, original);
    }

    #[test]
    fn knockout_with_replacement_switches_driver() {
        let altered = alter_log_sink(
            &sink("olddriver", &[("untouched", "orig"), ("gone1", "x"), ("gone2", "y")]),
            &drivers(&[
                (
                    "olddriver",
                    entries(&[("", set("ignored")), ("gone1", Override::Delete)]),
                ),
                (
                    "newdriver",
                    entries(&[("added", set("value")), ("gone2", Override::Delete)]),
                ),
            ]),
            SinkPass::Options,
        );
        assert_eq!(altered, sink("newdriver", &[("added", "value"), ("untouched", "orig")]));
    }

    #[test]
    fn secret_options_pass() {
        let original = LogSinkConfig {
            driver: Some("mydriver".into()),
            options: BTreeMap::new(),
            secret_options: vec![
                secret("untouched", "orig"),
                secret("touched", "orig"),
                secret("deleted", "orig"),
            ],
        };
        let altered = alter_log_sink(
            &original,
            &drivers(&[(
                "mydriver",
                entries(&[
                    ("touched", set("new")),
                    ("added", set("fresh")),
                    ("deleted", Override::Delete),
                ]),
            )]),
            SinkPass::SecretOptions,
        );
        assert_eq!(
            altered.secret_options,
            vec![
                secret("untouched", "orig"),
                secret("touched", "new"),
                secret("added", "fresh"),
            ]
        );
    }

    #[test]
    fn driver_switch_keeps_old_secret_options() {
        let spec = TaskSpec {
            containers: vec![container(
                "container7",
                Some(LogSinkConfig {
                    driver: Some("oldDriver7".into()),
                    options: BTreeMap::new(),
                    secret_options: vec![
                        secret("driver7KeepOption1", "driver7Value1"),
                        secret("driver7KeepOption2", "driver7Value2"),
                    ],
                }),
            )],
            ..Default::default()
        };
        let overrides = BTreeMap::from([(
            "container7".to_string(),
            drivers(&[
                ("oldDriver7", entries(&[("", Override::Delete)])),
                ("newDriver7", entries(&[("newDriver7NewOption1", set("newDriver7Value1"))])),
            ]),
        )]);

        let altered = alter_log_sinks(&spec, &BTreeMap::new(), &overrides);
        let sink = altered.containers[0].log_sink.as_ref().unwrap();
        assert_eq!(sink.driver.as_deref(), Some("newDriver7"));
        assert_eq!(
            sink.secret_options,
            vec![
                secret("driver7KeepOption1", "driver7Value1"),
                secret("driver7KeepOption2", "driver7Value2"),
                secret("newDriver7NewOption1", "newDriver7Value1"),
            ]
        );
    }

    #[test]
    fn driver_switch_keeps_old_options() {
        let spec = TaskSpec {
            containers: vec![container(
                "container7",
                Some(sink(
                    "oldDriver7",
                    &[("driver7KeepOption1", "v1"), ("driver7KeepOption2", "v2")],
                )),
            )],
            ..Default::default()
        };
        let overrides = BTreeMap::from([(
            "container7".to_string(),
            drivers(&[
                ("oldDriver7", entries(&[("", Override::Delete)])),
                ("newDriver7", entries(&[("newDriver7NewOption1", set("newDriver7Value1"))])),
            ]),
        )]);

        let altered = alter_log_sinks(&spec, &overrides, &BTreeMap::new());
        assert_eq!(
            altered.containers[0].log_sink,
            Some(sink(
                "newDriver7",
                &[
                    ("driver7KeepOption1", "v1"),
                    ("driver7KeepOption2", "v2"),
                    ("newDriver7NewOption1", "newDriver7Value1"),
                ],
            ))
        );
    }

    #[test]
    fn full_driver_removal_clears_log_sink() {
        let spec = TaskSpec {
            containers: vec![container(
                "container9",
                Some(sink("driver9", &[("driver9Option1", "a"), ("driver9Option2", "b")])),
            )],
            ..Default::default()
        };
        let overrides = BTreeMap::from([(
            "container9".to_string(),
            drivers(&[("driver9", entries(&[("", Override::Delete)]))]),
        )]);

        let altered = alter_log_sinks(&spec, &overrides, &BTreeMap::new());
        assert_eq!(altered.containers[0].log_sink, None);
    }

    #[test]
    fn knockout_with_two_candidates_leaves_no_driver() {
        let altered = alter_log_sink(
            &sink("old", &[("a", "1")]),
            &drivers(&[
                ("old", entries(&[("", Override::Delete)])),
                ("first", entries(&[("b", set("2"))])),
                ("second", entries(&[("c", set("3"))])),
            ]),
            SinkPass::Options,
        );
        assert!(altered.has_no_driver());
    }

    #[test]
    fn knocked_out_candidate_is_never_adopted() {
        // Knocking out a driver the container does not use still rules it
        // out, leaving one candidate.
        let altered = alter_log_sink(
            &LogSinkConfig::default(),
            &drivers(&[
                ("A", entries(&[("", Override::Delete)])),
                ("B", entries(&[("b", set("2"))])),
            ]),
            SinkPass::Options,
        );
        assert_eq!(altered, sink("B", &[("b", "2")]));
    }

    #[test]
    fn container_without_sink_adopts_single_driver() {
        let spec = TaskSpec {
            containers: vec![container("container4", None)],
            ..Default::default()
        };
        let overrides = BTreeMap::from([(
            "container4".to_string(),
            drivers(&[(
                "driver4",
                entries(&[("driver4Option1", set("v1")), ("driver4Option2", set("v2"))]),
            )]),
        )]);

        let altered = alter_log_sinks(&spec, &overrides, &BTreeMap::new());
        assert_eq!(
            altered.containers[0].log_sink,
            Some(sink("driver4", &[("driver4Option1", "v1"), ("driver4Option2", "v2")]))
        );
    }

    #[test]
    fn reapplying_same_override_is_idempotent() {
        let spec = TaskSpec {
            containers: vec![container("c", Some(sink("d", &[("a", "1")])))],
            ..Default::default()
        };
        let overrides = BTreeMap::from([(
            "c".to_string(),
            drivers(&[("d", entries(&[("a", set("2")), ("b", set("3"))]))]),
        )]);

        let once = alter_log_sinks(&spec, &overrides, &overrides);
        let twice = alter_log_sinks(&once, &overrides, &overrides);
        assert_eq!(once, twice);
    }

    #[test]
    fn untouched_containers_keep_their_sink() {
        let spec = TaskSpec {
            containers: vec![
                container("a", Some(sink("d", &[("x", "1")]))),
                container("b", None),
            ],
            ..Default::default()
        };
        let altered = alter_log_sinks(&spec, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(altered, spec);
    }
}
