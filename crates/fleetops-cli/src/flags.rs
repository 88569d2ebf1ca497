//! Repeatable `name=key=value` style flags.
//!
//! Every level is split on the first `=` only and trimmed, so values may
//! themselves contain `=`. An empty trailing value is a deletion.

use std::collections::BTreeMap;

use fleetops_spec::{DriverOverrides, EntryOverrides, Override};

/// Split `key=value` once and trim both sides. A missing `=` yields an
/// empty value.
pub fn key_eq_value(kv: &str) -> (String, String) {
    match kv.split_once('=') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => (kv.trim().to_string(), String::new()),
    }
}

/// `--container-image container=image`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFlag {
    pub container: String,
    pub image: String,
}

/// `--container-envvar container=name=value` and
/// `--container-secret container=name=valueFrom`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFlag {
    pub container: String,
    pub key: String,
    pub value: String,
}

/// `--container-logopt container=driver=option=value` and
/// `--container-logsecret container=driver=option=valueFrom`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFlag {
    pub container: String,
    pub driver: String,
    pub key: String,
    pub value: String,
}

fn container_of(raw: &str, flag: &str) -> Result<(String, String), String> {
    let (container, rest) = key_eq_value(raw);
    if container.is_empty() {
        return Err(format!("{flag}: missing container name in {raw:?}"));
    }
    Ok((container, rest))
}

pub fn parse_image(raw: &str) -> Result<ImageFlag, String> {
    let (container, image) = container_of(raw, "container-image")?;
    if image.is_empty() {
        return Err(format!("container-image: missing image in {raw:?}"));
    }
    Ok(ImageFlag { container, image })
}

pub fn parse_entry(raw: &str) -> Result<EntryFlag, String> {
    let (container, rest) = container_of(raw, "container entry")?;
    let (key, value) = key_eq_value(&rest);
    if key.is_empty() {
        return Err(format!("missing entry name in {raw:?}"));
    }
    Ok(EntryFlag {
        container,
        key,
        value,
    })
}

pub fn parse_log(raw: &str) -> Result<LogFlag, String> {
    let (container, rest) = container_of(raw, "container log option")?;
    let (driver, rest) = key_eq_value(&rest);
    if driver.is_empty() {
        return Err(format!("missing log driver in {raw:?}"));
    }
    // An empty option name is allowed: `container=driver==` drops the driver.
    let (key, value) = key_eq_value(&rest);
    Ok(LogFlag {
        container,
        driver,
        key,
        value,
    })
}

pub fn image_overrides(flags: &[ImageFlag]) -> BTreeMap<String, String> {
    flags
        .iter()
        .map(|f| (f.container.clone(), f.image.clone()))
        .collect()
}

/// Later flags for the same container and key win.
pub fn entry_overrides(flags: &[EntryFlag]) -> BTreeMap<String, EntryOverrides> {
    let mut overrides: BTreeMap<String, EntryOverrides> = BTreeMap::new();
    for flag in flags {
        overrides
            .entry(flag.container.clone())
            .or_default()
            .insert(flag.key.clone(), Override::from_flag(&flag.value));
    }
    overrides
}

pub fn driver_overrides(flags: &[LogFlag]) -> BTreeMap<String, DriverOverrides> {
    let mut overrides: BTreeMap<String, DriverOverrides> = BTreeMap::new();
    for flag in flags {
        overrides
            .entry(flag.container.clone())
            .or_default()
            .entry(flag.driver.clone())
            .or_default()
            .insert(flag.key.clone(), Override::from_flag(&flag.value));
    }
    overrides
}

/// Negative means "leave the replica count alone".
pub fn desired_count(raw: i64) -> anyhow::Result<Option<u32>> {
    if raw < 0 {
        return Ok(None);
    }
    Ok(Some(u32::try_from(raw)?))
}
