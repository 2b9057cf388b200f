// src/core/document.rs

//! The section-preserving layer between the typed [`Config`] tree and the
//! on-disk config file.
//!
//! The file is structured, section-labeled text: a prelude carrying
//! `schema_version`, then `[kind]` / `[kind "label"]` blocks whose bodies
//! are TOML. Reading keeps every section's raw text; writing emits raw text
//! verbatim for sections whose typed value did not change, so edits to one
//! section never reformat the rest. Unknown sections survive a full
//! read-modify-write untouched.

use crate::core::errors::FlywallError;
use crate::core::model::{
    AlertRuleConfig, ApiConfig, BackupPolicyConfig, Config, DhcpScopeConfig, DnsConfig,
    InterfaceConfig, IpSetConfig, LearningConfig, PolicyConfig, SCHEMA_VERSION,
    ScheduledRuleConfig, SystemConfig, UplinkGroupConfig, ZoneConfig,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// One named (possibly labeled) block with its body kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: String,
    pub label: Option<String>,
    /// Raw body text, excluding the header line, including blank lines.
    pub body: String,
}

impl Section {
    fn header(&self) -> String {
        match &self.label {
            Some(label) => format!("[{} \"{}\"]", self.kind, label),
            None => format!("[{}]", self.kind),
        }
    }

    fn matches(&self, kind: &str, label: Option<&str>) -> bool {
        self.kind == kind && self.label.as_deref() == label
    }
}

/// An ordered collection of sections plus the schema-version prelude.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    pub schema_version: u32,
    pub sections: Vec<Section>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            sections: Vec::new(),
        }
    }
}

/// Canonical section order used when a config is rendered from scratch and
/// when appended sections need a placement.
const SECTION_ORDER: &[&str] = &[
    "system",
    "interface",
    "zone",
    "policy",
    "dhcp",
    "dns",
    "uplink_group",
    "schedule",
    "ipset",
    "learning",
    "api",
    "alert",
    "backups",
];

fn parse_header(line: &str) -> Option<(String, Option<String>)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return None;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    match inner.split_once(' ') {
        None => {
            let kind = inner.trim();
            if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return None;
            }
            Some((kind.to_string(), None))
        }
        Some((kind, rest)) => {
            let kind = kind.trim();
            let rest = rest.trim();
            let label = rest.strip_prefix('"')?.strip_suffix('"')?;
            if kind.is_empty() || label.is_empty() {
                return None;
            }
            Some((kind.to_string(), Some(label.to_string())))
        }
    }
}

impl ConfigDocument {
    /// Parses the structured text form.
    pub fn parse(input: &str) -> Result<Self, FlywallError> {
        let mut schema_version = SCHEMA_VERSION;
        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<Section> = None;
        let mut in_prelude = true;

        for line in input.lines() {
            if let Some((kind, label)) = parse_header(line) {
                in_prelude = false;
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(Section {
                    kind,
                    label,
                    body: String::new(),
                });
                continue;
            }
            match current.as_mut() {
                Some(section) => {
                    section.body.push_str(line);
                    section.body.push('\n');
                }
                None => {
                    if in_prelude
                        && let Some(value) = line.trim().strip_prefix("schema_version")
                    {
                        let value = value.trim().strip_prefix('=').unwrap_or(value).trim();
                        schema_version = value.parse().map_err(|_| {
                            FlywallError::ConfigParse(format!(
                                "invalid schema_version '{value}'"
                            ))
                        })?;
                    } else if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                        return Err(FlywallError::ConfigParse(format!(
                            "unexpected content outside a section: '{line}'"
                        )));
                    }
                }
            }
        }
        if let Some(section) = current.take() {
            sections.push(section);
        }

        Ok(Self {
            schema_version,
            sections,
        })
    }

    /// Renders the document back to text. Bodies are emitted verbatim, so
    /// parse∘render is the identity on documents.
    pub fn render(&self) -> String {
        let mut out = format!("schema_version = {}\n\n", self.schema_version);
        for section in &self.sections {
            out.push_str(&section.header());
            out.push('\n');
            out.push_str(&section.body);
        }
        out
    }

    pub fn get_section(&self, kind: &str, label: Option<&str>) -> Option<&Section> {
        self.sections.iter().find(|s| s.matches(kind, label))
    }

    /// Replaces the body of one section, or appends the section if absent.
    pub fn set_section(&mut self, kind: &str, label: Option<&str>, body: &str) {
        let mut body = body.to_string();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        match self.sections.iter_mut().find(|s| s.matches(kind, label)) {
            Some(section) => section.body = body,
            None => self.sections.push(Section {
                kind: kind.to_string(),
                label: label.map(str::to_string),
                body,
            }),
        }
    }

    /// Removes a section; absent sections are not an error.
    pub fn delete_section(&mut self, kind: &str, label: Option<&str>) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| !s.matches(kind, label));
        before != self.sections.len()
    }

    /// Builds the typed tree out of every known section. Unknown sections
    /// are ignored here but survive in the document.
    pub fn to_config(&self) -> Result<Config, FlywallError> {
        let mut config = Config {
            schema_version: self.schema_version,
            ..Config::default()
        };
        for section in &self.sections {
            let label = section.label.clone();
            match (section.kind.as_str(), label) {
                ("system", None) => config.system = parse_body::<SystemConfig>(section)?,
                ("interface", Some(name)) => {
                    config
                        .interfaces
                        .insert(name, parse_body::<InterfaceConfig>(section)?);
                }
                ("zone", Some(name)) => {
                    config.zones.insert(name, parse_body::<ZoneConfig>(section)?);
                }
                ("policy", Some(name)) => {
                    config
                        .policies
                        .insert(name, parse_body::<PolicyConfig>(section)?);
                }
                ("dhcp", Some(name)) => {
                    config
                        .dhcp
                        .insert(name, parse_body::<DhcpScopeConfig>(section)?);
                }
                ("dns", None) => config.dns = parse_body::<DnsConfig>(section)?,
                ("uplink_group", Some(name)) => {
                    config
                        .uplink_groups
                        .insert(name, parse_body::<UplinkGroupConfig>(section)?);
                }
                ("schedule", Some(name)) => {
                    config
                        .schedules
                        .insert(name, parse_body::<ScheduledRuleConfig>(section)?);
                }
                ("ipset", Some(name)) => {
                    config
                        .ipsets
                        .insert(name, parse_body::<IpSetConfig>(section)?);
                }
                ("learning", None) => config.learning = parse_body::<LearningConfig>(section)?,
                ("api", None) => config.api = parse_body::<ApiConfig>(section)?,
                ("alert", Some(name)) => {
                    config
                        .alerts
                        .insert(name, parse_body::<AlertRuleConfig>(section)?);
                }
                ("backups", None) => config.backups = parse_body::<BackupPolicyConfig>(section)?,
                _ => {}
            }
        }
        Ok(config)
    }

    /// Renders a config into a fresh document in canonical section order.
    pub fn from_config(config: &Config) -> Result<Self, FlywallError> {
        let mut doc = ConfigDocument {
            schema_version: config.schema_version,
            sections: Vec::new(),
        };
        doc.sync_with(config)?;
        Ok(doc)
    }

    /// Reconciles the document with a typed tree: sections whose parsed
    /// value is unchanged keep their raw text; changed sections are
    /// re-rendered; removed entries drop their sections; new entries are
    /// appended in canonical order.
    pub fn sync_with(&mut self, config: &Config) -> Result<(), FlywallError> {
        self.schema_version = config.schema_version;

        let mut desired: Vec<(String, Option<String>, String)> = Vec::new();
        for kind in SECTION_ORDER {
            match *kind {
                "system" => desired.push(("system".into(), None, render_body(&config.system)?)),
                "interface" => {
                    for (name, v) in &config.interfaces {
                        desired.push(("interface".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "zone" => {
                    for (name, v) in &config.zones {
                        desired.push(("zone".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "policy" => {
                    for (name, v) in &config.policies {
                        desired.push(("policy".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "dhcp" => {
                    for (name, v) in &config.dhcp {
                        desired.push(("dhcp".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "dns" => desired.push(("dns".into(), None, render_body(&config.dns)?)),
                "uplink_group" => {
                    for (name, v) in &config.uplink_groups {
                        desired.push(("uplink_group".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "schedule" => {
                    for (name, v) in &config.schedules {
                        desired.push(("schedule".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "ipset" => {
                    for (name, v) in &config.ipsets {
                        desired.push(("ipset".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "learning" => {
                    desired.push(("learning".into(), None, render_body(&config.learning)?))
                }
                "api" => desired.push(("api".into(), None, render_body(&config.api)?)),
                "alert" => {
                    for (name, v) in &config.alerts {
                        desired.push(("alert".into(), Some(name.clone()), render_body(v)?));
                    }
                }
                "backups" => desired.push(("backups".into(), None, render_body(&config.backups)?)),
                _ => unreachable!(),
            }
        }

        // Drop known-kind sections that no longer have a counterpart.
        self.sections.retain(|s| {
            !SECTION_ORDER.contains(&s.kind.as_str())
                || desired
                    .iter()
                    .any(|(k, l, _)| s.matches(k, l.as_deref()))
        });

        for (kind, label, rendered) in desired {
            match self
                .sections
                .iter_mut()
                .find(|s| s.matches(&kind, label.as_deref()))
            {
                Some(existing) => {
                    // Keep raw text when the typed value is unchanged so
                    // untouched sections round-trip byte-for-byte.
                    if !bodies_equivalent(&kind, &existing.body, &rendered) {
                        existing.body = rendered;
                    }
                }
                None => self.sections.push(Section {
                    kind,
                    label,
                    body: rendered,
                }),
            }
        }
        Ok(())
    }
}

fn parse_body<T: DeserializeOwned>(section: &Section) -> Result<T, FlywallError> {
    toml::from_str(&section.body).map_err(|e| {
        FlywallError::ConfigParse(format!(
            "section {}: {e}",
            match &section.label {
                Some(label) => format!("[{} \"{}\"]", section.kind, label),
                None => format!("[{}]", section.kind),
            }
        ))
    })
}

fn render_body<T: Serialize>(value: &T) -> Result<String, FlywallError> {
    let mut body = toml::to_string(value)?;
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    // Sections carry their separating blank line in the body.
    body.push('\n');
    Ok(body)
}

/// Two bodies are equivalent when they parse to the same typed value for
/// their section kind, which is what lets hand-formatted sections (odd
/// spacing, omitted defaults) survive a sync untouched.
fn bodies_equivalent(kind: &str, current: &str, rendered: &str) -> bool {
    match kind {
        "system" => typed_eq::<SystemConfig>(current, rendered),
        "interface" => typed_eq::<InterfaceConfig>(current, rendered),
        "zone" => typed_eq::<ZoneConfig>(current, rendered),
        "policy" => typed_eq::<PolicyConfig>(current, rendered),
        "dhcp" => typed_eq::<DhcpScopeConfig>(current, rendered),
        "dns" => typed_eq::<DnsConfig>(current, rendered),
        "uplink_group" => typed_eq::<UplinkGroupConfig>(current, rendered),
        "schedule" => typed_eq::<ScheduledRuleConfig>(current, rendered),
        "ipset" => typed_eq::<IpSetConfig>(current, rendered),
        "learning" => typed_eq::<LearningConfig>(current, rendered),
        "api" => typed_eq::<ApiConfig>(current, rendered),
        "alert" => typed_eq::<AlertRuleConfig>(current, rendered),
        "backups" => typed_eq::<BackupPolicyConfig>(current, rendered),
        _ => current == rendered,
    }
}

fn typed_eq<T: DeserializeOwned + PartialEq>(a: &str, b: &str) -> bool {
    match (toml::from_str::<T>(a), toml::from_str::<T>(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
