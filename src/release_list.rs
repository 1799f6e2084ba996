//! The release list document
//!
//! One XML file lists every known release, newest first. Each `<release>`
//! holds flat text fields plus per-locale changelogs stored as CDATA.
//! Unknown flat fields survive a load/store cycle; storing a document that
//! was loaded from our own output is byte-identical.

use crate::error::{ReleaseError, Result};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const DEFAULT_ROOT: &str = "releases";

fn release_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*v?(\d+\.\d+\.\d+(\.\d+)?)((-|\s*)(RC(\d+)))?\s*$")
            .expect("release version pattern is valid")
    })
}

/// Identity of a release list entry: numeric version plus RC qualifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseKey {
    pub version: String,
    /// Qualifier as written, e.g. `RC1`; empty for final releases
    pub version_text: String,
    pub rc: u32,
}

/// Parse `v6.2.0-RC1`, `6.2.0 rc3` or `7.3.0.1` into a [ReleaseKey]
pub fn parse_version(text: &str) -> Result<ReleaseKey> {
    let caps = release_version_regex()
        .captures(text)
        .ok_or_else(|| ReleaseError::manifest(format!("Failed to parse version string {}", text)))?;

    let rc = match caps.get(6) {
        Some(n) => n
            .as_str()
            .parse()
            .map_err(|_| ReleaseError::manifest(format!("Failed to parse version string {}", text)))?,
        None => 0,
    };

    Ok(ReleaseKey {
        version: caps[1].to_string(),
        version_text: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
        rc,
    })
}

/// Changelog text of one language
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale {
    pub lang: String,
    pub changelog: Option<String>,
    pub important_changes: Option<String>,
}

/// Lines of changelog for one language, before they are stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocaleText {
    pub changelog: Vec<String>,
    pub important_changes: Option<Vec<String>>,
}

/// One `<release>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseEntry {
    fields: Vec<(String, String)>,
    locales: Vec<Locale>,
}

impl ReleaseEntry {
    /// Value of a flat field; empty when absent
    pub fn get(&self, field: &str) -> &str {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }

    /// Set a flat field, appending it when absent
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn tag(&self) -> &str {
        self.get("tag")
    }

    pub fn version(&self) -> &str {
        self.get("version")
    }

    pub fn version_text(&self) -> &str {
        self.get("version_text")
    }

    pub fn rc(&self) -> u32 {
        self.get("rc").trim().parse().unwrap_or(0)
    }

    pub fn release_date(&self) -> &str {
        self.get("release_date")
    }

    pub fn is_public(&self) -> bool {
        self.get("public") == "1"
    }

    pub fn make_public(&mut self) {
        self.set("public", "1");
    }

    pub fn make_private(&mut self) {
        self.set("public", "0");
    }

    /// Changelog maintained by hand
    pub fn is_manual(&self) -> bool {
        self.get("manual") == "1"
    }

    fn key_matches(&self, key: &ReleaseKey) -> bool {
        self.version() == key.version && self.rc() == key.rc
    }

    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    pub fn locale(&self, lang: &str) -> Option<&Locale> {
        self.locales.iter().find(|l| l.lang == lang)
    }

    /// Flat fields plus a `locales` object, for display
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), Value::String(value.clone()));
        }
        if !self.locales.is_empty() {
            let mut locales = Map::new();
            for locale in &self.locales {
                let mut texts = Map::new();
                if let Some(text) = &locale.changelog {
                    texts.insert("changelog".to_string(), Value::String(text.clone()));
                }
                if let Some(text) = &locale.important_changes {
                    texts.insert("important_changes".to_string(), Value::String(text.clone()));
                }
                locales.insert(locale.lang.clone(), Value::Object(texts));
            }
            object.insert("locales".to_string(), Value::Object(locales));
        }
        Value::Object(object)
    }

    /// Replace the changelog of each given language; lines are joined
    /// with newlines
    pub fn set_locales(&mut self, locales: &BTreeMap<String, LocaleText>) {
        for (lang, text) in locales {
            let index = match self.locales.iter().position(|l| &l.lang == lang) {
                Some(index) => index,
                None => {
                    self.locales.push(Locale {
                        lang: lang.clone(),
                        ..Locale::default()
                    });
                    self.locales.len() - 1
                }
            };
            let locale = &mut self.locales[index];
            locale.changelog = Some(format!("\n{}\n", text.changelog.join("\n")));
            if let Some(important) = &text.important_changes {
                locale.important_changes = Some(format!("\n{}\n", important.join("\n")));
            }
        }
    }
}

/// The whole release list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseList {
    root: String,
    releases: Vec<ReleaseEntry>,
}

impl Default for ReleaseList {
    fn default() -> Self {
        ReleaseList {
            root: DEFAULT_ROOT.to_string(),
            releases: Vec::new(),
        }
    }
}

impl ReleaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_xml())?;
        Ok(())
    }

    pub fn releases(&self) -> &[ReleaseEntry] {
        &self.releases
    }

    fn position(&self, version: &str) -> Result<Option<usize>> {
        let key = parse_version(version)?;
        let mut found = None;
        for (index, release) in self.releases.iter().enumerate() {
            if !release.key_matches(&key) {
                continue;
            }
            if found.is_some() {
                return Err(ReleaseError::manifest(format!(
                    "Found multiple versions matching {}",
                    version
                )));
            }
            found = Some(index);
        }
        Ok(found)
    }

    /// Entry for `version`; more than one match is an error
    pub fn get_release(&self, version: &str) -> Result<Option<&ReleaseEntry>> {
        Ok(self.position(version)?.map(|i| &self.releases[i]))
    }

    pub fn get_release_mut(&mut self, version: &str) -> Result<Option<&mut ReleaseEntry>> {
        Ok(self.position(version)?.map(move |i| &mut self.releases[i]))
    }

    /// Prepend a new entry for `version`
    pub fn add_release(&mut self, version: &str) -> Result<&mut ReleaseEntry> {
        if self.position(version)?.is_some() {
            return Err(ReleaseError::manifest(format!(
                "Cannot add {}, it already exists.",
                version
            )));
        }

        let key = parse_version(version)?;
        let mut entry = ReleaseEntry::default();
        entry.set("version", key.version);
        entry.set("version_text", key.version_text);
        entry.set("rc", key.rc.to_string());

        self.releases.insert(0, entry);
        Ok(&mut self.releases[0])
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let root = parse_tree(xml)?;
        let mut list = ReleaseList {
            root: root.name,
            releases: Vec::new(),
        };

        for child in root.children {
            if child.name != "release" {
                return Err(ReleaseError::manifest(format!(
                    "Unexpected element <{}> in release list",
                    child.name
                )));
            }
            list.releases.push(entry_from_node(child)?);
        }
        Ok(list)
    }

    /// Serialize with two-space indentation
    pub fn to_xml(&self) -> String {
        self.to_string()
    }

    /// Write the list as XML into `out`, stopping at the first failed write
    pub fn write_xml<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "<?xml version=\"1.0\"?>")?;
        if self.releases.is_empty() {
            return writeln!(out, "<{}/>", self.root);
        }

        writeln!(out, "<{}>", self.root)?;
        for release in &self.releases {
            writeln!(out, "  <release>")?;
            for (name, value) in &release.fields {
                write_field(out, 4, name, value)?;
            }
            if !release.locales.is_empty() {
                writeln!(out, "    <locales>")?;
                for locale in &release.locales {
                    writeln!(out, "      <{}>", locale.lang)?;
                    if let Some(text) = &locale.changelog {
                        write_cdata(out, 8, "changelog", text)?;
                    }
                    if let Some(text) = &locale.important_changes {
                        write_cdata(out, 8, "important_changes", text)?;
                    }
                    writeln!(out, "      </{}>", locale.lang)?;
                }
                writeln!(out, "    </locales>")?;
            }
            writeln!(out, "  </release>")?;
        }
        writeln!(out, "</{}>", self.root)
    }
}

impl fmt::Display for ReleaseList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_xml(f)
    }
}

fn write_field<W: fmt::Write>(out: &mut W, indent: usize, name: &str, value: &str) -> fmt::Result {
    if value.is_empty() {
        writeln!(out, "{:indent$}<{}/>", "", name, indent = indent)
    } else {
        writeln!(
            out,
            "{:indent$}<{}>{}</{}>",
            "",
            name,
            escape(value),
            name,
            indent = indent
        )
    }
}

fn write_cdata<W: fmt::Write>(out: &mut W, indent: usize, name: &str, value: &str) -> fmt::Result {
    let value = value.replace("]]>", "]]]]><![CDATA[>");
    writeln!(
        out,
        "{:indent$}<{}><![CDATA[{}]]></{}>",
        "",
        name,
        value,
        name,
        indent = indent
    )
}

/// Minimal element tree; text and CDATA are concatenated per element
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

fn parse_tree(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let err = |e: &dyn std::fmt::Display| ReleaseError::manifest(format!("Invalid release list: {}", e));
    let name_of = |raw: &[u8]| String::from_utf8_lossy(raw).to_string();

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let event = reader.read_event().map_err(|e| err(&e))?;
        match event {
            Event::Start(start) => stack.push(Node {
                name: name_of(start.name().as_ref()),
                ..Node::default()
            }),
            Event::Empty(empty) => {
                let node = Node {
                    name: name_of(empty.name().as_ref()),
                    ..Node::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| err(&"unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(|e| err(&e))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&value);
                }
            }
            Event::CData(cdata) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| err(&"document has no root element"))
}

fn entry_from_node(node: Node) -> Result<ReleaseEntry> {
    let mut entry = ReleaseEntry::default();
    for child in node.children {
        if child.name == "locales" {
            for lang in child.children {
                let mut locale = Locale {
                    lang: lang.name,
                    ..Locale::default()
                };
                for part in lang.children {
                    match part.name.as_str() {
                        "changelog" => locale.changelog = Some(part.text),
                        "important_changes" => locale.important_changes = Some(part.text),
                        other => {
                            return Err(ReleaseError::manifest(format!(
                                "Unexpected element <{}> in locale {}",
                                other, locale.lang
                            )))
                        }
                    }
                }
                entry.locales.push(locale);
            }
        } else if !child.children.is_empty() {
            return Err(ReleaseError::manifest(format!(
                "Unexpected nested element <{}> in release",
                child.name
            )));
        } else {
            entry.fields.push((child.name, child.text));
        }
    }
    Ok(entry)
}
