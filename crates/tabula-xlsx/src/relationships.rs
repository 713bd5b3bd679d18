//! Relationship graphs (`*.rels` parts) and target resolution.

use crate::error::XlsxError;
use crate::xml::XmlElement;

pub(crate) const NS_PACKAGE_RELS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub(crate) fn rel_type(kind: &str) -> String {
    format!("{REL_BASE}/{kind}")
}

pub(crate) const OFFICE_DOCUMENT: &str = "officeDocument";
pub(crate) const WORKSHEET: &str = "worksheet";
pub(crate) const STYLES: &str = "styles";
pub(crate) const SHARED_STRINGS: &str = "sharedStrings";
pub(crate) const COMMENTS: &str = "comments";
pub(crate) const HYPERLINK: &str = "hyperlink";
pub(crate) const VML_DRAWING: &str = "vmlDrawing";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }

    /// Whether the relationship type ends in `/kind`. Matches both transitional and strict
    /// namespaces as well as vendor types such as `vbaProject`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.type_uri.rsplit('/').next() == Some(kind)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Relationships {
    rels: Vec<Relationship>,
}

impl Relationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(bytes: &[u8], part: &str) -> Result<Self, XlsxError> {
        let root = XmlElement::parse(bytes, part)?;
        let mut rels = Vec::new();
        for el in root.children_by_local("Relationship") {
            let (Some(id), Some(type_uri)) = (el.attr("Id"), el.attr("Type")) else {
                continue;
            };
            rels.push(Relationship {
                id: id.to_string(),
                type_uri: type_uri.to_string(),
                target: el.attr("Target").unwrap_or_default().to_string(),
                target_mode: el.attr("TargetMode").map(str::to_string),
            });
        }
        Ok(Self { rels })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    pub fn len(&self) -> usize {
        self.rels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|r| r.id == id)
    }

    pub fn first_of_kind(&self, kind: &str) -> Option<&Relationship> {
        self.rels.iter().find(|r| r.is_kind(kind))
    }

    /// Smallest `rIdN` id not used yet.
    pub fn next_id(&self) -> String {
        let max = self
            .rels
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    /// Append a relationship of `kind` and return its id.
    pub fn add(&mut self, kind: &str, target: impl Into<String>, external: bool) -> String {
        let id = self.next_id();
        self.rels.push(Relationship {
            id: id.clone(),
            type_uri: rel_type(kind),
            target: target.into(),
            target_mode: external.then(|| "External".to_string()),
        });
        id
    }

    pub fn push(&mut self, rel: Relationship) {
        self.rels.push(rel);
    }

    pub fn retain(&mut self, keep: impl FnMut(&Relationship) -> bool) {
        self.rels.retain(keep);
    }

    pub fn to_xml(&self) -> XmlElement {
        let mut root = XmlElement::new("Relationships").with_attr("xmlns", NS_PACKAGE_RELS);
        for rel in &self.rels {
            let mut el = XmlElement::new("Relationship")
                .with_attr("Id", rel.id.as_str())
                .with_attr("Type", rel.type_uri.as_str())
                .with_attr("Target", rel.target.as_str());
            if let Some(mode) = &rel.target_mode {
                el.set_attr("TargetMode", mode.as_str());
            }
            root.push(el);
        }
        root
    }
}

/// The `.rels` part holding relationships whose source is `part`.
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against its source part.
///
/// Fragments are dropped; a bare `#fragment` refers to the source part itself. Absolute targets
/// are rooted at the package root.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }
    let base_dir = source_part.rsplit_once('/').map_or("", |(dir, _)| dir);
    normalize(&format!("{base_dir}/{target}"))
}

/// Target for `part`, written relative to the directory of `source_part`.
pub(crate) fn relative_target(source_part: &str, part: &str) -> String {
    let base: Vec<&str> = source_part
        .rsplit_once('/')
        .map_or(Vec::new(), |(dir, _)| dir.split('/').collect());
    let target: Vec<&str> = part.split('/').collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = vec![".."; base.len() - common];
    out.extend(&target[common..]);
    out.join("/")
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}
