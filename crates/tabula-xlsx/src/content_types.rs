//! `[Content_Types].xml`: part-to-media-type manifest.

use crate::error::XlsxError;
use crate::xml::XmlElement;

pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

pub(crate) const CT_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";
pub(crate) const CT_XML: &str = "application/xml";
pub(crate) const CT_WORKBOOK: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
pub(crate) const CT_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
pub(crate) const CT_STYLES: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
pub(crate) const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";
pub(crate) const CT_COMMENTS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.comments+xml";

/// Main-part content types of every spreadsheet flavor (plain, macro-enabled, templates).
const WORKBOOK_MAIN_TYPES: &[&str] = &[
    CT_WORKBOOK,
    "application/vnd.ms-excel.sheet.macroEnabled.main+xml",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.template.main+xml",
    "application/vnd.ms-excel.template.macroEnabled.main+xml",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    /// The manifest a freshly written package starts from.
    pub fn new_package() -> Self {
        Self {
            defaults: vec![
                ("rels".to_string(), CT_RELATIONSHIPS.to_string()),
                ("xml".to_string(), CT_XML.to_string()),
            ],
            overrides: Vec::new(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XlsxError> {
        let root = XmlElement::parse(bytes, CONTENT_TYPES_PART)?;
        if root.local_name() != "Types" {
            return Err(XlsxError::parse(
                CONTENT_TYPES_PART,
                0,
                format!("unexpected root element <{}>", root.name),
            ));
        }
        let mut out = Self::default();
        for el in root.elements() {
            match (el.local_name(), el.attr("ContentType")) {
                ("Default", Some(ct)) => {
                    if let Some(ext) = el.attr("Extension") {
                        out.defaults.push((ext.to_string(), ct.to_string()));
                    }
                }
                ("Override", Some(ct)) => {
                    if let Some(part) = el.attr("PartName") {
                        out.overrides.push((part.to_string(), ct.to_string()));
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Part name (no leading `/`) of the spreadsheet main part, located by its override.
    pub fn workbook_part(&self) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(_, ct)| WORKBOOK_MAIN_TYPES.contains(&ct.as_str()))
            .map(|(name, _)| name.trim_start_matches('/'))
    }

    pub fn set_override(&mut self, part: &str, content_type: &str) {
        let key = format!("/{}", part.trim_start_matches('/'));
        match self
            .overrides
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&key))
        {
            Some((_, ct)) => *ct = content_type.to_string(),
            None => self.overrides.push((key, content_type.to_string())),
        }
    }

    pub fn remove_override(&mut self, part: &str) -> bool {
        let part = part.trim_start_matches('/');
        let before = self.overrides.len();
        self.overrides
            .retain(|(name, _)| !name.trim_start_matches('/').eq_ignore_ascii_case(part));
        self.overrides.len() != before
    }

    pub fn to_xml(&self) -> XmlElement {
        let mut root = XmlElement::new("Types").with_attr("xmlns", NS_CONTENT_TYPES);
        for (ext, ct) in &self.defaults {
            root.push(
                XmlElement::new("Default")
                    .with_attr("Extension", ext.as_str())
                    .with_attr("ContentType", ct.as_str()),
            );
        }
        for (part, ct) in &self.overrides {
            root.push(
                XmlElement::new("Override")
                    .with_attr("PartName", part.as_str())
                    .with_attr("ContentType", ct.as_str()),
            );
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/xl/workbook.xml" ContentType="application/vnd.ms-excel.sheet.macroEnabled.main+xml"/>
  <Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

    #[test]
    fn workbook_part_is_found_for_macro_enabled_packages() {
        let ct = ContentTypes::parse(SAMPLE).unwrap();
        assert_eq!(ct.workbook_part(), Some("xl/workbook.xml"));
    }

    #[test]
    fn overrides_can_be_patched() {
        let mut ct = ContentTypes::parse(SAMPLE).unwrap();
        ct.set_override("xl/sharedStrings.xml", CT_SHARED_STRINGS);
        assert!(ct.remove_override("xl/worksheets/sheet1.xml"));
        assert!(!ct.remove_override("xl/worksheets/sheet1.xml"));

        let bytes = ct.to_xml().to_xml_bytes(false).unwrap();
        let reparsed = ContentTypes::parse(&bytes).unwrap();
        assert_eq!(reparsed, ct);
        assert_eq!(
            reparsed.overrides,
            vec![(
                "/xl/sharedStrings.xml".to_string(),
                CT_SHARED_STRINGS.to_string()
            )]
        );
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = ContentTypes::parse(b"<Relationships/>").unwrap_err();
        assert!(matches!(err, XlsxError::Parse { .. }));
    }
}
