//! Part registry: binds logical roles to container entry names.
//!
//! Discovery runs in a fixed order: content types, package relationships (falling back to the
//! content-type override for the main part), workbook relationships, then the workbook
//! manifest. Every referenced part must resolve to exactly one entry.

use std::io::{Read, Seek};

use log::debug;
use tabula_model::SheetVisibility;

use crate::container::Container;
use crate::content_types::{ContentTypes, CONTENT_TYPES_PART};
use crate::error::{ReadWarning, XlsxError};
use crate::relationships::{self, rels_part_for, resolve_target, Relationships};
use crate::xml::XmlElement;

const PACKAGE_RELS_PART: &str = "_rels/.rels";

/// Logical role of a part.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartRole {
    ContentTypes,
    PackageRelationships,
    Workbook,
    WorkbookRelationships,
    Styles,
    SharedStrings,
    Sheet(usize),
    SheetRelationships(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    /// Container entry name of the worksheet part.
    pub part: String,
    pub visibility: SheetVisibility,
}

#[derive(Clone, Debug)]
pub struct PartRegistry {
    pub(crate) content_types: ContentTypes,
    pub(crate) workbook_part: String,
    pub(crate) workbook_rels: Relationships,
    pub(crate) manifest: XmlElement,
    pub(crate) sheets: Vec<SheetEntry>,
    pub(crate) styles_part: Option<String>,
    pub(crate) shared_strings_part: Option<String>,
    pub(crate) warnings: Vec<ReadWarning>,
}

impl PartRegistry {
    pub fn discover<R: Read + Seek>(container: &mut Container<R>) -> Result<Self, XlsxError> {
        let content_types = ContentTypes::parse(&container.read_entry(CONTENT_TYPES_PART)?)?;

        let workbook_part = locate_workbook(container, &content_types)?;
        let workbook_part = container.resolve_name(&workbook_part)?.ok_or_else(|| {
            XlsxError::malformed(format!("workbook part {workbook_part} is missing"))
        })?;
        debug!("workbook part resolved to {workbook_part}");

        let workbook_rels_part = rels_part_for(&workbook_part);
        let workbook_rels = Relationships::parse(
            &container.read_entry(&workbook_rels_part)?,
            &workbook_rels_part,
        )?;

        let manifest = XmlElement::parse(&container.read_entry(&workbook_part)?, &workbook_part)?;
        if manifest.local_name() != "workbook" {
            return Err(XlsxError::parse(
                &workbook_part,
                0,
                format!("expected <workbook>, found <{}>", manifest.name),
            ));
        }

        let mut warnings = Vec::new();
        let mut sheets = Vec::new();
        let listed = manifest
            .child("sheets")
            .ok_or_else(|| XlsxError::malformed("workbook manifest has no <sheets>"))?;
        for sheet in listed.children_by_local("sheet") {
            let name = sheet
                .attr("name")
                .ok_or_else(|| XlsxError::parse(&workbook_part, 0, "<sheet> without a name"))?;
            let rel_id = sheet.rel_id().ok_or_else(|| {
                XlsxError::parse(&workbook_part, 0, format!("sheet {name} has no r:id"))
            })?;
            let rel = workbook_rels.get(rel_id).ok_or_else(|| {
                XlsxError::malformed(format!("sheet {name} references unknown relationship {rel_id}"))
            })?;
            if !rel.is_kind(relationships::WORKSHEET) {
                warnings.push(ReadWarning::unsupported(
                    &workbook_part,
                    format!("non-worksheet sheet {name} ({})", rel.type_uri),
                ));
                continue;
            }
            let target = resolve_target(&workbook_part, &rel.target);
            let part = container.resolve_name(&target)?.ok_or_else(|| {
                XlsxError::malformed(format!("sheet {name} part {target} is missing"))
            })?;
            let visibility = match sheet.attr("state") {
                Some("hidden") => SheetVisibility::Hidden,
                Some("veryHidden") => SheetVisibility::VeryHidden,
                _ => SheetVisibility::Visible,
            };
            debug!("sheet {name} resolved to {part}");
            sheets.push(SheetEntry {
                name: name.to_string(),
                sheet_id: sheet
                    .attr("sheetId")
                    .and_then(|id| id.parse().ok())
                    .unwrap_or(0),
                rel_id: rel_id.to_string(),
                part,
                visibility,
            });
        }
        if sheets.is_empty() {
            return Err(XlsxError::malformed("workbook contains no worksheets"));
        }

        let styles_part =
            optional_part(container, &workbook_part, &workbook_rels, relationships::STYLES)?;
        let shared_strings_part = optional_part(
            container,
            &workbook_part,
            &workbook_rels,
            relationships::SHARED_STRINGS,
        )?;

        for (child, feature) in [
            ("externalReferences", "external links"),
            ("pivotCaches", "pivot caches"),
        ] {
            if manifest.child(child).is_some() {
                warnings.push(ReadWarning::unsupported(&workbook_part, feature));
            }
        }
        if workbook_rels.first_of_kind("vbaProject").is_some() {
            warnings.push(ReadWarning::unsupported(&workbook_part, "VBA project"));
        }

        Ok(Self {
            content_types,
            workbook_part,
            workbook_rels,
            manifest,
            sheets,
            styles_part,
            shared_strings_part,
            warnings,
        })
    }

    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    pub fn workbook_part(&self) -> &str {
        &self.workbook_part
    }

    /// Entry name bound to `role`, if the package has one.
    pub fn resolve(&self, role: PartRole) -> Option<String> {
        match role {
            PartRole::ContentTypes => Some(CONTENT_TYPES_PART.to_string()),
            PartRole::PackageRelationships => Some(PACKAGE_RELS_PART.to_string()),
            PartRole::Workbook => Some(self.workbook_part.clone()),
            PartRole::WorkbookRelationships => Some(rels_part_for(&self.workbook_part)),
            PartRole::Styles => self.styles_part.clone(),
            PartRole::SharedStrings => self.shared_strings_part.clone(),
            PartRole::Sheet(idx) => self.sheets.get(idx).map(|s| s.part.clone()),
            PartRole::SheetRelationships(idx) => {
                self.sheets.get(idx).map(|s| rels_part_for(&s.part))
            }
        }
    }

    /// Index of the sheet named `name` (case-insensitive).
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        let folded = name.to_lowercase();
        self.sheets
            .iter()
            .position(|s| s.name.to_lowercase() == folded)
    }
}

fn locate_workbook<R: Read + Seek>(
    container: &mut Container<R>,
    content_types: &ContentTypes,
) -> Result<String, XlsxError> {
    if let Some(bytes) = container.read_entry_optional(PACKAGE_RELS_PART)? {
        let rels = Relationships::parse(&bytes, PACKAGE_RELS_PART)?;
        if let Some(rel) = rels.first_of_kind(relationships::OFFICE_DOCUMENT) {
            return Ok(resolve_target("", &rel.target));
        }
    }
    debug!("no officeDocument relationship; using the content-type override");
    content_types
        .workbook_part()
        .map(str::to_string)
        .ok_or_else(|| XlsxError::malformed("package has no workbook part"))
}

fn optional_part<R: Read + Seek>(
    container: &Container<R>,
    workbook_part: &str,
    rels: &Relationships,
    kind: &str,
) -> Result<Option<String>, XlsxError> {
    let Some(rel) = rels.first_of_kind(kind) else {
        return Ok(None);
    };
    let target = resolve_target(workbook_part, &rel.target);
    let resolved = container.resolve_name(&target)?;
    if resolved.is_none() {
        debug!("{kind} relationship points at missing part {target}");
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::container::ContainerWriter;
    use crate::options::{Compression, ReadOptions};

    const CONTENT_TYPES: &[u8] = br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
</Types>"#;

    const WORKBOOK_RELS: &[u8] = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

    const WORKBOOK: &[u8] = br#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="First" sheetId="1" r:id="rId1"/><sheet name="Second" sheetId="5" state="hidden" r:id="rId2"/></sheets>
</workbook>"#;

    fn package(entries: &[(&str, &[u8])]) -> Container<Cursor<Vec<u8>>> {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new()), Compression::Deflated);
        for (name, bytes) in entries {
            writer.write_entry(name, bytes).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();
        Container::from_reader(Cursor::new(bytes), &ReadOptions::default()).unwrap()
    }

    #[test]
    fn discovers_without_package_rels_and_with_odd_names() {
        let mut container = package(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", b"<worksheet/>"),
            ("XL/Worksheets/Sheet2.xml", b"<worksheet/>"),
        ]);
        let parts = PartRegistry::discover(&mut container).unwrap();
        assert_eq!(parts.sheets().len(), 2);
        assert_eq!(parts.sheets()[1].part, "XL/Worksheets/Sheet2.xml");
        assert_eq!(parts.sheets()[1].visibility, SheetVisibility::Hidden);
        assert_eq!(parts.sheets()[1].sheet_id, 5);
        assert_eq!(parts.resolve(PartRole::Styles), None);
        assert_eq!(
            parts.resolve(PartRole::SheetRelationships(0)).as_deref(),
            Some("xl/worksheets/_rels/sheet1.xml.rels")
        );
        assert_eq!(parts.sheet_index("second"), Some(1));
    }

    #[test]
    fn missing_sheet_part_is_malformed() {
        let mut container = package(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", b"<worksheet/>"),
        ]);
        let err = PartRegistry::discover(&mut container).unwrap_err();
        assert!(matches!(err, XlsxError::MalformedDocument(_)), "{err:?}");
    }

    #[test]
    fn missing_manifest_is_malformed() {
        let mut container = package(&[("[Content_Types].xml", CONTENT_TYPES)]);
        let err = PartRegistry::discover(&mut container).unwrap_err();
        assert!(matches!(err, XlsxError::MalformedDocument(_)), "{err:?}");
    }

    #[test]
    fn workbook_without_sheets_is_malformed() {
        let mut container = package(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", b"<workbook><sheets/></workbook>"),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ]);
        let err = PartRegistry::discover(&mut container).unwrap_err();
        assert!(matches!(err, XlsxError::MalformedDocument(_)), "{err:?}");
    }
}
