//! Surgical writer: rewrites the container a document was read from.
//!
//! Sheets the tracking context does not name are copied as raw compressed bytes. Regenerated
//! sheets keep their part names, the style and shared string parts are parsed from the source
//! and only appended to, and workbook-level parts are rebuilt from their source trees only when
//! the sheet list or workbook metadata changed. Every entry that is not replaced or dropped is
//! copied verbatim, in source order.

use std::collections::{HashMap, HashSet};
use std::io::{Seek, Write};

use log::debug;
use tabula_model::{DateSystem, SheetVisibility, Workbook};

use crate::container::{normalized_part_name, ContainerWriter};
use crate::content_types::{
    ContentTypes, CONTENT_TYPES_PART, CT_COMMENTS, CT_SHARED_STRINGS, CT_STYLES, CT_WORKSHEET,
};
use crate::document::SourceContext;
use crate::error::XlsxError;
use crate::options::WriteOptions;
use crate::parts::PartRegistry;
use crate::relationships::{self, rels_part_for, relative_target, resolve_target, Relationships};
use crate::shared_strings::SharedStrings;
use crate::styles::StyleRegistry;
use crate::write::{
    defined_names_element, sheet_element, write_workbook, WritePass, SHARED_STRINGS_PART,
    STYLES_PART,
};
use crate::xml::{XmlElement, XmlNode, NS_REL};

const CALC_CHAIN: &str = "calcChain";

pub(crate) fn write_surgical<W: Write + Seek>(
    workbook: &Workbook,
    source: &SourceContext,
    writer: W,
    options: &WriteOptions,
) -> Result<W, XlsxError> {
    if workbook.sheets.is_empty() {
        return Err(XlsxError::InvalidWorkbook(
            "a workbook needs at least one sheet".to_string(),
        ));
    }
    let mut container = source.source.open(&source.read_options)?;
    let registry = PartRegistry::discover(&mut container)?;
    let origins = source.sheet_origins();
    if !origins_consistent(origins, workbook.sheets.len(), registry.sheets().len()) {
        debug!("sheet origins no longer match the source container; regenerating every part");
        drop(container);
        return write_workbook(workbook, writer, options);
    }
    let tracking = source.tracking();
    let pretty = options.pretty_print;
    let workbook_part = registry.workbook_part().to_string();

    let entry_names = container.entry_names();
    let mut names = NameAllocator::new(&entry_names);
    let mut patch = Patch::default();
    let mut content_types = registry.content_types.clone();
    let mut workbook_rels = registry.workbook_rels.clone();

    // Source sheets whose parts survive untouched, and those whose parts are released.
    let mut kept = HashSet::new();
    let mut released = Vec::new();
    for (idx, origin) in origins.iter().enumerate() {
        if let Some(o) = *origin {
            if tracking.is_sheet_modified(idx) {
                released.push(o);
            } else {
                kept.insert(o);
            }
        }
    }
    let deleted: Vec<usize> = (0..registry.sheets().len())
        .filter(|o| !origins.contains(&Some(*o)))
        .collect();
    released.extend(&deleted);

    let mut sheet_rels = HashMap::new();
    for (o, entry) in registry.sheets().iter().enumerate() {
        let part = rels_part_for(&entry.part);
        if let Some(bytes) = container.read_entry_optional(&part)? {
            sheet_rels.insert(o, (part.clone(), Relationships::parse(&bytes, &part)?));
        }
    }
    let still_referenced: HashSet<String> = kept
        .iter()
        .filter_map(|o| sheet_rels.get(o).map(|rels| (*o, rels)))
        .flat_map(|(o, (_, rels))| internal_targets(&registry.sheets()[o].part, rels))
        .collect();
    for &o in &released {
        let entry = &registry.sheets()[o];
        let Some((rels_part, rels)) = sheet_rels.get(&o) else {
            continue;
        };
        patch.omit(rels_part);
        for rel in rels.iter().filter(|r| !r.is_external()) {
            if !(rel.is_kind(relationships::COMMENTS) || rel.is_kind(relationships::VML_DRAWING)) {
                continue;
            }
            let target = resolve_target(&entry.part, &rel.target);
            if !still_referenced.contains(&normalized_part_name(&target)) {
                patch.omit(&target);
                content_types.remove_override(&target);
            }
        }
    }
    for &o in &deleted {
        let entry = &registry.sheets()[o];
        debug!("dropping deleted sheet {} ({})", entry.name, entry.part);
        patch.omit(&entry.part);
        content_types.remove_override(&entry.part);
        workbook_rels.retain(|r| r.id != entry.rel_id);
    }

    let styles = match &registry.styles_part {
        Some(part) => StyleRegistry::parse(&container.read_entry(part)?, part)?,
        None => StyleRegistry::new(),
    };
    let strings = match &registry.shared_strings_part {
        Some(part) => SharedStrings::parse(container.read_entry(part)?.as_slice(), part)?,
        None => SharedStrings::new(),
    };
    let mut pass = WritePass::new(workbook, styles, strings, pretty);

    let mut rel_ids = Vec::with_capacity(workbook.sheets.len());
    for (idx, sheet) in workbook.sheets.iter().enumerate() {
        let (part, rel_id) = match origins[idx] {
            Some(o) => {
                let entry = &registry.sheets()[o];
                (entry.part.clone(), entry.rel_id.clone())
            }
            None => {
                let part = names.fresh("xl/worksheets/sheet");
                content_types.set_override(&part, CT_WORKSHEET);
                let rel_id = workbook_rels.add(
                    relationships::WORKSHEET,
                    relative_target(&workbook_part, &part),
                    false,
                );
                (part, rel_id)
            }
        };
        rel_ids.push(rel_id);
        if origins[idx].is_some() && !tracking.is_sheet_modified(idx) {
            debug!("copying {part} verbatim");
            continue;
        }

        debug!("regenerating {part}");
        let has_comments = sheet.iter_cells().any(|(_, cell)| cell.comment.is_some());
        let comments_part = if has_comments {
            names.fresh("xl/comments")
        } else {
            String::new()
        };
        let rendered = pass.render_sheet(sheet, idx, &part, &comments_part)?;
        patch.replace(&part, rendered.xml);
        if !rendered.rels.is_empty() {
            patch.replace(&rels_part_for(&part), rendered.rels.to_xml().to_xml_bytes(pretty)?);
        }
        if let Some(comments) = rendered.comments {
            content_types.set_override(&comments_part, CT_COMMENTS);
            patch.replace(&comments_part, comments);
        }
    }

    if pass.styles.is_dirty() {
        let part = shared_part(
            registry.styles_part.as_deref(),
            STYLES_PART,
            relationships::STYLES,
            CT_STYLES,
            &workbook_part,
            &mut names,
            &mut workbook_rels,
            &mut content_types,
        );
        debug!("style registry gained records; regenerating {part}");
        patch.replace(&part, pass.styles.to_xml_bytes(pretty)?);
    }
    if pass.strings.is_dirty() {
        let part = shared_part(
            registry.shared_strings_part.as_deref(),
            SHARED_STRINGS_PART,
            relationships::SHARED_STRINGS,
            CT_SHARED_STRINGS,
            &workbook_part,
            &mut names,
            &mut workbook_rels,
            &mut content_types,
        );
        debug!("shared string table gained items; regenerating {part}");
        patch.replace(&part, pass.strings.to_xml(None).to_xml_bytes(pretty)?);
    }

    // Regenerated formulas invalidate the calculation chain.
    let calc_chain_dropped = !released.is_empty()
        && drop_calc_chain(&mut patch, &registry, &mut workbook_rels, &mut content_types);

    let reordered = origins
        .iter()
        .flatten()
        .zip(origins.iter().flatten().skip(1))
        .any(|(a, b)| a > b);
    let sheets_changed = origins.iter().any(Option::is_none) || !deleted.is_empty() || reordered;
    if sheets_changed || tracking.workbook_changed() || calc_chain_dropped {
        debug!("regenerating {workbook_part}");
        let manifest = patch_manifest(&registry, workbook, &rel_ids, calc_chain_dropped);
        patch.replace(&workbook_part, manifest.to_xml_bytes(pretty)?);
    }
    if workbook_rels != registry.workbook_rels {
        patch.replace(
            &rels_part_for(&workbook_part),
            workbook_rels.to_xml().to_xml_bytes(pretty)?,
        );
    }
    if content_types != registry.content_types {
        patch.replace(CONTENT_TYPES_PART, content_types.to_xml().to_xml_bytes(pretty)?);
    }

    let mut out = ContainerWriter::new(writer, options.compression);
    let mut emitted = vec![false; patch.replaced.len()];
    for name in &entry_names {
        let key = normalized_part_name(name);
        if let Some(&idx) = patch.index.get(&key) {
            if !emitted[idx] {
                out.write_entry(name, &patch.replaced[idx].1)?;
                emitted[idx] = true;
            }
            continue;
        }
        if patch.dropped.contains(&key) {
            debug!("dropping {name}");
            continue;
        }
        out.copy_entry_verbatim(&mut container, name)?;
    }
    for ((name, bytes), done) in patch.replaced.iter().zip(emitted) {
        if !done {
            out.write_entry(name, bytes)?;
        }
    }
    out.finish()
}

fn origins_consistent(origins: &[Option<usize>], sheets: usize, source_sheets: usize) -> bool {
    let mut seen = HashSet::new();
    origins.len() == sheets
        && origins
            .iter()
            .flatten()
            .all(|&o| o < source_sheets && seen.insert(o))
}

/// Normalized names of the package parts `rels` points at.
fn internal_targets<'a>(
    source_part: &'a str,
    rels: &'a Relationships,
) -> impl Iterator<Item = String> + 'a {
    rels.iter()
        .filter(|r| !r.is_external())
        .map(move |r| normalized_part_name(&resolve_target(source_part, &r.target)))
}

/// Entries replaced with regenerated bytes and entries left out of the output.
#[derive(Default)]
struct Patch {
    replaced: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
    dropped: HashSet<String>,
}

impl Patch {
    fn replace(&mut self, name: &str, bytes: Vec<u8>) {
        let key = normalized_part_name(name);
        match self.index.get(&key) {
            Some(&idx) => self.replaced[idx].1 = bytes,
            None => {
                self.index.insert(key, self.replaced.len());
                self.replaced.push((name.to_string(), bytes));
            }
        }
    }

    fn omit(&mut self, name: &str) {
        self.dropped.insert(normalized_part_name(name));
    }
}

/// Hands out part names that collide with no source entry and no earlier allocation.
struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    fn new(entries: &[String]) -> Self {
        Self {
            taken: entries.iter().map(|n| normalized_part_name(n)).collect(),
        }
    }

    /// `{stem}{n}.xml` for the smallest free `n`.
    fn fresh(&mut self, stem: &str) -> String {
        let mut n = 1;
        loop {
            let name = format!("{stem}{n}.xml");
            if self.taken.insert(normalized_part_name(&name)) {
                return name;
            }
            n += 1;
        }
    }

    /// `preferred` if free, otherwise a fresh name derived from it.
    fn claim(&mut self, preferred: &str) -> String {
        if self.taken.insert(normalized_part_name(preferred)) {
            return preferred.to_string();
        }
        self.fresh(preferred.trim_end_matches(".xml"))
    }
}

/// Name of a workbook-level part about to be regenerated; parts the source lacked are added to
/// the workbook relationships and the content types.
#[allow(clippy::too_many_arguments)]
fn shared_part(
    existing: Option<&str>,
    preferred: &str,
    kind: &str,
    content_type: &str,
    workbook_part: &str,
    names: &mut NameAllocator,
    workbook_rels: &mut Relationships,
    content_types: &mut ContentTypes,
) -> String {
    if let Some(part) = existing {
        return part.to_string();
    }
    let part = names.claim(preferred);
    workbook_rels.add(kind, relative_target(workbook_part, &part), false);
    content_types.set_override(&part, content_type);
    part
}

fn drop_calc_chain(
    patch: &mut Patch,
    registry: &PartRegistry,
    workbook_rels: &mut Relationships,
    content_types: &mut ContentTypes,
) -> bool {
    let Some(rel) = workbook_rels
        .iter()
        .find(|r| r.is_kind(CALC_CHAIN) && !r.is_external())
        .cloned()
    else {
        return false;
    };
    let part = resolve_target(registry.workbook_part(), &rel.target);
    debug!("dropping calculation chain {part}");
    patch.omit(&part);
    content_types.remove_override(&part);
    workbook_rels.retain(|r| r.id != rel.id);
    true
}

/// The source manifest with the current sheet list, metadata and defined names.
///
/// Unknown workbook content is kept. Non-worksheet `<sheet>` entries follow the worksheets.
fn patch_manifest(
    registry: &PartRegistry,
    workbook: &Workbook,
    rel_ids: &[String],
    full_calc_on_load: bool,
) -> XmlElement {
    let mut root = registry.manifest.clone();
    let prefix = root
        .name
        .split_once(':')
        .map_or(String::new(), |(p, _)| format!("{p}:"));
    let rel_prefix = relationships_prefix(&mut root);

    let date1904 = workbook.date_system == DateSystem::Excel1904;
    match root.child_mut("workbookPr") {
        Some(pr) if date1904 => pr.set_attr("date1904", "1"),
        Some(pr) => pr.remove_attr("date1904"),
        None if date1904 => insert_after(
            &mut root,
            XmlElement::new(format!("{prefix}workbookPr")).with_attr("date1904", "1"),
            &["fileVersion", "fileSharing"],
        ),
        None => {}
    }

    let active = workbook.active_sheet.to_string();
    match root
        .child_mut("bookViews")
        .and_then(|views| views.child_mut("workbookView"))
    {
        Some(view) => view.set_attr("activeTab", active),
        None if workbook.active_sheet != 0 => insert_after(
            &mut root,
            XmlElement::new(format!("{prefix}bookViews")).with_child(
                XmlElement::new(format!("{prefix}workbookView")).with_attr("activeTab", active),
            ),
            &["fileVersion", "fileSharing", "workbookPr", "workbookProtection"],
        ),
        None => {}
    }

    let source_entries: Vec<XmlElement> = root
        .child("sheets")
        .map(|s| s.children_by_local("sheet").cloned().collect())
        .unwrap_or_default();
    let worksheet_ids: HashSet<&str> = registry
        .sheets()
        .iter()
        .map(|s| s.rel_id.as_str())
        .collect();
    let mut next_sheet_id = source_entries
        .iter()
        .filter_map(|s| s.attr("sheetId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    let mut sheets = XmlElement::new(format!("{prefix}sheets"));
    for (sheet, rel_id) in workbook.sheets.iter().zip(rel_ids) {
        let existing = source_entries
            .iter()
            .find(|s| s.rel_id() == Some(rel_id.as_str()));
        let el = match existing {
            Some(el) => {
                let mut el = el.clone();
                el.set_attr("name", sheet.name.as_str());
                match sheet.visibility {
                    SheetVisibility::Visible => el.remove_attr("state"),
                    SheetVisibility::Hidden => el.set_attr("state", "hidden"),
                    SheetVisibility::VeryHidden => el.set_attr("state", "veryHidden"),
                }
                el
            }
            None => {
                next_sheet_id += 1;
                let mut el =
                    sheet_element(&format!("{prefix}sheet"), sheet, next_sheet_id, rel_id);
                if rel_prefix != "r" {
                    el.remove_attr("r:id");
                    el.set_attr(&format!("{rel_prefix}:id"), rel_id.as_str());
                }
                el
            }
        };
        sheets.push(el);
    }
    for other in source_entries
        .iter()
        .filter(|s| s.rel_id().is_some_and(|id| !worksheet_ids.contains(id)))
    {
        sheets.push(other.clone());
    }
    replace_child(&mut root, sheets, &[]);

    root.children.retain(|node| {
        !matches!(node, XmlNode::Element(el) if el.local_name() == "definedNames")
    });
    if let Some(names) = defined_names_element(&prefix, &workbook.defined_names) {
        insert_after(
            &mut root,
            names,
            &["sheets", "functionGroups", "externalReferences"],
        );
    }

    if full_calc_on_load {
        match root.child_mut("calcPr") {
            Some(calc) => calc.set_attr("fullCalcOnLoad", "1"),
            None => insert_after(
                &mut root,
                XmlElement::new(format!("{prefix}calcPr")).with_attr("fullCalcOnLoad", "1"),
                &[
                    "sheets",
                    "functionGroups",
                    "externalReferences",
                    "definedNames",
                ],
            ),
        }
    }
    root
}

/// Prefix bound to the relationships namespace on `root`, declaring `r` when none is.
fn relationships_prefix(root: &mut XmlElement) -> String {
    let bound = root.attrs.iter().find_map(|(k, v)| {
        (v == NS_REL)
            .then(|| k.strip_prefix("xmlns:"))
            .flatten()
            .map(str::to_string)
    });
    match bound {
        Some(prefix) => prefix,
        None => {
            root.set_attr("xmlns:r", NS_REL);
            "r".to_string()
        }
    }
}

/// Insert `child` after the last element named in `preceding`, or first when none is present.
fn insert_after(root: &mut XmlElement, child: XmlElement, preceding: &[&str]) {
    let at = root
        .children
        .iter()
        .rposition(|node| {
            matches!(node, XmlNode::Element(el) if preceding.contains(&el.local_name()))
        })
        .map_or(0, |idx| idx + 1);
    root.children.insert(at, XmlNode::Element(child));
}

/// Replace the child with `child`'s local name in place, or insert it after `preceding`.
fn replace_child(root: &mut XmlElement, child: XmlElement, preceding: &[&str]) {
    let local = child.local_name().to_string();
    match root
        .children
        .iter_mut()
        .find(|node| matches!(node, XmlNode::Element(el) if el.local_name() == local))
    {
        Some(slot) => *slot = XmlNode::Element(child),
        None => insert_after(root, child, preceding),
    }
}
