//
// manifest.rs
//
// Parsed representation of one bundle manifest document
//
// A manifest declares a bundle's name, version and components; components
// provide named services and reference services provided elsewhere. This
// module extracts those declarations as position-annotated fragments and
// builds the per-document lookup indices the workspace index derives from.
//

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::jsonc::{self, Node};
use crate::line_index::{LineIndex, LinePos};
use crate::multi_value_index::MultiValueIndex;

/// Role of a fragment within the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Provides,
    ReferenceProviding,
    Reference,
    Component,
    Unknown,
}

/// Source span of a fragment, as inclusive line bounds with column bounds
/// applied only on the boundary lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Section {
    pub start: LinePos,
    pub end: LinePos,
}

impl Section {
    pub fn contains(&self, line: usize, col: usize) -> bool {
        if line < self.start.line || line > self.end.line {
            return false;
        }
        if line == self.start.line && col < self.start.col {
            return false;
        }
        if line == self.end.line && col > self.end.col {
            return false;
        }
        true
    }
}

/// A parsed leaf value: one string (or scalar) property of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringFragment {
    /// JSON property name this value belongs to ("name", "provides", ...).
    pub key: String,
    pub value: String,
    pub section: Section,
    pub value_type: ValueType,
}

impl StringFragment {
    fn new(key: &str, value: String, section: Section, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            value,
            section,
            value_type,
        }
    }
}

/// One entry of a component's `references` array.
///
/// Only references that carry a `providing` value participate in
/// cross-referencing; the parser drops entries without one, so a
/// constructed fragment always knows which service it consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFragment {
    name: StringFragment,
    providing: Option<StringFragment>,
    section: Section,
}

impl ReferenceFragment {
    pub fn name(&self) -> &StringFragment {
        &self.name
    }

    pub fn providing(&self) -> Option<&StringFragment> {
        self.providing.as_ref()
    }

    pub fn has_providing(&self) -> bool {
        self.providing.is_some()
    }

    pub fn section(&self) -> Section {
        self.section
    }
}

/// One entry of a manifest's `components` array. Owns its provides and
/// reference fragments exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentFragment {
    name: Option<StringFragment>,
    impl_hint: Option<StringFragment>,
    provides: Vec<StringFragment>,
    references: Vec<ReferenceFragment>,
    section: Section,
}

impl ComponentFragment {
    pub fn name(&self) -> Option<&StringFragment> {
        self.name.as_ref()
    }

    /// Optional explicit implementation-file hint.
    pub fn impl_hint(&self) -> Option<&StringFragment> {
        self.impl_hint.as_ref()
    }

    pub fn provides(&self) -> &[StringFragment] {
        &self.provides
    }

    /// The provides fragment for a given service name, if this component
    /// declares it.
    pub fn provides_fragment(&self, service_name: &str) -> Option<&StringFragment> {
        self.provides.iter().find(|f| f.value == service_name)
    }

    pub fn references(&self) -> &[ReferenceFragment] {
        &self.references
    }

    /// All references of this component consuming the given service name.
    pub fn references_ask_providing(&self, service_name: &str) -> Vec<&ReferenceFragment> {
        self.references
            .iter()
            .filter(|r| {
                r.providing()
                    .is_some_and(|p| p.value == service_name)
            })
            .collect()
    }

    pub fn section(&self) -> Section {
        self.section
    }
}

// Process-wide counter backing synthetic names for manifests without a
// `name` field. Reset only at process start so placeholders stay unique
// across rebuilds within one session.
static UNKNOWN_NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_unknown_name() -> String {
    let n = UNKNOWN_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("unknown-name-{n}")
}

/// Immutable parsed manifest. Constructed once from raw text; a re-parse
/// produces a replacement document rather than mutating in place.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    name: String,
    version: String,
    components: Vec<ComponentFragment>,
    /// service name -> positions of providing components in `components`
    servicename_to_components: MultiValueIndex<String, usize>,
    /// service name -> (component position, reference position)
    servicename_to_references: MultiValueIndex<String, (usize, usize)>,
    servicename_to_provides: MultiValueIndex<String, StringFragment>,
    servicename_to_providing: MultiValueIndex<String, StringFragment>,
    /// start line -> provides/providing fragments on that line
    line_to_fragments: MultiValueIndex<usize, StringFragment>,
    all_service_names: HashSet<String>,
}

impl ManifestDocument {
    /// Parse manifest text. Any malformed-JSON failure surfaces here;
    /// callers treat an `Err` as "no document" and keep going.
    ///
    /// A well-formed document with an unexpected shape (no `name`, no
    /// `components`, non-object root) still parses: missing fields fall
    /// back to a synthetic name, an empty version and zero components.
    pub fn parse(text: &str) -> anyhow::Result<ManifestDocument> {
        let line_index = LineIndex::new(text);
        let root = jsonc::parse(text)?;

        let mut doc = ManifestDocument {
            name: String::new(),
            version: String::new(),
            components: Vec::new(),
            servicename_to_components: MultiValueIndex::new(),
            servicename_to_references: MultiValueIndex::new(),
            servicename_to_provides: MultiValueIndex::new(),
            servicename_to_providing: MultiValueIndex::new(),
            line_to_fragments: MultiValueIndex::new(),
            all_service_names: HashSet::new(),
        };

        doc.name = lookup_scalar(&root, "name", "Bundle-SymbolicName")
            .unwrap_or_else(next_unknown_name);
        doc.version = lookup_scalar(&root, "version", "Bundle-Version").unwrap_or_default();
        doc.parse_components(&root, &line_index);

        Ok(doc)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn components(&self) -> &[ComponentFragment] {
        &self.components
    }

    /// Components declaring `service_name` in their provides list, in
    /// document order.
    pub fn components_for(&self, service_name: &str) -> Vec<&ComponentFragment> {
        let mut positions: Vec<usize> = self
            .servicename_to_components
            .get_values(service_name)
            .into_iter()
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|i| &self.components[i]).collect()
    }

    /// References consuming `service_name`, in document order.
    pub fn references_for(&self, service_name: &str) -> Vec<&ReferenceFragment> {
        let mut positions: Vec<(usize, usize)> = self
            .servicename_to_references
            .get_values(service_name)
            .into_iter()
            .collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .map(|(ci, ri)| &self.components[ci].references[ri])
            .collect()
    }

    /// All `provides` fragments for a service name across this document.
    pub fn provides_for(&self, service_name: &str) -> HashSet<StringFragment> {
        self.servicename_to_provides.get_values(service_name)
    }

    /// All `providing` fragments for a service name across this document.
    pub fn providing_for(&self, service_name: &str) -> HashSet<StringFragment> {
        self.servicename_to_providing.get_values(service_name)
    }

    /// Every distinct service name this document provides or consumes.
    pub fn service_names(&self) -> &HashSet<String> {
        &self.all_service_names
    }

    /// Provides/providing fragments whose section starts on `line`.
    pub fn string_fragments_on_line(&self, line: usize) -> HashSet<StringFragment> {
        self.line_to_fragments.get_values(&line)
    }

    /// Lines holding at least one provides/providing fragment.
    pub fn string_fragment_lines(&self) -> Vec<usize> {
        let mut lines: Vec<usize> = self.line_to_fragments.keys().copied().collect();
        lines.sort_unstable();
        lines
    }

    fn parse_components(&mut self, root: &Node, line_index: &LineIndex) {
        let components_node = match root.get("components").or_else(|| root.get("Components")) {
            Some(node) => node,
            None => return,
        };
        let items = match components_node.items() {
            Some(items) => items,
            None => return,
        };

        for component_node in items {
            // A component cannot exist without a name; nameless entries
            // contribute nothing.
            let name_fragment = component_node
                .get("name")
                .and_then(|n| scalar_fragment("name", n, ValueType::Unknown, line_index));
            let Some(name_fragment) = name_fragment else {
                continue;
            };

            let impl_hint = component_node
                .get("impl")
                .and_then(|n| scalar_fragment("impl", n, ValueType::Unknown, line_index));

            let provides = self.parse_provides(component_node, line_index);
            let references = self.parse_references(component_node, line_index);

            let position = self.components.len();
            for fragment in &provides {
                self.servicename_to_components
                    .index(fragment.value.clone(), position);
                self.all_service_names.insert(fragment.value.clone());
            }
            for (ref_position, reference) in references.iter().enumerate() {
                if let Some(providing) = reference.providing() {
                    self.servicename_to_references
                        .index(providing.value.clone(), (position, ref_position));
                    self.all_service_names.insert(providing.value.clone());
                }
            }

            self.components.push(ComponentFragment {
                name: Some(name_fragment),
                impl_hint,
                provides,
                references,
                section: section_for(component_node, line_index),
            });
        }
    }

    /// `provides` comes in two shapes: a bare string or an array of
    /// strings. Both normalize to a list of fragments.
    fn parse_provides(&mut self, component_node: &Node, line_index: &LineIndex) -> Vec<StringFragment> {
        let provides_node = match component_node.get("provides") {
            Some(node) => node,
            None => return Vec::new(),
        };
        let nodes: Vec<&Node> = if provides_node.is_array() {
            provides_node.items().unwrap_or(&[]).iter().collect()
        } else {
            vec![provides_node]
        };
        nodes
            .into_iter()
            .filter_map(|node| self.register_fragment("provides", node, ValueType::Provides, line_index))
            .collect()
    }

    fn parse_references(
        &mut self,
        component_node: &Node,
        line_index: &LineIndex,
    ) -> Vec<ReferenceFragment> {
        let references_node = match component_node.get("references") {
            Some(node) => node,
            None => return Vec::new(),
        };
        let items = match references_node.items() {
            Some(items) => items,
            None => return Vec::new(),
        };

        let mut references = Vec::new();
        for reference_node in items {
            // Entries need both a name and a providing value; anything
            // else is dropped rather than kept with placeholders.
            let name = reference_node
                .get("name")
                .and_then(|n| scalar_fragment("name", n, ValueType::Unknown, line_index));
            let Some(name) = name else {
                continue;
            };
            let providing = reference_node.get("providing").and_then(|n| {
                self.register_fragment("providing", n, ValueType::ReferenceProviding, line_index)
            });
            let Some(providing) = providing else {
                continue;
            };
            references.push(ReferenceFragment {
                name,
                providing: Some(providing),
                section: section_for(reference_node, line_index),
            });
        }
        references
    }

    /// Build a provides/providing fragment and register it in the
    /// per-service and per-line indices.
    fn register_fragment(
        &mut self,
        key: &str,
        node: &Node,
        value_type: ValueType,
        line_index: &LineIndex,
    ) -> Option<StringFragment> {
        let fragment = scalar_fragment(key, node, value_type, line_index)?;
        match value_type {
            ValueType::Provides => {
                self.servicename_to_provides
                    .index(fragment.value.clone(), fragment.clone());
            }
            ValueType::ReferenceProviding => {
                self.servicename_to_providing
                    .index(fragment.value.clone(), fragment.clone());
            }
            _ => {}
        }
        self.line_to_fragments
            .index(fragment.section.start.line, fragment.clone());
        Some(fragment)
    }
}

fn lookup_scalar(root: &Node, key: &str, legacy_key: &str) -> Option<String> {
    root.get(key)
        .or_else(|| root.get(legacy_key))
        .and_then(Node::scalar_text)
}

fn scalar_fragment(
    key: &str,
    node: &Node,
    value_type: ValueType,
    line_index: &LineIndex,
) -> Option<StringFragment> {
    let value = node.scalar_text()?;
    Some(StringFragment::new(
        key,
        value,
        section_for(node, line_index),
        value_type,
    ))
}

fn section_for(node: &Node, line_index: &LineIndex) -> Section {
    Section {
        start: line_index.position(node.offset),
        end: line_index.position(node.offset + node.length),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
    "name": "abc",
    "version": "1.0",
    "components": [
        {
            "name": "A",
            "provides": ["A1", "A2"]
        },
        {
            "name": "B",
            "provides": "B1"
        },
        {
            "name": "R",
            "references": [
                {
                    "name": "member_R1",
                    "providing": "A2"
                }
            ]
        }
    ]
}"#;

    #[test]
    fn bundle_name_and_version() {
        let doc = ManifestDocument::parse(MANIFEST).unwrap();
        assert_eq!(doc.name(), "abc");
        assert_eq!(doc.version(), "1.0");
    }

    #[test]
    fn legacy_keys_as_fallback() {
        let doc = ManifestDocument::parse(
            r#"{"Bundle-SymbolicName": "legacy", "Bundle-Version": "0.9"}"#,
        )
        .unwrap();
        assert_eq!(doc.name(), "legacy");
        assert_eq!(doc.version(), "0.9");
    }

    #[test]
    fn bundle_without_name_gets_synthetic_placeholder() {
        let doc = ManifestDocument::parse(r#"{"version": "1.0"}"#).unwrap();
        assert!(doc.name().starts_with("unknown-name-"));
        assert!(doc.name()["unknown-name-".len()..].parse::<u64>().is_ok());
        assert!(doc.components().is_empty());
    }

    #[test]
    fn synthetic_placeholders_are_unique() {
        let a = ManifestDocument::parse("{}").unwrap();
        let b = ManifestDocument::parse("{}").unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn components_parsed_with_sections() {
        let text = "{\n  \"name\": \"abc\",\n  \"components\": [\n    {\n      \"name\": \"A\",\n      \"provides\": [\"A1\", \"A2\"]\n    }\n  ]\n}";
        let doc = ManifestDocument::parse(text).unwrap();
        assert_eq!(doc.components().len(), 1);

        let name = doc.components()[0].name().unwrap();
        assert_eq!(name.value, "A");
        assert_eq!(name.key, "name");
        assert_eq!(name.section.start, LinePos { line: 4, col: 14 });
        assert_eq!(name.section.end, LinePos { line: 4, col: 17 });

        let a1 = doc.components()[0].provides_fragment("A1").unwrap();
        assert_eq!(a1.section.start, LinePos { line: 5, col: 19 });
        assert_eq!(a1.section.end, LinePos { line: 5, col: 23 });
        let a2 = doc.components()[0].provides_fragment("A2").unwrap();
        assert_eq!(a2.section.start, LinePos { line: 5, col: 25 });
        assert_eq!(a2.section.end, LinePos { line: 5, col: 29 });
    }

    #[test]
    fn provides_normalizes_bare_string_to_single_element_list() {
        let as_string = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"name": "C", "provides": "X"}]}"#,
        )
        .unwrap();
        let as_array = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"name": "C", "provides": ["X"]}]}"#,
        )
        .unwrap();

        for doc in [&as_string, &as_array] {
            let provides = doc.components()[0].provides();
            assert_eq!(provides.len(), 1);
            assert_eq!(provides[0].value, "X");
            assert_eq!(provides[0].value_type, ValueType::Provides);
        }
    }

    #[test]
    fn unnamed_components_are_dropped_entirely() {
        let doc = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"provides": "X"}, {"name": "C"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.components().len(), 1);
        assert_eq!(doc.components()[0].name().unwrap().value, "C");
        // The dropped component's provides reach no index.
        assert!(doc.components_for("X").is_empty());
        assert!(doc.provides_for("X").is_empty());
        assert!(!doc.service_names().contains("X"));
    }

    #[test]
    fn references_without_providing_are_dropped() {
        let doc = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"name": "C", "references": [{"name": "r1"}, {"name": "r2", "providing": "S"}, {"providing": "T"}]}]}"#,
        )
        .unwrap();
        let refs = doc.components()[0].references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name().value, "r2");
        assert_eq!(refs[0].providing().unwrap().value, "S");
        assert!(doc.references_for("S").len() == 1);
        assert!(!doc.service_names().contains("T"));
    }

    #[test]
    fn cross_component_lookups() {
        let doc = ManifestDocument::parse(MANIFEST).unwrap();
        assert_eq!(doc.components().len(), 3);

        let a_components = doc.components_for("A2");
        assert_eq!(a_components.len(), 1);
        assert_eq!(a_components[0].name().unwrap().value, "A");

        let a2_refs = doc.references_for("A2");
        assert_eq!(a2_refs.len(), 1);
        assert_eq!(a2_refs[0].name().value, "member_R1");

        assert!(doc.components_for("A3").is_empty());
        assert_eq!(doc.provides_for("A1").len(), 1);
        assert_eq!(doc.provides_for("A3").len(), 0);
        assert_eq!(doc.providing_for("A2").len(), 1);
        assert_eq!(doc.providing_for("A1").len(), 0);
    }

    #[test]
    fn references_ask_providing() {
        let doc = ManifestDocument::parse(MANIFEST).unwrap();
        let r = &doc.components()[2];
        assert_eq!(r.references_ask_providing("A2").len(), 1);
        assert!(r.references_ask_providing("B1").is_empty());
    }

    #[test]
    fn service_name_set_accumulates_provided_and_consumed() {
        let doc = ManifestDocument::parse(MANIFEST).unwrap();
        let expected: HashSet<String> = ["A1", "A2", "B1"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(doc.service_names(), &expected);
    }

    #[test]
    fn line_fragment_index_covers_provides_and_providing_only() {
        let doc = ManifestDocument::parse(MANIFEST).unwrap();
        // "A1"/"A2" on line 6, "B1" on line 10, providing "A2" on line 17.
        assert_eq!(doc.string_fragment_lines(), vec![6, 10, 17]);
        assert_eq!(doc.string_fragments_on_line(6).len(), 2);
        let providing = doc.string_fragments_on_line(17);
        assert_eq!(providing.len(), 1);
        assert!(providing
            .iter()
            .all(|f| f.value_type == ValueType::ReferenceProviding));
        assert!(doc.string_fragments_on_line(5).is_empty());
    }

    #[test]
    fn section_contains_uses_boundary_columns() {
        let section = Section {
            start: LinePos { line: 2, col: 4 },
            end: LinePos { line: 4, col: 2 },
        };
        assert!(!section.contains(1, 10));
        assert!(!section.contains(2, 3));
        assert!(section.contains(2, 4));
        assert!(section.contains(3, 0));
        assert!(section.contains(3, 999));
        assert!(section.contains(4, 2));
        assert!(!section.contains(4, 3));
        assert!(!section.contains(5, 0));
    }

    #[test]
    fn reparse_is_structurally_identical() {
        let first = ManifestDocument::parse(MANIFEST).unwrap();
        let second = ManifestDocument::parse(MANIFEST).unwrap();
        assert_eq!(first.name(), second.name());
        assert_eq!(first.components(), second.components());
        assert_eq!(first.service_names(), second.service_names());
        assert_eq!(first.string_fragment_lines(), second.string_fragment_lines());
    }

    #[test]
    fn tolerates_comments_and_trailing_commas() {
        let doc = ManifestDocument::parse(
            "{\n  // bundle\n  \"name\": \"abc\", /* legacy */\n  \"components\": [\n    {\"name\": \"C\", \"provides\": [\"S\",],},\n  ],\n}",
        )
        .unwrap();
        assert_eq!(doc.name(), "abc");
        assert_eq!(doc.components().len(), 1);
        assert_eq!(doc.components()[0].provides()[0].value, "S");
    }

    #[test]
    fn non_string_values_pass_through_verbatim() {
        let doc = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"name": "C", "provides": 7}]}"#,
        )
        .unwrap();
        assert_eq!(doc.components()[0].provides()[0].value, "7");
        assert!(doc.service_names().contains("7"));
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(ManifestDocument::parse("{\"name\": ").is_err());
        assert!(ManifestDocument::parse("not json").is_err());
    }

    #[test]
    fn missing_components_yields_empty_list() {
        let doc = ManifestDocument::parse(r#"{"name": "m"}"#).unwrap();
        assert!(doc.components().is_empty());
        assert!(doc.service_names().is_empty());
    }

    #[test]
    fn legacy_components_key() {
        let doc = ManifestDocument::parse(
            r#"{"name": "m", "Components": [{"name": "C"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.components().len(), 1);
    }

    #[test]
    fn impl_hint_is_optional() {
        let doc = ManifestDocument::parse(
            r#"{"name": "m", "components": [{"name": "C", "impl": "./CImpl"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.components()[0].impl_hint().unwrap().value, "./CImpl");
        assert_eq!(doc.components()[0].impl_hint().unwrap().key, "impl");
    }
}
