use std::collections::{HashMap, HashSet};

use coppice_base::{value_error, Result};
use coppice_types::{ChildDecl, PropertyDecl, QName, Schema, SchemaOptions};
use tracing::debug;

use crate::parser::{value_kind_for, NodeInfo, Parser, PropertyInfo, TypeDefInfo};
use crate::topo::topological_sort;

/// System types whose structure exceeds what this compiler's schema model
/// can express (multiple wildcard children, wildcard properties) -- they
/// stay known by name (so references to them as supertypes still resolve)
/// but are never fully materialized into a `Schema`.
const EXCLUDED_TYPE_NAMES: &[&str] = &[
    "rep:system",
    "rep:versionStorage",
    "nt:frozenNode",
    "nt:unstructured",
    "nt:versionLabels",
];

/// Seed roots for the topological sort: these are assumed present (they
/// come from the repository's built-in node type system) even before any
/// CND batch defines them, so `add_data` works incrementally.
const TOPS: &[&str] = &["nt:base", "mix:versionable", "mix:referenceable"];

/// An incremental CND-to-`Schema` compiler. A compiler instance may receive
/// multiple CND batches via [`Compiler::add_data`]; namespace and type
/// redefinitions are rejected unless identical to what's already known.
pub struct Compiler {
    namespaces: HashMap<String, String>,
    infos: HashMap<String, TypeDefInfo>,
    schemas: HashMap<String, Schema>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            namespaces: HashMap::new(),
            infos: HashMap::new(),
            schemas: HashMap::new(),
        }
    }

    pub fn bootstrap_type_names() -> &'static [&'static str] {
        TOPS
    }

    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// Parses one CND batch and folds its declarations into the compiler's
    /// state, then (re)builds the schema graph for the newly added types.
    /// Returns the names added by this batch, in declaration order.
    pub fn add_data(&mut self, input: &str) -> Result<Vec<String>> {
        let mut parser = Parser::new(input);
        let parsed = parser.parse()?;

        for (ns, uri) in &parsed.namespaces {
            if let Some(existing) = self.namespaces.get(ns) {
                if existing != uri {
                    return Err(value_error(format!(
                        "namespace {ns:?} redefined ({existing:?} != {uri:?})"
                    )));
                }
            }
        }
        for name in &parsed.type_order {
            if let Some(existing) = self.infos.get(name) {
                if existing != &parsed.type_defs[name] {
                    return Err(value_error(format!("node type {name:?} redefined")));
                }
            }
        }
        self.namespaces.extend(parsed.namespaces);
        self.infos.extend(parsed.type_defs);

        self.build_schemas(&parsed.type_order)?;
        Ok(parsed.type_order)
    }

    fn build_schemas(&mut self, type_names: &[String]) -> Result<()> {
        let type_name_set: HashSet<&str> = type_names.iter().map(String::as_str).collect();

        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, info) in &self.infos {
            graph.insert(name.as_str(), info.supertypes.iter().map(String::as_str).collect());
        }
        for top in TOPS {
            graph.entry(top).or_default();
        }

        let sorted = topological_sort(&graph)
            .map_err(|e| value_error(format!("{e} in type inheritance")))?;

        for name in &sorted {
            if !type_name_set.contains(name) || self.schemas.contains_key(*name) {
                continue;
            }
            if EXCLUDED_TYPE_NAMES.contains(name) {
                continue;
            }
            let Some(info) = self.infos.get(*name) else {
                continue;
            };
            let mut schema = Schema::new(QName::new(*name));
            schema.supertypes = info.supertypes.iter().map(|s| QName::new(s.as_str())).collect();
            schema.options = SchemaOptions {
                orderable: info.options.orderable,
                mixin: info.options.mixin,
            };
            self.schemas.insert(name.to_string(), schema);
        }

        // Wildcard-child preconditions first, across every schema touched
        // by this batch -- they accumulate allowed item types before
        // properties and single-node children are wired.
        for name in type_names {
            if EXCLUDED_TYPE_NAMES.contains(&name.as_str()) {
                continue;
            }
            let Some(info) = self.infos.get(name).cloned() else {
                continue;
            };
            for node in &info.nodes {
                if node.name != "*" {
                    continue;
                }
                if node.options.multiple {
                    return Err(value_error(format!(
                        "multiple * child nodes are disallowed for [{name}]"
                    )));
                }
                let schema = self
                    .schemas
                    .get_mut(name)
                    .ok_or_else(|| value_error(format!("no schema for [{name}]")))?;
                schema.has_wildcard_child = true;
                schema
                    .wildcard_required_types
                    .extend(node.required_types.iter().map(|t| QName::new(t.as_str())));
            }
        }

        for name in type_names {
            if EXCLUDED_TYPE_NAMES.contains(&name.as_str()) {
                continue;
            }
            let Some(info) = self.infos.get(name).cloned() else {
                continue;
            };
            self.wire_properties(name, &info.properties)?;
            self.wire_single_children(name, &info.nodes)?;
        }

        Ok(())
    }

    fn wire_properties(&mut self, type_name: &str, properties: &[PropertyInfo]) -> Result<()> {
        for prop in properties {
            if prop.name == "*" {
                return Err(value_error(format!(
                    "* properties are disallowed for [{type_name}]"
                )));
            }
            let decl = PropertyDecl {
                name: QName::new(prop.name.as_str()),
                value_kind: value_kind_for(&prop.type_name),
                default: prop.default_values.first().cloned(),
                constraints: prop.constraints.clone(),
                options: coppice_types::OptionSet {
                    primary: prop.options.primary,
                    autocreated: prop.options.autocreated,
                    mandatory: prop.options.mandatory,
                    protected: prop.options.protected,
                    multiple: prop.options.multiple,
                    version: prop.options.version,
                },
            };
            let schema = self
                .schemas
                .get_mut(type_name)
                .ok_or_else(|| value_error(format!("no schema for [{type_name}]")))?;
            schema.properties.insert(decl.name.clone(), decl);
        }
        Ok(())
    }

    fn wire_single_children(&mut self, type_name: &str, nodes: &[NodeInfo]) -> Result<()> {
        for node in nodes {
            if node.name == "*" {
                continue;
            }
            if node.options.multiple {
                return Err(value_error(format!(
                    "same-name siblings are disallowed for [{type_name}] + {} *",
                    node.name
                )));
            }
            let required_type = match node.required_types.as_slice() {
                [] => None,
                [single] => Some(single.clone()),
                _ => {
                    return Err(value_error(format!(
                        "can't have more than one required type for [{type_name}] + {}",
                        node.name
                    )))
                }
            };
            let mut list_property = false;
            if let Some(required) = &required_type {
                if let Some(required_schema) = self.schemas.get(required.as_str()) {
                    if required_schema.is_container() {
                        if !required_schema.properties.is_empty() {
                            return Err(value_error(format!(
                                "cannot have container with properties for [{type_name}] + {}",
                                node.name
                            )));
                        }
                        if required_schema.wildcard_required_types.len() > 1 {
                            return Err(value_error(format!(
                                "list cannot hold more than one type for [{type_name}] + {}",
                                node.name
                            )));
                        }
                        list_property = true;
                    }
                } else if !EXCLUDED_TYPE_NAMES.contains(&required.as_str()) {
                    debug!(target: "coppice", "unknown type {required} referenced by [{type_name}] + {}", node.name);
                }
            }
            let decl = ChildDecl {
                name: Some(QName::new(node.name.as_str())),
                required_types: required_type
                    .iter()
                    .map(|t| QName::new(t.as_str()))
                    .collect(),
                default_type: node.default_type.as_deref().map(QName::new),
                options: coppice_types::OptionSet {
                    primary: node.options.primary,
                    autocreated: node.options.autocreated,
                    mandatory: node.options.mandatory,
                    protected: node.options.protected,
                    multiple: node.options.multiple,
                    version: node.options.version,
                },
                list_property,
            };
            let schema = self
                .schemas
                .get_mut(type_name)
                .ok_or_else(|| value_error(format!("no schema for [{type_name}]")))?;
            schema.children.insert(decl.name.clone().unwrap(), decl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_simple_document_schema() {
        let mut compiler = Compiler::new();
        compiler
            .add_data("[ecmnt:document] > nt:base\n- ecm:title (string) mandatory\n")
            .unwrap();
        let schema = compiler.get_schema("ecmnt:document").unwrap();
        assert!(schema.properties.contains_key(&QName::new("ecm:title")));
    }

    #[test]
    fn test_container_via_wildcard_child() {
        let mut compiler = Compiler::new();
        compiler
            .add_data("[ecmnt:document] > nt:base\n[ecmnt:children] o\n+ * (ecmnt:document)\n")
            .unwrap();
        let schema = compiler.get_schema("ecmnt:children").unwrap();
        assert!(schema.is_container());
        assert_eq!(schema.wildcard_required_types, vec![QName::new("ecmnt:document")]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .add_data("[a] > b\n[b] > a\n")
            .unwrap_err();
        assert!(err.to_string().contains("in type inheritance"));
    }

    #[test]
    fn test_multiple_wildcard_children_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .add_data("[t]\n+ * (a) *\n")
            .unwrap_err();
        assert!(err.to_string().contains("disallowed"));
    }

    #[test]
    fn test_same_name_siblings_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler.add_data("[t]\n+ child *\n").unwrap_err();
        assert!(err.to_string().contains("same-name siblings"));
    }

    #[test]
    fn test_excluded_system_type_not_materialized() {
        let mut compiler = Compiler::new();
        compiler.add_data("[nt:unstructured]\n- ecm:title\n").unwrap();
        assert!(compiler.get_schema("nt:unstructured").is_none());
    }

    #[test]
    fn test_incremental_batches() {
        let mut compiler = Compiler::new();
        compiler.add_data("[nt:base]\n").unwrap();
        compiler
            .add_data("[ecmnt:document] > nt:base\n- ecm:title\n")
            .unwrap();
        assert!(compiler.get_schema("ecmnt:document").is_some());
    }

    #[test]
    fn test_redefinition_rejected() {
        let mut compiler = Compiler::new();
        compiler.add_data("[t]\n").unwrap();
        let err = compiler.add_data("[t]\n- p\n").unwrap_err();
        assert!(err.to_string().contains("redefined"));
    }

    #[test]
    fn test_identical_redefinition_accepted() {
        let mut compiler = Compiler::new();
        compiler
            .add_data("[ecmnt:document] > nt:base\n- ecm:title (string) mandatory\n")
            .unwrap();
        compiler
            .add_data("[ecmnt:document] > nt:base\n- ecm:title (string) mandatory\n")
            .unwrap();
        let schema = compiler.get_schema("ecmnt:document").unwrap();
        assert!(schema.properties.contains_key(&QName::new("ecm:title")));
    }
}
