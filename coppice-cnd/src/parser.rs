use std::collections::HashMap;

use coppice_base::{value_error, Result};
use coppice_types::{OptionSet, SchemaOptions, ValueKind, VersionKind};

use crate::lexer::{Lexer, Token};

/// Raw info parsed for one `- name(type)=default opts <constraints` clause,
/// before any schema graph is built.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    pub type_name: String,
    pub default_values: Vec<String>,
    pub options: OptionSet,
    pub constraints: Vec<String>,
}

/// Raw info parsed for one `+ name(types)=default opts` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub required_types: Vec<String>,
    pub default_type: Option<String>,
    pub options: OptionSet,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDefInfo {
    pub supertypes: Vec<String>,
    pub options: SchemaOptions,
    pub properties: Vec<PropertyInfo>,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Default)]
pub struct ParsedData {
    pub namespaces: HashMap<String, String>,
    pub type_defs: HashMap<String, TypeDefInfo>,
    /// Preserves declaration order, since the compiler processes newly
    /// defined types in the order they appeared in the batch.
    pub type_order: Vec<String>,
}

const OK_TYPE_NAMES: &[&str] = &[
    "string", "binary", "long", "double", "boolean", "date", "name", "path", "reference",
    "undefined",
];

const OK_VERSION: &[(&str, VersionKind)] = &[
    ("copy", VersionKind::Copy),
    ("version", VersionKind::Version),
    ("initialize", VersionKind::Initialize),
    ("compute", VersionKind::Compute),
    ("ignore", VersionKind::Ignore),
    ("abort", VersionKind::Abort),
];

fn value_kind_of(name: &str) -> ValueKind {
    match name {
        "string" => ValueKind::String,
        "binary" => ValueKind::Binary,
        "long" => ValueKind::Long,
        "double" => ValueKind::Double,
        "boolean" => ValueKind::Boolean,
        "date" => ValueKind::Date,
        "name" => ValueKind::Name,
        "path" => ValueKind::Path,
        "reference" => ValueKind::Reference,
        _ => ValueKind::Undefined,
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(input),
        }
    }

    fn next(&mut self) -> Result<Token> {
        self.lexer.next_token()
    }

    fn expect_qname_or_str(&mut self) -> Result<String> {
        match self.next()? {
            Token::QName(s) | Token::Str(s) => Ok(s),
            other => Err(value_error(format!("expected a name, got {other:?}"))),
        }
    }

    fn expect_punct(&mut self, want: char) -> Result<()> {
        match self.next()? {
            Token::Punct(c) if c == want => Ok(()),
            other => Err(value_error(format!("expected {want:?}, got {other:?}"))),
        }
    }

    fn get_namespace(&mut self) -> Result<(String, String)> {
        let ns = self.expect_qname_or_str()?;
        self.expect_punct('=')?;
        let uri = match self.next()? {
            Token::Str(s) => s,
            other => Err(value_error(format!("expected a string, got {other:?}")))?,
        };
        self.expect_punct('>')?;
        Ok((ns, uri))
    }

    fn get_supertypes(&mut self) -> Result<Vec<String>> {
        let token = self.next()?;
        if token != Token::Punct('>') {
            self.lexer.push_back(token);
            return Ok(Vec::new());
        }
        let mut supertypes = Vec::new();
        loop {
            supertypes.push(self.expect_qname_or_str()?);
            let token = self.next()?;
            if token != Token::Punct(',') {
                self.lexer.push_back(token);
                return Ok(supertypes);
            }
        }
    }

    fn get_node_type_options(&mut self) -> Result<SchemaOptions> {
        let mut options = SchemaOptions::default();
        loop {
            let token = self.next()?;
            let Token::QName(name) = &token else {
                self.lexer.push_back(token);
                return Ok(options);
            };
            match name.to_ascii_lowercase().as_str() {
                "o" | "ord" | "orderable" => options.orderable = true,
                "m" | "mix" | "mixin" => options.mixin = true,
                _ => {
                    self.lexer.push_back(token);
                    return Ok(options);
                }
            }
        }
    }

    fn get_string_list(&mut self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        loop {
            out.push(self.expect_qname_or_str()?);
            let token = self.next()?;
            if token != Token::Punct(',') {
                self.lexer.push_back(token);
                return Ok(out);
            }
        }
    }

    /// Parses `(!, *, version-keyword, or option-alias)*`. Option aliases
    /// map to the same bits the CND grammar's comment table documents.
    fn get_options(&mut self) -> Result<OptionSet> {
        let mut options = OptionSet::default();
        loop {
            let token = self.next()?;
            let value = match &token {
                Token::Punct('!') => "!".to_owned(),
                Token::Punct('*') => "*".to_owned(),
                Token::QName(s) => s.to_ascii_lowercase(),
                _ => {
                    self.lexer.push_back(token);
                    return Ok(options);
                }
            };
            if let Some((_, kind)) = OK_VERSION.iter().find(|(n, _)| *n == value) {
                options.version = *kind;
                continue;
            }
            match value.as_str() {
                "primary" | "pri" | "!" => options.primary = true,
                "autocreated" | "aut" | "a" => options.autocreated = true,
                "mandatory" | "man" | "m" => options.mandatory = true,
                "multiple" | "mul" | "*" => options.multiple = true,
                "protected" => options.protected = true,
                _ => return Err(value_error(format!("unknown option: {value}"))),
            }
        }
    }

    fn get_node(&mut self) -> Result<NodeInfo> {
        let token = self.next()?;
        let name = match token {
            Token::Punct('*') => "*".to_owned(),
            Token::QName(s) | Token::Str(s) => s,
            other => return Err(value_error(format!("expected a child name, got {other:?}"))),
        };

        let token = self.next()?;
        let required_types = if token == Token::Punct('(') {
            let types = self.get_string_list()?;
            self.expect_punct(')')?;
            types
        } else {
            self.lexer.push_back(token);
            Vec::new()
        };

        let token = self.next()?;
        let default_type = if token == Token::Punct('=') {
            Some(self.expect_qname_or_str()?)
        } else {
            self.lexer.push_back(token);
            None
        };

        let options = self.get_options()?;
        Ok(NodeInfo {
            name,
            required_types,
            default_type,
            options,
        })
    }

    fn get_property(&mut self) -> Result<PropertyInfo> {
        let token = self.next()?;
        let name = match token {
            Token::Punct('*') => "*".to_owned(),
            Token::QName(s) | Token::Str(s) => s,
            other => return Err(value_error(format!("expected a property name, got {other:?}"))),
        };

        let token = self.next()?;
        let type_name = if token == Token::Punct('(') {
            let type_name = match self.next()? {
                Token::QName(s) => s.to_ascii_lowercase(),
                other => return Err(value_error(format!("expected a type name, got {other:?}"))),
            };
            if !OK_TYPE_NAMES.contains(&type_name.as_str()) {
                return Err(value_error(format!("unknown property type: {type_name}")));
            }
            self.expect_punct(')')?;
            type_name
        } else {
            self.lexer.push_back(token);
            "string".to_owned()
        };

        let token = self.next()?;
        let default_values = if token == Token::Punct('=') {
            self.get_string_list()?
        } else {
            self.lexer.push_back(token);
            Vec::new()
        };

        let options = self.get_options()?;

        let token = self.next()?;
        let constraints = if token == Token::Punct('<') {
            self.get_string_list()?
        } else {
            self.lexer.push_back(token);
            Vec::new()
        };

        Ok(PropertyInfo {
            name,
            type_name,
            default_values,
            options,
            constraints,
        })
    }

    /// Parses the whole file: `(namespace | typedef)*`.
    pub fn parse(&mut self) -> Result<ParsedData> {
        let mut data = ParsedData::default();
        loop {
            let token = self.next()?;
            match token {
                Token::Eof => return Ok(data),
                Token::Punct('<') => {
                    let (ns, uri) = self.get_namespace()?;
                    data.namespaces.insert(ns, uri);
                }
                Token::Punct('[') => {
                    let node_type = self.expect_qname_or_str()?;
                    self.expect_punct(']')?;
                    let supertypes = self.get_supertypes()?;
                    let options = self.get_node_type_options()?;
                    let mut properties = Vec::new();
                    let mut nodes = Vec::new();
                    loop {
                        let token = self.next()?;
                        match token {
                            Token::Punct('-') => properties.push(self.get_property()?),
                            Token::Punct('+') => nodes.push(self.get_node()?),
                            Token::Eof | Token::Punct('<') | Token::Punct('[') => {
                                self.lexer.push_back(token);
                                break;
                            }
                            other => {
                                return Err(value_error(format!(
                                    "unexpected token in type body: {other:?}"
                                )))
                            }
                        }
                    }
                    data.type_order.push(node_type.clone());
                    data.type_defs.insert(
                        node_type,
                        TypeDefInfo {
                            supertypes,
                            options,
                            properties,
                            nodes,
                        },
                    );
                }
                other => return Err(value_error(format!("expected '<' or '[', got {other:?}"))),
            }
        }
    }
}

pub fn value_kind_for(type_name: &str) -> ValueKind {
    value_kind_of(type_name)
}
