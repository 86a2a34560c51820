//! Codecs for the two dynamic-`__setattr__`-hook properties the original
//! serialized permission and local-role maps into: `ecm:security` and
//! `ecm:localroles`. Design Notes §9 calls for replacing the original's
//! dynamic dispatch with two explicit functions invoked at save time
//! (encode) and load time (decode); this module is that pair, for both
//! properties.

use std::collections::BTreeMap;

use coppice_base::{value_error, Result};

/// One permission entry of `ecm:security`: `Permission=Role,Role` (replace
/// semantics) or `Permission+=Role,Role` (additive semantics), matching
/// `impl.py::_map_security_to_prop`'s list-vs-tuple distinction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionEntry {
    pub permission: String,
    pub roles: Vec<String>,
    pub additive: bool,
}

/// Encodes a permission map into `ecm:security`'s wire grammar:
/// `principal_kind ':' principal '=' role(,role)*(;…)*` generalized here to
/// `Permission[=|+=]Role(,Role)*(;…)*`, entries sorted by permission name
/// for determinism (`impl.py` does the same with `l.sort()`).
pub fn encode_security(entries: &[PermissionEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = entries
        .iter()
        .map(|e| {
            let op = if e.additive { "+=" } else { "=" };
            let mut roles = e.roles.clone();
            roles.sort();
            format!("{}{op}{}", e.permission, roles.join(","))
        })
        .collect();
    parts.sort();
    Some(parts.join(";"))
}

/// Decodes `ecm:security`'s wire grammar back into permission entries.
pub fn decode_security(s: &str) -> Result<Vec<PermissionEntry>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for clause in s.split(';') {
        let (permission, additive, roles_str) = if let Some((k, v)) = clause.split_once("+=") {
            (k, true, v)
        } else if let Some((k, v)) = clause.split_once('=') {
            (k, false, v)
        } else {
            return Err(value_error(format!("illegal string {s:?} for ecm:security")));
        };
        if permission.is_empty() {
            return Err(value_error(format!("illegal string {s:?} for ecm:security")));
        }
        out.push(PermissionEntry {
            permission: permission.to_owned(),
            roles: roles_str.split(',').map(str::to_owned).collect(),
            additive,
        });
    }
    Ok(out)
}

/// `user` or `group`, the two principal kinds `ecm:localroles` admits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalRoleEntry {
    pub kind: PrincipalKind,
    pub principal: String,
    pub roles: Vec<String>,
}

/// Encodes `ecm:localroles`: `principal_kind ':' principal '=' role(,role)*`
/// clauses joined by `;`, sorted by `kind:principal` for determinism
/// (`impl.py::_map_localroles_to_prop` sorts its dict before joining).
pub fn encode_local_roles(entries: &[LocalRoleEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = entries
        .iter()
        .map(|e| {
            let mut roles = e.roles.clone();
            roles.sort();
            format!("{}:{}={}", e.kind.as_str(), e.principal, roles.join(","))
        })
        .collect();
    parts.sort();
    Some(parts.join(";"))
}

pub fn decode_local_roles(s: &str) -> Result<Vec<LocalRoleEntry>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for clause in s.split(';') {
        let (key, roles_str) = clause
            .split_once('=')
            .ok_or_else(|| value_error(format!("illegal string {s:?} for ecm:localroles")))?;
        let (kind, principal) = if let Some(rest) = key.strip_prefix("user:") {
            (PrincipalKind::User, rest)
        } else if let Some(rest) = key.strip_prefix("group:") {
            (PrincipalKind::Group, rest)
        } else {
            return Err(value_error(format!("illegal string {s:?} for ecm:localroles")));
        };
        out.push(LocalRoleEntry {
            kind,
            principal: principal.to_owned(),
            roles: roles_str.split(',').map(str::to_owned).collect(),
        });
    }
    Ok(out)
}

/// Groups decoded local-role entries by principal kind, the shape
/// `__ac_local_roles__`/`__ac_local_group_roles__` wanted on the Python
/// side; kept here as a convenience for callers that want a map rather
/// than the flat entry list.
pub fn group_local_roles(entries: &[LocalRoleEntry]) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, Vec<String>>) {
    let mut users = BTreeMap::new();
    let mut groups = BTreeMap::new();
    for e in entries {
        let mut roles = e.roles.clone();
        roles.sort();
        match e.kind {
            PrincipalKind::User => {
                users.insert(e.principal.clone(), roles);
            }
            PrincipalKind::Group => {
                groups.insert(e.principal.clone(), roles);
            }
        }
    }
    (users, groups)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_security_roundtrip() {
        let entries = vec![
            PermissionEntry {
                permission: "Read".to_owned(),
                roles: vec!["Member".to_owned(), "Manager".to_owned()],
                additive: false,
            },
            PermissionEntry {
                permission: "Write".to_owned(),
                roles: vec!["Manager".to_owned()],
                additive: true,
            },
        ];
        let encoded = encode_security(&entries).unwrap();
        let decoded = decode_security(&encoded).unwrap();
        let mut sorted = entries;
        sorted.sort_by(|a, b| a.permission.cmp(&b.permission));
        for e in sorted.iter_mut() {
            e.roles.sort();
        }
        let mut decoded_sorted = decoded;
        decoded_sorted.sort_by(|a, b| a.permission.cmp(&b.permission));
        assert_eq!(decoded_sorted, sorted);
    }

    #[test]
    fn test_security_empty_is_none() {
        assert_eq!(encode_security(&[]), None);
        assert_eq!(decode_security("").unwrap(), vec![]);
    }

    #[test]
    fn test_security_malformed_is_error() {
        assert!(decode_security("NoEqualsSign").is_err());
    }

    #[test]
    fn test_local_roles_roundtrip() {
        let entries = vec![
            LocalRoleEntry {
                kind: PrincipalKind::User,
                principal: "alice".to_owned(),
                roles: vec!["Writer".to_owned(), "Reader".to_owned()],
            },
            LocalRoleEntry {
                kind: PrincipalKind::Group,
                principal: "staff".to_owned(),
                roles: vec!["Reader".to_owned()],
            },
        ];
        let encoded = encode_local_roles(&entries).unwrap();
        assert_eq!(encoded, "group:staff=Reader;user:alice=Reader,Writer");
        let decoded = decode_local_roles(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].principal, "staff");
        assert_eq!(decoded[1].roles, vec!["Reader", "Writer"]);
    }

    #[test]
    fn test_local_roles_bad_principal_kind() {
        assert!(decode_local_roles("admin:alice=Reader").is_err());
    }
}
