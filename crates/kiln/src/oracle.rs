//! Structural type information for record types.
//!
//! The binder never inspects models at compile time. It asks a
//! [`TypeOracle`] whether a record type exposes a field or method with a
//! given name and what its signature is. [`TypeRegistry`] is the provided
//! oracle, built in code or loaded from YAML:
//!
//! ```yaml
//! User:
//!   fields:
//!     name: string
//!     tags: list<string>
//!     manager: User
//!   methods:
//!     greeting:
//!       params: [string]
//!       returns: string
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::TypeDesc;

/// Whether a member is read as a field or invoked as a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method { params: Vec<TypeDesc> },
}

/// A member of a record type. For methods, `ty` is the return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub ty: TypeDesc,
    pub kind: MemberKind,
}

/// Answers structural questions about record types.
pub trait TypeOracle: Send + Sync {
    /// Whether `name` is a known record type.
    fn has_type(&self, name: &str) -> bool;

    /// The member `name` of record type `owner`, if it exists.
    fn member(&self, owner: &str, name: &str) -> Option<Member>;
}

/// Declaration of one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    name: String,
    members: Vec<Member>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeDesc) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty,
            kind: MemberKind::Field,
        });
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = TypeDesc>,
        returns: TypeDesc,
    ) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty: returns,
            kind: MemberKind::Method {
                params: params.into_iter().collect(),
            },
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// In-memory [`TypeOracle`].
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    records: HashMap<String, RecordType>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordDecl {
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    methods: BTreeMap<String, MethodDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodDecl {
    #[serde(default)]
    params: Vec<String>,
    returns: String,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record type, replacing any previous declaration of that name.
    pub fn with(mut self, record: RecordType) -> Self {
        self.register(record);
        self
    }

    pub fn register(&mut self, record: RecordType) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&RecordType> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Loads record declarations from YAML.
    ///
    /// Every type mentioned must be a primitive, a list, or a record declared
    /// in the same document.
    ///
    /// ```
    /// use kiln::{TypeDesc, TypeOracle, TypeRegistry};
    ///
    /// let types = TypeRegistry::from_yaml(r#"
    /// Item:
    ///   fields:
    ///     title: string
    ///     price: float
    /// "#).unwrap();
    /// assert_eq!(types.member("Item", "price").unwrap().ty, TypeDesc::Float);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let decls: BTreeMap<String, RecordDecl> = serde_yaml::from_str(yaml)?;
        let mut registry = TypeRegistry::new();

        for (record_name, decl) in &decls {
            let mut record = RecordType::new(record_name);
            for (field, text) in &decl.fields {
                let ty = parse_member_type(&decls, record_name, field, text)?;
                record = record.field(field, ty);
            }
            for (method, sig) in &decl.methods {
                let params = sig
                    .params
                    .iter()
                    .map(|text| parse_member_type(&decls, record_name, method, text))
                    .collect::<Result<Vec<_>, _>>()?;
                let returns = parse_member_type(&decls, record_name, method, &sig.returns)?;
                record = record.method(method, params, returns);
            }
            registry.register(record);
        }

        Ok(registry)
    }
}

fn parse_member_type(
    decls: &BTreeMap<String, RecordDecl>,
    record: &str,
    member: &str,
    text: &str,
) -> Result<TypeDesc, ConfigError> {
    let ty: TypeDesc = text.parse().map_err(|_| ConfigError::InvalidType {
        record: record.to_string(),
        member: member.to_string(),
        text: text.to_string(),
    })?;
    if let Some(name) = ty.record_name() {
        if !decls.contains_key(name) {
            return Err(ConfigError::UndeclaredType {
                record: record.to_string(),
                member: member.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(ty)
}

impl TypeOracle for TypeRegistry {
    fn has_type(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    fn member(&self, owner: &str, name: &str) -> Option<Member> {
        self.records.get(owner)?.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let types = TypeRegistry::new().with(
            RecordType::new("User")
                .field("name", TypeDesc::Str)
                .method("greet", [TypeDesc::Str], TypeDesc::Str),
        );
        assert!(types.has_type("User"));
        assert!(!types.has_type("Admin"));
        assert_eq!(
            types.member("User", "greet").map(|m| m.kind),
            Some(MemberKind::Method {
                params: vec![TypeDesc::Str]
            })
        );
        assert!(types.member("User", "age").is_none());
    }

    #[test]
    fn test_from_yaml() {
        let types = TypeRegistry::from_yaml(
            r#"
User:
  fields:
    name: string
    manager: User
    tags: list<string>
  methods:
    initials:
      returns: string
    can:
      params: [string, int]
      returns: bool
"#,
        )
        .unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(
            types.member("User", "tags").unwrap().ty,
            TypeDesc::list(TypeDesc::Str)
        );
        assert_eq!(
            types.member("User", "manager").unwrap().ty,
            TypeDesc::record("User")
        );
        let can = types.member("User", "can").unwrap();
        assert_eq!(
            can.kind,
            MemberKind::Method {
                params: vec![TypeDesc::Str, TypeDesc::Int]
            }
        );
    }

    #[test]
    fn test_from_yaml_undeclared_type() {
        let err = TypeRegistry::from_yaml("Post:\n  fields:\n    author: Person\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'Post.author' refers to undeclared type 'Person'"
        );
    }

    #[test]
    fn test_from_yaml_bad_type_text() {
        let err = TypeRegistry::from_yaml("Post:\n  fields:\n    n: list<\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
    }

    #[test]
    fn test_from_yaml_unknown_key() {
        let err = TypeRegistry::from_yaml("Post:\n  feilds:\n    n: int\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
