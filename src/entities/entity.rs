//! Entity and role definitions

use serde::{Deserialize, Serialize};

/// The relation between a person and the group they belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Singular key, e.g. `parent`
    pub key: String,

    /// Plural key used in situations, e.g. `parents`
    #[serde(default)]
    pub plural: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    /// Maximum number of persons holding this role in one group
    #[serde(default)]
    pub max: Option<usize>,
}

impl Role {
    pub fn new(key: impl Into<String>, plural: Option<&str>) -> Self {
        Self {
            key: key.into(),
            plural: plural.map(str::to_string),
            label: None,
            max: None,
        }
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Key under which members with this role are listed in a situation
    pub fn situation_key(&self) -> &str {
        self.plural.as_deref().unwrap_or(&self.key)
    }
}

/// A kind of unit on which variables are defined
///
/// There is exactly one person entity per system; every other entity is a
/// group of persons with roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: String,
    pub plural: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub doc: String,

    pub is_person: bool,

    /// Roles, empty for the person entity
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Entity {
    pub fn person(key: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            plural: plural.into(),
            label: String::new(),
            doc: String::new(),
            is_person: true,
            roles: Vec::new(),
        }
    }

    pub fn group(key: impl Into<String>, plural: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            key: key.into(),
            plural: plural.into(),
            label: String::new(),
            doc: String::new(),
            is_person: false,
            roles,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn role_index(&self, key: &str) -> Option<usize> {
        self.roles
            .iter()
            .position(|r| r.key == key || r.plural.as_deref() == Some(key))
    }

    pub fn role(&self, key: &str) -> Option<&Role> {
        self.role_index(key).map(|i| &self.roles[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_lookup_by_key_or_plural() {
        let household = Entity::group(
            "household",
            "households",
            vec![Role::new("parent", Some("parents")).with_max(2), Role::new("child", Some("children"))],
        );
        assert_eq!(household.role_index("parent"), Some(0));
        assert_eq!(household.role_index("children"), Some(1));
        assert_eq!(household.role("parent").and_then(|r| r.max), Some(2));
        assert!(household.role("lodger").is_none());
    }

    #[test]
    fn test_situation_key_defaults_to_key() {
        assert_eq!(Role::new("member", None).situation_key(), "member");
        assert_eq!(Role::new("child", Some("children")).situation_key(), "children");
    }
}
