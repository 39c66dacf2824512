use crate::error::{ModelError, Result};

/// An authorizable object name: a database (`sales`) or a table qualified by
/// its database (`sales.orders`). Names are case-insensitive upstream, so we
/// normalize to lowercase on construction and comparisons stay byte-wise.
/// Deserialization routes through [`AuthzObject::new`] so wire-decoded names
/// are normalized and validated exactly like directly-constructed ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct AuthzObject(String);

impl TryFrom<String> for AuthzObject {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        AuthzObject::new(&value)
    }
}

impl From<AuthzObject> for String {
    fn from(obj: AuthzObject) -> String {
        obj.0
    }
}

impl AuthzObject {
    pub fn new(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidAuthzObject(
                "name cannot be empty".to_string(),
            ));
        }
        if trimmed.split('.').count() > 2 || trimmed.split('.').any(str::is_empty) {
            return Err(ModelError::InvalidAuthzObject(format!(
                "expected `db` or `db.table`, got `{trimmed}`"
            )));
        }
        Ok(AuthzObject(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Database component of the name.
    pub fn database(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Table component, if this object names a table.
    pub fn table(&self) -> Option<&str> {
        let mut parts = self.0.splitn(2, '.');
        parts.next();
        parts.next()
    }
}

impl std::fmt::Display for AuthzObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
