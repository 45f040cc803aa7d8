//! Definition validation: identifiers, duplicate names, relation targets. Runs before any DDL.

use crate::error::EngineError;
use crate::schema::FieldDef;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Column name of every entity table's primary key.
pub const PRIMARY_KEY: &str = "uuid";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_$][a-zA-Z0-9_$]*$").expect("static identifier pattern"))
}

/// True when `s` matches `[a-zA-Z_$][a-zA-Z0-9_$]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    identifier_re().is_match(s)
}

pub fn validate_type_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("entity type name must not be empty".into()));
    }
    Ok(())
}

/// Validate a field set. `target_exists` answers whether a relation target type id is known.
pub fn validate_fields(fields: &[FieldDef], target_exists: impl Fn(&str) -> bool) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for f in fields {
        if !is_valid_identifier(&f.name) {
            return Err(EngineError::Validation(format!(
                "invalid field name '{}': must match [a-zA-Z_$][a-zA-Z0-9_$]*",
                f.name
            )));
        }
        if f.name == PRIMARY_KEY {
            return Err(EngineError::Validation(format!("field name '{}' is reserved", PRIMARY_KEY)));
        }
        if !seen.insert(f.name.as_str()) {
            return Err(EngineError::Validation(format!("duplicate field name '{}'", f.name)));
        }
        if let Some(r) = f.relation_kind() {
            if !target_exists(&r.target_entity_type_id) {
                return Err(EngineError::NotFound(format!(
                    "relation field '{}' targets unknown entity type '{}'",
                    f.name, r.target_entity_type_id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IntegrityStrategy, ScalarKind};

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("title"));
        assert!(is_valid_identifier("_x$1"));
        assert!(is_valid_identifier("$ref"));
        assert!(!is_valid_identifier("1st"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("drop\";--"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn rejects_invalid_duplicate_and_reserved_names() {
        let ok = |_: &str| true;
        let bad = vec![FieldDef::scalar("bad-name", ScalarKind::Text)];
        assert!(matches!(validate_fields(&bad, ok), Err(EngineError::Validation(_))));
        let dup = vec![
            FieldDef::scalar("a", ScalarKind::Text),
            FieldDef::scalar("a", ScalarKind::Integer),
        ];
        assert!(matches!(validate_fields(&dup, ok), Err(EngineError::Validation(_))));
        let reserved = vec![FieldDef::scalar("uuid", ScalarKind::Text)];
        assert!(matches!(validate_fields(&reserved, ok), Err(EngineError::Validation(_))));
    }

    #[test]
    fn relation_targets_must_exist() {
        let fields = vec![FieldDef::relation("note", "missing", IntegrityStrategy::Cascade)];
        assert!(matches!(validate_fields(&fields, |id| id == "known"), Err(EngineError::NotFound(_))));
        assert!(validate_fields(&fields, |id| id == "missing").is_ok());
    }

    #[test]
    fn type_names() {
        assert!(validate_type_name("Note").is_ok());
        assert!(validate_type_name("  ").is_err());
    }
}
