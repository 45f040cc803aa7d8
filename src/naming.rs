//! Physical naming (entity and join tables) and the identifier casing used for relation names.
//!
//! The physical names are persisted; changing them orphans existing tables.

/// Prefix of every entity table.
pub const ENTITY_TABLE_PREFIX: &str = "asset_";
/// Prefix of every join table.
pub const JOIN_TABLE_PREFIX: &str = "rel_";
/// Characters of a type id kept in join-table names.
pub const JOIN_SUFFIX_LEN: usize = 16;

/// `asset_<id>` with dashes normalized to underscores.
pub fn entity_table_name(type_id: &str) -> String {
    format!("{}{}", ENTITY_TABLE_PREFIX, type_id.replace('-', "_"))
}

/// Last 16 characters of the type id with all dashes and underscores removed.
/// UUIDv7 ids share their time-ordered prefix, so the tail is the distinguishing part.
pub fn id_suffix(type_id: &str) -> String {
    let compact: Vec<char> = type_id.chars().filter(|c| *c != '-' && *c != '_').collect();
    let start = compact.len().saturating_sub(JOIN_SUFFIX_LEN);
    compact[start..].iter().collect()
}

/// `rel_<source suffix>_<target suffix>`; at most 37 bytes, well under PostgreSQL's 63.
pub fn join_table_name(source_type_id: &str, target_type_id: &str) -> String {
    format!("{}{}_{}", JOIN_TABLE_PREFIX, id_suffix(source_type_id), id_suffix(target_type_id))
}

/// Prefix shared by every join table whose source is `type_id`.
pub fn join_table_source_prefix(type_id: &str) -> String {
    format!("{}{}_", JOIN_TABLE_PREFIX, id_suffix(type_id))
}

/// Target suffix of a join table name, if it is one.
pub fn join_table_target_suffix(table_name: &str) -> Option<&str> {
    let rest = table_name.strip_prefix(JOIN_TABLE_PREFIX)?;
    let (_, target) = rest.split_once('_')?;
    Some(target)
}

/// Foreign-key constraint name for a singular relation column.
pub fn fk_constraint_name(type_id: &str, field: &str) -> String {
    format!("fk_{}_{}", id_suffix(type_id), field)
}

/// Convert a free-form name to camelCase.
/// e.g. "Blog Post" -> "blogPost", "user_profile" -> "userProfile", "Note" -> "note"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if !c.is_alphanumeric() {
            capitalize_next = !out.is_empty();
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Uppercase the first character. e.g. "linkedAsset" -> "LinkedAsset"
pub fn to_pascal_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// English-ish plural; words already ending in `s` are left alone.
pub fn pluralize(s: &str) -> String {
    if s.is_empty() || s.ends_with('s') {
        return s.to_string();
    }
    if s.ends_with('x') || s.ends_with('z') || s.ends_with("ch") || s.ends_with("sh") {
        return format!("{}es", s);
    }
    if let Some(stem) = s.strip_suffix('y') {
        let before = stem.chars().last();
        if before.map(|c| !"aeiou".contains(c)).unwrap_or(false) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", s)
}

const KEY_SUFFIXES: &[&str] = &["Uuids", "Ids", "Uuid", "Id", "_uuids", "_ids", "_uuid", "_id"];

/// Strip a trailing key suffix (`authorId` -> `author`, `tag_uuids` -> `tag`).
pub fn strip_key_suffix(s: &str) -> &str {
    for suffix in KEY_SUFFIXES {
        if let Some(stem) = s.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    s
}
