//! Compile a [`Filter`] tree to a parameterized WHERE clause over one entity table.
//!
//! Column-backed fields compare on the row itself; join-table relations (either side)
//! compile to `EXISTS` sub-queries against the join table.

use crate::error::EngineError;
use crate::query::{Filter, Predicate};
use crate::schema::{EntityType, FieldDef, RelationDirection, PRIMARY_KEY};
use crate::sql::{column_ref, quoted, PgBindValue, QueryBuf, SqlContext};
use serde_json::Value;

enum Operand<'a> {
    PrimaryKey,
    Column(&'a FieldDef),
    Join {
        table: String,
        /// Join-table column pointing at the filtered row.
        this: &'static str,
        other: &'static str,
        field: String,
    },
}

/// `None` when the filter matches everything.
pub fn compile_where(
    ctx: &SqlContext<'_>,
    entity: &EntityType,
    alias: &str,
    filter: &Filter,
    q: &mut QueryBuf,
) -> Result<Option<String>, EngineError> {
    match filter {
        Filter::And(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if let Some(p) = compile_where(ctx, entity, alias, item, q)? {
                    parts.push(p);
                }
            }
            Ok(join_parts(parts, " AND "))
        }
        Filter::Or(items) => {
            if items.is_empty() {
                return Ok(Some("FALSE".into()));
            }
            let mark = q.params.len();
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match compile_where(ctx, entity, alias, item, q)? {
                    Some(p) => parts.push(p),
                    None => {
                        // One branch matches everything.
                        q.params.truncate(mark);
                        return Ok(None);
                    }
                }
            }
            Ok(join_parts(parts, " OR "))
        }
        Filter::Field { name, predicate } => {
            let operand = resolve(ctx, entity, name)?;
            leaf(alias, name, &operand, predicate, q).map(Some)
        }
    }
}

fn join_parts(mut parts: Vec<String>, sep: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(sep))),
    }
}

fn resolve<'a>(ctx: &SqlContext<'a>, entity: &'a EntityType, name: &str) -> Result<Operand<'a>, EngineError> {
    if name == PRIMARY_KEY {
        return Ok(Operand::PrimaryKey);
    }
    if let Some(f) = entity.field(name) {
        if let Some(rel) = f.relation_kind().filter(|_| f.is_external()) {
            return Ok(Operand::Join {
                table: ctx.join_table(&entity.id, &rel.target_entity_type_id),
                this: "source",
                other: "target",
                field: f.name.clone(),
            });
        }
        return Ok(Operand::Column(f));
    }
    match ctx.catalog.relations().get(&entity.id, name) {
        Some(e) if e.using_join_table => {
            let (table, this, other) = match e.direction {
                RelationDirection::Forward => (ctx.join_table(&entity.id, &e.target_entity_type_id), "source", "target"),
                RelationDirection::Reverse => (ctx.join_table(&e.target_entity_type_id, &entity.id), "target", "source"),
            };
            Ok(Operand::Join {
                table,
                this,
                other,
                field: e.source_field_name.clone(),
            })
        }
        _ => Err(EngineError::Validation(format!(
            "unknown filter field '{}' on entity type '{}'",
            name, entity.name
        ))),
    }
}

fn leaf(alias: &str, name: &str, operand: &Operand<'_>, predicate: &Predicate, q: &mut QueryBuf) -> Result<String, EngineError> {
    match operand {
        Operand::PrimaryKey => {
            let pk = FieldDef::relation(PRIMARY_KEY, "", Default::default());
            column_leaf(&column_ref(alias, PRIMARY_KEY), &pk, predicate, q)
        }
        Operand::Column(f) => column_leaf(&column_ref(alias, &f.name), f, predicate, q),
        Operand::Join { table, this, other, field } => {
            let exists = |q: &mut QueryBuf| {
                let fp = q.text_placeholder(field);
                format!(
                    "SELECT 1 FROM {} jr WHERE jr.{} = {} AND jr.\"field\" = {}",
                    table,
                    quoted(this),
                    column_ref(alias, PRIMARY_KEY),
                    fp
                )
            };
            let values = match predicate {
                Predicate::Equals(Value::Null) => return Ok(format!("NOT EXISTS ({})", exists(q))),
                Predicate::Equals(v) => v.clone(),
                Predicate::In(list) if list.is_empty() => return Ok("FALSE".into()),
                Predicate::In(list) => Value::Array(list.clone()),
                Predicate::Range { .. } => {
                    return Err(EngineError::Validation(format!("lt/gt are not supported on relation '{}'", name)))
                }
            };
            let ids = PgBindValue::uuid_list(name, &values)?;
            let sub = exists(q);
            let ids = q.placeholder(ids, "uuid[]");
            Ok(format!("EXISTS ({} AND jr.{} = ANY({}))", sub, quoted(other), ids))
        }
    }
}

fn column_leaf(col: &str, f: &FieldDef, predicate: &Predicate, q: &mut QueryBuf) -> Result<String, EngineError> {
    let element_type = f.column_type().trim_end_matches("[]").to_string();
    match predicate {
        Predicate::Equals(Value::Null) => Ok(format!("{} IS NULL", col)),
        Predicate::Equals(v) if f.allow_multiple && !v.is_array() => {
            let p = q.placeholder(PgBindValue::element_for_field(f, v)?, &element_type);
            Ok(format!("{} = ANY({})", p, col))
        }
        Predicate::Equals(v) => {
            let p = q.placeholder(PgBindValue::for_field(f, v)?, &f.column_type());
            Ok(format!("{} = {}", col, p))
        }
        Predicate::In(list) if list.is_empty() => Ok("FALSE".into()),
        Predicate::In(list) => {
            let multi = FieldDef {
                allow_multiple: true,
                ..f.clone()
            };
            let p = q.placeholder(PgBindValue::for_field(&multi, &Value::Array(list.clone()))?, &format!("{}[]", element_type));
            if f.allow_multiple {
                Ok(format!("{} && {}", col, p))
            } else {
                Ok(format!("{} = ANY({})", col, p))
            }
        }
        Predicate::Range { lt, gt } => {
            if f.allow_multiple {
                return Err(EngineError::Validation(format!("lt/gt are not supported on multi-valued field '{}'", f.name)));
            }
            let mut parts = Vec::new();
            if let Some(v) = lt {
                let p = q.placeholder(PgBindValue::for_field(f, v)?, &element_type);
                parts.push(format!("{} < {}", col, p));
            }
            if let Some(v) = gt {
                let p = q.placeholder(PgBindValue::for_field(f, v)?, &element_type);
                parts.push(format!("{} > {}", col, p));
            }
            match parts.len() {
                0 => Err(EngineError::Validation(format!("empty range on '{}'", f.name))),
                1 => Ok(parts.remove(0)),
                _ => Ok(format!("({})", parts.join(" AND "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Catalog, IntegrityStrategy, ScalarKind};
    use serde_json::json;

    const U: &str = "0190f2a4-7c1e-7b3a-9d2f-4e5a6b7c8d9e";

    fn catalog() -> Catalog {
        Catalog::new(vec![
            EntityType {
                id: "n".into(),
                name: "Note".into(),
                fields: vec![FieldDef::scalar("title", ScalarKind::Text)],
            },
            EntityType {
                id: "l".into(),
                name: "Link".into(),
                fields: vec![
                    FieldDef::scalar("likes", ScalarKind::Integer),
                    FieldDef::scalar("labels", ScalarKind::Text).multiple(),
                    FieldDef::relation("tagIds", "n", IntegrityStrategy::SetNull).multiple(),
                ],
            },
        ])
    }

    fn compile(type_id: &str, f: Filter) -> Result<(Option<String>, QueryBuf), EngineError> {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let mut q = QueryBuf::new();
        let w = compile_where(&ctx, c.get(type_id).unwrap(), "main", &f, &mut q)?;
        Ok((w, q))
    }

    #[test]
    fn scalar_predicates_are_parameterized() {
        let (w, q) = compile("l", Filter::eq("likes", 3)).unwrap();
        assert_eq!(w.unwrap(), "main.\"likes\" = $1::integer");
        assert_eq!(q.params, vec![PgBindValue::text("3")]);

        let (w, _) = compile("l", Filter::eq("likes", Value::Null)).unwrap();
        assert_eq!(w.unwrap(), "main.\"likes\" IS NULL");

        let (w, q) = compile("l", Filter::range("likes", Some(json!(10)), Some(json!(2)))).unwrap();
        assert_eq!(w.unwrap(), "(main.\"likes\" < $1::integer AND main.\"likes\" > $2::integer)");
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn in_lists() {
        let (w, q) = compile("l", Filter::is_in("likes", vec![json!(1), json!(2)])).unwrap();
        assert_eq!(w.unwrap(), "main.\"likes\" = ANY($1::integer[])");
        assert_eq!(q.params, vec![PgBindValue::TextArray(vec!["1".into(), "2".into()])]);

        let (w, q) = compile("l", Filter::is_in("likes", vec![])).unwrap();
        assert_eq!(w.unwrap(), "FALSE");
        assert!(q.params.is_empty());

        let (w, _) = compile("l", Filter::is_in("labels", vec![json!("a")])).unwrap();
        assert_eq!(w.unwrap(), "main.\"labels\" && $1::text[]");
    }

    #[test]
    fn array_columns_match_elements() {
        let (w, _) = compile("l", Filter::eq("labels", "a")).unwrap();
        assert_eq!(w.unwrap(), "$1::text = ANY(main.\"labels\")");
    }

    #[test]
    fn uuid_compares_as_uuid() {
        let (w, q) = compile("n", Filter::by_uuid(U)).unwrap();
        assert_eq!(w.unwrap(), "main.\"uuid\" = $1::uuid");
        assert_eq!(q.params, vec![PgBindValue::text(U)]);
        assert!(compile("n", Filter::by_uuid("nope")).is_err());
    }

    #[test]
    fn join_relations_use_exists() {
        let (w, q) = compile("l", Filter::eq("tagIds", U)).unwrap();
        assert_eq!(
            w.unwrap(),
            "EXISTS (SELECT 1 FROM \"public\".\"rel_l_n\" jr WHERE jr.\"source\" = main.\"uuid\" AND jr.\"field\" = $1 AND jr.\"target\" = ANY($2::uuid[]))"
        );
        assert_eq!(q.params[0], PgBindValue::text("tagIds"));

        let (w, _) = compile("l", Filter::eq("tagIds", Value::Null)).unwrap();
        assert!(w.unwrap().starts_with("NOT EXISTS (SELECT 1 FROM \"public\".\"rel_l_n\""));

        // Reverse side, by relation name.
        let (w, _) = compile("n", Filter::eq("linksByTagIds", U)).unwrap();
        let w = w.unwrap();
        assert!(w.contains("jr.\"target\" = main.\"uuid\""));
        assert!(w.contains("jr.\"source\" = ANY($2::uuid[])"));
    }

    #[test]
    fn combinators() {
        let f = Filter::Or(vec![Filter::eq("likes", 1), Filter::eq("likes", Value::Null)]);
        let (w, _) = compile("l", f).unwrap();
        assert_eq!(w.unwrap(), "(main.\"likes\" = $1::integer OR main.\"likes\" IS NULL)");

        let (w, _) = compile("l", Filter::all()).unwrap();
        assert!(w.is_none());
        let (w, q) = compile("l", Filter::Or(vec![Filter::eq("likes", 1), Filter::all()])).unwrap();
        assert!(w.is_none());
        assert!(q.params.is_empty());
        let (w, _) = compile("l", Filter::Or(vec![])).unwrap();
        assert_eq!(w.unwrap(), "FALSE");
    }

    #[test]
    fn bad_leaves_fail() {
        assert!(matches!(compile("l", Filter::eq("nope", 1)), Err(EngineError::Validation(_))));
        assert!(compile("l", Filter::eq("likes", "x")).is_err());
        assert!(compile("l", Filter::range("labels", Some(json!("a")), None)).is_err());
        assert!(compile("l", Filter::range("tagIds", Some(json!(U)), None)).is_err());
    }
}
