//! SELECT builders. Every row comes back as JSONB: the entity object in `__entity`
//! (multi-valued relations folded in as uuid arrays) and one extra column per root include.

use crate::error::EngineError;
use crate::query::{FindQuery, Includes, OrderBy};
use crate::schema::{EntityType, RelationDirection, RelationEntry, PRIMARY_KEY};
use crate::sql::{column_ref, compile_where, quoted, Aliases, QueryBuf, SqlContext, ENTITY_COLUMN, MAIN, TYPE_COLUMN};

/// `to_jsonb(alias.*)` plus the entity's join-table fields (as sorted uuid arrays) and any
/// requested includes.
pub fn entity_json(
    ctx: &SqlContext<'_>,
    entity: &EntityType,
    alias: &str,
    includes: Option<&Includes>,
    q: &mut QueryBuf,
    aliases: &mut Aliases,
) -> Result<String, EngineError> {
    let mut pairs = Vec::new();
    for f in entity.external_fields() {
        let Some(rel) = f.relation_kind() else { continue };
        let key = q.text_placeholder(&f.name);
        let expr = links_array(ctx, &entity.id, &rel.target_entity_type_id, &f.name, alias, q, aliases);
        pairs.push(format!("{}::text, {}", key, expr));
    }
    if let Some(includes) = includes {
        for (name, inc) in includes.iter().filter(|(_, i)| i.is_requested()) {
            let entry = relation(ctx, entity, name)?;
            let key = q.text_placeholder(name);
            let expr = include_expr(ctx, entity, alias, entry, inc.nested(), q, aliases)?;
            pairs.push(format!("{}::text, {}", key, expr));
        }
    }
    let base = format!("to_jsonb({}.*)", alias);
    if pairs.is_empty() {
        Ok(base)
    } else {
        Ok(format!("({} || jsonb_build_object({}))", base, pairs.join(", ")))
    }
}

/// Sorted uuid array of one join-table field of the row at `alias`.
pub(crate) fn links_array(
    ctx: &SqlContext<'_>,
    source_type_id: &str,
    target_type_id: &str,
    field: &str,
    alias: &str,
    q: &mut QueryBuf,
    aliases: &mut Aliases,
) -> String {
    let r = aliases.next("r");
    let fp = q.text_placeholder(field);
    format!(
        "COALESCE((SELECT jsonb_agg({r}.\"target\" ORDER BY {r}.\"target\") FROM {jt} {r} WHERE {r}.\"source\" = {pk} AND {r}.\"field\" = {fp}), '[]'::jsonb)",
        r = r,
        jt = ctx.join_table(source_type_id, target_type_id),
        pk = column_ref(alias, PRIMARY_KEY),
        fp = fp
    )
}

fn relation<'a>(ctx: &SqlContext<'a>, entity: &EntityType, name: &str) -> Result<&'a RelationEntry, EngineError> {
    ctx.catalog.relations().get(&entity.id, name).ok_or_else(|| {
        EngineError::Validation(format!("unknown include '{}' on entity type '{}'", name, entity.name))
    })
}

/// Correlated sub-select yielding one related object (forward direct relation) or an array.
fn include_expr(
    ctx: &SqlContext<'_>,
    parent: &EntityType,
    parent_alias: &str,
    entry: &RelationEntry,
    nested: Option<&Includes>,
    q: &mut QueryBuf,
    aliases: &mut Aliases,
) -> Result<String, EngineError> {
    let target = ctx.entity(&entry.target_entity_type_id)?;
    let a = aliases.next("t");
    let payload = entity_json(ctx, target, &a, nested, q, aliases)?;
    let tbl = ctx.table(target);
    let pk = column_ref(&a, PRIMARY_KEY);
    let field = &entry.source_field_name;
    if !entry.is_array() {
        return Ok(format!(
            "(SELECT {} FROM {} {} WHERE {} = {})",
            payload,
            tbl,
            a,
            pk,
            column_ref(parent_alias, field)
        ));
    }
    let matches = if entry.using_join_table {
        let (join, parent_col, other_col) = match entry.direction {
            RelationDirection::Forward => (ctx.join_table(&parent.id, &target.id), "source", "target"),
            RelationDirection::Reverse => (ctx.join_table(&target.id, &parent.id), "target", "source"),
        };
        let r = aliases.next("r");
        let fp = q.text_placeholder(field);
        format!(
            "EXISTS (SELECT 1 FROM {join} {r} WHERE {r}.{pc} = {ppk} AND {r}.{oc} = {pk} AND {r}.\"field\" = {fp})",
            join = join,
            r = r,
            pc = quoted(parent_col),
            ppk = column_ref(parent_alias, PRIMARY_KEY),
            oc = quoted(other_col),
            pk = pk,
            fp = fp
        )
    } else {
        format!("{} = {}", column_ref(&a, field), column_ref(parent_alias, PRIMARY_KEY))
    };
    Ok(format!(
        "COALESCE((SELECT jsonb_agg({} ORDER BY {}) FROM {} {} WHERE {}), '[]'::jsonb)",
        payload, pk, tbl, a, matches
    ))
}

/// `ORDER BY` items; always ends with the primary key so pagination is stable.
fn order_clause(entity: &EntityType, order: &OrderBy) -> Result<String, EngineError> {
    let mut items = Vec::with_capacity(order.0.len() + 1);
    for (name, dir) in &order.0 {
        if name != PRIMARY_KEY {
            match entity.field(name) {
                Some(f) if !f.is_external() => {}
                Some(_) => {
                    return Err(EngineError::Validation(format!("cannot order by multi-valued relation '{}'", name)))
                }
                None => {
                    return Err(EngineError::Validation(format!(
                        "unknown order field '{}' on entity type '{}'",
                        name, entity.name
                    )))
                }
            }
        }
        items.push(format!("{} {}", column_ref(MAIN, name), dir.as_sql()));
    }
    if !order.0.iter().any(|(n, _)| n == PRIMARY_KEY) {
        items.push(format!("{} ASC", column_ref(MAIN, PRIMARY_KEY)));
    }
    Ok(items.join(", "))
}

/// Full `find` statement: entity JSON, root includes as extra columns, filter, order, paging.
pub fn select_find(ctx: &SqlContext<'_>, entity: &EntityType, query: &FindQuery) -> Result<QueryBuf, EngineError> {
    let mut q = QueryBuf::new();
    let mut aliases = Aliases::default();
    let mut items = vec![format!(
        "{} AS {}",
        entity_json(ctx, entity, MAIN, None, &mut q, &mut aliases)?,
        quoted(ENTITY_COLUMN)
    )];
    for (name, inc) in query.includes.iter().filter(|(_, i)| i.is_requested()) {
        let entry = relation(ctx, entity, name)?;
        let expr = include_expr(ctx, entity, MAIN, entry, inc.nested(), &mut q, &mut aliases)?;
        items.push(format!("{} AS {}", expr, quoted(name)));
    }
    let mut sql = format!("SELECT {} FROM {} {}", items.join(", "), ctx.table(entity), MAIN);
    if let Some(w) = compile_where(ctx, entity, MAIN, &query.filter, &mut q)? {
        sql.push_str(" WHERE ");
        sql.push_str(&w);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&order_clause(entity, &query.order_by)?);
    if let Some(n) = query.limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    if let Some(n) = query.offset {
        sql.push_str(&format!(" OFFSET {}", n));
    }
    q.sql = sql;
    Ok(q)
}

/// Look a uuid up across every entity table. `None` when the catalog is empty.
pub fn select_by_uuid_any(ctx: &SqlContext<'_>, uuid: &str) -> Result<Option<QueryBuf>, EngineError> {
    if ctx.catalog.is_empty() {
        return Ok(None);
    }
    let mut q = QueryBuf::new();
    let id = q.placeholder(crate::sql::PgBindValue::text(uuid), "uuid");
    let mut aliases = Aliases::default();
    let mut branches = Vec::with_capacity(ctx.catalog.len());
    for t in ctx.catalog.types() {
        let type_id = q.text_placeholder(&t.id);
        let payload = entity_json(ctx, t, MAIN, None, &mut q, &mut aliases)?;
        branches.push(format!(
            "SELECT {}::text AS {}, {} AS {} FROM {} {} WHERE {} = {}",
            type_id,
            quoted(TYPE_COLUMN),
            payload,
            quoted(ENTITY_COLUMN),
            ctx.table(t),
            MAIN,
            column_ref(MAIN, PRIMARY_KEY),
            id
        ));
    }
    q.sql = format!("SELECT * FROM ({}) found LIMIT 1", branches.join(" UNION ALL "));
    Ok(Some(q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, Include};
    use crate::schema::{Catalog, FieldDef, IntegrityStrategy, ScalarKind};
    use crate::sql::PgBindValue;

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
                    FieldDef::relation("linkedAsset", "n", IntegrityStrategy::Cascade),
                    FieldDef::relation("tagIds", "n", IntegrityStrategy::SetNull).multiple(),
                ],
            },
        ])
    }

    #[test]
    fn plain_find_selects_entity_json() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let q = select_find(&ctx, c.get("n").unwrap(), &FindQuery::new()).unwrap();
        assert_eq!(
            q.sql,
            "SELECT to_jsonb(main.*) AS \"__entity\" FROM \"public\".\"asset_n\" main ORDER BY main.\"uuid\" ASC"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn join_fields_fold_into_entity() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let query = FindQuery::new().filter(Filter::eq("likes", 1)).order_by(OrderBy::desc("likes")).limit(10).offset(5);
        let q = select_find(&ctx, c.get("l").unwrap(), &query).unwrap();
        assert!(q.sql.starts_with("SELECT (to_jsonb(main.*) || jsonb_build_object($1::text, COALESCE((SELECT jsonb_agg(r1.\"target\" ORDER BY r1.\"target\") FROM \"public\".\"rel_l_n\" r1"));
        assert!(q.sql.ends_with("WHERE main.\"likes\" = $3::integer ORDER BY main.\"likes\" DESC, main.\"uuid\" ASC LIMIT 10 OFFSET 5"));
        assert_eq!(q.params[0], PgBindValue::text("tagIds"));
        assert_eq!(q.params[1], PgBindValue::text("tagIds"));
        assert_eq!(q.params[2], PgBindValue::text("1"));
    }

    #[test]
    fn includes_become_columns() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let query = FindQuery::new().include("linkedAssetRef").include("tags");
        let q = select_find(&ctx, c.get("l").unwrap(), &query).unwrap();
        assert!(q.sql.contains("(SELECT to_jsonb(t2.*) FROM \"public\".\"asset_n\" t2 WHERE t2.\"uuid\" = main.\"linkedAsset\") AS \"linkedAssetRef\""));
        assert!(q.sql.contains("AS \"tags\""));
        assert!(q.sql.contains("r4.\"source\" = main.\"uuid\" AND r4.\"target\" = t3.\"uuid\""));

        let back = select_find(&ctx, c.get("n").unwrap(), &FindQuery::new().include("links")).unwrap();
        assert!(back.sql.contains("FROM \"public\".\"asset_l\" t"));
        assert!(back.sql.contains(".\"linkedAsset\" = main.\"uuid\""));
    }

    #[test]
    fn nested_includes_recurse() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let mut nested = Includes::new();
        nested.insert("links".into(), Include::Flag(true));
        let q = select_find(&ctx, c.get("l").unwrap(), &FindQuery::new().include_nested("linkedAssetRef", nested)).unwrap();
        assert!(q.sql.contains("jsonb_build_object($"));
        assert!(q.params.contains(&PgBindValue::text("links")));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "public");
        let l = c.get("l").unwrap();
        assert!(select_find(&ctx, l, &FindQuery::new().include("nope")).is_err());
        assert!(select_find(&ctx, l, &FindQuery::new().order_by(OrderBy::asc("nope"))).is_err());
        assert!(select_find(&ctx, l, &FindQuery::new().order_by(OrderBy::asc("tagIds"))).is_err());
    }

    #[test]
    fn by_uuid_unions_every_table() {
        let c = catalog();
        let ctx = SqlContext::new(&c, "s");
        let q = select_by_uuid_any(&ctx, "0190f2a4-7c1e-7b3a-9d2f-4e5a6b7c8d9e").unwrap().unwrap();
        assert!(q.sql.starts_with("SELECT * FROM (SELECT $2::text AS \"__type\""));
        assert_eq!(q.sql.matches("UNION ALL").count(), 1);
        assert!(q.sql.ends_with(") found LIMIT 1"));
        assert_eq!(q.sql.matches(" FROM \"s\".\"asset_").count(), c.len());
        assert!(!q.sql.contains("FROM ()"));
        assert!(select_by_uuid_any(&SqlContext::new(&Catalog::default(), "s"), "x").unwrap().is_none());
    }
}
