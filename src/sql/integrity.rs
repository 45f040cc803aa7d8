//! DELETE with referential integrity for join-table relations.
//!
//! Singular relations are settled by their foreign keys (`ON DELETE` per strategy). Join
//! rows vanish through the join table's FK cascade, which already covers `set_null`,
//! `restrict` and `invalidate`. `cascade` needs more: a source row whose last link
//! through the field pointed at a deleted row is deleted too. That happens here, in the
//! same statement, reading the strategy from the catalog's packed integrity metadata.
//!
//! All CTEs see the snapshot taken before the statement, so candidates are collected
//! from join rows the FK cascade is about to remove.

use crate::error::EngineError;
use crate::query::Filter;
use crate::schema::{EntityType, IntegrityEntry, IntegrityStrategy, PRIMARY_KEY};
use crate::sql::{compile_where, quoted, QueryBuf, SqlContext, ENTITY_COLUMN, MAIN};

/// CTEs settling one join relation `source.field -> entity`. Returns the CTE texts and the
/// name of the CTE yielding the cascaded source uuids.
fn cascade_ctes(
    ctx: &SqlContext<'_>,
    entity: &EntityType,
    source_type_id: &str,
    field: &str,
    i: usize,
    q: &mut QueryBuf,
) -> (Vec<String>, String) {
    let join = ctx.join_table(source_type_id, &entity.id);
    let pk = quoted(PRIMARY_KEY);
    let fp = q.text_placeholder(field);
    let candidates = format!("candidates_{}", i);
    let strategy = format!("strategy_{}", i);
    let cleanup = format!("cleanup_{}", i);

    let candidates_sql = format!(
        "{} AS (SELECT DISTINCT jr.\"source\" AS {pk} FROM {} jr WHERE jr.\"field\" = {} AND jr.\"target\" IN (SELECT {pk} FROM deleted))",
        candidates,
        join,
        fp,
        pk = pk
    );

    let type_param = q.text_placeholder(source_type_id);
    let prefix = q.text_placeholder(&IntegrityEntry::prefix(field));
    let strategy_sql = format!(
        "{} AS (SELECT split_part(m, '#', 4) AS strategy FROM {} c, unnest(c.\"integrity\") AS m WHERE c.\"id\" = {} AND left(m, length({p})) = {p})",
        strategy,
        ctx.catalog_table(),
        type_param,
        p = prefix
    );

    let cascade = q.text_placeholder(IntegrityStrategy::Cascade.as_str());
    let mut cleanup_sql = format!(
        "{} AS (DELETE FROM {} s WHERE s.{pk} IN (SELECT {pk} FROM {}) AND EXISTS (SELECT 1 FROM {} WHERE strategy = {}) \
         AND NOT EXISTS (SELECT 1 FROM {} jr WHERE jr.\"source\" = s.{pk} AND jr.\"field\" = {} AND jr.\"target\" NOT IN (SELECT {pk} FROM deleted))",
        cleanup,
        ctx.table_for_id(source_type_id),
        candidates,
        strategy,
        cascade,
        join,
        fp,
        pk = pk
    );
    if source_type_id == entity.id {
        // Self relation: rows already being deleted are not cleaned up twice.
        cleanup_sql.push_str(&format!(" AND s.{pk} NOT IN (SELECT {pk} FROM deleted)", pk = pk));
    }
    cleanup_sql.push_str(&format!(" RETURNING s.{})", pk));

    (vec![candidates_sql, strategy_sql, cleanup_sql], cleanup)
}

/// Delete every row matching `filter`, settle join-table relations targeting the type and
/// drop grants of every removed row. Returns the deleted rows as `__entity`.
pub fn delete(ctx: &SqlContext<'_>, entity: &EntityType, filter: &Filter) -> Result<QueryBuf, EngineError> {
    let mut q = QueryBuf::new();
    let pk = quoted(PRIMARY_KEY);
    let mut deleted = format!("DELETE FROM {} {} ", ctx.table(entity), MAIN);
    if let Some(w) = compile_where(ctx, entity, MAIN, filter, &mut q)? {
        deleted.push_str("WHERE ");
        deleted.push_str(&w);
        deleted.push(' ');
    }
    deleted.push_str(&format!("RETURNING {}.*", MAIN));

    let mut ctes = vec![format!("deleted AS ({})", deleted)];
    let mut removed = vec![format!("SELECT {} FROM deleted", pk)];
    for (i, (source, field)) in ctx.catalog.relations().join_relations_targeting(&entity.id).into_iter().enumerate() {
        let (sql, cleanup) = cascade_ctes(ctx, entity, source, field, i, &mut q);
        ctes.extend(sql);
        removed.push(format!("SELECT {} FROM {}", pk, cleanup));
    }
    ctes.push(format!(
        "revoked AS (DELETE FROM {} WHERE \"asset_uuid\" IN ({}) RETURNING 1)",
        ctx.grants_table(),
        removed.join(" UNION ALL ")
    ));

    q.sql = format!(
        "WITH {} SELECT to_jsonb(deleted.*) AS {} FROM deleted",
        ctes.join(", "),
        quoted(ENTITY_COLUMN)
    );
    Ok(q)
}
