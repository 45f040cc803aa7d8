//! INSERT and UPDATE statements. Each single-row write is one statement: the row change
//! plus one CTE per join-table field, ending in a SELECT that returns the hydrated entity.

use crate::error::EngineError;
use crate::query::Filter;
use crate::schema::{EntityType, FieldDef, PRIMARY_KEY};
use crate::sql::select::links_array;
use crate::sql::{compile_where, quoted, Aliases, PgBindValue, QueryBuf, SqlContext, ENTITY_COLUMN, MAIN};

/// A validated write payload, split by where each value is stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowValues<'a> {
    /// Caller-supplied primary key (create only).
    pub uuid: Option<String>,
    pub columns: Vec<(&'a FieldDef, PgBindValue)>,
    /// Join-table fields and the full uuid set each should hold.
    pub links: Vec<(&'a FieldDef, Vec<String>)>,
}

impl RowValues<'_> {
    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    fn writes_nothing_on_create(&self) -> bool {
        self.uuid.is_none() && self.columns.is_empty() && self.links.iter().all(|(_, ids)| ids.is_empty())
    }
}

fn target_of(f: &FieldDef) -> Result<&str, EngineError> {
    f.relation_kind()
        .map(|r| r.target_entity_type_id.as_str())
        .ok_or_else(|| EngineError::Validation(format!("'{}' is not a relation field", f.name)))
}

/// `(to_jsonb(alias.*) || jsonb_build_object(...))` where each join-table field comes from
/// `linked(field)` when given, else from the join table itself.
fn hydrate(
    ctx: &SqlContext<'_>,
    entity: &EntityType,
    alias: &str,
    linked: &dyn Fn(&FieldDef) -> Option<String>,
    q: &mut QueryBuf,
) -> Result<String, EngineError> {
    let mut aliases = Aliases::default();
    let mut pairs = Vec::new();
    for f in entity.external_fields() {
        let key = q.text_placeholder(&f.name);
        let expr = match linked(f) {
            Some(expr) => expr,
            None => links_array(ctx, &entity.id, target_of(f)?, &f.name, alias, q, &mut aliases),
        };
        pairs.push(format!("{}::text, {}", key, expr));
    }
    let base = format!("to_jsonb({}.*)", alias);
    Ok(if pairs.is_empty() {
        base
    } else {
        format!("({} || jsonb_build_object({}))", base, pairs.join(", "))
    })
}

fn sorted_targets(cte: &str, source_filter: Option<&str>) -> String {
    let filter = source_filter
        .map(|s| format!(" WHERE l.\"source\" = {}", s))
        .unwrap_or_default();
    format!(
        "COALESCE((SELECT jsonb_agg(l.\"target\" ORDER BY l.\"target\") FROM {} l{}), '[]'::jsonb)",
        cte, filter
    )
}

/// Link CTE body: insert one join row per distinct uuid for every row of `rows_cte`.
fn link_insert(ctx: &SqlContext<'_>, entity: &EntityType, f: &FieldDef, ids: &[String], rows_cte: &str, guard: Option<&str>, q: &mut QueryBuf) -> Result<String, EngineError> {
    let join = ctx.join_table(&entity.id, target_of(f)?);
    let fp = q.text_placeholder(&f.name);
    let arr = q.placeholder(PgBindValue::TextArray(ids.to_vec()), "uuid[]");
    let guard = guard.map(|g| format!(" WHERE {}", g)).unwrap_or_default();
    Ok(format!(
        "INSERT INTO {join} (\"source\", \"target\", \"field\") SELECT w.\"uuid\", v.id, {fp} FROM {rows} w, (SELECT DISTINCT unnest({arr}) AS id) v{guard} RETURNING \"source\", \"target\"",
        join = join,
        fp = fp,
        rows = rows_cte,
        arr = arr,
        guard = guard
    ))
}

/// Single-row insert with its join-table links.
pub fn insert_one(ctx: &SqlContext<'_>, entity: &EntityType, row: &RowValues<'_>) -> Result<QueryBuf, EngineError> {
    if row.writes_nothing_on_create() {
        return Err(EngineError::Validation(format!("no data to create {}", entity.name)));
    }
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    if let Some(uuid) = &row.uuid {
        cols.push(quoted(PRIMARY_KEY));
        vals.push(q.placeholder(PgBindValue::text(uuid.as_str()), "uuid"));
    }
    for (f, v) in &row.columns {
        cols.push(quoted(&f.name));
        vals.push(q.placeholder(v.clone(), &f.column_type()));
    }
    let insert = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING *", ctx.table(entity))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            ctx.table(entity),
            cols.join(", "),
            vals.join(", ")
        )
    };
    let mut ctes = vec![format!("inserted AS ({})", insert)];
    let mut link_ctes: Vec<(&str, String)> = Vec::new();
    for (i, (f, ids)) in row.links.iter().enumerate().filter(|(_, (_, ids))| !ids.is_empty()) {
        let name = format!("link_{}", i);
        ctes.push(format!("{} AS ({})", name, link_insert(ctx, entity, f, ids, "inserted", None, &mut q)?));
        link_ctes.push((f.name.as_str(), name));
    }
    let linked = |f: &FieldDef| {
        Some(
            link_ctes
                .iter()
                .find(|(n, _)| *n == f.name)
                .map(|(_, cte)| sorted_targets(cte, None))
                .unwrap_or_else(|| "'[]'::jsonb".to_string()),
        )
    };
    let payload = hydrate(ctx, entity, "inserted", &linked, &mut q)?;
    q.sql = format!(
        "WITH {} SELECT {} AS {} FROM inserted",
        ctes.join(", "),
        payload,
        quoted(ENTITY_COLUMN)
    );
    Ok(q)
}

/// Multi-row insert for payloads without join-table links. Columns omitted by a row get `DEFAULT`.
pub fn insert_batch(ctx: &SqlContext<'_>, entity: &EntityType, rows: &[RowValues<'_>]) -> Result<QueryBuf, EngineError> {
    if rows.iter().any(|r| r.has_links()) {
        return Err(EngineError::Validation("batched insert cannot carry relation links".into()));
    }
    if rows.iter().any(|r| r.writes_nothing_on_create()) {
        return Err(EngineError::Validation(format!("no data to create {}", entity.name)));
    }
    let with_uuid = rows.iter().any(|r| r.uuid.is_some());
    let fields: Vec<&FieldDef> = entity
        .column_fields()
        .filter(|f| rows.iter().any(|r| r.columns.iter().any(|(c, _)| c.name == f.name)))
        .collect();

    let mut q = QueryBuf::new();
    let mut cols: Vec<String> = Vec::new();
    if with_uuid {
        cols.push(quoted(PRIMARY_KEY));
    }
    cols.extend(fields.iter().map(|f| quoted(&f.name)));

    let mut tuples = Vec::with_capacity(rows.len());
    for r in rows {
        let mut vals = Vec::with_capacity(cols.len());
        if with_uuid {
            vals.push(match &r.uuid {
                Some(u) => q.placeholder(PgBindValue::text(u.as_str()), "uuid"),
                None => "DEFAULT".to_string(),
            });
        }
        for f in &fields {
            vals.push(match r.columns.iter().find(|(c, _)| c.name == f.name) {
                Some((_, v)) => q.placeholder(v.clone(), &f.column_type()),
                None => "DEFAULT".to_string(),
            });
        }
        tuples.push(format!("({})", vals.join(", ")));
    }
    let payload = hydrate(ctx, entity, "inserted", &|_| Some("'[]'::jsonb".to_string()), &mut q)?;
    q.sql = format!(
        "WITH inserted AS (INSERT INTO {} ({}) VALUES {} RETURNING *) SELECT {} AS {} FROM inserted",
        ctx.table(entity),
        cols.join(", "),
        tuples.join(", "),
        payload,
        quoted(ENTITY_COLUMN)
    );
    Ok(q)
}

/// Update the rows matching `filter`, or only the first one when `single` is set.
/// Join-table fields in the payload replace the row's whole link set for that field.
pub fn update(
    ctx: &SqlContext<'_>,
    entity: &EntityType,
    filter: &Filter,
    row: &RowValues<'_>,
    single: bool,
) -> Result<QueryBuf, EngineError> {
    if row.columns.is_empty() && row.links.is_empty() {
        return Err(EngineError::Validation(format!("no data to update {}", entity.name)));
    }
    if row.uuid.is_some() {
        return Err(EngineError::Validation("uuid cannot be updated".into()));
    }
    let mut q = QueryBuf::new();
    let mut target = format!("SELECT {}.{} FROM {} {}", MAIN, quoted(PRIMARY_KEY), ctx.table(entity), MAIN);
    if let Some(w) = compile_where(ctx, entity, MAIN, filter, &mut q)? {
        target.push_str(" WHERE ");
        target.push_str(&w);
    }
    if single {
        target.push_str(" LIMIT 1");
    }

    let sets = if row.columns.is_empty() {
        format!("{pk} = {pk}", pk = quoted(PRIMARY_KEY))
    } else {
        let mut sets = Vec::with_capacity(row.columns.len());
        for (f, v) in &row.columns {
            let p = q.placeholder(v.clone(), &f.column_type());
            sets.push(format!("{} = {}", quoted(&f.name), p));
        }
        sets.join(", ")
    };
    let mut ctes = vec![
        format!("target AS ({})", target),
        format!(
            "updated AS (UPDATE {} SET {} WHERE {pk} IN (SELECT {pk} FROM target) RETURNING *)",
            ctx.table(entity),
            sets,
            pk = quoted(PRIMARY_KEY)
        ),
    ];

    let mut replaced: Vec<(&str, String)> = Vec::new();
    for (i, (f, ids)) in row.links.iter().enumerate() {
        let join = ctx.join_table(&entity.id, target_of(f)?);
        let fp = q.text_placeholder(&f.name);
        let del = format!("del_{}", i);
        ctes.push(format!(
            "{} AS (DELETE FROM {} WHERE \"field\" = {} AND \"source\" IN (SELECT {pk} FROM updated) RETURNING 1)",
            del,
            join,
            fp,
            pk = quoted(PRIMARY_KEY)
        ));
        // Reading the delete's output orders the insert after it.
        let guard = format!("(SELECT count(*) FROM {}) >= 0", del);
        let ins = format!("ins_{}", i);
        ctes.push(format!("{} AS ({})", ins, link_insert(ctx, entity, f, ids, "updated", Some(&guard), &mut q)?));
        replaced.push((f.name.as_str(), ins));
    }

    let pk_ref = format!("{}.{}", MAIN, quoted(PRIMARY_KEY));
    let linked = |f: &FieldDef| {
        replaced
            .iter()
            .find(|(n, _)| *n == f.name)
            .map(|(_, cte)| sorted_targets(cte, Some(&pk_ref)))
    };
    let payload = hydrate(ctx, entity, MAIN, &linked, &mut q)?;
    q.sql = format!(
        "WITH {} SELECT {} AS {} FROM updated {}",
        ctes.join(", "),
        payload,
        quoted(ENTITY_COLUMN),
        MAIN
    );
    Ok(q)
}
