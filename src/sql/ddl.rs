//! DDL for entity tables, join tables and field alterations.

use crate::naming::{entity_table_name, fk_constraint_name, join_table_name};
use crate::schema::{EntityType, FieldDef, SchemaStep, PRIMARY_KEY};
use crate::sql::{qualified_table, quoted, QueryBuf};

fn references(schema: &str, type_id: &str, f: &FieldDef) -> Option<String> {
    f.relation_kind().filter(|_| !f.is_external()).map(|r| {
        format!(
            "CONSTRAINT {} REFERENCES {} ({}) ON DELETE {}",
            quoted(&fk_constraint_name(type_id, &f.name)),
            qualified_table(schema, &entity_table_name(&r.target_entity_type_id)),
            quoted(PRIMARY_KEY),
            r.integrity_strategy.on_delete()
        )
    })
}

/// Column definition inside CREATE TABLE (the table is new, so NOT NULL needs no default).
fn column_definition(schema: &str, type_id: &str, f: &FieldDef) -> String {
    let mut def = format!("{} {}", quoted(&f.name), f.column_type());
    if f.required {
        def.push_str(" NOT NULL");
    }
    if let Some(fk) = references(schema, type_id, f) {
        def.push(' ');
        def.push_str(&fk);
    }
    def
}

pub fn create_entity_table(schema: &str, entity: &EntityType) -> String {
    let mut cols = vec![format!("{} uuid PRIMARY KEY DEFAULT gen_random_uuid()", quoted(PRIMARY_KEY))];
    cols.extend(entity.column_fields().map(|f| column_definition(schema, &entity.id, f)));
    format!(
        "CREATE TABLE {} ({})",
        qualified_table(schema, &entity.table_name()),
        cols.join(", ")
    )
}

/// Join table plus its reverse-lookup index. Idempotent: join tables are shared by every
/// multi-valued field between the same pair of types.
pub fn create_join_table(schema: &str, source_type_id: &str, target_type_id: &str) -> Vec<String> {
    let name = join_table_name(source_type_id, target_type_id);
    let table = qualified_table(schema, &name);
    let pk = quoted(PRIMARY_KEY);
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             \"source\" uuid NOT NULL REFERENCES {} ({pk}) ON DELETE CASCADE, \
             \"target\" uuid NOT NULL REFERENCES {} ({pk}) ON DELETE CASCADE, \
             \"field\" text NOT NULL, \
             PRIMARY KEY (\"source\", \"target\", \"field\"))",
            table,
            qualified_table(schema, &entity_table_name(source_type_id)),
            qualified_table(schema, &entity_table_name(target_type_id)),
            pk = pk
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"target\", \"field\")",
            quoted(&format!("{}_target_idx", name)),
            table
        ),
    ]
}

pub fn drop_table(schema: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified_table(schema, table))
}

/// Statements carrying out one alteration step on the table of `type_id`.
pub fn render_step(schema: &str, type_id: &str, step: &SchemaStep) -> Vec<QueryBuf> {
    let table = qualified_table(schema, &entity_table_name(type_id));
    let alter = |body: String| QueryBuf::with_sql(format!("ALTER TABLE {} {}", table, body));
    let join = |target: &str| qualified_table(schema, &join_table_name(type_id, target));
    match step {
        SchemaStep::AddColumn(f) => {
            let mut def = format!("ADD COLUMN {} {}", quoted(&f.name), f.column_type());
            let default = f.default_literal().filter(|_| f.required);
            if f.required {
                def.push_str(" NOT NULL");
            }
            if let Some(lit) = default {
                def.push_str(&format!(" DEFAULT {}", lit));
            }
            if let Some(fk) = references(schema, type_id, f) {
                def.push(' ');
                def.push_str(&fk);
            }
            let mut out = vec![alter(def)];
            if default.is_some() {
                out.push(alter(format!("ALTER COLUMN {} DROP DEFAULT", quoted(&f.name))));
            }
            out
        }
        SchemaStep::DropColumn(name) => vec![alter(format!("DROP COLUMN IF EXISTS {}", quoted(name)))],
        SchemaStep::RenameColumn { from, to, foreign_key } => {
            let mut out = vec![alter(format!("RENAME COLUMN {} TO {}", quoted(from), quoted(to)))];
            if *foreign_key {
                out.push(alter(format!(
                    "RENAME CONSTRAINT {} TO {}",
                    quoted(&fk_constraint_name(type_id, from)),
                    quoted(&fk_constraint_name(type_id, to))
                )));
            }
            out
        }
        SchemaStep::DropForeignKey(name) => vec![alter(format!(
            "DROP CONSTRAINT IF EXISTS {}",
            quoted(&fk_constraint_name(type_id, name))
        ))],
        SchemaStep::AlterColumnType(f) => {
            let ty = f.column_type();
            let using = f.default_literal().unwrap_or("NULL");
            vec![
                alter(format!("ALTER COLUMN {} DROP NOT NULL", quoted(&f.name))),
                alter(format!(
                    "ALTER COLUMN {c} TYPE {ty} USING {using}::{ty}",
                    c = quoted(&f.name),
                    ty = ty,
                    using = using
                )),
            ]
        }
        SchemaStep::CastColumnType(f) => vec![
            alter(format!("ALTER COLUMN {} DROP NOT NULL", quoted(&f.name))),
            alter(format!(
                "ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}",
                c = quoted(&f.name),
                ty = f.column_type()
            )),
        ],
        SchemaStep::SetNotNull(f) => {
            let mut out = Vec::new();
            if let Some(lit) = f.default_literal() {
                out.push(QueryBuf::with_sql(format!(
                    "UPDATE {} SET {c} = {} WHERE {c} IS NULL",
                    table,
                    lit,
                    c = quoted(&f.name)
                )));
            }
            out.push(alter(format!("ALTER COLUMN {} SET NOT NULL", quoted(&f.name))));
            out
        }
        SchemaStep::DropNotNull(name) => vec![alter(format!("ALTER COLUMN {} DROP NOT NULL", quoted(name)))],
        SchemaStep::ClearColumn(name) => vec![QueryBuf::with_sql(format!("UPDATE {} SET {} = NULL", table, quoted(name)))],
        SchemaStep::AddForeignKey(f) => match f.relation_kind() {
            Some(r) => vec![alter(format!(
                "ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quoted(&fk_constraint_name(type_id, &f.name)),
                quoted(&f.name),
                qualified_table(schema, &entity_table_name(&r.target_entity_type_id)),
                quoted(PRIMARY_KEY),
                r.integrity_strategy.on_delete()
            ))],
            None => Vec::new(),
        },
        SchemaStep::AttachJoinTable { target } => create_join_table(schema, type_id, target)
            .into_iter()
            .map(QueryBuf::with_sql)
            .collect(),
        SchemaStep::DeleteJoinRows { target, field } => {
            let mut q = QueryBuf::new();
            let fp = q.text_placeholder(field);
            q.sql = format!("DELETE FROM {} WHERE \"field\" = {}", join(target), fp);
            vec![q]
        }
        SchemaStep::RenameJoinField { target, from, to } => {
            let mut q = QueryBuf::new();
            let to_p = q.text_placeholder(to);
            let from_p = q.text_placeholder(from);
            q.sql = format!("UPDATE {} SET \"field\" = {} WHERE \"field\" = {}", join(target), to_p, from_p);
            vec![q]
        }
    }
}
