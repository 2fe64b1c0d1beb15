//! Live catalog source reading `pg_catalog` through a `sqlx` pool.

use async_trait::async_trait;
use pgmcp_core::QualifiedName;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::CatalogError;
use crate::model::{
    ColumnDescriptor, ObjectKind, ParamMode, ParameterDescriptor, RoutineReturn, SchemaObject,
};
use crate::source::CatalogSource;

const SCHEMAS_SQL: &str = r#"
    select n.nspname
    from pg_catalog.pg_namespace n
    where n.nspname <> all($1)
      and n.nspname not like 'pg\_temp\_%'
      and n.nspname not like 'pg\_toast\_temp\_%'
    order by n.nspname
"#;

const RELATIONS_SQL: &str = r#"
    select c.relname as object_name,
           obj_description(c.oid, 'pg_class') as object_description,
           a.attname::text as column_name,
           format_type(a.atttypid, a.atttypmod) as column_type,
           not a.attnotnull as nullable,
           a.attnum::int4 as ordinal,
           col_description(c.oid, a.attnum::int4) as column_description
    from pg_catalog.pg_class c
    join pg_catalog.pg_namespace n on n.oid = c.relnamespace
    left join pg_catalog.pg_attribute a
      on a.attrelid = c.oid and a.attnum > 0 and not a.attisdropped
    where n.nspname = $1
      and c.relkind::text = any($2)
    order by c.relname, a.attnum
"#;

const ROUTINES_SQL: &str = r#"
    select p.proname::text as routine_name,
           obj_description(p.oid, 'pg_proc') as description,
           pg_get_function_result(p.oid) as result_type,
           p.proretset as returns_set,
           rt.typtype::text as return_typtype,
           format_type(p.prorettype, null) as return_type,
           coalesce(p.proargnames, array[]::text[]) as arg_names,
           coalesce(p.proargmodes::text[], array[]::text[]) as arg_modes,
           array(
             select format_type(t.type_oid, null)
             from unnest(coalesce(p.proallargtypes, p.proargtypes::oid[]))
                  with ordinality as t(type_oid, ord)
             order by t.ord
           ) as arg_types,
           p.pronargdefaults::int4 as default_count
    from pg_catalog.pg_proc p
    join pg_catalog.pg_namespace n on n.oid = p.pronamespace
    join pg_catalog.pg_type rt on rt.oid = p.prorettype
    where n.nspname = $1
      and p.prokind = 'f'
      and p.prorettype not in ('trigger'::regtype, 'event_trigger'::regtype)
    order by p.proname, p.oid
"#;

/// Reads schema metadata from a live Postgres database.
#[derive(Clone)]
pub struct PgCatalogSource {
    pool: PgPool,
    exclude_schemas: Vec<String>,
}

impl PgCatalogSource {
    pub fn new(pool: PgPool, exclude_schemas: Vec<String>) -> Self {
        Self {
            pool,
            exclude_schemas,
        }
    }

    async fn load_relations(
        &self,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaObject>, CatalogError> {
        let relkinds: Vec<String> = match kind {
            ObjectKind::Table => vec!["r".into(), "p".into()],
            _ => vec!["v".into(), "m".into()],
        };

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(RELATIONS_SQL)
            .bind(schema)
            .bind(&relkinds)
            .fetch_all(&mut *conn)
            .await?;

        let mut objects: Vec<SchemaObject> = Vec::new();
        for row in rows {
            let object_name: String = row.try_get("object_name")?;
            let starts_new = objects
                .last()
                .is_none_or(|last| last.name.name != object_name);
            if starts_new {
                objects.push(SchemaObject {
                    name: QualifiedName::new(schema, object_name),
                    kind,
                    columns: Vec::new(),
                    parameters: Vec::new(),
                    returns: None,
                    result_type: None,
                    description: row.try_get("object_description")?,
                });
            }
            if let Some(column) = column_from_row(&row)?
                && let Some(current) = objects.last_mut()
            {
                current.columns.push(column);
            }
        }
        Ok(objects)
    }

    async fn load_routines(&self, schema: &str) -> Result<Vec<SchemaObject>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(ROUTINES_SQL)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| routine_from_row(schema, row))
            .collect()
    }
}

#[async_trait]
impl CatalogSource for PgCatalogSource {
    async fn load_schemas(&self) -> Result<Vec<String>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(SCHEMAS_SQL)
            .bind(&self.exclude_schemas)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("nspname").map_err(CatalogError::from))
            .collect()
    }

    async fn load_objects(
        &self,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaObject>, CatalogError> {
        match kind {
            ObjectKind::Routine => self.load_routines(schema).await,
            relation => self.load_relations(schema, relation).await,
        }
    }
}

fn column_from_row(row: &PgRow) -> Result<Option<ColumnDescriptor>, CatalogError> {
    let Some(name) = row.try_get::<Option<String>, _>("column_name")? else {
        return Ok(None);
    };
    Ok(Some(ColumnDescriptor {
        name,
        native_type: row.try_get("column_type")?,
        nullable: row.try_get("nullable")?,
        ordinal: row.try_get("ordinal")?,
        description: row.try_get("column_description")?,
    }))
}

fn routine_from_row(schema: &str, row: &PgRow) -> Result<SchemaObject, CatalogError> {
    let names: Vec<String> = row.try_get("arg_names")?;
    let modes: Vec<String> = row.try_get("arg_modes")?;
    let types: Vec<String> = row.try_get("arg_types")?;
    let default_count: i32 = row.try_get("default_count")?;
    let parameters = build_parameters(&names, &modes, &types, default_count);

    let returns_set: bool = row.try_get("returns_set")?;
    let typtype: String = row.try_get("return_typtype")?;
    let return_type: String = row.try_get("return_type")?;
    let returns = classify_return(
        returns_set,
        &typtype,
        &return_type,
        parameters.iter().any(|p| p.mode.is_output()),
    );

    Ok(SchemaObject {
        name: QualifiedName::new(schema, row.try_get::<String, _>("routine_name")?),
        kind: ObjectKind::Routine,
        columns: Vec::new(),
        parameters,
        returns: Some(returns),
        result_type: row.try_get("result_type")?,
        description: row.try_get("description")?,
    })
}

/// Assemble parameters from the parallel `pg_proc` argument arrays.
///
/// `pronargdefaults` counts defaults on the trailing input parameters.
pub(crate) fn build_parameters(
    names: &[String],
    modes: &[String],
    types: &[String],
    default_count: i32,
) -> Vec<ParameterDescriptor> {
    let mut params: Vec<ParameterDescriptor> = types
        .iter()
        .enumerate()
        .map(|(i, native_type)| {
            let position = i as i32 + 1;
            let declared = names.get(i).filter(|n| !n.is_empty());
            ParameterDescriptor {
                name: declared
                    .cloned()
                    .unwrap_or_else(|| format!("param_{position}")),
                named: declared.is_some(),
                native_type: native_type.clone(),
                mode: modes
                    .get(i)
                    .map(|m| ParamMode::from_code(m))
                    .unwrap_or(ParamMode::In),
                has_default: false,
                ordinal: position,
            }
        })
        .collect();

    let defaults = default_count.max(0) as usize;
    params
        .iter_mut()
        .filter(|p| p.mode.is_input())
        .rev()
        .take(defaults)
        .for_each(|p| p.has_default = true);
    params
}

/// Decide how a routine's result comes back.
pub(crate) fn classify_return(
    returns_set: bool,
    typtype: &str,
    return_type: &str,
    has_output_params: bool,
) -> RoutineReturn {
    if returns_set {
        RoutineReturn::Set
    } else if return_type == "void" {
        RoutineReturn::Void
    } else if has_output_params || typtype == "c" || return_type == "record" {
        RoutineReturn::Row
    } else {
        RoutineReturn::Scalar(return_type.to_string())
    }
}
