use sea_orm::entity::prelude::*;
use serde::Serialize;

/// Row of the append-only `measurements` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "measurements")]
pub struct Model {
    #[sea_orm(primary_key)]
    #[serde(skip_serializing)]
    pub id: i64,
    pub ts: DateTimeUtc,
    pub region: String,
    pub project_id: Option<i64>,
    pub target_id: String,
    pub host_id: Option<String>,
    #[sea_orm(column_name = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub status: i16,
    pub latency_ms: i64,
    pub meta_json: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
