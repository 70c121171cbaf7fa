//! Tag entity
//!
//! `normalized_name` is the lower-cased name and carries the unique index,
//! which makes name uniqueness case-insensitive in the store itself.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(unique)]
    pub normalized_name: String,
    pub color: String,
    /// `operation` marks a protected engagement tag
    pub category: Option<String>,
    pub engagement_id: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::log_tag::Entity")]
    LogTag,
}

impl Related<super::log_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LogTag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
