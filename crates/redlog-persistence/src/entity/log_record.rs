//! Log record entity
//!
//! One row per captured operator action. `locked`/`locked_by` hold the
//! persisted edit lock.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "log_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub timestamp: DateTime,
    #[sea_orm(column_type = "Text", nullable)]
    pub internal_ip: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub external_ip: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub mac_address: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub hostname: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub domain: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub username: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub command: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub filename: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub hash_algorithm: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub hash_value: Option<String>,
    pub pid: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub status: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub analyst: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub secrets: Option<String>,
    pub locked: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub locked_by: Option<String>,
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
