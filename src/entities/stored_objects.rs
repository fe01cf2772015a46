use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable reference to a completed upload.
///
/// The unique `locator` column is the idempotency key for completion
/// handling: duplicate deliveries conflict instead of inserting twice.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stored_objects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub locator: String,
    pub url: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub context: Json,
    pub uploaded_by: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
