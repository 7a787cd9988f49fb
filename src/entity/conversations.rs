use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub id: String,
    pub title: String,
    pub user_id: Option<String>,
    /// JSON array of chat messages.
    pub messages: String,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

impl ActiveModelBehavior for ActiveModel {}
