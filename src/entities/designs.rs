use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "designs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Price in minor units (cents). None or 0 means free.
    pub price_cents: Option<i64>,
    pub currency: String,
    #[sea_orm(default_expr = "Expr::value(false)")]
    pub free_download: bool,
    #[sea_orm(default_expr = "Expr::value(0)")]
    pub downloads: i32,
    pub file_path: Option<String>,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Flag takes precedence over price: a priced design marked
    /// free_download is still free.
    pub fn is_free(&self) -> bool {
        self.free_download || self.price_cents.unwrap_or(0) == 0
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(has_many = "super::design_files::Entity")]
    DesignFiles,
    #[sea_orm(has_many = "super::purchases::Entity")]
    Purchases,
    #[sea_orm(has_many = "super::download_events::Entity")]
    DownloadEvents,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::design_files::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DesignFiles.def()
    }
}

impl Related<super::purchases::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchases.def()
    }
}

impl Related<super::download_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DownloadEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
