use sea_orm::entity::prelude::*;

/// Append-only event log. Indexed on `(table_id, timestamp)`,
/// `(hand_id, sequence)`, `(user_id, timestamp)` and `(event_type, timestamp)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub timestamp: DateTimeUtc,
    pub event_type: String,
    pub table_id: String,
    pub hand_id: Option<String>,
    pub user_id: Option<String>,
    pub seat_id: Option<i32>,
    pub payload: Json,
    pub sequence: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
