use sea_orm::entity::prelude::*;

/// Lookup table backing "hands for user" queries.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "hand_participants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hand_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub seat_id: i32,
    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::hand_records::Entity",
        from = "Column::HandId",
        to = "super::hand_records::Column::HandId"
    )]
    HandRecord,
}

impl Related<super::hand_records::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HandRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
