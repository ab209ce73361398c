use sea_orm::entity::prelude::*;

/// Denormalized hand summaries; sub-structures are stored as JSON.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "hand_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hand_id: String,
    pub table_id: String,
    pub table_name: String,
    pub config: Json,
    pub participants: Json,
    pub community_cards: Json,
    pub pots: Json,
    pub winners: Json,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub duration_ms: i64,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::hand_participants::Entity")]
    Participants,
}

impl Related<super::hand_participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
