use std::collections::HashMap;

use crate::events::types::{Chips, GameEvent, HandId, SeatId, TableId, UserId};

use super::payload::{HandEvent, HandStarted, PotAward, Reveal};
use super::record::{
    HandConfig, HandParticipant, HandRecord, HandResult, ParticipantAction, Pot, Winner,
    UNKNOWN_TABLE_NAME,
};

/// Fold a hand's events, ordered by sequence, into its record.
///
/// Pure and deterministic: the same events always produce the same record.
/// Events that reference unknown seats or users are skipped.
pub fn reduce_hand(hand_id: &HandId, table_id: &TableId, events: &[GameEvent]) -> HandRecord {
    let mut state = HandState::default();
    for event in events {
        state.apply(event);
    }
    state.finish(hand_id.clone(), table_id.clone())
}

#[derive(Default)]
struct HandState {
    table_name: Option<String>,
    config: HandConfig,
    participants: Vec<HandParticipant>,
    by_user: HashMap<UserId, usize>,
    seat_users: HashMap<SeatId, UserId>,
    community_cards: Vec<String>,
    pots: Vec<Pot>,
    winners: Vec<Winner>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl HandState {
    fn apply(&mut self, event: &GameEvent) {
        match HandEvent::decode(event) {
            HandEvent::Started(started) => {
                self.started_at = Some(event.timestamp);
                self.seed(started);
            }
            HandEvent::CardsDealt {
                user_id,
                seat_id,
                cards,
            } => {
                if cards.is_empty() {
                    return;
                }
                if let Some(p) = self.resolve(user_id.as_deref(), seat_id) {
                    p.hole_cards = Some(cards);
                }
            }
            HandEvent::ActionTaken {
                user_id,
                seat_id,
                street,
                action,
                amount,
            } => {
                if let Some(p) = self.resolve(user_id.as_deref(), seat_id) {
                    if action == "FOLD" {
                        p.result = HandResult::Folded;
                    }
                    p.actions.push(ParticipantAction {
                        street,
                        action,
                        amount,
                        timestamp: event.timestamp,
                    });
                }
            }
            HandEvent::StreetAdvanced { cards } => self.community_cards.extend(cards),
            HandEvent::Showdown { reveals } => {
                for reveal in reveals {
                    self.reveal(reveal);
                }
            }
            HandEvent::CardsRevealed(reveal) => self.reveal(reveal),
            HandEvent::PotAwarded(award) => self.award(award),
            HandEvent::Completed { end_stacks } => {
                self.completed_at = Some(event.timestamp);
                for (user_id, stack) in end_stacks {
                    if let Some(idx) = self.by_user.get(&user_id) {
                        self.participants[*idx].ending_stack = stack;
                    }
                }
            }
            HandEvent::Ignored => {}
        }
    }

    fn seed(&mut self, started: HandStarted) {
        self.table_name = Some(started.table_name);
        self.config = started.config;
        self.participants.clear();
        self.by_user.clear();
        self.seat_users.clear();
        for seat in started.seats {
            if self.by_user.contains_key(&seat.user_id) {
                continue;
            }
            self.seat_users.insert(seat.seat_id, seat.user_id.clone());
            self.by_user
                .insert(seat.user_id.clone(), self.participants.len());
            self.participants.push(HandParticipant {
                seat_id: seat.seat_id,
                user_id: seat.user_id,
                nickname: seat.nickname,
                starting_stack: seat.stack,
                ending_stack: seat.stack,
                hole_cards: None,
                actions: Vec::new(),
                result: HandResult::Lost,
            });
        }
    }

    fn user_for(&self, user_id: Option<&str>, seat_id: Option<SeatId>) -> Option<UserId> {
        match user_id {
            Some(user_id) if self.by_user.contains_key(user_id) => Some(user_id.to_string()),
            _ => seat_id.and_then(|seat| self.seat_users.get(&seat).cloned()),
        }
    }

    fn resolve(
        &mut self,
        user_id: Option<&str>,
        seat_id: Option<SeatId>,
    ) -> Option<&mut HandParticipant> {
        let user = self.user_for(user_id, seat_id)?;
        let idx = *self.by_user.get(&user)?;
        self.participants.get_mut(idx)
    }

    // Seat takes precedence: reveals are keyed by seat.
    fn reveal(&mut self, reveal: Reveal) {
        if reveal.cards.is_empty() {
            return;
        }
        let user = match reveal.seat_id.and_then(|seat| self.seat_users.get(&seat)) {
            Some(user) => user.clone(),
            None => match self.user_for(reveal.user_id.as_deref(), None) {
                Some(user) => user,
                None => return,
            },
        };
        if let Some(p) = self.resolve(Some(user.as_str()), None) {
            p.hole_cards = Some(reveal.cards);
        }
    }

    fn award(&mut self, award: PotAward) {
        let mut resolved: Vec<(UserId, Option<Chips>)> = Vec::new();
        for winner in award.winners {
            let Some(user) = self.user_for(winner.user_id.as_deref(), winner.seat_id) else {
                continue;
            };
            if !resolved.iter().any(|(seen, _)| seen == &user) {
                resolved.push((user, winner.share));
            }
        }
        if resolved.is_empty() {
            self.pots.push(Pot {
                amount: award.amount,
                winners: Vec::new(),
            });
            return;
        }

        let split = resolved.len() > 1;
        let even_share = award.amount / resolved.len() as Chips;
        for (user, share) in &resolved {
            let amount = share.unwrap_or(even_share);
            match self.winners.iter_mut().find(|w| &w.user_id == user) {
                Some(existing) => existing.amount += amount,
                None => self.winners.push(Winner {
                    user_id: user.clone(),
                    amount,
                }),
            }
            if let Some(p) = self.resolve(Some(user.as_str()), None) {
                p.result = match p.result {
                    HandResult::Folded => HandResult::Folded,
                    _ if split => HandResult::Split,
                    HandResult::Split => HandResult::Split,
                    _ => HandResult::Won,
                };
            }
        }
        self.pots.push(Pot {
            amount: award.amount,
            winners: resolved.into_iter().map(|(user, _)| user).collect(),
        });
    }

    fn finish(self, hand_id: HandId, table_id: TableId) -> HandRecord {
        let duration = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0),
            _ => 0,
        };
        HandRecord {
            hand_id,
            table_id,
            table_name: self
                .table_name
                .unwrap_or_else(|| UNKNOWN_TABLE_NAME.to_string()),
            config: self.config,
            participants: self.participants,
            community_cards: self.community_cards,
            pots: self.pots,
            winners: self.winners,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration,
        }
    }
}
