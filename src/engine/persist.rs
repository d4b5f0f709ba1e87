use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::history::{CardSnapshot, ColumnSnapshot};

/// Handle correlating an outbound persistence call with its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Positional fields of one entity, as the unit of write serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Card(String),
    Column(String),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card(id) => write!(f, "card {id}"),
            Self::Column(id) => write!(f, "column {id}"),
        }
    }
}

/// Where an entity stands relative to its persistence call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// No call outstanding; in-memory state is reconciled.
    Idle,
    /// An optimistic commit is awaiting backend acknowledgment.
    Committing,
}

/// The authoritative values an outbound call carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistPayload {
    CardMove {
        card_id: String,
        status_id: String,
        order: f64,
    },
    ColumnGrid {
        column_id: String,
        grid_row: u32,
        grid_col: u32,
    },
}

impl PersistPayload {
    pub fn entity(&self) -> EntityKey {
        match self {
            Self::CardMove { card_id, .. } => EntityKey::Card(card_id.clone()),
            Self::ColumnGrid { column_id, .. } => EntityKey::Column(column_id.clone()),
        }
    }

    /// The snapshot an entity rolls back to when a *later* call fails
    /// after this one was acknowledged.
    fn as_rollback(&self) -> RollbackValue {
        match self {
            Self::CardMove {
                card_id,
                status_id,
                order,
            } => RollbackValue::Card(CardSnapshot {
                card_id: card_id.clone(),
                status_id: status_id.clone(),
                order: *order,
            }),
            Self::ColumnGrid {
                column_id,
                grid_row,
                grid_col,
            } => RollbackValue::Column(ColumnSnapshot {
                column_id: column_id.clone(),
                grid_row: *grid_row,
                grid_col: *grid_col,
            }),
        }
    }
}

/// An outbound persistence call for the caller to forward to its store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistRequest {
    pub ticket: Ticket,
    pub payload: PersistPayload,
}

/// Pre-mutation value used to restore an entity if its call fails.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackValue {
    Card(CardSnapshot),
    Column(ColumnSnapshot),
}

/// What settling a persistence outcome asks of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Backend confirmed; a queued successor may dispatch now.
    Confirmed { follow_up: Option<PersistRequest> },
    /// Backend rejected and nothing newer touched the entity: restore
    /// this pre-mutation value locally.
    RollBack { rollback: RollbackValue },
    /// Backend rejected, but a newer queued target supersedes the failed
    /// call; send the successor instead of rolling back.
    Superseded { follow_up: PersistRequest },
    /// Local optimistic state diverged past a safe inverse: discard it
    /// and resync the entity from the authoritative snapshot.
    NeedsResync { entity: EntityKey },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PersistError {
    #[error("no persistence call in flight for ticket {0}")]
    StaleTicket(Ticket),
}

#[derive(Debug)]
struct QueuedOp {
    payload: PersistPayload,
    generation: u64,
}

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    payload: PersistPayload,
    rollback: RollbackValue,
    generation: u64,
    deadline: DateTime<Utc>,
    /// Collapsed successor: only the most recent target survives.
    queued: Option<QueuedOp>,
}

/// Per-entity write serialization for the optimistic commit path.
///
/// At most one persistence call per entity is outstanding at a time.
/// Later commits on a busy entity queue behind it, collapse-to-latest,
/// and dispatch when the outstanding call settles.
#[derive(Debug)]
pub struct PendingTracker {
    next_ticket: u64,
    in_flight: HashMap<EntityKey, InFlight>,
    tickets: HashMap<Ticket, EntityKey>,
    generations: HashMap<EntityKey, u64>,
    timeout: Duration,
}

impl PendingTracker {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            next_ticket: 1,
            in_flight: HashMap::new(),
            tickets: HashMap::new(),
            generations: HashMap::new(),
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    fn fresh_ticket(&mut self, entity: EntityKey) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.tickets.insert(ticket, entity);
        ticket
    }

    /// Register a committed mutation. Returns the outbound request to send
    /// now, or `None` when a call for the entity is already outstanding
    /// (the payload queues, collapsing any intermediate target).
    pub fn track(
        &mut self,
        payload: PersistPayload,
        rollback: RollbackValue,
        now: DateTime<Utc>,
    ) -> Option<PersistRequest> {
        let entity = payload.entity();
        let generation = self.bump_generation(&entity);

        if let Some(pending) = self.in_flight.get_mut(&entity) {
            pending.queued = Some(QueuedOp {
                payload,
                generation,
            });
            return None;
        }

        let ticket = self.fresh_ticket(entity.clone());
        let request = PersistRequest {
            ticket,
            payload: payload.clone(),
        };
        self.in_flight.insert(
            entity,
            InFlight {
                ticket,
                payload,
                rollback,
                generation,
                deadline: now + self.timeout,
                queued: None,
            },
        );
        Some(request)
    }

    fn bump_generation(&mut self, entity: &EntityKey) -> u64 {
        let generation = self.generations.entry(entity.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Deliver a backend outcome for an outstanding call.
    pub fn resolve(
        &mut self,
        ticket: Ticket,
        ok: bool,
        now: DateTime<Utc>,
    ) -> Result<Settlement, PersistError> {
        let entity = self
            .tickets
            .remove(&ticket)
            .ok_or(PersistError::StaleTicket(ticket))?;
        let pending = self
            .in_flight
            .remove(&entity)
            .ok_or(PersistError::StaleTicket(ticket))?;

        Ok(self.settle(entity, pending, ok, now))
    }

    fn settle(
        &mut self,
        entity: EntityKey,
        pending: InFlight,
        ok: bool,
        now: DateTime<Utc>,
    ) -> Settlement {
        if ok {
            let follow_up = pending.queued.map(|queued| {
                // The acknowledged values become the rollback baseline for
                // the successor.
                self.dispatch(entity, queued, pending.payload.as_rollback(), now)
            });
            return Settlement::Confirmed { follow_up };
        }

        match pending.queued {
            Some(queued) => {
                // The failed call never landed; the successor keeps the
                // pre-failure baseline.
                let follow_up = self.dispatch(entity, queued, pending.rollback, now);
                Settlement::Superseded { follow_up }
            }
            None => {
                let current = self.generations.get(&entity).copied().unwrap_or(0);
                if current == pending.generation {
                    Settlement::RollBack {
                        rollback: pending.rollback,
                    }
                } else {
                    Settlement::NeedsResync { entity }
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        entity: EntityKey,
        queued: QueuedOp,
        rollback: RollbackValue,
        now: DateTime<Utc>,
    ) -> PersistRequest {
        let ticket = self.fresh_ticket(entity.clone());
        let request = PersistRequest {
            ticket,
            payload: queued.payload.clone(),
        };
        self.in_flight.insert(
            entity,
            InFlight {
                ticket,
                payload: queued.payload,
                rollback,
                generation: queued.generation,
                deadline: now + self.timeout,
                queued: None,
            },
        );
        request
    }

    /// Expire calls past their deadline. Expiry settles exactly like an
    /// explicit failure.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<(EntityKey, Settlement)> {
        let expired: Vec<EntityKey> = self
            .in_flight
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(entity, _)| entity.clone())
            .collect();

        let mut settlements = Vec::with_capacity(expired.len());
        for entity in expired {
            if let Some(pending) = self.in_flight.remove(&entity) {
                self.tickets.remove(&pending.ticket);
                let settlement = self.settle(entity.clone(), pending, false, now);
                settlements.push((entity, settlement));
            }
        }
        settlements
    }

    pub fn phase(&self, entity: &EntityKey) -> MutationPhase {
        if self.in_flight.contains_key(entity) {
            MutationPhase::Committing
        } else {
            MutationPhase::Idle
        }
    }

    /// Forget all tracking for an entity (authoritative resync replaced
    /// its state).
    pub fn clear_entity(&mut self, entity: &EntityKey) {
        if let Some(pending) = self.in_flight.remove(entity) {
            self.tickets.remove(&pending.ticket);
        }
        self.generations.remove(entity);
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_payload(order: f64) -> PersistPayload {
        PersistPayload::CardMove {
            card_id: "c1".to_string(),
            status_id: "s1".to_string(),
            order,
        }
    }

    fn card_rollback(order: f64) -> RollbackValue {
        RollbackValue::Card(CardSnapshot {
            card_id: "c1".to_string(),
            status_id: "s0".to_string(),
            order,
        })
    }

    #[test]
    fn first_commit_dispatches_immediately() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        let request = tracker.track(card_payload(1.0), card_rollback(0.0), now);
        assert!(request.is_some());
        assert_eq!(
            tracker.phase(&EntityKey::Card("c1".into())),
            MutationPhase::Committing
        );
    }

    #[test]
    fn busy_entity_queues_and_collapses_to_latest() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        let first = tracker.track(card_payload(1.0), card_rollback(0.0), now).unwrap();
        assert!(tracker.track(card_payload(2.0), card_rollback(1.0), now).is_none());
        assert!(tracker.track(card_payload(3.0), card_rollback(2.0), now).is_none());

        match tracker.resolve(first.ticket, true, now).unwrap() {
            Settlement::Confirmed {
                follow_up: Some(request),
            } => {
                // Only the most recent target survives the collapse.
                assert_eq!(
                    request.payload,
                    card_payload(3.0),
                );
            }
            other => panic!("expected confirmed with follow-up, got {other:?}"),
        }
    }

    #[test]
    fn failure_without_successor_rolls_back() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        let request = tracker.track(card_payload(1.0), card_rollback(0.0), now).unwrap();
        match tracker.resolve(request.ticket, false, now).unwrap() {
            Settlement::RollBack { rollback } => assert_eq!(rollback, card_rollback(0.0)),
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(tracker.is_idle());
    }

    #[test]
    fn failure_with_successor_supersedes() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        let first = tracker.track(card_payload(1.0), card_rollback(0.0), now).unwrap();
        tracker.track(card_payload(2.0), card_rollback(1.0), now);

        let follow_up = match tracker.resolve(first.ticket, false, now).unwrap() {
            Settlement::Superseded { follow_up } => {
                assert_eq!(follow_up.payload, card_payload(2.0));
                follow_up
            }
            other => panic!("expected superseded, got {other:?}"),
        };

        // The successor failing with nothing queued restores the original
        // baseline, not the never-acknowledged intermediate value.
        match tracker.resolve(follow_up.ticket, false, now).unwrap() {
            Settlement::RollBack { rollback } => assert_eq!(rollback, card_rollback(0.0)),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[test]
    fn timeout_settles_like_failure() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        tracker.track(card_payload(1.0), card_rollback(0.0), now);

        assert!(tracker.expire(now + Duration::seconds(5)).is_empty());

        let settled = tracker.expire(now + Duration::seconds(11));
        assert_eq!(settled.len(), 1);
        match &settled[0] {
            (EntityKey::Card(id), Settlement::RollBack { .. }) => assert_eq!(id, "c1"),
            other => panic!("expected card rollback, got {other:?}"),
        }
        assert!(tracker.is_idle());
    }

    #[test]
    fn stale_ticket_is_an_error() {
        let mut tracker = PendingTracker::new(10);
        let now = Utc::now();
        let request = tracker.track(card_payload(1.0), card_rollback(0.0), now).unwrap();
        tracker.resolve(request.ticket, true, now).unwrap();
        assert_eq!(
            tracker.resolve(request.ticket, true, now),
            Err(PersistError::StaleTicket(request.ticket))
        );
    }
}
