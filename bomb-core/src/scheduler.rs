use crate::domain::{BombId, PlayerId};
use crate::render::MarkerHandle;
use std::collections::{BTreeMap, HashMap};

pub type Millis = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Detonate { bomb_id: BombId },
    WarningBlink { bomb_id: BombId, blink: u8 },
    FadeStep { bomb_id: BombId },
    ClearExplosion { marker: MarkerHandle },
    DamageWindowClosed { player_id: PlayerId },
    StunExpired { player_id: PlayerId },
}

/// Virtual-time timer queue. Events due at the same instant fire in the
/// order they were scheduled.
#[derive(Debug)]
pub struct Scheduler<E> {
    now: Millis,
    next_id: u64,
    queue: BTreeMap<(Millis, TimerId), E>,
    due_at: HashMap<TimerId, Millis>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            now: 0,
            next_id: 0,
            queue: BTreeMap::new(),
            due_at: HashMap::new(),
        }
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn schedule_in(&mut self, delay: Millis, event: E) -> TimerId {
        self.schedule_at(self.now.saturating_add(delay), event)
    }

    pub fn schedule_at(&mut self, at: Millis, event: E) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let at = at.max(self.now);
        self.queue.insert((at, id), event);
        self.due_at.insert(id, at);
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        let at = self.due_at.remove(&id)?;
        self.queue.remove(&(at, id))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.due_at.contains_key(&id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &E> {
        self.queue.values()
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Pops the earliest event due at or before `until`, moving the clock to
    /// its fire time.
    pub fn pop_due(&mut self, until: Millis) -> Option<(TimerId, E)> {
        let (&(at, id), _) = self.queue.iter().next()?;
        if at > until {
            return None;
        }

        let event = self.queue.remove(&(at, id))?;
        self.due_at.remove(&id);
        self.now = self.now.max(at);
        Some((id, event))
    }

    pub fn advance_clock(&mut self, to: Millis) {
        self.now = self.now.max(to);
    }
}
