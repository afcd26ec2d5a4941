//! One client's view of the match and its cooperative event loop.
//!
//! Nothing runs on its own: the shell calls [`GameSession::pump`] to apply
//! queued snapshots and [`GameSession::advance_to`] to fire due timers, and
//! every local action pumps once it has written to the store.

use crate::config::{GameConfig, MapLayout};
use crate::damage;
use crate::domain::{BombId, BombRecord, BombVariant, ItemKind, Player, PlayerId};
use crate::error::{ActionRejected, StoreError};
use crate::explosion::{self, Detonation, DetonationCause};
use crate::grid::{Cell, Direction, SpatialIndex};
use crate::reconcile::{self, ReconcileReport};
use crate::render::{GridRenderer, MarkerKind};
use crate::scheduler::{Millis, Scheduler, TimerEvent};
use crate::store::{
    fields, Collection, CollectionSnapshot, SnapshotSender, StoreClient, StorePath, Subscription,
};
use crate::variant;
use crate::world::GameWorld;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::mpsc::{channel, Receiver};
use uuid::Uuid;

/// A punched bomb that keeps landing on players gives up after this many
/// redirects.
pub const MAX_BOMB_REDIRECTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    HpChanged {
        hp: u32,
    },
    LocalPlayerDied,
    Respawned {
        cell: Cell,
    },
    ItemCollected {
        kind: ItemKind,
    },
    StatsChanged {
        fire_power: u32,
        max_bombs: u32,
        bomb_count: u32,
    },
    BombPlaced {
        bomb_id: BombId,
    },
}

/// Borrowed view of a session handed to the engine functions.
pub(crate) struct EngineContext<'a> {
    pub config: &'a GameConfig,
    pub local_player_id: &'a str,
    pub joined: bool,
    pub world: &'a mut GameWorld,
    pub scheduler: &'a mut Scheduler<TimerEvent>,
    pub store: &'a mut dyn StoreClient,
    pub renderer: &'a mut dyn GridRenderer,
    pub rng: &'a mut StdRng,
    pub events: &'a mut Vec<SessionEvent>,
}

impl EngineContext<'_> {
    pub fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    pub fn emit_local_stats(&mut self) {
        let Some(player) = self.world.player(self.local_player_id) else {
            return;
        };
        let event = SessionEvent::StatsChanged {
            fire_power: player.fire_power,
            max_bombs: player.max_bombs,
            bomb_count: player.bomb_count,
        };
        self.events.push(event);
    }
}

pub struct GameSession<S, R> {
    config: GameConfig,
    local_player_id: PlayerId,
    world: GameWorld,
    scheduler: Scheduler<TimerEvent>,
    store: S,
    renderer: R,
    rng: StdRng,
    inbox: Receiver<CollectionSnapshot>,
    inbox_sender: SnapshotSender,
    subscriptions: Vec<Subscription>,
    events: Vec<SessionEvent>,
    joined: bool,
}

impl<S: StoreClient, R: GridRenderer> GameSession<S, R> {
    pub fn new(
        config: GameConfig,
        local_player_id: impl Into<PlayerId>,
        layout: &MapLayout,
        store: S,
        renderer: R,
        rng: StdRng,
    ) -> Self {
        let (inbox_sender, inbox) = channel();
        Self {
            world: GameWorld::new(config.map_size, layout),
            config,
            local_player_id: local_player_id.into(),
            scheduler: Scheduler::new(),
            store,
            renderer,
            rng,
            inbox,
            inbox_sender,
            subscriptions: Vec::new(),
            events: Vec::new(),
            joined: false,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn local_player_id(&self) -> &str {
        &self.local_player_id
    }

    pub fn world(&self) -> &GameWorld {
        &self.world
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.world.player(&self.local_player_id)
    }

    pub fn pending_timers(&self) -> impl Iterator<Item = &TimerEvent> {
        self.scheduler.pending_events()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn context(&mut self) -> EngineContext<'_> {
        EngineContext {
            config: &self.config,
            local_player_id: &self.local_player_id,
            joined: self.joined,
            world: &mut self.world,
            scheduler: &mut self.scheduler,
            store: &mut self.store,
            renderer: &mut self.renderer,
            rng: &mut self.rng,
            events: &mut self.events,
        }
    }

    /// Subscribes to every collection and applies the initial snapshots.
    pub fn start(&mut self) -> Result<(), StoreError> {
        for collection in Collection::ALL {
            let subscribed = self
                .subscriptions
                .iter()
                .any(|subscription| subscription.collection() == collection);
            if subscribed {
                continue;
            }
            let subscription = self
                .store
                .subscribe(collection, self.inbox_sender.clone())?;
            self.subscriptions.push(subscription);
        }
        self.pump();
        Ok(())
    }

    pub fn stop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.store.unsubscribe(subscription);
        }
    }

    /// Writes the generated block layout to the `blocks` key. Done once by
    /// whichever client hosts the match.
    pub fn publish_map(&mut self, layout: &MapLayout) -> Result<(), StoreError> {
        let keys: Vec<Value> = layout
            .blocks
            .iter()
            .filter(|cell| self.world.in_bounds(**cell) && !self.world.is_wall(**cell))
            .map(|cell| Value::String(cell.key()))
            .collect();
        self.store
            .put(&StorePath::collection(Collection::Blocks), Value::Array(keys))?;
        self.pump();
        Ok(())
    }

    /// Applies every queued snapshot, including those produced while
    /// applying earlier ones.
    pub fn pump(&mut self) -> ReconcileReport {
        let mut total = ReconcileReport::default();
        while let Ok(snapshot) = self.inbox.try_recv() {
            let report = self.apply_snapshot(&snapshot);
            total.created += report.created;
            total.updated += report.updated;
            total.disposed += report.disposed;
            total.corrupt += report.corrupt;
        }
        total
    }

    /// Applies one snapshot directly, outside the subscription inbox.
    pub fn apply_snapshot(&mut self, snapshot: &CollectionSnapshot) -> ReconcileReport {
        reconcile::apply_snapshot(&mut self.context(), snapshot)
    }

    pub fn advance_by(&mut self, delta: Millis) {
        self.advance_to(self.scheduler.now().saturating_add(delta));
    }

    /// Fires every timer due up to `target` in order, applying snapshots
    /// between them.
    pub fn advance_to(&mut self, target: Millis) {
        self.pump();
        while let Some((_, event)) = self.scheduler.pop_due(target) {
            self.handle_timer(event);
            self.pump();
        }
        self.scheduler.advance_clock(target);

        let cutoff = target.saturating_sub(self.config.tombstone_retention_ms);
        let pruned = self.world.prune_tombstones(cutoff);
        if pruned > 0 {
            log::debug!("forgot {pruned} settled tombstones");
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        let mut ctx = self.context();
        match event {
            TimerEvent::Detonate { bomb_id } => {
                if let Some(bomb) = ctx.world.bomb_mut(&bomb_id) {
                    bomb.countdown = None;
                    bomb.effect_timer = None;
                }
                explosion::detonate(&mut ctx, &bomb_id, DetonationCause::Timer);
            }
            TimerEvent::WarningBlink { bomb_id, blink } => {
                variant::warning_blink(&mut ctx, &bomb_id, blink);
            }
            TimerEvent::FadeStep { bomb_id } => variant::advance_fade(&mut ctx, &bomb_id),
            TimerEvent::ClearExplosion { marker } => explosion::clear_explosion(&mut ctx, marker),
            TimerEvent::DamageWindowClosed { player_id } => {
                damage::close_damage_window(&mut ctx, &player_id);
            }
            TimerEvent::StunExpired { player_id } => damage::end_stun(&mut ctx, &player_id),
        }
    }

    /// Picks a random free cell, giving up after the configured number of
    /// attempts.
    pub fn find_spawn_cell(&mut self) -> Result<Cell, ActionRejected> {
        let map_size = self.config.map_size;
        for _ in 0..self.config.spawn_attempts {
            let cell = Cell::new(
                self.rng.random_range(0..map_size),
                self.rng.random_range(0..map_size),
            );
            if is_free_cell(&self.world, cell) {
                return Ok(cell);
            }
        }
        Err(ActionRejected::NoFreeSpawnCell)
    }

    /// Publishes the local player at `cell` and takes it into the match.
    pub fn join(&mut self, cell: Cell) -> Result<(), ActionRejected> {
        check_walkable(&self.world, cell)?;

        let player = Player::new(self.local_player_id.clone(), cell, true, &self.config);
        let path = StorePath::entry(Collection::Players, self.local_player_id.clone());
        self.store.put(&path, player_value(&player)?)?;

        if let Some(marker) = self
            .world
            .remove_player(&self.local_player_id)
            .and_then(|previous| previous.marker)
        {
            self.renderer.remove_marker(marker);
        }
        let mut player = player;
        player.marker = Some(
            self.renderer
                .add_marker(cell, MarkerKind::Player { is_local: true }),
        );
        self.world.insert_player(player);
        self.joined = true;
        log::info!("local player {} joined at {cell}", self.local_player_id);

        self.context().emit_local_stats();
        self.pump();
        Ok(())
    }

    pub fn join_random(&mut self) -> Result<Cell, ActionRejected> {
        let cell = self.find_spawn_cell()?;
        self.join(cell)?;
        Ok(cell)
    }

    /// Removes the local player from the store and stops listening.
    pub fn leave(&mut self) {
        let path = StorePath::entry(Collection::Players, self.local_player_id.clone());
        if let Err(error) = self.store.remove(&path) {
            log::error!("failed to remove player {}: {error}", self.local_player_id);
        }
        if let Some(player) = self.world.remove_player(&self.local_player_id) {
            for timer in [player.damage_window, player.stun_timer].into_iter().flatten() {
                self.scheduler.cancel(timer);
            }
            if let Some(marker) = player.marker {
                self.renderer.remove_marker(marker);
            }
        }
        self.joined = false;
        self.stop();
        log::info!("local player {} left", self.local_player_id);
    }

    fn active_local_player(&self) -> Result<&Player, ActionRejected> {
        let player = self
            .world
            .player(&self.local_player_id)
            .filter(|_| self.joined)
            .ok_or(ActionRejected::PlayerMissing)?;
        if player.is_dead {
            return Err(ActionRejected::PlayerDead);
        }
        if player.is_stunned {
            return Err(ActionRejected::PlayerStunned);
        }
        Ok(player)
    }

    /// Moves the local player one cell and collects any item there.
    pub fn step_local_player(&mut self, direction: Direction) -> Result<Cell, ActionRejected> {
        let from = self.active_local_player()?.cell();
        if let Some(player) = self.world.player_mut(&self.local_player_id) {
            player.direction = direction;
        }

        let to = from.offset(direction, 1);
        check_walkable(&self.world, to)?;
        if self.world.is_occupied_by_player(to) || self.world.is_bomb_at(to) {
            return Err(ActionRejected::CellOccupied { x: to.x, y: to.y });
        }

        let path = StorePath::entry(Collection::Players, self.local_player_id.clone());
        self.store
            .update(&path, fields(json!({ "x": to.x, "y": to.y })))?;

        self.world.relocate_player(&self.local_player_id, to);
        if let Some(marker) = self.local_player().and_then(|player| player.marker) {
            self.renderer.move_marker(marker, to);
        }
        let local_player_id = self.local_player_id.clone();
        damage::collect_item(&mut self.context(), &local_player_id);
        self.pump();
        Ok(to)
    }

    /// Places a bomb under the local player. `bombCount` only moves once the
    /// store accepted the bomb.
    pub fn place_bomb(&mut self, variant: BombVariant) -> Result<BombId, ActionRejected> {
        let player = self.active_local_player()?;
        let cell = player.cell();
        if !self.world.in_bounds(cell) {
            return Err(ActionRejected::OutOfBounds {
                x: cell.x,
                y: cell.y,
            });
        }
        if self.world.is_bomb_at(cell) {
            return Err(ActionRejected::CellOccupied {
                x: cell.x,
                y: cell.y,
            });
        }
        if !player.can_place_bomb() {
            return Err(ActionRejected::BombLimitReached {
                bomb_count: player.bomb_count,
                max_bombs: player.max_bombs,
            });
        }

        let bomb_id = format!("bomb_{}", Uuid::new_v4().simple());
        let record = BombRecord {
            x: cell.x,
            y: cell.y,
            timer: self.config.bomb_timer_secs,
            fire_power: player.fire_power,
            placed_by: Some(self.local_player_id.clone()),
            variant,
            is_triggered: false,
            opacity: (variant == BombVariant::Invisible).then_some(0.0),
            detonated: false,
            chained_from: None,
        };
        let value = serde_json::to_value(&record).map_err(|error| {
            ActionRejected::StoreUnavailable {
                reason: error.to_string(),
            }
        })?;

        let path = StorePath::entry(Collection::Bombs, bomb_id.clone());
        if let Err(error) = self.store.put(&path, value) {
            log::error!("failed to place bomb {bomb_id}: {error}");
            return Err(error.into());
        }

        if let Some(player) = self.world.player_mut(&self.local_player_id) {
            player.bomb_count += 1;
        }
        log::debug!("placed {variant:?} bomb {bomb_id} at {cell}");
        let mut ctx = self.context();
        ctx.emit(SessionEvent::BombPlaced {
            bomb_id: bomb_id.clone(),
        });
        ctx.emit_local_stats();
        self.pump();
        Ok(bomb_id)
    }

    /// Punches the bomb in front of the local player along its facing.
    pub fn punch_bomb(&mut self) -> Result<Cell, ActionRejected> {
        let player = self.active_local_player()?;
        let direction = player.direction;
        let front = player.cell().offset(direction, 1);
        let bomb_id = self
            .world
            .bomb_at(front)
            .map(|bomb| bomb.id.clone())
            .ok_or(ActionRejected::NoBombToPunch)?;
        let to = front.offset(direction, self.config.punch_distance);
        self.move_bomb(&bomb_id, to)
    }

    /// Relocates a live bomb. A destination holding a player stuns them and
    /// sends the bomb one cell further along their facing. The countdown is
    /// left as it is.
    pub fn move_bomb(&mut self, bomb_id: &str, to: Cell) -> Result<Cell, ActionRejected> {
        let known = self.world.bomb(bomb_id).is_some_and(|bomb| !bomb.detonated);
        if !known {
            return Err(ActionRejected::UnknownBomb {
                bomb_id: bomb_id.to_string(),
            });
        }

        let mut target = to;
        let mut struck: Vec<PlayerId> = Vec::new();
        loop {
            check_bomb_destination(&self.world, bomb_id, target)?;
            let victim = self
                .world
                .players_at(target)
                .into_iter()
                .filter_map(|id| self.world.player(&id))
                .find(|player| !player.is_dead)
                .map(|player| (player.id.clone(), player.direction));
            let Some((victim_id, heading)) = victim else {
                break;
            };
            if struck.len() == MAX_BOMB_REDIRECTS {
                return Err(ActionRejected::CellOccupied {
                    x: target.x,
                    y: target.y,
                });
            }
            struck.push(victim_id);
            target = target.offset(heading, 1);
        }

        let path = StorePath::entry(Collection::Bombs, bomb_id);
        self.store
            .update(&path, fields(json!({ "x": target.x, "y": target.y })))?;

        self.world.relocate_bomb(bomb_id, target);
        if let Some(marker) = self.world.bomb(bomb_id).and_then(|bomb| bomb.marker) {
            self.renderer.move_marker(marker, target);
        }
        let mut ctx = self.context();
        for victim_id in &struck {
            damage::stun_player(&mut ctx, victim_id);
        }
        log::debug!("bomb {bomb_id} moved to {target}");
        self.pump();
        Ok(target)
    }

    /// Starts the warning sequence of every remote bomb the local player owns.
    pub fn trigger_remote_bombs(&mut self) -> Result<Vec<BombId>, ActionRejected> {
        let player = self
            .world
            .player(&self.local_player_id)
            .filter(|_| self.joined)
            .ok_or(ActionRejected::PlayerMissing)?;
        if player.is_dead {
            return Err(ActionRejected::PlayerDead);
        }

        let owned: Vec<BombId> = self
            .world
            .bombs()
            .filter(|bomb| {
                bomb.variant == BombVariant::Remote
                    && bomb.is_placed_by(&self.local_player_id)
                    && !bomb.is_triggered
                    && !bomb.detonated
            })
            .map(|bomb| bomb.id.clone())
            .collect();

        let mut ctx = self.context();
        let triggered: Vec<BombId> = owned
            .into_iter()
            .filter(|bomb_id| variant::trigger_explosion(&mut ctx, bomb_id, true))
            .collect();
        self.pump();
        Ok(triggered)
    }

    /// Brings a dead local player back at `cell` with starting stats.
    pub fn respawn(&mut self, cell: Cell) -> Result<(), ActionRejected> {
        let player = self
            .world
            .player(&self.local_player_id)
            .filter(|_| self.joined)
            .ok_or(ActionRejected::PlayerMissing)?;
        if !player.is_dead {
            return Err(ActionRejected::NotDead);
        }
        check_walkable(&self.world, cell)?;

        let mut revived = player.clone();
        revived.hp = self.config.initial_hp;
        revived.fire_power = self.config.initial_fire_power;
        revived.max_bombs = self.config.initial_max_bombs;
        revived.bomb_count = 0;
        revived.is_dead = false;
        revived.is_stunned = false;
        revived.direction = Direction::Down;
        revived.cell = cell;
        let path = StorePath::entry(Collection::Players, self.local_player_id.clone());
        self.store.put(&path, player_value(&revived)?)?;

        for timer in [revived.damage_window.take(), revived.stun_timer.take()]
            .into_iter()
            .flatten()
        {
            self.scheduler.cancel(timer);
        }
        revived.marker = Some(
            self.renderer
                .add_marker(cell, MarkerKind::Player { is_local: true }),
        );
        let hp = revived.hp;
        self.world.insert_player(revived);
        self.forfeit_bomb_slots();
        log::info!("local player {} respawned at {cell}", self.local_player_id);

        let mut ctx = self.context();
        ctx.emit(SessionEvent::Respawned { cell });
        ctx.emit(SessionEvent::HpChanged { hp });
        ctx.emit_local_stats();
        self.pump();
        Ok(())
    }

    /// Bombs from before a respawn stay live but no longer hold one of the
    /// fresh player's slots.
    fn forfeit_bomb_slots(&mut self) {
        let owned: Vec<BombId> = self
            .world
            .bombs()
            .filter(|bomb| bomb.is_placed_by(&self.local_player_id) && bomb.counts_toward_limit())
            .map(|bomb| bomb.id.clone())
            .collect();
        for bomb_id in owned {
            if let Some(bomb) = self.world.bomb_mut(&bomb_id) {
                bomb.slot_released = true;
            }
        }
        for bomb_id in self.world.tombstone_ids() {
            if let Some(tombstone) = self.world.tombstone_mut(&bomb_id) {
                tombstone.refund_pending = false;
            }
        }
    }

    /// Detonates a bomb right away. Returns `None` if it is unknown or
    /// already detonated.
    pub fn detonate(&mut self, bomb_id: &str) -> Option<Detonation> {
        let detonation = explosion::detonate(&mut self.context(), bomb_id, DetonationCause::Manual);
        self.pump();
        detonation
    }
}

fn player_value(player: &Player) -> Result<Value, ActionRejected> {
    serde_json::to_value(player.to_record()).map_err(|error| ActionRejected::StoreUnavailable {
        reason: error.to_string(),
    })
}

fn check_walkable(world: &GameWorld, cell: Cell) -> Result<(), ActionRejected> {
    if !world.in_bounds(cell) {
        return Err(ActionRejected::OutOfBounds {
            x: cell.x,
            y: cell.y,
        });
    }
    if world.is_wall(cell) || world.is_block(cell) {
        return Err(ActionRejected::Blocked {
            x: cell.x,
            y: cell.y,
        });
    }
    Ok(())
}

fn check_bomb_destination(
    world: &GameWorld,
    bomb_id: &str,
    cell: Cell,
) -> Result<(), ActionRejected> {
    check_walkable(world, cell)?;
    if world.bomb_at(cell).is_some_and(|bomb| bomb.id != bomb_id) {
        return Err(ActionRejected::CellOccupied {
            x: cell.x,
            y: cell.y,
        });
    }
    Ok(())
}

fn is_free_cell(world: &GameWorld, cell: Cell) -> bool {
    check_walkable(world, cell).is_ok()
        && !world.is_occupied_by_player(cell)
        && !world.is_bomb_at(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RecordingRenderer;
    use crate::store::MemoryStore;
    use rand::SeedableRng;

    fn session(layout: &MapLayout) -> GameSession<MemoryStore, RecordingRenderer> {
        let mut session = GameSession::new(
            GameConfig::with_map_size(25),
            "me",
            layout,
            MemoryStore::new(),
            RecordingRenderer::new(),
            StdRng::seed_from_u64(11),
        );
        session.start().expect("store is online");
        session
    }

    #[test]
    fn actions_before_joining_are_rejected() {
        let mut session = session(&MapLayout::open());
        assert_eq!(
            session.place_bomb(BombVariant::Normal),
            Err(ActionRejected::PlayerMissing)
        );
        assert_eq!(
            session.step_local_player(Direction::Up),
            Err(ActionRejected::PlayerMissing)
        );
    }

    #[test]
    fn joining_publishes_the_local_player() {
        let mut session = session(&MapLayout::open());
        session.join(Cell::new(3, 4)).expect("join succeeds");

        let record = session
            .store()
            .get(&StorePath::entry(Collection::Players, "me"))
            .expect("player record stored");
        assert_eq!(record, json!({ "x": 3, "y": 4, "hp": 3 }));
        assert!(session.is_joined());
        assert_eq!(session.local_player().map(Player::cell), Some(Cell::new(3, 4)));
    }

    #[test]
    fn joining_on_a_wall_is_rejected() {
        let layout = MapLayout::open().with_walls([Cell::new(1, 1)]);
        let mut session = session(&layout);
        assert_eq!(
            session.join(Cell::new(1, 1)),
            Err(ActionRejected::Blocked { x: 1, y: 1 })
        );
    }

    #[test]
    fn spawn_search_gives_up_on_a_full_map() {
        let walls: Vec<Cell> = (0..25)
            .flat_map(|x| (0..25).map(move |y| Cell::new(x, y)))
            .collect();
        let mut session = session(&MapLayout::open().with_walls(walls));
        assert_eq!(session.find_spawn_cell(), Err(ActionRejected::NoFreeSpawnCell));
    }

    #[test]
    fn spawn_cells_are_free() {
        let mut session = session(&MapLayout::open().with_walls([Cell::new(0, 0)]));
        for _ in 0..20 {
            let cell = session.find_spawn_cell().expect("open map has room");
            assert!(cell.in_bounds(25));
            assert_ne!(cell, Cell::new(0, 0));
        }
    }

    #[test]
    fn movement_updates_facing_even_when_blocked() {
        let layout = MapLayout::open().with_walls([Cell::new(5, 4)]);
        let mut session = session(&layout);
        session.join(Cell::new(5, 5)).expect("join succeeds");

        assert_eq!(
            session.step_local_player(Direction::Up),
            Err(ActionRejected::Blocked { x: 5, y: 4 })
        );
        assert_eq!(
            session.local_player().map(|player| player.direction),
            Some(Direction::Up)
        );
        assert_eq!(session.step_local_player(Direction::Right), Ok(Cell::new(6, 5)));
        assert_eq!(
            session
                .store()
                .get(&StorePath::field(Collection::Players, "me", "x")),
            Some(json!(6))
        );
    }

    #[test]
    fn placing_a_bomb_counts_it_and_materializes_it() {
        let mut session = session(&MapLayout::open());
        session.join(Cell::new(5, 5)).expect("join succeeds");

        let bomb_id = session.place_bomb(BombVariant::Normal).expect("bomb placed");
        assert!(bomb_id.starts_with("bomb_"));
        assert_eq!(session.local_player().map(|player| player.bomb_count), Some(1));
        assert!(session.world().bomb(&bomb_id).is_some());
        assert_eq!(
            session.place_bomb(BombVariant::Normal),
            Err(ActionRejected::CellOccupied { x: 5, y: 5 })
        );
    }

    #[test]
    fn second_bomb_over_the_limit_is_rejected() {
        let mut session = session(&MapLayout::open());
        session.join(Cell::new(5, 5)).expect("join succeeds");
        session.place_bomb(BombVariant::Normal).expect("first bomb");
        session.step_local_player(Direction::Right).expect("step away");

        assert_eq!(
            session.place_bomb(BombVariant::Normal),
            Err(ActionRejected::BombLimitReached {
                bomb_count: 1,
                max_bombs: 1
            })
        );
    }

    #[test]
    fn session_events_serialize_with_type_tag() {
        let value = serde_json::to_value(SessionEvent::StatsChanged {
            fire_power: 2,
            max_bombs: 1,
            bomb_count: 0,
        })
        .expect("event serializes");
        assert_eq!(value["type"], "stats_changed");
        assert_eq!(value["fire_power"], 2);
    }

    #[test]
    fn leaving_removes_the_player_and_unsubscribes() {
        let mut session = session(&MapLayout::open());
        session.join(Cell::new(2, 2)).expect("join succeeds");
        session.leave();

        assert!(session
            .store()
            .get(&StorePath::entry(Collection::Players, "me"))
            .is_none());
        assert!(session.local_player().is_none());
        assert!(!session.is_joined());
    }
}
