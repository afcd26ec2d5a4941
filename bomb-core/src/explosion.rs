//! Detonation and ray propagation.
//!
//! A detonation affects the origin once, then walks each cardinal ray out to
//! `firePower` cells. Walls and the map edge stop a ray before the cell; a
//! block is hit, destroyed and stops the ray after the cell.

use crate::damage;
use crate::domain::{BombPhase, ItemKind, PlayerId, Tombstone};
use crate::grid::{Cell, Direction, SpatialIndex};
use crate::render::{MarkerHandle, MarkerKind};
use crate::scheduler::TimerEvent;
use crate::session::EngineContext;
use crate::store::{fields, Collection, StorePath};
use crate::variant;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetonationCause {
    /// Countdown or warning sequence ran out on this client.
    Timer,
    /// Another client published `detonated: true`.
    Observed,
    /// Explicit request from the shell.
    Manual,
}

impl DetonationCause {
    /// Whether this client decided the detonation and therefore publishes
    /// its follow-up writes (items, chained bombs).
    pub fn is_local(self) -> bool {
        self != DetonationCause::Observed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlastCell {
    pub cell: Cell,
    pub hits_block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detonation {
    pub bomb_id: String,
    pub origin: Cell,
    pub cause: DetonationCause,
    pub affected: Vec<Cell>,
    pub destroyed_blocks: Vec<Cell>,
    pub spawned_items: Vec<(Cell, ItemKind)>,
    pub damaged_players: Vec<PlayerId>,
}

/// Cells a bomb at `origin` with `fire_power` affects, origin first, then
/// the rays in [`Direction::CARDINAL`] order.
pub fn blast_pattern(origin: Cell, fire_power: u32, index: &impl SpatialIndex) -> Vec<BlastCell> {
    if !index.in_bounds(origin) || index.is_wall(origin) {
        return Vec::new();
    }

    let origin_blast = BlastCell {
        cell: origin,
        hits_block: index.is_block(origin),
    };
    let mut pattern = vec![origin_blast];
    if origin_blast.hits_block {
        return pattern;
    }

    let reach = i32::try_from(fire_power).unwrap_or(i32::MAX);
    for direction in Direction::CARDINAL {
        for distance in 1..=reach {
            let cell = origin.offset(direction, distance);
            if !index.in_bounds(cell) || index.is_wall(cell) {
                break;
            }
            let hits_block = index.is_block(cell);
            pattern.push(BlastCell { cell, hits_block });
            if hits_block {
                break;
            }
        }
    }
    pattern
}

/// Runs a bomb's detonation at most once. Returns `None` when the bomb is
/// unknown or has already gone off.
pub(crate) fn detonate(
    ctx: &mut EngineContext<'_>,
    bomb_id: &str,
    cause: DetonationCause,
) -> Option<Detonation> {
    let bomb = ctx.world.bomb_mut(bomb_id)?;
    if bomb.detonated {
        return None;
    }
    bomb.detonated = true;
    bomb.phase = BombPhase::Detonating;
    let timers = [bomb.countdown.take(), bomb.effect_timer.take()];
    let origin = bomb.cell();
    let fire_power = bomb.fire_power;
    for timer in timers.into_iter().flatten() {
        ctx.scheduler.cancel(timer);
    }

    let path = StorePath::entry(Collection::Bombs, bomb_id);
    if cause.is_local() {
        if let Err(error) = ctx.store.update(&path, fields(json!({ "detonated": true }))) {
            log::error!("failed to announce detonation of bomb {bomb_id}: {error}");
        }
    }

    let mut detonation = Detonation {
        bomb_id: bomb_id.to_string(),
        origin,
        cause,
        affected: Vec::new(),
        destroyed_blocks: Vec::new(),
        spawned_items: Vec::new(),
        damaged_players: Vec::new(),
    };

    for blast in blast_pattern(origin, fire_power, &*ctx.world) {
        let marker = ctx.renderer.add_marker(blast.cell, MarkerKind::Explosion);
        ctx.scheduler.schedule_in(
            ctx.config.explosion_visible_ms,
            TimerEvent::ClearExplosion { marker },
        );
        detonation.affected.push(blast.cell);

        if blast.hits_block {
            destroy_block(ctx, blast.cell, cause, &mut detonation);
        } else {
            let hit = damage::check_player_damage(ctx, blast.cell);
            detonation.damaged_players.extend(hit);
        }
    }

    let mut bomb = ctx.world.remove_bomb(bomb_id)?;
    bomb.phase = BombPhase::Removed;
    if let Some(marker) = bomb.marker.take() {
        ctx.renderer.remove_marker(marker);
    }
    ctx.world.insert_tombstone(
        bomb.id.clone(),
        Tombstone {
            refund_pending: bomb.is_placed_by(ctx.local_player_id) && bomb.counts_toward_limit(),
            removal_pending: true,
            settled_at: None,
        },
    );
    retry_removal(ctx, bomb_id);
    if cause.is_local() && !detonation.destroyed_blocks.is_empty() {
        let remaining = ctx.world.block_cells();
        publish_blocks(ctx, remaining);
    }

    log::info!(
        "bomb {bomb_id} detonated at {origin} ({cause:?}), {} cells affected",
        detonation.affected.len()
    );
    (variant::behavior(bomb.variant).on_detonate)(ctx, &bomb, cause);
    Some(detonation)
}

fn destroy_block(
    ctx: &mut EngineContext<'_>,
    cell: Cell,
    cause: DetonationCause,
    detonation: &mut Detonation,
) {
    let Some(marker) = ctx.world.destroy_block(cell) else {
        return;
    };
    if let Some(marker) = marker {
        ctx.renderer.remove_marker(marker);
    }
    detonation.destroyed_blocks.push(cell);

    // Observers receive the detonating client's item through `items`.
    if !cause.is_local() {
        return;
    }
    if let Some(kind) = damage::roll_block_drop(ctx) {
        damage::spawn_item(ctx, cell, kind);
        detonation.spawned_items.push((cell, kind));
    }
}

/// Removes a detonated bomb from the store. Success settles the tombstone;
/// failure leaves it pending for the next snapshot.
pub(crate) fn retry_removal(ctx: &mut EngineContext<'_>, bomb_id: &str) {
    let path = StorePath::entry(Collection::Bombs, bomb_id);
    match ctx.store.remove(&path) {
        Ok(()) => settle_tombstone(ctx, bomb_id),
        Err(error) => log::error!("failed to remove bomb {bomb_id}: {error}"),
    }
}

/// Marks the removal as done and releases the owner's bomb slot once.
pub(crate) fn settle_tombstone(ctx: &mut EngineContext<'_>, bomb_id: &str) {
    let now = ctx.scheduler.now();
    let Some(tombstone) = ctx.world.tombstone_mut(bomb_id) else {
        return;
    };
    tombstone.removal_pending = false;
    tombstone.settled_at.get_or_insert(now);
    if !std::mem::take(&mut tombstone.refund_pending) {
        return;
    }

    let local_player_id = ctx.local_player_id;
    if let Some(player) = ctx.world.player_mut(local_player_id) {
        player.release_bomb();
        ctx.emit_local_stats();
    }
}

/// Rewrites the `blocks` array so clients joining later never see a
/// destroyed block.
pub(crate) fn publish_blocks(ctx: &mut EngineContext<'_>, cells: Vec<Cell>) {
    let keys = cells.into_iter().map(|cell| Value::String(cell.key())).collect();
    let path = StorePath::collection(Collection::Blocks);
    if let Err(error) = ctx.store.put(&path, Value::Array(keys)) {
        log::error!("failed to publish the block set: {error}");
    }
}

pub(crate) fn clear_explosion(ctx: &mut EngineContext<'_>, marker: MarkerHandle) {
    ctx.renderer.remove_marker(marker);
}

impl Detonation {
    pub fn affects(&self, cell: Cell) -> bool {
        self.affected.contains(&cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapLayout;
    use crate::world::GameWorld;

    fn cells(pattern: &[BlastCell]) -> Vec<Cell> {
        let mut cells: Vec<Cell> = pattern.iter().map(|blast| blast.cell).collect();
        cells.sort();
        cells
    }

    fn sorted(mut cells: Vec<Cell>) -> Vec<Cell> {
        cells.sort();
        cells
    }

    #[test]
    fn open_map_blast_forms_a_cross() {
        let world = GameWorld::new(25, &MapLayout::open());
        let pattern = blast_pattern(Cell::new(5, 5), 2, &world);
        assert_eq!(
            cells(&pattern),
            sorted(vec![
                Cell::new(5, 5),
                Cell::new(6, 5),
                Cell::new(7, 5),
                Cell::new(4, 5),
                Cell::new(3, 5),
                Cell::new(5, 6),
                Cell::new(5, 7),
                Cell::new(5, 4),
                Cell::new(5, 3),
            ])
        );
        assert_eq!(pattern[0].cell, Cell::new(5, 5));
    }

    #[test]
    fn zero_fire_power_only_affects_the_origin() {
        let world = GameWorld::new(25, &MapLayout::open());
        let pattern = blast_pattern(Cell::new(5, 5), 0, &world);
        assert_eq!(cells(&pattern), vec![Cell::new(5, 5)]);
    }

    #[test]
    fn blocks_are_hit_and_stop_the_ray() {
        let mut world = GameWorld::new(25, &MapLayout::open());
        world.insert_block(Cell::new(7, 5), None);
        let pattern = blast_pattern(Cell::new(5, 5), 3, &world);

        assert!(pattern.contains(&BlastCell {
            cell: Cell::new(7, 5),
            hits_block: true
        }));
        assert!(!pattern.iter().any(|blast| blast.cell == Cell::new(8, 5)));
        assert!(pattern.iter().any(|blast| blast.cell == Cell::new(2, 5)));
    }

    #[test]
    fn walls_stop_the_ray_without_being_affected() {
        let layout = MapLayout::open().with_walls([Cell::new(5, 4)]);
        let world = GameWorld::new(25, &layout);
        let pattern = blast_pattern(Cell::new(5, 5), 3, &world);
        assert!(!pattern.iter().any(|blast| blast.cell.y < 5 && blast.cell.x == 5));
    }

    #[test]
    fn map_edge_truncates_rays() {
        let world = GameWorld::new(25, &MapLayout::open());
        let pattern = blast_pattern(Cell::new(0, 0), 2, &world);
        assert_eq!(
            cells(&pattern),
            sorted(vec![
                Cell::new(0, 0),
                Cell::new(1, 0),
                Cell::new(2, 0),
                Cell::new(0, 1),
                Cell::new(0, 2),
            ])
        );
    }

    #[test]
    fn a_bomb_on_a_wall_affects_nothing() {
        let layout = MapLayout::open().with_walls([Cell::new(5, 5)]);
        let world = GameWorld::new(25, &layout);
        assert!(blast_pattern(Cell::new(5, 5), 2, &world).is_empty());
    }

    #[test]
    fn observed_detonations_do_not_publish_follow_ups() {
        assert!(DetonationCause::Timer.is_local());
        assert!(DetonationCause::Manual.is_local());
        assert!(!DetonationCause::Observed.is_local());
    }
}
