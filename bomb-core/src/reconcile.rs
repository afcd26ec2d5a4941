//! Converges the local entity maps onto a full collection snapshot.
//!
//! Entries present locally but not in the snapshot are disposed, new entries
//! are materialized through the variant table, and entries present in both
//! merge their mutable fields. Only real differences touch the renderer, so
//! applying the same snapshot twice is a no-op.

use crate::damage;
use crate::domain::{Bomb, BombRecord, Item, ItemRecord, Player, PlayerRecord};
use crate::error::EntityError;
use crate::explosion::{self, DetonationCause};
use crate::grid::{Cell, Direction, SpatialIndex};
use crate::render::MarkerKind;
use crate::session::EngineContext;
use crate::store::{Collection, CollectionSnapshot, StorePath};
use crate::variant;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub disposed: usize,
    pub corrupt: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn apply_snapshot(
    ctx: &mut EngineContext<'_>,
    snapshot: &CollectionSnapshot,
) -> ReconcileReport {
    let report = match snapshot.collection {
        Collection::Bombs => reconcile_bombs(ctx, snapshot),
        Collection::Players => reconcile_players(ctx, snapshot),
        Collection::Items => reconcile_items(ctx, snapshot),
        Collection::Blocks => reconcile_blocks(ctx, snapshot),
    };
    if !report.is_noop() {
        log::debug!("reconciled {}: {report:?}", snapshot.collection);
    }
    report
}

fn parse_entry<T: DeserializeOwned>(
    collection: Collection,
    key: &str,
    value: &Value,
) -> Result<T, EntityError> {
    T::deserialize(value).map_err(|error| EntityError::Corrupt {
        collection,
        key: key.to_string(),
        reason: error.to_string(),
    })
}

fn check_position(
    ctx: &EngineContext<'_>,
    collection: Collection,
    key: &str,
    cell: Cell,
) -> Result<(), EntityError> {
    if ctx.world.in_bounds(cell) {
        return Ok(());
    }
    Err(EntityError::InvalidPosition {
        collection,
        key: key.to_string(),
        x: cell.x,
        y: cell.y,
    })
}

/// Removes an entry that cannot be materialized. Never fails the
/// reconciliation.
fn discard_corrupt(ctx: &mut EngineContext<'_>, error: &EntityError) {
    log::warn!("discarding {error}");
    let path = match error {
        EntityError::Corrupt {
            collection, key, ..
        }
        | EntityError::InvalidPosition {
            collection, key, ..
        } => StorePath::entry(*collection, key.clone()),
    };
    if let Err(error) = ctx.store.remove(&path) {
        log::error!("failed to remove corrupt entry {path}: {error}");
    }
}

fn reconcile_bombs(ctx: &mut EngineContext<'_>, snapshot: &CollectionSnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut records: BTreeMap<String, BombRecord> = BTreeMap::new();
    let mut tombstoned_present = HashSet::new();

    for (key, value) in snapshot.entries() {
        if ctx.world.is_tombstoned(key) {
            tombstoned_present.insert(key.to_string());
            continue;
        }
        let parsed = parse_entry::<BombRecord>(Collection::Bombs, key, value).and_then(|record| {
            check_position(ctx, Collection::Bombs, key, record.cell())?;
            Ok(record)
        });
        match parsed {
            Ok(record) => {
                records.insert(key.to_string(), record);
            }
            Err(error) => {
                discard_corrupt(ctx, &error);
                report.corrupt += 1;
            }
        }
    }

    // A detonated id still in the store means our removal has not landed.
    for bomb_id in ctx.world.tombstone_ids() {
        if tombstoned_present.contains(&bomb_id) {
            explosion::retry_removal(ctx, &bomb_id);
        } else {
            explosion::settle_tombstone(ctx, &bomb_id);
        }
    }

    for bomb_id in ctx.world.bomb_ids() {
        if !records.contains_key(&bomb_id) {
            dispose_bomb(ctx, &bomb_id);
            report.disposed += 1;
        }
    }

    for (bomb_id, record) in records {
        if ctx.world.bomb(&bomb_id).is_some() {
            if merge_bomb(ctx, &bomb_id, &record) {
                report.updated += 1;
            }
        } else {
            create_bomb(ctx, bomb_id, &record);
            report.created += 1;
        }
    }
    report
}

fn create_bomb(ctx: &mut EngineContext<'_>, bomb_id: String, record: &BombRecord) {
    let mut bomb = Bomb::from_record(bomb_id.clone(), record, ctx.scheduler.now());
    bomb.marker = Some(ctx.renderer.add_marker(
        record.cell(),
        MarkerKind::Bomb {
            variant: record.variant,
        },
    ));
    ctx.world.insert_bomb(bomb);
    log::debug!("bomb {bomb_id} ({:?}) appeared at {}", record.variant, record.cell());

    (variant::behavior(record.variant).on_create)(ctx, &bomb_id, record);
    if record.detonated {
        explosion::detonate(ctx, &bomb_id, DetonationCause::Observed);
    }
}

fn merge_bomb(ctx: &mut EngineContext<'_>, bomb_id: &str, record: &BombRecord) -> bool {
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return false;
    };
    let changes = bomb.diff(record);
    if changes.is_empty() {
        return false;
    }

    if let Some(opacity) = changes.opacity {
        bomb.opacity = opacity;
        if let Some(marker) = bomb.marker {
            ctx.renderer.set_opacity(marker, opacity);
        }
    }
    let marker = bomb.marker;
    if let Some(to) = changes.moved_to {
        ctx.world.relocate_bomb(bomb_id, to);
        if let Some(marker) = marker {
            ctx.renderer.move_marker(marker, to);
        }
    }

    let variant = record.variant;
    (variant::behavior(variant).on_external_update)(ctx, bomb_id, &changes);
    if changes.detonation_observed {
        explosion::detonate(ctx, bomb_id, DetonationCause::Observed);
    }
    true
}

/// Drops a bomb the store no longer holds without detonating it.
fn dispose_bomb(ctx: &mut EngineContext<'_>, bomb_id: &str) {
    let Some(bomb) = ctx.world.remove_bomb(bomb_id) else {
        return;
    };
    for timer in [bomb.countdown, bomb.effect_timer].into_iter().flatten() {
        ctx.scheduler.cancel(timer);
    }
    if let Some(marker) = bomb.marker {
        ctx.renderer.remove_marker(marker);
    }
    log::debug!("bomb {bomb_id} disposed");

    if bomb.is_placed_by(ctx.local_player_id) && bomb.counts_toward_limit() {
        let local_player_id = ctx.local_player_id;
        if let Some(player) = ctx.world.player_mut(local_player_id) {
            player.release_bomb();
            ctx.emit_local_stats();
        }
    }
}

fn reconcile_players(
    ctx: &mut EngineContext<'_>,
    snapshot: &CollectionSnapshot,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut records: BTreeMap<String, PlayerRecord> = BTreeMap::new();

    for (key, value) in snapshot.entries() {
        let parsed =
            parse_entry::<PlayerRecord>(Collection::Players, key, value).and_then(|record| {
                check_position(ctx, Collection::Players, key, record.cell())?;
                Ok(record)
            });
        match parsed {
            Ok(record) => {
                records.insert(key.to_string(), record);
            }
            Err(error) => {
                discard_corrupt(ctx, &error);
                report.corrupt += 1;
            }
        }
    }

    let local_player_id = ctx.local_player_id.to_string();
    if ctx.joined && !records.contains_key(&local_player_id) {
        restore_local_player(ctx);
    }

    for player_id in ctx.world.player_ids() {
        if player_id != local_player_id && !records.contains_key(&player_id) {
            dispose_player(ctx, &player_id);
            report.disposed += 1;
        }
    }

    for (player_id, record) in records {
        if ctx.world.player(&player_id).is_some() {
            let changed = if player_id == local_player_id {
                merge_local_player(ctx, &record)
            } else {
                merge_remote_player(ctx, &player_id, &record)
            };
            if changed {
                report.updated += 1;
            }
        } else {
            let is_local = player_id == local_player_id;
            let mut player = Player::from_record(player_id, &record, is_local, ctx.config);
            if !player.is_dead {
                player.marker = Some(
                    ctx.renderer
                        .add_marker(player.cell(), MarkerKind::Player { is_local }),
                );
            }
            log::debug!("player {} appeared at {}", player.id, player.cell());
            ctx.world.insert_player(player);
            report.created += 1;
        }
    }
    report
}

/// The local player's entry vanished while we are still in the match.
fn restore_local_player(ctx: &mut EngineContext<'_>) {
    let local_player_id = ctx.local_player_id;
    let Some(player) = ctx.world.player(local_player_id) else {
        return;
    };
    let record = match serde_json::to_value(player.to_record()) {
        Ok(record) => record,
        Err(error) => {
            log::error!("failed to encode local player {local_player_id}: {error}");
            return;
        }
    };

    log::warn!("local player {local_player_id} missing from snapshot, restoring it");
    let path = StorePath::entry(Collection::Players, local_player_id);
    if let Err(error) = ctx.store.put(&path, record) {
        log::error!("failed to restore local player {local_player_id}: {error}");
    }
}

/// Position, hp and death of the local player are owned here. Only the stun
/// flag is written by other clients.
fn merge_local_player(ctx: &mut EngineContext<'_>, record: &PlayerRecord) -> bool {
    let local_player_id = ctx.local_player_id;
    let Some(player) = ctx.world.player_mut(local_player_id) else {
        return false;
    };
    if player.is_stunned == record.is_stunned {
        return false;
    }
    player.is_stunned = record.is_stunned;
    log::debug!("local player stunned: {}", record.is_stunned);
    true
}

fn merge_remote_player(ctx: &mut EngineContext<'_>, player_id: &str, record: &PlayerRecord) -> bool {
    let Some(player) = ctx.world.player_mut(player_id) else {
        return false;
    };
    let from = player.cell();
    let to = record.cell();
    let hp_changed = player.hp != record.hp;
    let stun_changed = player.is_stunned != record.is_stunned;
    if from == to && !hp_changed && !stun_changed {
        return false;
    }

    player.is_stunned = record.is_stunned;
    player.hp = record.hp;
    let revived = record.hp > 0 && player.is_dead;
    let died = record.hp == 0 && !player.is_dead;
    if let Some(direction) = Direction::between(from, to) {
        player.direction = direction;
    }
    if revived {
        player.is_dead = false;
        player.marker = Some(
            ctx.renderer
                .add_marker(to, MarkerKind::Player { is_local: false }),
        );
    } else if from != to {
        if let Some(marker) = player.marker {
            ctx.renderer.move_marker(marker, to);
        }
    }
    if from != to {
        ctx.world.relocate_player(player_id, to);
    }
    if died {
        damage::mark_dead(ctx, player_id);
    }
    true
}

fn dispose_player(ctx: &mut EngineContext<'_>, player_id: &str) {
    let Some(player) = ctx.world.remove_player(player_id) else {
        return;
    };
    for timer in [player.damage_window, player.stun_timer].into_iter().flatten() {
        ctx.scheduler.cancel(timer);
    }
    if let Some(marker) = player.marker {
        ctx.renderer.remove_marker(marker);
    }
    log::debug!("player {player_id} left");
}

fn reconcile_items(ctx: &mut EngineContext<'_>, snapshot: &CollectionSnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut records: BTreeMap<Cell, ItemRecord> = BTreeMap::new();

    for (key, value) in snapshot.entries() {
        let parsed = Cell::parse_key(key)
            .ok_or_else(|| EntityError::Corrupt {
                collection: Collection::Items,
                key: key.to_string(),
                reason: "key is not a cell".to_string(),
            })
            .and_then(|cell| {
                check_position(ctx, Collection::Items, key, cell)?;
                let record = parse_entry::<ItemRecord>(Collection::Items, key, value)?;
                Ok((cell, record))
            });
        match parsed {
            Ok((cell, record)) => {
                records.insert(cell, record);
            }
            Err(error) => {
                discard_corrupt(ctx, &error);
                report.corrupt += 1;
            }
        }
    }

    for cell in ctx.world.item_cells() {
        if !records.contains_key(&cell) {
            if let Some(marker) = ctx.world.remove_item(cell).and_then(|item| item.marker) {
                ctx.renderer.remove_marker(marker);
            }
            report.disposed += 1;
        }
    }

    for (cell, record) in records {
        match ctx.world.item_mut(cell) {
            Some(item) if item.kind == record.kind => {}
            Some(item) => {
                item.kind = record.kind;
                if let Some(marker) = item.marker.take() {
                    ctx.renderer.remove_marker(marker);
                }
                item.marker = Some(
                    ctx.renderer
                        .add_marker(cell, MarkerKind::Item { item: record.kind }),
                );
                report.updated += 1;
            }
            None => {
                let marker = ctx
                    .renderer
                    .add_marker(cell, MarkerKind::Item { item: record.kind });
                ctx.world.insert_item(Item {
                    cell,
                    kind: record.kind,
                    marker: Some(marker),
                });
                report.created += 1;
            }
        }
    }
    report
}

/// `blocks` is one array of `"x,y"` keys. Elements that do not parse are
/// skipped. An array still listing a block destroyed here is rewritten
/// without it.
fn reconcile_blocks(ctx: &mut EngineContext<'_>, snapshot: &CollectionSnapshot) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let keys = match &snapshot.value {
        Value::Null => Vec::new(),
        value => match Vec::<Value>::deserialize(value) {
            Ok(keys) => keys,
            Err(error) => {
                log::warn!("ignoring blocks snapshot that is not an array: {error}");
                report.corrupt += 1;
                return report;
            }
        },
    };

    let mut cells = BTreeSet::new();
    let mut lists_destroyed = false;
    for key in &keys {
        let cell = key.as_str().and_then(Cell::parse_key);
        match cell {
            Some(cell) if ctx.world.in_bounds(cell) => {
                if ctx.world.is_block_destroyed(cell) {
                    lists_destroyed = true;
                } else if !ctx.world.is_wall(cell) {
                    cells.insert(cell);
                }
            }
            _ => {
                log::warn!("skipping invalid block entry {key}");
                report.corrupt += 1;
            }
        }
    }

    for cell in ctx.world.block_cells() {
        if !cells.contains(&cell) {
            if let Some(marker) = ctx.world.remove_block(cell).flatten() {
                ctx.renderer.remove_marker(marker);
            }
            report.disposed += 1;
        }
    }
    for cell in &cells {
        if !ctx.world.is_block(*cell) {
            let marker = ctx.renderer.add_marker(*cell, MarkerKind::Block);
            ctx.world.insert_block(*cell, Some(marker));
            report.created += 1;
        }
    }

    if lists_destroyed {
        log::debug!("blocks snapshot still lists destroyed blocks, rewriting it");
        explosion::publish_blocks(ctx, cells.into_iter().collect());
    }
    report
}
