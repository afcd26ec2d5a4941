use crate::domain::{Item, ItemKind, ItemRecord, PlayerId};
use crate::grid::Cell;
use crate::render::MarkerKind;
use crate::scheduler::TimerEvent;
use crate::session::{EngineContext, SessionEvent};
use crate::store::{fields, Collection, StorePath};
use rand::Rng;
use serde_json::json;

/// Applies one point of damage to every living player at `cell` that is not
/// inside its debounce window. Returns the players that were hit.
pub(crate) fn check_player_damage(ctx: &mut EngineContext<'_>, cell: Cell) -> Vec<PlayerId> {
    let mut damaged = Vec::new();
    for player_id in ctx.world.players_at(cell) {
        let Some(player) = ctx.world.player_mut(&player_id) else {
            continue;
        };
        if player.is_dead || player.is_damaged() {
            continue;
        }

        player.hp = player.hp.saturating_sub(1);
        player.damage_window = Some(ctx.scheduler.schedule_in(
            ctx.config.damage_debounce_ms,
            TimerEvent::DamageWindowClosed {
                player_id: player_id.clone(),
            },
        ));
        let hp = player.hp;
        let is_local = player.is_local;
        log::debug!("player {player_id} hit at {cell}, hp now {hp}");

        if is_local {
            let path = StorePath::entry(Collection::Players, player_id.clone());
            if let Err(error) = ctx.store.update(&path, fields(json!({ "hp": hp }))) {
                log::error!("failed to write hp for {player_id}: {error}");
            }
            ctx.emit(SessionEvent::HpChanged { hp });
        }
        if hp == 0 {
            mark_dead(ctx, &player_id);
        }
        damaged.push(player_id);
    }
    damaged
}

pub(crate) fn mark_dead(ctx: &mut EngineContext<'_>, player_id: &str) {
    let Some(player) = ctx.world.player_mut(player_id) else {
        return;
    };
    if player.is_dead {
        return;
    }

    player.is_dead = true;
    let marker = player.marker.take();
    let is_local = player.is_local;
    if let Some(marker) = marker {
        ctx.renderer.remove_marker(marker);
    }
    if is_local {
        log::info!("local player {player_id} died");
        ctx.emit(SessionEvent::LocalPlayerDied);
    }
}

pub(crate) fn close_damage_window(ctx: &mut EngineContext<'_>, player_id: &str) {
    if let Some(player) = ctx.world.player_mut(player_id) {
        player.damage_window = None;
    }
}

/// Rolls whether a destroyed block leaves an item, and which one.
pub(crate) fn roll_block_drop(ctx: &mut EngineContext<'_>) -> Option<ItemKind> {
    if !ctx.rng.random_bool(ctx.config.item_drop_chance) {
        return None;
    }
    Some(if ctx.rng.random_bool(0.5) {
        ItemKind::BombUp
    } else {
        ItemKind::FireUp
    })
}

/// Places an item locally and publishes it under `items/{cellKey}`.
pub(crate) fn spawn_item(ctx: &mut EngineContext<'_>, cell: Cell, kind: ItemKind) {
    let marker = ctx.renderer.add_marker(cell, MarkerKind::Item { item: kind });
    let replaced = ctx.world.insert_item(Item {
        cell,
        kind,
        marker: Some(marker),
    });
    if let Some(previous) = replaced.and_then(|item| item.marker) {
        ctx.renderer.remove_marker(previous);
    }

    let path = StorePath::entry(Collection::Items, cell.key());
    let record = match serde_json::to_value(ItemRecord { kind }) {
        Ok(record) => record,
        Err(error) => {
            log::error!("failed to encode item at {cell}: {error}");
            return;
        }
    };
    if let Err(error) = ctx.store.put(&path, record) {
        log::error!("failed to publish item at {cell}: {error}");
    }
}

/// Picks up the item under the local player, if any.
pub(crate) fn collect_item(ctx: &mut EngineContext<'_>, player_id: &str) -> Option<ItemKind> {
    let cell = ctx.world.player(player_id)?.cell();
    let item = ctx.world.remove_item(cell)?;
    if let Some(marker) = item.marker {
        ctx.renderer.remove_marker(marker);
    }

    let path = StorePath::entry(Collection::Items, cell.key());
    if let Err(error) = ctx.store.remove(&path) {
        log::error!("failed to remove collected item at {cell}: {error}");
    }

    let player = ctx.world.player_mut(player_id)?;
    player.apply_item(item.kind);
    log::debug!("player {player_id} collected {:?} at {cell}", item.kind);
    ctx.emit(SessionEvent::ItemCollected { kind: item.kind });
    ctx.emit_local_stats();
    Some(item.kind)
}

pub(crate) fn stun_player(ctx: &mut EngineContext<'_>, player_id: &str) {
    let Some(player) = ctx.world.player_mut(player_id) else {
        return;
    };
    player.is_stunned = true;
    if let Some(previous) = player.stun_timer.take() {
        ctx.scheduler.cancel(previous);
    }
    player.stun_timer = Some(ctx.scheduler.schedule_in(
        ctx.config.stun_ms,
        TimerEvent::StunExpired {
            player_id: player_id.to_string(),
        },
    ));

    let path = StorePath::entry(Collection::Players, player_id);
    if let Err(error) = ctx.store.update(&path, fields(json!({ "isStunned": true }))) {
        log::error!("failed to stun player {player_id}: {error}");
    }
}

pub(crate) fn end_stun(ctx: &mut EngineContext<'_>, player_id: &str) {
    let Some(player) = ctx.world.player_mut(player_id) else {
        return;
    };
    player.stun_timer = None;
    player.is_stunned = false;

    let path = StorePath::entry(Collection::Players, player_id);
    if let Err(error) = ctx.store.update(&path, fields(json!({ "isStunned": false }))) {
        log::error!("failed to clear stun on player {player_id}: {error}");
    }
}
