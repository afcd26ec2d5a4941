//! Per-variant bomb behavior, selected through a static table instead of a
//! type hierarchy.

use crate::domain::{Bomb, BombChanges, BombPhase, BombRecord, BombVariant};
use crate::explosion::DetonationCause;
use crate::grid::{Direction, SpatialIndex};
use crate::scheduler::TimerEvent;
use crate::session::EngineContext;
use crate::store::{fields, Collection, StorePath};
use serde_json::json;

pub(crate) struct VariantBehavior {
    /// Runs once when a bomb is materialized from the store.
    pub on_create: fn(&mut EngineContext<'_>, &str, &BombRecord),
    /// Runs after a merge changed at least one field.
    pub on_external_update: fn(&mut EngineContext<'_>, &str, &BombChanges),
    /// Runs after the base detonation, with the bomb already detached.
    pub on_detonate: fn(&mut EngineContext<'_>, &Bomb, DetonationCause),
}

static NORMAL: VariantBehavior = VariantBehavior {
    on_create: arm_countdown,
    on_external_update: ignore_update,
    on_detonate: ignore_detonation,
};

static SPLIT: VariantBehavior = VariantBehavior {
    on_create: arm_countdown,
    on_external_update: ignore_update,
    on_detonate: spawn_split_children,
};

static INVISIBLE: VariantBehavior = VariantBehavior {
    on_create: arm_fading_countdown,
    on_external_update: ignore_update,
    on_detonate: ignore_detonation,
};

static REMOTE: VariantBehavior = VariantBehavior {
    on_create: arm_remote,
    on_external_update: follow_remote_trigger,
    on_detonate: ignore_detonation,
};

pub(crate) fn behavior(variant: BombVariant) -> &'static VariantBehavior {
    match variant {
        BombVariant::Normal => &NORMAL,
        BombVariant::Split => &SPLIT,
        BombVariant::Invisible => &INVISIBLE,
        BombVariant::Remote => &REMOTE,
    }
}

fn ignore_update(_: &mut EngineContext<'_>, _: &str, _: &BombChanges) {}

fn ignore_detonation(_: &mut EngineContext<'_>, _: &Bomb, _: DetonationCause) {}

/// Schedules the autonomous detonation. A bomb never holds more than one
/// countdown.
fn arm_countdown(ctx: &mut EngineContext<'_>, bomb_id: &str, _: &BombRecord) {
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return;
    };
    if bomb.has_countdown() || bomb.detonated {
        return;
    }

    bomb.countdown = Some(ctx.scheduler.schedule_in(
        bomb.countdown_ms(),
        TimerEvent::Detonate {
            bomb_id: bomb_id.to_string(),
        },
    ));
}

fn arm_fading_countdown(ctx: &mut EngineContext<'_>, bomb_id: &str, record: &BombRecord) {
    arm_countdown(ctx, bomb_id, record);

    let local_player_id = ctx.local_player_id;
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return;
    };
    bomb.opacity = record.opacity.unwrap_or(0.0);
    if let Some(marker) = bomb.marker {
        ctx.renderer.set_opacity(marker, bomb.opacity);
    }

    // Only the owner drives the fade; everyone else mirrors `opacity`.
    if bomb.is_placed_by(local_player_id) && bomb.effect_timer.is_none() && bomb.opacity < 1.0 {
        bomb.effect_timer = Some(ctx.scheduler.schedule_in(
            ctx.config.fade_step_ms,
            TimerEvent::FadeStep {
                bomb_id: bomb_id.to_string(),
            },
        ));
    }
}

/// One step of the invisible bomb's opacity ramp, from 0 at arming to 1 at
/// the end of its countdown.
pub(crate) fn advance_fade(ctx: &mut EngineContext<'_>, bomb_id: &str) {
    let now = ctx.scheduler.now();
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return;
    };
    bomb.effect_timer = None;
    if bomb.detonated {
        return;
    }

    let total = bomb.countdown_ms();
    let elapsed = now.saturating_sub(bomb.armed_at);
    bomb.opacity = if total == 0 {
        1.0
    } else {
        (elapsed as f64 / total as f64).min(1.0)
    };
    let opacity = bomb.opacity;
    if let Some(marker) = bomb.marker {
        ctx.renderer.set_opacity(marker, opacity);
    }
    if opacity < 1.0 {
        bomb.effect_timer = Some(ctx.scheduler.schedule_in(
            ctx.config.fade_step_ms,
            TimerEvent::FadeStep {
                bomb_id: bomb_id.to_string(),
            },
        ));
    }

    let path = StorePath::field(Collection::Bombs, bomb_id, "opacity");
    if let Err(error) = ctx.store.put(&path, json!(opacity)) {
        log::error!("failed to publish opacity of bomb {bomb_id}: {error}");
    }
}

fn arm_remote(ctx: &mut EngineContext<'_>, bomb_id: &str, record: &BombRecord) {
    if record.is_triggered {
        trigger_explosion(ctx, bomb_id, false);
    }
}

fn follow_remote_trigger(ctx: &mut EngineContext<'_>, bomb_id: &str, changes: &BombChanges) {
    if changes.trigger_observed {
        trigger_explosion(ctx, bomb_id, false);
    }
}

/// Starts the warning sequence of a remote bomb. Returns `false` when it was
/// already triggered or is gone. `announce` publishes `isTriggered` so the
/// other clients start their own sequence.
pub(crate) fn trigger_explosion(ctx: &mut EngineContext<'_>, bomb_id: &str, announce: bool) -> bool {
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return false;
    };
    if bomb.is_triggered || bomb.detonated {
        return false;
    }

    bomb.is_triggered = true;
    bomb.phase = BombPhase::Triggered { blinks: 0 };
    if let Some(timer) = bomb.effect_timer.take() {
        ctx.scheduler.cancel(timer);
    }
    bomb.effect_timer = Some(ctx.scheduler.schedule_in(
        ctx.config.warning_blink_interval_ms,
        TimerEvent::WarningBlink {
            bomb_id: bomb_id.to_string(),
            blink: 1,
        },
    ));
    log::debug!("remote bomb {bomb_id} triggered");

    if announce {
        let path = StorePath::entry(Collection::Bombs, bomb_id);
        if let Err(error) = ctx.store.update(&path, fields(json!({ "isTriggered": true }))) {
            log::error!("failed to publish trigger of bomb {bomb_id}: {error}");
        }
    }
    true
}

pub(crate) fn warning_blink(ctx: &mut EngineContext<'_>, bomb_id: &str, blink: u8) {
    let Some(bomb) = ctx.world.bomb_mut(bomb_id) else {
        return;
    };
    bomb.effect_timer = None;
    if bomb.detonated {
        return;
    }

    bomb.phase = BombPhase::Triggered { blinks: blink };
    if let Some(marker) = bomb.marker {
        ctx.renderer.blink_marker(marker);
    }

    let interval = ctx.config.warning_blink_interval_ms;
    let next = if blink < ctx.config.warning_blink_count {
        TimerEvent::WarningBlink {
            bomb_id: bomb_id.to_string(),
            blink: blink + 1,
        }
    } else {
        TimerEvent::Detonate {
            bomb_id: bomb_id.to_string(),
        }
    };
    bomb.effect_timer = Some(ctx.scheduler.schedule_in(interval, next));
}

/// Publishes the chained bombs of a split detonation. Child ids derive from
/// the parent so every client that detonates it writes the same keys.
fn spawn_split_children(ctx: &mut EngineContext<'_>, parent: &Bomb, cause: DetonationCause) {
    if !cause.is_local() {
        return;
    }

    for (index, direction) in Direction::CARDINAL.into_iter().enumerate() {
        let cell = parent.cell().offset(direction, ctx.config.split_distance);
        if !ctx.world.in_bounds(cell) || ctx.world.is_wall(cell) {
            continue;
        }

        let child_id = split_child_id(&parent.id, index);
        let record = BombRecord {
            x: cell.x,
            y: cell.y,
            timer: ctx.config.split_child_timer_secs,
            fire_power: ctx.config.split_child_fire_power,
            placed_by: parent.placed_by.clone(),
            variant: BombVariant::Normal,
            is_triggered: false,
            opacity: None,
            detonated: false,
            chained_from: Some(parent.id.clone()),
        };
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(error) => {
                log::error!("failed to encode split child {child_id}: {error}");
                continue;
            }
        };
        if let Err(error) = ctx.store.put(&StorePath::entry(Collection::Bombs, child_id.clone()), value) {
            log::error!("failed to place split child {child_id}: {error}");
        }
    }
}

pub fn split_child_id(parent_id: &str, index: usize) -> String {
    format!("{parent_id}~split~{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_behavior() {
        let normal = behavior(BombVariant::Normal) as *const VariantBehavior;
        let split = behavior(BombVariant::Split) as *const VariantBehavior;
        assert_ne!(normal, split);
        assert!(std::ptr::eq(behavior(BombVariant::Remote), &REMOTE));
        assert!(std::ptr::eq(behavior(BombVariant::Invisible), &INVISIBLE));
    }

    #[test]
    fn split_child_ids_are_stable() {
        assert_eq!(split_child_id("bomb_1", 0), "bomb_1~split~0");
        assert_eq!(split_child_id("bomb_1", 3), split_child_id("bomb_1", 3));
    }
}
