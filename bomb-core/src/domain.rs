use crate::config::{GameConfig, DEFAULT_BOMB_TIMER_SECS, DEFAULT_PLAYER_HP};
use crate::grid::{Cell, Direction};
use crate::render::MarkerHandle;
use crate::scheduler::{Millis, TimerId};
use serde::{Deserialize, Serialize};

pub type BombId = String;
pub type PlayerId = String;

fn default_bomb_timer() -> f64 {
    DEFAULT_BOMB_TIMER_SECS
}

fn default_player_hp() -> u32 {
    DEFAULT_PLAYER_HP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BombVariant {
    #[default]
    Normal,
    Split,
    Invisible,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    BombUp,
    FireUp,
}

/// `bombs/{id}` as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombRecord {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_bomb_timer")]
    pub timer: f64,
    pub fire_power: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placed_by: Option<PlayerId>,
    #[serde(rename = "type", default)]
    pub variant: BombVariant,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub detonated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chained_from: Option<BombId>,
}

impl BombRecord {
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

/// `players/{id}` as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_player_hp")]
    pub hp: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_stunned: bool,
}

impl PlayerRecord {
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

/// `items/{cellKey}` as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombPhase {
    Armed,
    Triggered { blinks: u8 },
    Detonating,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Bomb {
    pub id: BombId,
    pub(crate) cell: Cell,
    pub fire_power: u32,
    pub timer_secs: f64,
    pub placed_by: Option<PlayerId>,
    pub variant: BombVariant,
    pub chained_from: Option<BombId>,
    pub phase: BombPhase,
    pub detonated: bool,
    pub is_triggered: bool,
    pub opacity: f64,
    pub armed_at: Millis,
    pub(crate) countdown: Option<TimerId>,
    pub(crate) effect_timer: Option<TimerId>,
    pub(crate) marker: Option<MarkerHandle>,
    /// The owner already got this bomb's slot back, e.g. on respawn.
    pub(crate) slot_released: bool,
}

impl Bomb {
    pub fn from_record(id: impl Into<BombId>, record: &BombRecord, now: Millis) -> Self {
        Self {
            id: id.into(),
            cell: record.cell(),
            fire_power: record.fire_power,
            timer_secs: record.timer,
            placed_by: record.placed_by.clone(),
            variant: record.variant,
            chained_from: record.chained_from.clone(),
            phase: BombPhase::Armed,
            detonated: false,
            is_triggered: false,
            opacity: record.opacity.unwrap_or(1.0),
            armed_at: now,
            countdown: None,
            effect_timer: None,
            marker: None,
            slot_released: false,
        }
    }

    pub fn cell(&self) -> Cell {
        self.cell
    }

    pub fn marker(&self) -> Option<MarkerHandle> {
        self.marker
    }

    pub fn countdown_ms(&self) -> Millis {
        (self.timer_secs.max(0.0) * 1000.0).round() as Millis
    }

    pub fn has_countdown(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn is_placed_by(&self, player_id: &str) -> bool {
        self.placed_by.as_deref() == Some(player_id)
    }

    /// Chained bombs never count against their owner's bomb limit, and a
    /// released slot is not released twice.
    pub fn counts_toward_limit(&self) -> bool {
        self.chained_from.is_none() && !self.slot_released
    }

    pub fn to_record(&self) -> BombRecord {
        BombRecord {
            x: self.cell.x,
            y: self.cell.y,
            timer: self.timer_secs,
            fire_power: self.fire_power,
            placed_by: self.placed_by.clone(),
            variant: self.variant,
            is_triggered: self.is_triggered,
            opacity: (self.variant == BombVariant::Invisible).then_some(self.opacity),
            detonated: self.detonated,
            chained_from: self.chained_from.clone(),
        }
    }

    /// Differences in the mutable fields of a newer record.
    pub fn diff(&self, record: &BombRecord) -> BombChanges {
        let cell = record.cell();
        BombChanges {
            moved_to: (cell != self.cell).then_some(cell),
            trigger_observed: self.variant == BombVariant::Remote
                && record.is_triggered
                && !self.is_triggered,
            opacity: record
                .opacity
                .filter(|opacity| (opacity - self.opacity).abs() > f64::EPSILON),
            detonation_observed: record.detonated && !self.detonated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BombChanges {
    pub moved_to: Option<Cell>,
    pub trigger_observed: bool,
    pub opacity: Option<f64>,
    pub detonation_observed: bool,
}

impl BombChanges {
    pub fn is_empty(&self) -> bool {
        self.moved_to.is_none()
            && !self.trigger_observed
            && self.opacity.is_none()
            && !self.detonation_observed
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub(crate) cell: Cell,
    pub is_local: bool,
    pub hp: u32,
    pub fire_power: u32,
    pub max_bombs: u32,
    pub bomb_count: u32,
    pub is_stunned: bool,
    pub is_dead: bool,
    pub direction: Direction,
    pub(crate) damage_window: Option<TimerId>,
    pub(crate) stun_timer: Option<TimerId>,
    pub(crate) marker: Option<MarkerHandle>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, cell: Cell, is_local: bool, config: &GameConfig) -> Self {
        Self {
            id: id.into(),
            cell,
            is_local,
            hp: config.initial_hp,
            fire_power: config.initial_fire_power,
            max_bombs: config.initial_max_bombs,
            bomb_count: 0,
            is_stunned: false,
            is_dead: false,
            direction: Direction::Down,
            damage_window: None,
            stun_timer: None,
            marker: None,
        }
    }

    pub fn from_record(
        id: impl Into<PlayerId>,
        record: &PlayerRecord,
        is_local: bool,
        config: &GameConfig,
    ) -> Self {
        let mut player = Self::new(id, record.cell(), is_local, config);
        player.hp = record.hp;
        player.is_dead = record.hp == 0;
        player.is_stunned = record.is_stunned;
        player
    }

    pub fn cell(&self) -> Cell {
        self.cell
    }

    pub fn is_damaged(&self) -> bool {
        self.damage_window.is_some()
    }

    pub fn can_place_bomb(&self) -> bool {
        self.bomb_count < self.max_bombs
    }

    pub fn to_record(&self) -> PlayerRecord {
        PlayerRecord {
            x: self.cell.x,
            y: self.cell.y,
            hp: self.hp,
            is_stunned: self.is_stunned,
        }
    }

    pub fn apply_item(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::BombUp => self.max_bombs = self.max_bombs.saturating_add(1),
            ItemKind::FireUp => self.fire_power = self.fire_power.saturating_add(1),
        }
    }

    pub fn release_bomb(&mut self) {
        self.bomb_count = self.bomb_count.saturating_sub(1);
    }
}

#[derive(Debug, Clone)]
pub struct Item {
    pub cell: Cell,
    pub kind: ItemKind,
    pub(crate) marker: Option<MarkerHandle>,
}

/// Left behind by a bomb that detonated locally so the id is never
/// materialized again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tombstone {
    /// The local player still owes a `bombCount` release for this bomb.
    pub refund_pending: bool,
    /// Our removal write has not succeeded yet.
    pub removal_pending: bool,
    /// When the removal and the refund were both done.
    pub settled_at: Option<Millis>,
}

impl Tombstone {
    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bomb_record_defaults_optional_fields() {
        let record: BombRecord =
            serde_json::from_value(json!({ "x": 3, "y": 4, "firePower": 2 }))
                .expect("record parses");
        assert_eq!(record.timer, DEFAULT_BOMB_TIMER_SECS);
        assert_eq!(record.variant, BombVariant::Normal);
        assert_eq!(record.placed_by, None);
        assert!(!record.is_triggered);
    }

    #[test]
    fn bomb_record_reads_variant_from_type_field() {
        let record: BombRecord = serde_json::from_value(json!({
            "x": 1, "y": 1, "timer": 3, "firePower": 1, "placedBy": "p1", "type": "remote"
        }))
        .expect("record parses");
        assert_eq!(record.variant, BombVariant::Remote);

        let unknown = serde_json::from_value::<BombRecord>(json!({
            "x": 1, "y": 1, "firePower": 1, "type": "nuclear"
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn bomb_record_serializes_only_present_optionals() {
        let record = BombRecord {
            x: 2,
            y: 2,
            timer: 3.0,
            fire_power: 1,
            placed_by: Some("p1".to_string()),
            variant: BombVariant::Normal,
            is_triggered: false,
            opacity: None,
            detonated: false,
            chained_from: None,
        };
        let value = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(
            value,
            json!({ "x": 2, "y": 2, "timer": 3.0, "firePower": 1, "placedBy": "p1", "type": "normal" })
        );
    }

    #[test]
    fn bomb_diff_reports_only_mutable_field_changes() {
        let record = BombRecord {
            x: 2,
            y: 2,
            timer: 3.0,
            fire_power: 1,
            placed_by: None,
            variant: BombVariant::Remote,
            is_triggered: false,
            opacity: None,
            detonated: false,
            chained_from: None,
        };
        let bomb = Bomb::from_record("b1", &record, 0);
        assert!(bomb.diff(&record).is_empty());

        let moved = BombRecord {
            x: 5,
            is_triggered: true,
            ..record.clone()
        };
        let changes = bomb.diff(&moved);
        assert_eq!(changes.moved_to, Some(Cell::new(5, 2)));
        assert!(changes.trigger_observed);
        assert!(!changes.detonation_observed);
    }

    #[test]
    fn player_record_defaults_hp_for_position_only_writes() {
        let record: PlayerRecord =
            serde_json::from_value(json!({ "x": 1, "y": 2 })).expect("record parses");
        assert_eq!(record.hp, DEFAULT_PLAYER_HP);
        assert!(!record.is_stunned);
    }

    #[test]
    fn items_raise_the_matching_stat() {
        let mut player = Player::new("p1", Cell::new(1, 1), true, &GameConfig::default());
        player.apply_item(ItemKind::BombUp);
        player.apply_item(ItemKind::FireUp);
        player.apply_item(ItemKind::FireUp);
        assert_eq!(player.max_bombs, 2);
        assert_eq!(player.fire_power, 3);
    }

    #[test]
    fn releasing_bombs_never_goes_negative() {
        let mut player = Player::new("p1", Cell::new(1, 1), true, &GameConfig::default());
        player.release_bomb();
        assert_eq!(player.bomb_count, 0);
    }
}
