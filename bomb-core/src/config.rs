use crate::error::ConfigError;
use crate::grid::Cell;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAP_SIZE: i32 = 21;
pub const DEFAULT_PLAYER_HP: u32 = 3;
pub const DEFAULT_FIRE_POWER: u32 = 1;
pub const DEFAULT_MAX_BOMBS: u32 = 1;
pub const DEFAULT_BOMB_TIMER_SECS: f64 = 3.0;
pub const DEFAULT_SPLIT_CHILD_TIMER_SECS: f64 = 1.0;
pub const DEFAULT_SPLIT_CHILD_FIRE_POWER: u32 = 1;
pub const DEFAULT_SPLIT_DISTANCE: i32 = 2;
pub const DEFAULT_WARNING_BLINK_INTERVAL_MS: u64 = 300;
pub const DEFAULT_WARNING_BLINK_COUNT: u8 = 2;
pub const DEFAULT_FADE_STEP_MS: u64 = 250;
pub const DEFAULT_EXPLOSION_VISIBLE_MS: u64 = 500;
pub const DEFAULT_DAMAGE_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_STUN_MS: u64 = 1500;
pub const DEFAULT_PUNCH_DISTANCE: i32 = 3;
pub const DEFAULT_ITEM_DROP_CHANCE: f64 = 1.0;
pub const DEFAULT_SPAWN_ATTEMPTS: u32 = 100;
pub const DEFAULT_TOMBSTONE_RETENTION_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    pub map_size: i32,
    pub initial_hp: u32,
    pub initial_fire_power: u32,
    pub initial_max_bombs: u32,
    pub bomb_timer_secs: f64,
    pub split_child_timer_secs: f64,
    pub split_child_fire_power: u32,
    pub split_distance: i32,
    pub warning_blink_interval_ms: u64,
    pub warning_blink_count: u8,
    pub fade_step_ms: u64,
    pub explosion_visible_ms: u64,
    pub damage_debounce_ms: u64,
    pub stun_ms: u64,
    pub punch_distance: i32,
    pub item_drop_chance: f64,
    pub spawn_attempts: u32,
    /// How long a settled detonation keeps its id blocked from coming back.
    pub tombstone_retention_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            initial_hp: DEFAULT_PLAYER_HP,
            initial_fire_power: DEFAULT_FIRE_POWER,
            initial_max_bombs: DEFAULT_MAX_BOMBS,
            bomb_timer_secs: DEFAULT_BOMB_TIMER_SECS,
            split_child_timer_secs: DEFAULT_SPLIT_CHILD_TIMER_SECS,
            split_child_fire_power: DEFAULT_SPLIT_CHILD_FIRE_POWER,
            split_distance: DEFAULT_SPLIT_DISTANCE,
            warning_blink_interval_ms: DEFAULT_WARNING_BLINK_INTERVAL_MS,
            warning_blink_count: DEFAULT_WARNING_BLINK_COUNT,
            fade_step_ms: DEFAULT_FADE_STEP_MS,
            explosion_visible_ms: DEFAULT_EXPLOSION_VISIBLE_MS,
            damage_debounce_ms: DEFAULT_DAMAGE_DEBOUNCE_MS,
            stun_ms: DEFAULT_STUN_MS,
            punch_distance: DEFAULT_PUNCH_DISTANCE,
            item_drop_chance: DEFAULT_ITEM_DROP_CHANCE,
            spawn_attempts: DEFAULT_SPAWN_ATTEMPTS,
            tombstone_retention_ms: DEFAULT_TOMBSTONE_RETENTION_MS,
        }
    }
}

impl GameConfig {
    pub fn with_map_size(map_size: i32) -> Self {
        Self {
            map_size,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_size <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "mapSize",
                reason: format!("must be positive, got {}", self.map_size),
            });
        }
        if !(0.0..=1.0).contains(&self.item_drop_chance) {
            return Err(ConfigError::InvalidValue {
                field: "itemDropChance",
                reason: format!("must be within [0, 1], got {}", self.item_drop_chance),
            });
        }
        if !self.bomb_timer_secs.is_finite() || self.bomb_timer_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "bombTimerSecs",
                reason: format!("must be a non-negative number, got {}", self.bomb_timer_secs),
            });
        }
        if self.warning_blink_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "warningBlinkCount",
                reason: "at least one warning blink is required".to_string(),
            });
        }
        if self.fade_step_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fadeStepMs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Map produced by the external map generator. Walls stay fixed for the
/// match, blocks are what the host publishes to the `blocks` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapLayout {
    #[serde(default)]
    pub walls: Vec<Cell>,
    #[serde(default)]
    pub blocks: Vec<Cell>,
}

impl MapLayout {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_walls(mut self, walls: impl IntoIterator<Item = Cell>) -> Self {
        self.walls.extend(walls);
        self
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = Cell>) -> Self {
        self.blocks.extend(blocks);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = GameConfig::from_json(r#"{ "mapSize": 25, "punchDistance": 2 }"#)
            .expect("config should parse");
        assert_eq!(config.map_size, 25);
        assert_eq!(config.punch_distance, 2);
        assert_eq!(config.initial_hp, DEFAULT_PLAYER_HP);
        assert_eq!(config.bomb_timer_secs, DEFAULT_BOMB_TIMER_SECS);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let error = GameConfig::from_json(r#"{ "mapSize": 0 }"#).expect_err("zero map size");
        assert!(format!("{error}").contains("mapSize"));

        let error =
            GameConfig::from_json(r#"{ "itemDropChance": 1.5 }"#).expect_err("chance above one");
        assert!(format!("{error}").contains("itemDropChance"));

        assert!(GameConfig::from_json("not json").is_err());
    }

    #[test]
    fn layout_accepts_cell_objects() {
        let layout: MapLayout =
            serde_json::from_str(r#"{ "walls": [{ "x": 0, "y": 0 }], "blocks": [] }"#)
                .expect("layout should parse");
        assert_eq!(layout.walls, vec![Cell::new(0, 0)]);
        assert!(layout.blocks.is_empty());
    }
}
