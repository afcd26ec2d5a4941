use crate::config::MapLayout;
use crate::domain::{Bomb, BombId, Item, Player, PlayerId, Tombstone};
use crate::grid::{Cell, SpatialIndex};
use crate::render::MarkerHandle;
use crate::scheduler::Millis;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Everything one client knows about the match. Entity maps and the cell
/// indexes are only mutated together through the methods below.
#[derive(Debug, Default)]
pub struct GameWorld {
    map_size: i32,
    walls: HashSet<Cell>,
    blocks: HashMap<Cell, Option<MarkerHandle>>,
    destroyed_blocks: HashSet<Cell>,
    players: BTreeMap<PlayerId, Player>,
    bombs: BTreeMap<BombId, Bomb>,
    items: BTreeMap<Cell, Item>,
    player_cells: HashMap<Cell, BTreeSet<PlayerId>>,
    bomb_cells: HashMap<Cell, BTreeSet<BombId>>,
    tombstones: HashMap<BombId, Tombstone>,
}

impl GameWorld {
    /// Walls come from the layout. Blocks arrive through the `blocks`
    /// collection like every other replicated entity.
    pub fn new(map_size: i32, layout: &MapLayout) -> Self {
        Self {
            map_size,
            walls: layout
                .walls
                .iter()
                .copied()
                .filter(|cell| cell.in_bounds(map_size))
                .collect(),
            ..Self::default()
        }
    }

    pub fn walls(&self) -> impl Iterator<Item = Cell> + '_ {
        self.walls.iter().copied()
    }

    pub fn block_cells(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self.blocks.keys().copied().collect();
        cells.sort();
        cells
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_block_destroyed(&self, cell: Cell) -> bool {
        self.destroyed_blocks.contains(&cell)
    }

    pub(crate) fn insert_block(&mut self, cell: Cell, marker: Option<MarkerHandle>) {
        self.blocks.insert(cell, marker);
    }

    /// Drops a block the store no longer lists.
    pub(crate) fn remove_block(&mut self, cell: Cell) -> Option<Option<MarkerHandle>> {
        self.blocks.remove(&cell)
    }

    /// Drops a block hit by an explosion and remembers it so a stale
    /// snapshot cannot restore it.
    pub(crate) fn destroy_block(&mut self, cell: Cell) -> Option<Option<MarkerHandle>> {
        let marker = self.blocks.remove(&cell)?;
        self.destroyed_blocks.insert(cell);
        Some(marker)
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub(crate) fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().cloned().collect()
    }

    pub fn players_at(&self, cell: Cell) -> Vec<PlayerId> {
        self.player_cells
            .get(&cell)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn insert_player(&mut self, player: Player) {
        if let Some(previous) = self.players.get(&player.id) {
            let (id, cell) = (previous.id.clone(), previous.cell);
            unindex(&mut self.player_cells, cell, &id);
        }
        self.player_cells
            .entry(player.cell)
            .or_default()
            .insert(player.id.clone());
        self.players.insert(player.id.clone(), player);
    }

    pub(crate) fn remove_player(&mut self, id: &str) -> Option<Player> {
        let player = self.players.remove(id)?;
        unindex(&mut self.player_cells, player.cell, id);
        Some(player)
    }

    /// Returns the previous cell.
    pub(crate) fn relocate_player(&mut self, id: &str, to: Cell) -> Option<Cell> {
        let player = self.players.get_mut(id)?;
        let from = std::mem::replace(&mut player.cell, to);
        if from != to {
            unindex(&mut self.player_cells, from, id);
            self.player_cells
                .entry(to)
                .or_default()
                .insert(id.to_string());
        }
        Some(from)
    }

    pub fn bomb(&self, id: &str) -> Option<&Bomb> {
        self.bombs.get(id)
    }

    pub(crate) fn bomb_mut(&mut self, id: &str) -> Option<&mut Bomb> {
        self.bombs.get_mut(id)
    }

    pub fn bombs(&self) -> impl Iterator<Item = &Bomb> {
        self.bombs.values()
    }

    pub fn bomb_ids(&self) -> Vec<BombId> {
        self.bombs.keys().cloned().collect()
    }

    pub fn bomb_at(&self, cell: Cell) -> Option<&Bomb> {
        let id = self.bomb_cells.get(&cell)?.iter().next()?;
        self.bombs.get(id)
    }

    pub(crate) fn insert_bomb(&mut self, bomb: Bomb) {
        if let Some(previous) = self.bombs.get(&bomb.id) {
            let (id, cell) = (previous.id.clone(), previous.cell);
            unindex(&mut self.bomb_cells, cell, &id);
        }
        self.bomb_cells
            .entry(bomb.cell)
            .or_default()
            .insert(bomb.id.clone());
        self.bombs.insert(bomb.id.clone(), bomb);
    }

    pub(crate) fn remove_bomb(&mut self, id: &str) -> Option<Bomb> {
        let bomb = self.bombs.remove(id)?;
        unindex(&mut self.bomb_cells, bomb.cell, id);
        Some(bomb)
    }

    pub(crate) fn relocate_bomb(&mut self, id: &str, to: Cell) -> Option<Cell> {
        let bomb = self.bombs.get_mut(id)?;
        let from = std::mem::replace(&mut bomb.cell, to);
        if from != to {
            unindex(&mut self.bomb_cells, from, id);
            self.bomb_cells.entry(to).or_default().insert(id.to_string());
        }
        Some(from)
    }

    pub fn item_at(&self, cell: Cell) -> Option<&Item> {
        self.items.get(&cell)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn item_cells(&self) -> Vec<Cell> {
        self.items.keys().copied().collect()
    }

    pub(crate) fn item_mut(&mut self, cell: Cell) -> Option<&mut Item> {
        self.items.get_mut(&cell)
    }

    /// Returns the item previously at the same cell.
    pub(crate) fn insert_item(&mut self, item: Item) -> Option<Item> {
        self.items.insert(item.cell, item)
    }

    pub(crate) fn remove_item(&mut self, cell: Cell) -> Option<Item> {
        self.items.remove(&cell)
    }

    pub fn tombstone(&self, id: &str) -> Option<&Tombstone> {
        self.tombstones.get(id)
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains_key(id)
    }

    pub(crate) fn tombstone_mut(&mut self, id: &str) -> Option<&mut Tombstone> {
        self.tombstones.get_mut(id)
    }

    pub(crate) fn tombstone_ids(&self) -> Vec<BombId> {
        self.tombstones.keys().cloned().collect()
    }

    pub(crate) fn insert_tombstone(&mut self, id: BombId, tombstone: Tombstone) {
        self.tombstones.insert(id, tombstone);
    }

    /// Forgets settled tombstones older than `settled_before`. Returns how
    /// many were dropped.
    pub(crate) fn prune_tombstones(&mut self, settled_before: Millis) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, tombstone| {
            !tombstone
                .settled_at
                .is_some_and(|settled_at| settled_at < settled_before)
        });
        before - self.tombstones.len()
    }
}

fn unindex(index: &mut HashMap<Cell, BTreeSet<String>>, cell: Cell, id: &str) {
    if let Some(ids) = index.get_mut(&cell) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(&cell);
        }
    }
}

impl SpatialIndex for GameWorld {
    fn map_size(&self) -> i32 {
        self.map_size
    }

    fn is_wall(&self, cell: Cell) -> bool {
        self.walls.contains(&cell)
    }

    fn is_block(&self, cell: Cell) -> bool {
        self.blocks.contains_key(&cell)
    }

    /// Dead players do not occupy their cell.
    fn is_occupied_by_player(&self, cell: Cell) -> bool {
        self.player_cells.get(&cell).is_some_and(|ids| {
            ids.iter()
                .filter_map(|id| self.players.get(id))
                .any(|player| !player.is_dead)
        })
    }

    fn is_bomb_at(&self, cell: Cell) -> bool {
        self.bomb_cells.contains_key(&cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::domain::BombRecord;

    fn bomb(id: &str, cell: Cell) -> Bomb {
        let record = BombRecord {
            x: cell.x,
            y: cell.y,
            timer: 3.0,
            fire_power: 1,
            placed_by: None,
            variant: Default::default(),
            is_triggered: false,
            opacity: None,
            detonated: false,
            chained_from: None,
        };
        Bomb::from_record(id, &record, 0)
    }

    #[test]
    fn layout_walls_outside_the_map_are_ignored() {
        let layout = MapLayout::open().with_walls([Cell::new(0, 0), Cell::new(30, 2)]);
        let world = GameWorld::new(21, &layout);
        assert!(world.is_wall(Cell::new(0, 0)));
        assert_eq!(world.walls().count(), 1);
    }

    #[test]
    fn bomb_index_follows_relocation_and_removal() {
        let mut world = GameWorld::new(21, &MapLayout::open());
        world.insert_bomb(bomb("b1", Cell::new(2, 2)));
        assert!(world.is_bomb_at(Cell::new(2, 2)));

        assert_eq!(world.relocate_bomb("b1", Cell::new(5, 2)), Some(Cell::new(2, 2)));
        assert!(!world.is_bomb_at(Cell::new(2, 2)));
        assert_eq!(world.bomb_at(Cell::new(5, 2)).map(|bomb| bomb.id.as_str()), Some("b1"));

        world.remove_bomb("b1");
        assert!(!world.is_bomb_at(Cell::new(5, 2)));
    }

    #[test]
    fn reinserting_a_bomb_does_not_leave_a_stale_index_entry() {
        let mut world = GameWorld::new(21, &MapLayout::open());
        world.insert_bomb(bomb("b1", Cell::new(2, 2)));
        world.insert_bomb(bomb("b1", Cell::new(3, 3)));
        assert!(!world.is_bomb_at(Cell::new(2, 2)));
        assert!(world.is_bomb_at(Cell::new(3, 3)));
    }

    #[test]
    fn dead_players_do_not_occupy_cells() {
        let config = GameConfig::default();
        let mut world = GameWorld::new(21, &MapLayout::open());
        world.insert_player(Player::new("p1", Cell::new(4, 4), false, &config));
        assert!(world.is_occupied_by_player(Cell::new(4, 4)));

        if let Some(player) = world.player_mut("p1") {
            player.is_dead = true;
        }
        assert!(!world.is_occupied_by_player(Cell::new(4, 4)));
        assert_eq!(world.players_at(Cell::new(4, 4)), vec!["p1".to_string()]);
    }

    #[test]
    fn destroyed_blocks_are_remembered() {
        let mut world = GameWorld::new(21, &MapLayout::open());
        world.insert_block(Cell::new(7, 5), None);
        assert!(world.destroy_block(Cell::new(7, 5)).is_some());
        assert!(world.destroy_block(Cell::new(7, 5)).is_none());
        assert!(!world.is_block(Cell::new(7, 5)));
        assert!(world.is_block_destroyed(Cell::new(7, 5)));
    }

    #[test]
    fn only_old_settled_tombstones_are_pruned() {
        let mut world = GameWorld::new(21, &MapLayout::open());
        world.insert_tombstone(
            "pending".to_string(),
            Tombstone {
                refund_pending: true,
                removal_pending: true,
                settled_at: None,
            },
        );
        world.insert_tombstone(
            "old".to_string(),
            Tombstone {
                settled_at: Some(1_000),
                ..Tombstone::default()
            },
        );
        world.insert_tombstone(
            "recent".to_string(),
            Tombstone {
                settled_at: Some(9_000),
                ..Tombstone::default()
            },
        );

        assert_eq!(world.prune_tombstones(5_000), 1);
        assert!(!world.is_tombstoned("old"));
        assert!(world.is_tombstoned("recent"));
        assert!(world.is_tombstoned("pending"));
        assert_eq!(world.prune_tombstones(5_000), 0);
    }
}
