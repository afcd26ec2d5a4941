use crate::domain::{BombVariant, ItemKind};
use crate::grid::Cell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerKind {
    Block,
    Bomb { variant: BombVariant },
    Item { item: ItemKind },
    Explosion,
    Player { is_local: bool },
}

/// Visual side of the grid. The core keeps one handle per rendered entity
/// and owns no other rendering state.
pub trait GridRenderer {
    fn add_marker(&mut self, cell: Cell, kind: MarkerKind) -> MarkerHandle;
    fn move_marker(&mut self, handle: MarkerHandle, cell: Cell);
    fn set_opacity(&mut self, handle: MarkerHandle, opacity: f64);
    fn blink_marker(&mut self, handle: MarkerHandle);
    fn remove_marker(&mut self, handle: MarkerHandle);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RenderCommand {
    Add {
        handle: MarkerHandle,
        cell: Cell,
        marker: MarkerKind,
    },
    Move {
        handle: MarkerHandle,
        cell: Cell,
    },
    Opacity {
        handle: MarkerHandle,
        opacity: f64,
    },
    Blink {
        handle: MarkerHandle,
    },
    Remove {
        handle: MarkerHandle,
    },
}

/// Renderer that records commands for a UI shell to replay, and keeps the
/// set of live markers so callers can inspect what is on screen.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next_handle: u64,
    commands: Vec<RenderCommand>,
    live: BTreeMap<MarkerHandle, (Cell, MarkerKind)>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn drain_commands(&mut self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn markers_at(&self, cell: Cell) -> Vec<MarkerKind> {
        self.live
            .values()
            .filter(|(marker_cell, _)| *marker_cell == cell)
            .map(|(_, kind)| *kind)
            .collect()
    }

    pub fn live_cells(&self, predicate: impl Fn(&MarkerKind) -> bool) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self
            .live
            .values()
            .filter(|(_, kind)| predicate(kind))
            .map(|(cell, _)| *cell)
            .collect();
        cells.sort();
        cells.dedup();
        cells
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl GridRenderer for RecordingRenderer {
    fn add_marker(&mut self, cell: Cell, kind: MarkerKind) -> MarkerHandle {
        self.next_handle += 1;
        let handle = MarkerHandle(self.next_handle);
        self.live.insert(handle, (cell, kind));
        self.commands.push(RenderCommand::Add {
            handle,
            cell,
            marker: kind,
        });
        handle
    }

    fn move_marker(&mut self, handle: MarkerHandle, cell: Cell) {
        if let Some((marker_cell, _)) = self.live.get_mut(&handle) {
            *marker_cell = cell;
        }
        self.commands.push(RenderCommand::Move { handle, cell });
    }

    fn set_opacity(&mut self, handle: MarkerHandle, opacity: f64) {
        self.commands.push(RenderCommand::Opacity { handle, opacity });
    }

    fn blink_marker(&mut self, handle: MarkerHandle) {
        self.commands.push(RenderCommand::Blink { handle });
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        if self.live.remove(&handle).is_some() {
            self.commands.push(RenderCommand::Remove { handle });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_renderer_tracks_live_markers() {
        let mut renderer = RecordingRenderer::new();
        let bomb = renderer.add_marker(
            Cell::new(1, 1),
            MarkerKind::Bomb {
                variant: BombVariant::Normal,
            },
        );
        renderer.move_marker(bomb, Cell::new(4, 1));
        assert_eq!(
            renderer.markers_at(Cell::new(4, 1)),
            vec![MarkerKind::Bomb {
                variant: BombVariant::Normal
            }]
        );

        renderer.remove_marker(bomb);
        renderer.remove_marker(bomb);
        assert_eq!(renderer.live_count(), 0);
        assert_eq!(renderer.commands().len(), 3);
    }

    #[test]
    fn commands_serialize_for_the_ui_shell() {
        let command = RenderCommand::Add {
            handle: MarkerHandle(7),
            cell: Cell::new(2, 3),
            marker: MarkerKind::Item {
                item: ItemKind::FireUp,
            },
        };
        let value = serde_json::to_value(&command).expect("command serializes");
        assert_eq!(value["op"], "add");
        assert_eq!(value["marker"]["kind"], "item");
        assert_eq!(value["marker"]["item"], "fire_up");
        assert_eq!(value["cell"]["x"], 2);
    }
}
