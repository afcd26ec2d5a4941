pub mod config;
pub mod damage;
pub mod domain;
pub mod error;
pub mod explosion;
pub mod grid;
pub mod reconcile;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod variant;
pub mod world;

pub use config::{GameConfig, MapLayout};
pub use domain::{
    Bomb, BombId, BombPhase, BombRecord, BombVariant, Item, ItemKind, ItemRecord, Player,
    PlayerId, PlayerRecord,
};
pub use error::{ActionRejected, ConfigError, EntityError, StoreError};
pub use explosion::{blast_pattern, BlastCell, Detonation, DetonationCause};
pub use grid::{Cell, Direction, SpatialIndex};
pub use reconcile::ReconcileReport;
pub use render::{GridRenderer, MarkerHandle, MarkerKind, RecordingRenderer, RenderCommand};
pub use scheduler::{Millis, Scheduler, TimerEvent};
pub use session::{GameSession, SessionEvent};
pub use store::{
    Collection, CollectionSnapshot, MemoryStore, ReplicaTable, StoreClient, StorePath, StoreWrite,
    Subscription,
};
pub use world::GameWorld;
