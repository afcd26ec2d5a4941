use bomb_core::{
    ActionRejected, BombVariant, Cell, Collection, Direction, GameConfig, GameSession, MapLayout,
    RecordingRenderer, ReplicaTable, StoreClient, StoreError, StorePath, StoreWrite,
    Subscription,
};
use bomb_core::store::SnapshotSender;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value};
use std::sync::Mutex;
use wasm_bindgen::prelude::*;

const MAX_OUTBOUND_WRITES: usize = 512;

static CLIENT: Lazy<Mutex<Option<ClientState>>> = Lazy::new(|| Mutex::new(None));
static LOGGER: ConsoleLogger = ConsoleLogger;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console, js_name = log)]
    fn console_log(message: &str);
}

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            console_log(&format!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Store seam backed by the page. Writes land in a local replica right away
/// and queue for the host page to forward to the shared database; snapshots
/// the page receives from the database replace whole collections.
#[derive(Debug)]
struct BridgeStore {
    table: ReplicaTable,
    outbound: Vec<StoreWrite>,
    online: bool,
}

impl BridgeStore {
    fn new() -> Self {
        Self {
            table: ReplicaTable::new(),
            outbound: Vec::new(),
            online: true,
        }
    }

    fn apply_remote(&mut self, collection: Collection, value: Value) {
        self.table.replace_collection(collection, value);
    }

    fn queue(&mut self, write: StoreWrite) {
        self.outbound.push(write);
        if self.outbound.len() > MAX_OUTBOUND_WRITES {
            let overflow = self.outbound.len() - MAX_OUTBOUND_WRITES;
            log::warn!("dropping {overflow} unsent store writes");
            self.outbound.drain(0..overflow);
        }
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.online {
            Ok(())
        } else {
            Err(StoreError::unavailable("bridge is offline"))
        }
    }
}

impl StoreClient for BridgeStore {
    fn put(&mut self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.table.put(path, value.clone());
        self.queue(StoreWrite::Put {
            path: path.to_string(),
            value,
        });
        Ok(())
    }

    fn update(
        &mut self,
        path: &StorePath,
        fields: JsonMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.table.update(path, fields.clone());
        self.queue(StoreWrite::Update {
            path: path.to_string(),
            fields,
        });
        Ok(())
    }

    fn remove(&mut self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.table.remove(path);
        self.queue(StoreWrite::Remove {
            path: path.to_string(),
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        collection: Collection,
        sink: SnapshotSender,
    ) -> Result<Subscription, StoreError> {
        Ok(self.table.subscribe(collection, sink))
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        self.table.unsubscribe(subscription);
    }
}

type ClientSession = GameSession<BridgeStore, RecordingRenderer>;

struct ClientState {
    session: ClientSession,
    layout: MapLayout,
}

impl ClientState {
    fn boot(
        player_id: String,
        config_json: &str,
        layout_json: &str,
        rng: StdRng,
    ) -> Result<Self, String> {
        let config = if config_json.trim().is_empty() {
            GameConfig::default()
        } else {
            GameConfig::from_json(config_json).map_err(|error| error.to_string())?
        };
        let layout = if layout_json.trim().is_empty() {
            MapLayout::open()
        } else {
            serde_json::from_str::<MapLayout>(layout_json)
                .map_err(|error| format!("invalid layout payload: {error}"))?
        };

        let mut session = GameSession::new(
            config,
            player_id,
            &layout,
            BridgeStore::new(),
            RecordingRenderer::new(),
            rng,
        );
        session.start().map_err(|error| error.to_string())?;
        Ok(Self { session, layout })
    }

    fn push_snapshot(&mut self, collection: &str, value_json: &str) -> Result<String, String> {
        let collection = Collection::from_root(collection)
            .ok_or_else(|| format!("unknown collection `{collection}`"))?;
        let value = if value_json.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(value_json)
                .map_err(|error| format!("invalid snapshot payload: {error}"))?
        };

        self.session.store_mut().apply_remote(collection, value);
        let report = self.session.pump();
        to_json(&report)
    }
}

fn parse_tag<T: serde::de::DeserializeOwned>(tag: &str, what: &str) -> Result<T, String> {
    serde_json::from_value(Value::String(tag.to_string()))
        .map_err(|_| format!("unknown {what} `{tag}`"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|error| error.to_string())
}

fn rejection(error: ActionRejected) -> String {
    serde_json::to_string(&error).unwrap_or_else(|_| error.to_string())
}

fn with_client<T>(action: impl FnOnce(&mut ClientState) -> Result<T, String>) -> Result<T, JsValue> {
    let mut client = CLIENT
        .lock()
        .map_err(|_| JsValue::from_str("client mutex poisoned"))?;
    let state = client
        .as_mut()
        .ok_or_else(|| JsValue::from_str("session not booted"))?;
    action(state).map_err(|error| JsValue::from_str(&error))
}

fn drain_json<T: Serialize>(drain: impl FnOnce(&mut ClientState) -> Vec<T>) -> String {
    let mut client = match CLIENT.lock() {
        Ok(client) => client,
        Err(_) => return "[]".to_string(),
    };
    let Some(state) = client.as_mut() else {
        return "[]".to_string();
    };

    let drained = drain(state);
    if drained.is_empty() {
        return "[]".to_string();
    }
    serde_json::to_string(&drained).unwrap_or_else(|_| "[]".to_string())
}

#[wasm_bindgen]
pub fn boot_session(
    player_id: String,
    config_json: String,
    layout_json: String,
) -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }

    let state = ClientState::boot(player_id, &config_json, &layout_json, StdRng::from_os_rng())
        .map_err(|error| JsValue::from_str(&error))?;

    let mut client = CLIENT
        .lock()
        .map_err(|_| JsValue::from_str("client mutex poisoned"))?;
    if let Some(previous) = client.as_mut() {
        previous.session.stop();
    }
    *client = Some(state);
    Ok(())
}

#[wasm_bindgen]
pub fn shutdown_session() {
    if let Ok(mut client) = CLIENT.lock() {
        if let Some(mut state) = client.take() {
            state.session.stop();
        }
    }
}

/// Hosting client only: writes the block layout the session was booted with.
#[wasm_bindgen]
pub fn publish_map() -> Result<(), JsValue> {
    with_client(|state| {
        state
            .session
            .publish_map(&state.layout)
            .map_err(|error| error.to_string())
    })
}

#[wasm_bindgen]
pub fn push_snapshot(collection: String, value_json: String) -> Result<String, JsValue> {
    with_client(|state| state.push_snapshot(&collection, &value_json))
}

#[wasm_bindgen]
pub fn set_store_online(online: bool) -> Result<(), JsValue> {
    with_client(|state| {
        state.session.store_mut().online = online;
        Ok(())
    })
}

#[wasm_bindgen]
pub fn advance_clock(now_ms: f64) -> Result<(), JsValue> {
    with_client(|state| {
        state.session.advance_to(now_ms.max(0.0) as u64);
        Ok(())
    })
}

#[wasm_bindgen]
pub fn join_match() -> Result<String, JsValue> {
    with_client(|state| {
        let cell = state.session.join_random().map_err(rejection)?;
        to_json(&cell)
    })
}

#[wasm_bindgen]
pub fn join_match_at(x: i32, y: i32) -> Result<(), JsValue> {
    with_client(|state| state.session.join(Cell::new(x, y)).map_err(rejection))
}

#[wasm_bindgen]
pub fn leave_match() -> Result<(), JsValue> {
    with_client(|state| {
        state.session.leave();
        Ok(())
    })
}

#[wasm_bindgen]
pub fn step_player(direction: String) -> Result<String, JsValue> {
    with_client(|state| {
        let direction: Direction = parse_tag(&direction, "direction")?;
        let cell = state
            .session
            .step_local_player(direction)
            .map_err(rejection)?;
        to_json(&cell)
    })
}

#[wasm_bindgen]
pub fn place_bomb(variant: String) -> Result<String, JsValue> {
    with_client(|state| {
        let variant: BombVariant = parse_tag(&variant, "bomb variant")?;
        state.session.place_bomb(variant).map_err(rejection)
    })
}

#[wasm_bindgen]
pub fn punch_bomb() -> Result<String, JsValue> {
    with_client(|state| {
        let cell = state.session.punch_bomb().map_err(rejection)?;
        to_json(&cell)
    })
}

#[wasm_bindgen]
pub fn trigger_remote_bombs() -> Result<String, JsValue> {
    with_client(|state| {
        let triggered = state.session.trigger_remote_bombs().map_err(rejection)?;
        to_json(&triggered)
    })
}

#[wasm_bindgen]
pub fn respawn() -> Result<String, JsValue> {
    with_client(|state| {
        let cell = state.session.find_spawn_cell().map_err(rejection)?;
        state.session.respawn(cell).map_err(rejection)?;
        to_json(&cell)
    })
}

#[wasm_bindgen]
pub fn drain_store_writes() -> String {
    drain_json(|state| std::mem::take(&mut state.session.store_mut().outbound))
}

#[wasm_bindgen]
pub fn drain_render_commands() -> String {
    drain_json(|state| state.session.renderer_mut().drain_commands())
}

#[wasm_bindgen]
pub fn drain_session_events() -> String {
    drain_json(|state| state.session.drain_events())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bomb_core::RenderCommand;
    use serde_json::json;

    fn booted(player_id: &str) -> ClientState {
        ClientState::boot(
            player_id.to_string(),
            r#"{ "mapSize": 9 }"#,
            r#"{ "walls": [], "blocks": [{ "x": 4, "y": 4 }] }"#,
            StdRng::seed_from_u64(11),
        )
        .expect("client boots")
    }

    #[test]
    fn local_writes_queue_for_the_page_in_order() {
        let mut state = booted("p1");
        state.session.join(Cell::new(1, 1)).expect("join succeeds");
        state
            .session
            .place_bomb(BombVariant::Normal)
            .expect("bomb placed");

        let writes = std::mem::take(&mut state.session.store_mut().outbound);
        assert_eq!(writes.len(), 2);
        assert!(matches!(&writes[0], StoreWrite::Put { path, .. } if path == "players/p1"));
        match &writes[1] {
            StoreWrite::Put { path, value } => {
                assert!(path.starts_with("bombs/bomb_"));
                assert_eq!(value["placedBy"], "p1");
                assert_eq!(value["x"], 1);
            }
            other => panic!("unexpected write {other:?}"),
        }
    }

    #[test]
    fn offline_bridge_rejects_actions_without_queueing() {
        let mut state = booted("p1");
        state.session.join(Cell::new(2, 2)).expect("join succeeds");
        state.session.store_mut().outbound.clear();
        state.session.store_mut().online = false;

        let error = state
            .session
            .place_bomb(BombVariant::Normal)
            .expect_err("offline placement fails");
        assert!(matches!(error, ActionRejected::StoreUnavailable { .. }));
        assert!(state.session.store_mut().outbound.is_empty());
        assert_eq!(state.session.local_player().map(|p| p.bomb_count), Some(0));
    }

    #[test]
    fn pushed_snapshots_materialize_remote_entities() {
        let mut state = booted("p1");
        state.session.renderer_mut().drain_commands();

        let report = state
            .push_snapshot("players", r#"{ "p2": { "x": 3, "y": 5, "hp": 3 } }"#)
            .expect("snapshot applies");
        let report: Value = serde_json::from_str(&report).expect("report is json");
        assert_eq!(report["created"], 1);

        let commands = state.session.renderer_mut().drain_commands();
        assert!(commands.iter().any(|command| matches!(
            command,
            RenderCommand::Add { cell, .. } if *cell == Cell::new(3, 5)
        )));

        let again = state
            .push_snapshot("players", r#"{ "p2": { "x": 3, "y": 5, "hp": 3 } }"#)
            .expect("snapshot applies");
        assert_eq!(serde_json::from_str::<Value>(&again).expect("json")["created"], 0);
    }

    #[test]
    fn pushed_snapshots_reject_unknown_collections_and_bad_json() {
        let mut state = booted("p1");
        assert!(state.push_snapshot("walls", "{}").is_err());
        assert!(state.push_snapshot("bombs", "{ not json").is_err());
        assert!(state.push_snapshot("bombs", "").is_ok());
    }

    #[test]
    fn boot_rejects_bad_payloads() {
        let rng = || StdRng::seed_from_u64(1);
        assert!(ClientState::boot("p1".into(), r#"{ "mapSize": 0 }"#, "", rng()).is_err());
        assert!(ClientState::boot("p1".into(), "", "[1, 2]", rng()).is_err());
        assert!(ClientState::boot("p1".into(), "", "", rng()).is_ok());
    }

    #[test]
    fn tags_parse_like_their_wire_names() {
        assert_eq!(
            parse_tag::<BombVariant>("remote", "bomb variant"),
            Ok(BombVariant::Remote)
        );
        assert_eq!(parse_tag::<Direction>("left", "direction"), Ok(Direction::Left));
        assert!(parse_tag::<Direction>("north", "direction").is_err());
    }

    #[test]
    fn rejections_serialize_for_the_page() {
        let encoded = rejection(ActionRejected::PlayerStunned);
        assert_eq!(
            serde_json::from_str::<Value>(&encoded).expect("json"),
            json!({ "kind": "player_stunned" })
        );
    }

    #[test]
    fn hosting_client_publishes_its_layout() {
        let mut state = booted("host");
        state.session.store_mut().outbound.clear();
        state
            .session
            .publish_map(&state.layout)
            .expect("map published");

        let writes = std::mem::take(&mut state.session.store_mut().outbound);
        assert_eq!(
            writes,
            vec![StoreWrite::Put {
                path: "blocks".to_string(),
                value: json!(["4,4"]),
            }]
        );
        assert_eq!(state.session.world().block_count(), 1);
    }
}
