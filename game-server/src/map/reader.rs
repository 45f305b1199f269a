//! Tiled JSON map loading.
//!
//! The runtime consumes Tiled-style maps: the fourth tile layer is the
//! collision layer (any non-zero gid blocks), and object groups carry the
//! typed objects the simulation needs — warp targets, monster spawn areas,
//! NPCs and free script attachments. Object custom properties are read as
//! string name→value pairs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;

use common::defines::TILE_SIZE;

use super::composite::{MapComposite, PvpRule, WarpArea};
use super::grid::MapGrid;
use crate::point::{Point, Rectangle, TilePos};
use crate::spawn::SpawnArea;

/// Index of the collision layer among the tile layers.
const COLLISION_LAYER: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum MapReadError {
    #[error("map is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("map format error: {0}")]
    Format(String),
}

/// An NPC to be placed when the map activates.
#[derive(Debug, Clone)]
pub struct NpcSeed {
    pub npc_id: u16,
    pub name: String,
    pub pos: Point,
    pub script_function: Option<String>,
}

/// A free script attachment on the map.
#[derive(Debug, Clone)]
pub struct ScriptSeed {
    pub function: String,
    pub area: Rectangle,
}

pub struct LoadedMap {
    pub composite: MapComposite,
    pub npcs: Vec<NpcSeed>,
    pub scripts: Vec<ScriptSeed>,
}

fn format_err(msg: &str) -> MapReadError {
    MapReadError::Format(msg.to_string())
}

fn as_i64(v: &Value, what: &str) -> Result<i64, MapReadError> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .ok_or_else(|| format_err(&format!("{} is not a number", what)))
}

/// Custom properties as plain string pairs, whatever their JSON type.
fn read_properties(object: &Value) -> HashMap<String, String> {
    let mut props = HashMap::new();
    if let Some(list) = object.get("properties").and_then(Value::as_array) {
        for p in list {
            let Some(name) = p.get("name").and_then(Value::as_str) else {
                continue;
            };
            let value = match p.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => continue,
            };
            props.insert(name.to_string(), value);
        }
    }
    props
}

fn prop_i32(props: &HashMap<String, String>, name: &str) -> Option<i32> {
    props.get(name).and_then(|v| v.parse().ok())
}

/// Decodes a tile layer's data into gids: either a plain JSON array or a
/// base64 string, optionally zlib-compressed.
fn decode_layer_data(layer: &Value, tile_count: usize) -> Result<Vec<u32>, MapReadError> {
    match layer.get("data") {
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| as_i64(v, "tile gid").map(|n| n as u32))
            .collect(),
        Some(Value::String(text)) => {
            let raw = BASE64
                .decode(text.trim())
                .map_err(|e| format_err(&format!("bad base64 layer data: {}", e)))?;
            let bytes = match layer.get("compression").and_then(Value::as_str) {
                Some("zlib") => {
                    let mut decoder = ZlibDecoder::new(raw.as_slice());
                    let mut out = Vec::with_capacity(tile_count * 4);
                    decoder
                        .read_to_end(&mut out)
                        .map_err(|e| format_err(&format!("bad zlib layer data: {}", e)))?;
                    out
                }
                Some(other) => {
                    return Err(format_err(&format!("unsupported compression '{}'", other)))
                }
                None => raw,
            };
            if bytes.len() < tile_count * 4 {
                return Err(format_err("layer data shorter than the map"));
            }
            Ok(bytes
                .chunks_exact(4)
                .take(tile_count)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        }
        _ => Err(format_err("tile layer without data")),
    }
}

/// Parses one map from its JSON text.
pub fn read_map(id: u16, name: &str, text: &str) -> Result<LoadedMap, MapReadError> {
    let doc: Value = serde_json::from_str(text)?;
    let width = as_i64(doc.get("width").ok_or_else(|| format_err("no width"))?, "width")? as i32;
    let height =
        as_i64(doc.get("height").ok_or_else(|| format_err("no height"))?, "height")? as i32;
    if width <= 0 || height <= 0 {
        return Err(format_err("degenerate map size"));
    }

    let layers = doc
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| format_err("no layers"))?;

    let mut grid = MapGrid::new(width, height);
    let tile_layers: Vec<&Value> = layers
        .iter()
        .filter(|l| l.get("type").and_then(Value::as_str) == Some("tilelayer"))
        .collect();
    match tile_layers.get(COLLISION_LAYER) {
        Some(collision) => {
            let gids = decode_layer_data(collision, (width * height) as usize)?;
            for (i, &gid) in gids.iter().enumerate() {
                if gid != 0 {
                    let t = TilePos::new(i as i32 % width, i as i32 / width);
                    grid.set_perm_walkable(t, false);
                }
            }
        }
        None => {
            log::warn!("Map '{}' has no collision layer; everything walkable", name);
        }
    }

    let mut composite = MapComposite::new(id, name, grid);
    let mut npcs = Vec::new();
    let mut scripts = Vec::new();

    let map_props = read_properties(&doc);
    if map_props.get("PVP").map(String::as_str) == Some("free") {
        composite.pvp = PvpRule::Free;
    }

    for group in layers
        .iter()
        .filter(|l| l.get("type").and_then(Value::as_str) == Some("objectgroup"))
    {
        let Some(objects) = group.get("objects").and_then(Value::as_array) else {
            continue;
        };
        for object in objects {
            let kind = object
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_ascii_uppercase();
            let x = as_i64(object.get("x").unwrap_or(&Value::Null), "object x").unwrap_or(0) as i32;
            let y = as_i64(object.get("y").unwrap_or(&Value::Null), "object y").unwrap_or(0) as i32;
            let w = as_i64(object.get("width").unwrap_or(&Value::Null), "object width")
                .unwrap_or(TILE_SIZE as i64) as i32;
            let h = as_i64(object.get("height").unwrap_or(&Value::Null), "object height")
                .unwrap_or(TILE_SIZE as i64) as i32;
            let object_name = object
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let props = read_properties(object);

            match kind.as_str() {
                "WARP" => {
                    let (Some(dest_map), Some(dx), Some(dy)) = (
                        prop_i32(&props, "DEST_MAP"),
                        prop_i32(&props, "DEST_X"),
                        prop_i32(&props, "DEST_Y"),
                    ) else {
                        log::warn!("Map '{}': warp '{}' missing target", name, object_name);
                        continue;
                    };
                    composite.warps.push(WarpArea {
                        area: Rectangle::new(x, y, w, h),
                        dest_map: dest_map as u16,
                        dest: Point::new(dx, dy),
                    });
                }
                "SPAWN" => {
                    let Some(monster_id) = prop_i32(&props, "MONSTER_ID") else {
                        log::warn!("Map '{}': spawn '{}' without monster", name, object_name);
                        continue;
                    };
                    let max = prop_i32(&props, "MAX_BEINGS").unwrap_or(1).max(0) as u32;
                    let rate = prop_i32(&props, "SPAWN_RATE").unwrap_or(1).max(0) as u32;
                    composite.spawns.push(SpawnArea::new(
                        Rectangle::new(x, y, w, h),
                        monster_id as u16,
                        max,
                        rate,
                    ));
                }
                "NPC" => {
                    let Some(npc_id) = prop_i32(&props, "NPC_ID") else {
                        log::warn!("Map '{}': npc '{}' without id", name, object_name);
                        continue;
                    };
                    npcs.push(NpcSeed {
                        npc_id: npc_id as u16,
                        name: object_name,
                        pos: Point::new(x + w / 2, y + h / 2),
                        script_function: props.get("SCRIPT").cloned(),
                    });
                }
                "SCRIPT" => {
                    let Some(function) = props.get("SCRIPT").cloned() else {
                        continue;
                    };
                    scripts.push(ScriptSeed {
                        function,
                        area: Rectangle::new(x, y, w, h),
                    });
                }
                _ => {}
            }
        }
    }

    Ok(LoadedMap {
        composite,
        npcs,
        scripts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_map(collision_data: &str) -> String {
        format!(
            r#"{{
              "width": 4, "height": 4, "tilewidth": 32, "tileheight": 32,
              "layers": [
                {{"type": "tilelayer", "name": "ground", "data": [0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0]}},
                {{"type": "tilelayer", "name": "fringe", "data": [0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0]}},
                {{"type": "tilelayer", "name": "over", "data": [0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0]}},
                {{"type": "tilelayer", "name": "collision", "data": {collision_data}}},
                {{"type": "objectgroup", "name": "objects", "objects": [
                  {{"name": "to town", "type": "WARP", "x": 0, "y": 0, "width": 32, "height": 32,
                    "properties": [
                      {{"name": "DEST_MAP", "value": 2}},
                      {{"name": "DEST_X", "value": 48}},
                      {{"name": "DEST_Y", "value": 48}}]}},
                  {{"name": "maggot pit", "type": "SPAWN", "x": 32, "y": 32, "width": 64, "height": 64,
                    "properties": [
                      {{"name": "MONSTER_ID", "value": 1}},
                      {{"name": "MAX_BEINGS", "value": 3}},
                      {{"name": "SPAWN_RATE", "value": 60}}]}},
                  {{"name": "Old Barnaby", "type": "NPC", "x": 64, "y": 64,
                    "properties": [
                      {{"name": "NPC_ID", "value": 110}},
                      {{"name": "SCRIPT", "value": "npc_barnaby"}}]}}
                ]}}
              ]
            }}"#
        )
    }

    #[test]
    fn collision_layer_blocks_tiles() {
        let text = minimal_map("[0,0,0,0, 0,7,0,0, 0,0,0,0, 0,0,0,0]");
        let loaded = read_map(1, "pit", &text).unwrap();
        assert!(!loaded.composite.grid.is_perm_walkable(TilePos::new(1, 1)));
        assert!(loaded.composite.grid.is_perm_walkable(TilePos::new(0, 0)));
    }

    #[test]
    fn objects_are_collected() {
        let text = minimal_map("[0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0]");
        let loaded = read_map(1, "pit", &text).unwrap();
        assert_eq!(loaded.composite.warps.len(), 1);
        assert_eq!(loaded.composite.warps[0].dest_map, 2);
        assert_eq!(loaded.composite.spawns.len(), 1);
        assert_eq!(loaded.composite.spawns[0].max_beings, 3);
        assert_eq!(loaded.npcs.len(), 1);
        assert_eq!(loaded.npcs[0].npc_id, 110);
        assert_eq!(
            loaded.npcs[0].script_function.as_deref(),
            Some("npc_barnaby")
        );
    }

    #[test]
    fn base64_zlib_layers_decode() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut gids = vec![0u8; 16 * 4];
        gids[5 * 4] = 9; // tile (1,1) blocked
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&gids).unwrap();
        let compressed = encoder.finish().unwrap();
        let encoded = BASE64.encode(compressed);

        let text = minimal_map("[0]").replace(
            r#"{"type": "tilelayer", "name": "collision", "data": [0]}"#,
            &format!(
                r#"{{"type": "tilelayer", "name": "collision", "compression": "zlib", "data": "{}"}}"#,
                encoded
            ),
        );
        let loaded = read_map(1, "pit", &text).unwrap();
        assert!(!loaded.composite.grid.is_perm_walkable(TilePos::new(1, 1)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(read_map(1, "bad", "{nope").is_err());
    }
}
