use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::stage::Properties;

/// Identifier as written by the authoring tool; accepts JSON strings and integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for StageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Integer(i64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => StageId(text),
            Repr::Integer(value) => StageId(value.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub id: StageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    #[serde(default)]
    pub frames: Vec<FrameDescriptor>,
    #[serde(default = "default_walkable")]
    pub walkable: bool,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub properties: Properties,
}

/// Tile-space box, relative to the owning instance's position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    #[serde(default)]
    pub i0: f64,
    #[serde(default)]
    pub j0: f64,
    pub i_span: f64,
    pub j_span: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            i0: 0.0,
            j0: 0.0,
            i_span: 1.0,
            j_span: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    #[serde(default)]
    pub frames: Vec<FrameDescriptor>,
    #[serde(default)]
    pub enable_physics: bool,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(rename = "box", default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescriptor {
    pub entity_id: StageId,
    #[serde(default)]
    pub i: f64,
    #[serde(default)]
    pub j: f64,
    #[serde(default)]
    pub k: f64,
    #[serde(default)]
    pub properties: Properties,
}

/// `k -> i -> j -> tile id`
pub type LayerMap = BTreeMap<i32, BTreeMap<i32, BTreeMap<i32, StageId>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default = "identity_matrix")]
    pub matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub x0: f64,
    #[serde(default)]
    pub y0: f64,
    #[serde(default)]
    pub tiles: BTreeMap<String, TileDescriptor>,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDescriptor>,
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceDescriptor>,
    #[serde(default)]
    pub map: LayerMap,
}

impl Default for StageData {
    fn default() -> Self {
        Self {
            name: String::new(),
            properties: Properties::new(),
            matrix: identity_matrix(),
            x0: 0.0,
            y0: 0.0,
            tiles: BTreeMap::new(),
            entities: BTreeMap::new(),
            instances: BTreeMap::new(),
            map: LayerMap::new(),
        }
    }
}

impl StageData {
    pub fn tile_count(&self) -> usize {
        self.map
            .values()
            .flat_map(|rows| rows.values())
            .map(BTreeMap::len)
            .sum()
    }
}

fn default_walkable() -> bool {
    true
}

fn identity_matrix() -> [[f64; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}
