use image::{Rgba, RgbaImage};

use super::{Stage, StageConfig};
use crate::content::{parse_stage_str, ImageAssets, StageData, StageId};

const YARD: &str = r#"{
    "name": "yard",
    "properties": { "music": "calm" },
    "matrix": [[16, 0, 0], [0, 16, 0], [0, 0, 1]],
    "x0": 0,
    "y0": 0,
    "tiles": {
        "grass": {
            "frames": [{ "id": "tiles.png", "x": 0, "y": 0, "width": 16, "height": 16 }],
            "properties": { "kind": "ground" }
        },
        "sand": {
            "frames": [{ "id": "tiles.png", "x": 16, "y": 0, "width": 16, "height": 16 }],
            "properties": { "kind": "ground" }
        },
        "wall": {
            "frames": [{ "id": "tiles.png", "x": 16, "y": 0, "width": 16, "height": 16 }],
            "walkable": false,
            "mutable": true,
            "properties": { "kind": "wall" }
        },
        "water": {
            "frames": [
                { "id": "tiles.png", "x": 0, "y": 0, "width": 16, "height": 16, "duration": 100 },
                { "id": "tiles.png", "x": 16, "y": 0, "width": 16, "height": 16, "duration": 100 }
            ],
            "walkable": false
        }
    },
    "entities": {
        "hero": {
            "frames": [{ "id": "hero.png" }],
            "enablePhysics": true,
            "properties": { "team": "blue", "stats": { "hp": 3, "speed": 2 } }
        },
        "ghost": {
            "frames": [{ "id": "hero.png" }],
            "enablePhysics": true,
            "box": { "iSpan": 0.5, "jSpan": 0.5 },
            "properties": { "team": "red" }
        },
        "crate": {
            "frames": [{ "id": "hero.png" }],
            "properties": { "team": "none" }
        }
    },
    "instances": {
        "h1": { "entityId": "hero", "i": 2, "j": 2, "k": 0, "properties": { "name": "first" } },
        "c1": { "entityId": "crate", "i": 4, "j": 4, "k": 0 }
    }
}"#;

/// `size x size` layer 0 of grass with the given overrides.
pub(crate) fn yard_data(size: i32, overrides: &[((i32, i32), &str)]) -> StageData {
    let mut data = parse_stage_str(YARD).expect("yard json");
    let layer = data.map.entry(0).or_default();
    for i in 0..size {
        for j in 0..size {
            let id = overrides
                .iter()
                .find(|(cell, _)| *cell == (i, j))
                .map_or("grass", |(_, id)| *id);
            layer.entry(i).or_default().insert(j, StageId::from(id));
        }
    }
    data
}

pub(crate) fn yard_assets() -> ImageAssets {
    let mut tiles = RgbaImage::new(32, 16);
    for (x, _, pixel) in tiles.enumerate_pixels_mut() {
        *pixel = if x < 16 {
            Rgba([40, 160, 60, 255])
        } else {
            Rgba([200, 180, 120, 255])
        };
    }
    let mut assets = ImageAssets::new();
    assets.insert_image("tiles.png", tiles);
    assets.insert_image("hero.png", RgbaImage::from_pixel(16, 16, Rgba([220, 30, 30, 255])));
    assets
}

pub(crate) fn config(width: u32, height: u32) -> StageConfig {
    StageConfig {
        viewport_width: width,
        viewport_height: height,
        ..StageConfig::default()
    }
}

pub(crate) fn yard_stage(size: i32, overrides: &[((i32, i32), &str)]) -> Stage {
    Stage::new(&yard_data(size, overrides), config(64, 64), &yard_assets()).expect("stage")
}

pub(crate) fn empty_stage() -> Stage {
    Stage::new(&StageData::default(), config(8, 8), &ImageAssets::new()).expect("stage")
}
