use std::collections::BTreeMap;
use std::f64::consts::SQRT_2;

use super::pathfinding::PathNode;
use super::props::{filter_matches, Properties};
use super::{PushBack, StageError, TileCoord, TileRect};
use crate::content::{LayerMap, TileDescriptor};

/// Swept displacements may overshoot a push-back by at most this much.
pub const SWEEP_TOLERANCE: f64 = 1e-3;

/// `(walkable, properties) -> solid`; overrides the plain walkable flag.
pub type SolidPredicate<'a> = &'a dyn Fn(bool, &Properties) -> bool;

fn default_solid(walkable: bool, _properties: &Properties) -> bool {
    !walkable
}

type Layer = BTreeMap<(i32, i32), String>;

#[derive(Debug, Clone, Default)]
pub struct TileMap {
    tiles: BTreeMap<String, TileDescriptor>,
    layers: BTreeMap<i32, Layer>,
}

impl TileMap {
    pub fn new(
        tiles: BTreeMap<String, TileDescriptor>,
        map: &LayerMap,
    ) -> Result<Self, StageError> {
        let mut tile_map = Self {
            tiles,
            layers: BTreeMap::new(),
        };
        for (k, rows) in map {
            for (i, columns) in rows {
                for (j, id) in columns {
                    tile_map.put_at(TileCoord::new(*i, *j, *k), id.as_str())?;
                }
            }
        }
        Ok(tile_map)
    }

    pub fn descriptor(&self, id: &str) -> Option<&TileDescriptor> {
        self.tiles.get(id)
    }

    pub fn descriptors(&self) -> &BTreeMap<String, TileDescriptor> {
        &self.tiles
    }

    pub fn layers(&self) -> Vec<i32> {
        self.layers.keys().copied().collect()
    }

    pub fn tiles_in_layer(&self, k: i32) -> Result<Vec<(TileCoord, &str)>, StageError> {
        let layer = self.layers.get(&k).ok_or(StageError::UnknownLayer(k))?;
        Ok(layer
            .iter()
            .map(|((i, j), id)| (TileCoord::new(*i, *j, k), id.as_str()))
            .collect())
    }

    pub fn placements(&self) -> impl Iterator<Item = (TileCoord, &str)> + '_ {
        self.layers.iter().flat_map(|(k, layer)| {
            layer
                .iter()
                .map(move |((i, j), id)| (TileCoord::new(*i, *j, *k), id.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.layers.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.values().all(BTreeMap::is_empty)
    }

    pub fn get_at(&self, coord: TileCoord) -> Option<&str> {
        self.layers
            .get(&coord.k)
            .and_then(|layer| layer.get(&(coord.i, coord.j)))
            .map(String::as_str)
    }

    /// Places `id`, creating the layer on first use; returns the previous id.
    pub fn put_at(&mut self, coord: TileCoord, id: &str) -> Result<Option<String>, StageError> {
        if !self.tiles.contains_key(id) {
            return Err(StageError::UnknownTile(id.to_string()));
        }
        Ok(self
            .layers
            .entry(coord.k)
            .or_default()
            .insert((coord.i, coord.j), id.to_string()))
    }

    pub fn remove_at(&mut self, coord: TileCoord) -> Option<String> {
        self.layers
            .get_mut(&coord.k)
            .and_then(|layer| layer.remove(&(coord.i, coord.j)))
    }

    pub fn tile_id(&self, filter: Option<&Properties>) -> Option<&str> {
        self.tile_ids(filter).into_iter().next()
    }

    pub fn tile_ids(&self, filter: Option<&Properties>) -> Vec<&str> {
        let empty = Properties::new();
        self.tiles
            .iter()
            .filter(|(_, descriptor)| filter_matches(filter, &descriptor.properties, &empty))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// First placed tile whose descriptor matches `filter`.
    pub fn tile(&self, filter: Option<&Properties>) -> Option<(TileCoord, &str)> {
        self.tiles(filter).into_iter().next()
    }

    pub fn tiles(&self, filter: Option<&Properties>) -> Vec<(TileCoord, &str)> {
        let empty = Properties::new();
        self.placements()
            .filter(|(_, id)| {
                self.tiles
                    .get(*id)
                    .is_some_and(|descriptor| filter_matches(filter, &descriptor.properties, &empty))
            })
            .collect()
    }

    /// Present and flagged walkable; empty cells are not.
    pub fn is_walkable(&self, coord: TileCoord) -> bool {
        self.get_at(coord)
            .and_then(|id| self.tiles.get(id))
            .is_some_and(|descriptor| descriptor.walkable)
    }

    /// Empty cells never collide.
    pub fn is_solid(&self, coord: TileCoord, predicate: Option<SolidPredicate<'_>>) -> bool {
        let Some(descriptor) = self.get_at(coord).and_then(|id| self.tiles.get(id)) else {
            return false;
        };
        match predicate {
            Some(predicate) => predicate(descriptor.walkable, &descriptor.properties),
            None => default_solid(descriptor.walkable, &descriptor.properties),
        }
    }

    pub fn graph_node(&self, i: i32, j: i32, k: i32, i1: i32, j1: i32) -> TileNode<'_> {
        TileNode {
            map: self,
            coord: TileCoord::new(i, j, k),
            target: (i1, j1),
        }
    }

    /// Push-back separating `rect`, which just moved by `(di_moved, dj_moved)`
    /// inside layer `k`, from the solid tiles it overlaps. An axis wedged on
    /// both sides, or whose correction exceeds the displacement, yields zero.
    pub fn rectangle_collision(
        &self,
        k: i32,
        rect: TileRect,
        di_moved: f64,
        dj_moved: f64,
        predicate: Option<SolidPredicate<'_>>,
    ) -> PushBack {
        let solid = |i: i32, j: i32| self.is_solid(TileCoord::new(i, j, k), predicate);
        let i0 = rect.i.floor() as i32;
        let i1 = (rect.i + rect.di).ceil() as i32 - 1;
        let j0 = rect.j.floor() as i32;
        let j1 = (rect.j + rect.dj).ceil() as i32 - 1;

        let (mut viu, mut vio) = (0.0, 0.0);
        for j2 in j0..=j1 {
            if solid(i0, j2) && !solid(i0 + 1, j2) {
                viu = f64::from(i0) + 1.0 - rect.i;
            }
            if solid(i1, j2) && !solid(i1 - 1, j2) {
                vio = f64::from(i1) - rect.i - rect.di;
            }
        }
        let (mut vju, mut vjo) = (0.0, 0.0);
        for i2 in i0..=i1 {
            if solid(i2, j0) && !solid(i2, j0 + 1) {
                vju = f64::from(j0) + 1.0 - rect.j;
            }
            if solid(i2, j1) && !solid(i2, j1 - 1) {
                vjo = f64::from(j1) - rect.j - rect.dj;
            }
        }

        PushBack {
            i: cap_to_sweep(pick_axis(viu, vio), di_moved),
            j: cap_to_sweep(pick_axis(vju, vjo), dj_moved),
        }
    }
}

fn pick_axis(under: f64, over: f64) -> f64 {
    match (under != 0.0, over != 0.0) {
        (true, true) | (false, false) => 0.0,
        (true, false) => under,
        (false, true) => over,
    }
}

pub(crate) fn cap_to_sweep(push: f64, moved: f64) -> f64 {
    if push.abs() > moved.abs() + SWEEP_TOLERANCE {
        0.0
    } else {
        push
    }
}

/// Grid cell seen as a pathfinding node. Neighbour slots are numbered
/// row-major from the `+j` row down: slot `(1 - dj) * 3 + (di + 1)`, so odd
/// slots are cardinal and slot 4 (the cell itself) is never reported.
#[derive(Debug, Clone, Copy)]
pub struct TileNode<'a> {
    map: &'a TileMap,
    coord: TileCoord,
    target: (i32, i32),
}

impl<'a> TileNode<'a> {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    fn slot_offset(index: usize) -> (i32, i32) {
        let di = (index % 3) as i32 - 1;
        let dj = 1 - (index / 3) as i32;
        (di, dj)
    }

    fn walkable(&self, di: i32, dj: i32) -> bool {
        self.map.is_walkable(TileCoord::new(
            self.coord.i + di,
            self.coord.j + dj,
            self.coord.k,
        ))
    }
}

impl<'a> PathNode for TileNode<'a> {
    type Id = String;

    fn id(&self) -> String {
        format!("{} {} {}", self.coord.i, self.coord.j, self.coord.k)
    }

    fn heuristic(&self) -> f64 {
        let di = f64::from((self.target.0 - self.coord.i).abs());
        let dj = f64::from((self.target.1 - self.coord.j).abs());
        let (low, high) = if di < dj { (di, dj) } else { (dj, di) };
        SQRT_2 * low + (high - low)
    }

    fn neighbor_slots(&self) -> usize {
        9
    }

    fn neighbor(&self, index: usize) -> Option<Self> {
        if index == 4 || index >= 9 {
            return None;
        }
        let (di, dj) = Self::slot_offset(index);
        if !self.walkable(di, dj) {
            return None;
        }
        if di != 0 && dj != 0 && !(self.walkable(di, 0) && self.walkable(0, dj)) {
            return None;
        }
        Some(Self {
            coord: TileCoord::new(self.coord.i + di, self.coord.j + dj, self.coord.k),
            ..*self
        })
    }

    fn distance(&self, index: usize) -> f64 {
        if index % 2 == 1 {
            1.0
        } else {
            SQRT_2
        }
    }
}
