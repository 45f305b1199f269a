//! The block-mapped tile grid: permanent walkability, per-kind occupancy
//! and the pathfinding scratch state.

use bitflags::bitflags;

use crate::point::TilePos;

bitflags! {
    /// Blocker kinds a mover treats as impassable. Walls are always part
    /// of a mover's mask; monsters and characters depend on the mover kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockMask: u8 {
        const WALL      = 0x01;
        const MONSTER   = 0x02;
        const CHARACTER = 0x04;
    }
}

/// What a mover counts as on the block map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Monster,
    Character,
}

/// Per-tile metadata. The `open`/`closed` marks are generation counters:
/// a search observes a clean slate by bumping the grid's generation instead
/// of clearing every tile.
#[derive(Debug, Clone, Default)]
struct MetaTile {
    perm_walkable: bool,
    monsters: u8,
    characters: u8,
    // A* scratch.
    g_cost: i32,
    f_cost: i32,
    parent: Option<TilePos>,
    open_mark: u32,
    closed_mark: u32,
}

/// A rectangular grid of metatiles.
pub struct MapGrid {
    width: i32,
    height: i32,
    tiles: Vec<MetaTile>,
    generation: u32,
}

impl MapGrid {
    /// Creates a grid with every tile walkable.
    pub fn new(width: i32, height: i32) -> MapGrid {
        let mut tiles = vec![MetaTile::default(); (width * height) as usize];
        for t in tiles.iter_mut() {
            t.perm_walkable = true;
        }
        MapGrid {
            width,
            height,
            tiles,
            generation: 0,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn contains(&self, t: TilePos) -> bool {
        t.x >= 0 && t.x < self.width && t.y >= 0 && t.y < self.height
    }

    fn index(&self, t: TilePos) -> usize {
        (t.x + t.y * self.width) as usize
    }

    pub fn set_perm_walkable(&mut self, t: TilePos, walkable: bool) {
        if self.contains(t) {
            let idx = self.index(t);
            self.tiles[idx].perm_walkable = walkable;
        }
    }

    pub fn is_perm_walkable(&self, t: TilePos) -> bool {
        self.contains(t) && self.tiles[self.index(t)].perm_walkable
    }

    /// Registers a blocker standing on `t`.
    pub fn block_tile(&mut self, t: TilePos, kind: BlockType) {
        if !self.contains(t) {
            return;
        }
        let idx = self.index(t);
        let counter = match kind {
            BlockType::Monster => &mut self.tiles[idx].monsters,
            BlockType::Character => &mut self.tiles[idx].characters,
        };
        *counter = counter.saturating_add(1);
    }

    /// Releases a blocker from `t`. Underflow means the occupancy
    /// bookkeeping and the entity positions disagree, which is an
    /// unrecoverable simulation bug.
    pub fn free_tile(&mut self, t: TilePos, kind: BlockType) {
        if !self.contains(t) {
            return;
        }
        let idx = self.index(t);
        let counter = match kind {
            BlockType::Monster => &mut self.tiles[idx].monsters,
            BlockType::Character => &mut self.tiles[idx].characters,
        };
        assert!(*counter > 0, "freeing unblocked tile {:?}", t);
        *counter -= 1;
    }

    /// Tick-local walkability for a mover with the given mask.
    pub fn get_walk(&self, t: TilePos, mask: BlockMask) -> bool {
        if !self.contains(t) {
            return false;
        }
        let tile = &self.tiles[self.index(t)];
        if mask.contains(BlockMask::WALL) && !tile.perm_walkable {
            return false;
        }
        if mask.contains(BlockMask::MONSTER) && tile.monsters > 0 {
            return false;
        }
        if mask.contains(BlockMask::CHARACTER) && tile.characters > 0 {
            return false;
        }
        true
    }

    pub(super) fn begin_search(&mut self) -> (u32, u32) {
        // Two fresh marks per search; overflow just wraps into values that
        // no live tile carries.
        self.generation = self.generation.wrapping_add(2);
        (self.generation, self.generation.wrapping_add(1))
    }

    pub(super) fn scratch(
        &mut self,
        t: TilePos,
    ) -> (&mut i32, &mut i32, &mut Option<TilePos>, &mut u32, &mut u32) {
        let idx = self.index(t);
        let tile = &mut self.tiles[idx];
        (
            &mut tile.g_cost,
            &mut tile.f_cost,
            &mut tile.parent,
            &mut tile.open_mark,
            &mut tile.closed_mark,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupancy_counts_stack() {
        let mut grid = MapGrid::new(4, 4);
        let t = TilePos::new(1, 1);
        grid.block_tile(t, BlockType::Monster);
        grid.block_tile(t, BlockType::Monster);
        assert!(!grid.get_walk(t, BlockMask::WALL | BlockMask::MONSTER));
        assert!(grid.get_walk(t, BlockMask::WALL));
        grid.free_tile(t, BlockType::Monster);
        assert!(!grid.get_walk(t, BlockMask::WALL | BlockMask::MONSTER));
        grid.free_tile(t, BlockType::Monster);
        assert!(grid.get_walk(t, BlockMask::WALL | BlockMask::MONSTER));
    }

    #[test]
    fn walls_always_block() {
        let mut grid = MapGrid::new(4, 4);
        grid.set_perm_walkable(TilePos::new(2, 2), false);
        assert!(!grid.get_walk(TilePos::new(2, 2), BlockMask::WALL));
        assert!(!grid.get_walk(TilePos::new(-1, 0), BlockMask::WALL));
    }
}
