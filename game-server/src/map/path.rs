//! A* over tile centers.
//!
//! Step cost is 32 per cardinal move and 32 * 362 / 256 (≈ √2) per
//! diagonal. The heuristic is octile distance, which never overestimates
//! under those costs. Diagonal steps are only taken when both adjacent
//! cardinal tiles are passable, so paths never cut corners.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::grid::{BlockMask, MapGrid};
use crate::point::TilePos;

const BASE_COST: i32 = 32;
const DIAGONAL_COST: i32 = BASE_COST * 362 / 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    f_cost: i32,
    tile: TilePos,
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior.
        other
            .f_cost
            .cmp(&self.f_cost)
            .then_with(|| (other.tile.x, other.tile.y).cmp(&(self.tile.x, self.tile.y)))
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn octile(from: TilePos, to: TilePos) -> i32 {
    let dx = (from.x - to.x).abs();
    let dy = (from.y - to.y).abs();
    let (long, short) = if dx > dy { (dx, dy) } else { (dy, dx) };
    BASE_COST * (long - short) + DIAGONAL_COST * short
}

impl MapGrid {
    /// Finds a path from `from` to `to` for a mover with walk mask `mask`.
    ///
    /// Returns the ordered tile sequence ending at `to`, excluding the
    /// start tile, or an empty vector when no path of cost at most
    /// `max_cost * 32` exists. Callers treat an empty result as "stay in
    /// place".
    pub fn find_path(
        &mut self,
        from: TilePos,
        to: TilePos,
        mask: BlockMask,
        max_cost: i32,
    ) -> Vec<TilePos> {
        if !self.contains(from) || !self.contains(to) {
            return Vec::new();
        }
        if from == to {
            return Vec::new();
        }
        if !self.get_walk(to, mask) {
            return Vec::new();
        }

        let (open_mark, closed_mark) = self.begin_search();
        let cost_limit = max_cost * BASE_COST;
        let mut open = BinaryHeap::new();

        {
            let (g, f, parent, open_m, _) = self.scratch(from);
            *g = 0;
            *f = octile(from, to);
            *parent = None;
            *open_m = open_mark;
        }
        open.push(Location {
            f_cost: octile(from, to),
            tile: from,
        });

        while let Some(current) = open.pop() {
            let cur = current.tile;

            {
                let (_, f, _, _, closed) = self.scratch(cur);
                if *closed == closed_mark {
                    continue; // stale heap entry
                }
                if current.f_cost > *f {
                    continue;
                }
                *closed = closed_mark;
            }

            if cur == to {
                return self.walk_back(from, to);
            }

            let cur_g = {
                let (g, ..) = self.scratch(cur);
                *g
            };

            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let next = TilePos::new(cur.x + dx, cur.y + dy);
                    if !self.get_walk(next, mask) {
                        continue;
                    }
                    let diagonal = dx != 0 && dy != 0;
                    if diagonal
                        && (!self.get_walk(TilePos::new(cur.x + dx, cur.y), mask)
                            || !self.get_walk(TilePos::new(cur.x, cur.y + dy), mask))
                    {
                        continue;
                    }

                    let step = if diagonal { DIAGONAL_COST } else { BASE_COST };
                    let g_next = cur_g + step;
                    if g_next > cost_limit {
                        continue;
                    }

                    let f_next = g_next + octile(next, to);
                    let (g, f, parent, open_m, closed) = self.scratch(next);
                    if *closed == closed_mark {
                        continue;
                    }
                    if *open_m == open_mark && *g <= g_next {
                        continue;
                    }
                    *g = g_next;
                    *f = f_next;
                    *parent = Some(cur);
                    *open_m = open_mark;
                    open.push(Location {
                        f_cost: f_next,
                        tile: next,
                    });
                }
            }
        }

        Vec::new()
    }

    fn walk_back(&mut self, from: TilePos, to: TilePos) -> Vec<TilePos> {
        let mut path = Vec::new();
        let mut cur = to;
        while cur != from {
            path.push(cur);
            let (_, _, parent, _, _) = self.scratch(cur);
            match *parent {
                Some(p) => cur = p,
                None => return Vec::new(),
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::grid::BlockType;

    fn adjacent(a: TilePos, b: TilePos) -> bool {
        (a.x - b.x).abs() <= 1 && (a.y - b.y).abs() <= 1 && a != b
    }

    #[test]
    fn straight_line_on_open_terrain() {
        let mut grid = MapGrid::new(20, 20);
        let path = grid.find_path(
            TilePos::new(10, 10),
            TilePos::new(16, 10),
            BlockMask::WALL,
            50,
        );
        assert_eq!(path.len(), 6);
        assert_eq!(*path.last().unwrap(), TilePos::new(16, 10));
        let mut prev = TilePos::new(10, 10);
        for node in &path {
            assert!(adjacent(prev, *node));
            assert!(grid.is_perm_walkable(*node));
            prev = *node;
        }
    }

    #[test]
    fn routes_around_a_wall() {
        let mut grid = MapGrid::new(10, 10);
        // Vertical wall with a gap at y = 8.
        for y in 0..8 {
            grid.set_perm_walkable(TilePos::new(5, y), false);
        }
        let path = grid.find_path(TilePos::new(2, 2), TilePos::new(8, 2), BlockMask::WALL, 100);
        assert!(!path.is_empty());
        assert_eq!(*path.last().unwrap(), TilePos::new(8, 2));
        for node in &path {
            assert!(grid.is_perm_walkable(*node));
        }
        // The path must dip to the gap row.
        assert!(path.iter().any(|n| n.y >= 8));
    }

    #[test]
    fn no_path_through_a_closed_wall() {
        let mut grid = MapGrid::new(10, 10);
        for y in 0..10 {
            grid.set_perm_walkable(TilePos::new(5, y), false);
        }
        let path = grid.find_path(TilePos::new(2, 2), TilePos::new(8, 2), BlockMask::WALL, 100);
        assert!(path.is_empty());
    }

    #[test]
    fn diagonals_do_not_cut_corners() {
        let mut grid = MapGrid::new(5, 5);
        grid.set_perm_walkable(TilePos::new(1, 0), false);
        grid.set_perm_walkable(TilePos::new(0, 1), false);
        let path = grid.find_path(TilePos::new(0, 0), TilePos::new(1, 1), BlockMask::WALL, 50);
        assert!(path.is_empty());
    }

    #[test]
    fn cost_bound_abandons_long_detours() {
        let mut grid = MapGrid::new(30, 30);
        for y in 0..29 {
            grid.set_perm_walkable(TilePos::new(5, y), false);
        }
        // Reachable, but only via a detour longer than 6 steps.
        let short = grid.find_path(TilePos::new(4, 2), TilePos::new(6, 2), BlockMask::WALL, 6);
        assert!(short.is_empty());
        let long = grid.find_path(TilePos::new(4, 2), TilePos::new(6, 2), BlockMask::WALL, 100);
        assert!(!long.is_empty());
    }

    #[test]
    fn blockers_respected_per_mask() {
        let mut grid = MapGrid::new(5, 5);
        grid.block_tile(TilePos::new(2, 0), BlockType::Character);
        grid.set_perm_walkable(TilePos::new(2, 1), false);
        grid.set_perm_walkable(TilePos::new(2, 2), false);
        grid.set_perm_walkable(TilePos::new(2, 3), false);
        grid.set_perm_walkable(TilePos::new(2, 4), false);

        let ghost = grid.find_path(TilePos::new(0, 0), TilePos::new(4, 0), BlockMask::WALL, 50);
        assert!(!ghost.is_empty());

        let solid = grid.find_path(
            TilePos::new(0, 0),
            TilePos::new(4, 0),
            BlockMask::WALL | BlockMask::CHARACTER,
            50,
        );
        assert!(solid.is_empty());
    }

    #[test]
    fn shortest_path_prefers_diagonals() {
        let mut grid = MapGrid::new(10, 10);
        let path = grid.find_path(TilePos::new(0, 0), TilePos::new(4, 4), BlockMask::WALL, 50);
        // A pure diagonal run: 4 steps, not 8.
        assert_eq!(path.len(), 4);
    }
}
