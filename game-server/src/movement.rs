//! The per-tick movement step for beings.

use common::defines::TICK_MS;

use crate::entity::{Action, Entity, EntityKind};
use crate::map::grid::{BlockType, MapGrid};
use crate::point::Point;

/// Path-cost bound for ordinary travel, in tiles of straight cost.
const TRAVEL_MAX_COST: i32 = 80;

/// The block type an entity occupies on the grid, if any.
pub fn block_type(entity: &Entity) -> Option<BlockType> {
    match entity.kind {
        EntityKind::Item(_) => None,
        EntityKind::Character(_) => Some(BlockType::Character),
        EntityKind::Monster(_) | EntityKind::Npc(_) => Some(BlockType::Monster),
    }
}

/// Moves an entity to `pos`, keeping the block map in step when the tile
/// changes.
pub fn set_position(entity: &mut Entity, grid: &mut MapGrid, pos: Point) {
    if let Some(kind) = block_type(entity) {
        let old_tile = entity.pos.tile();
        let new_tile = pos.tile();
        if old_tile != new_tile {
            grid.free_tile(old_tile, kind);
            grid.block_tile(new_tile, kind);
        }
    }
    entity.pos = pos;
}

/// One movement tick. Follows the residual action-time discipline: motion
/// inside a tile is not observable, a tick consumes path nodes until 100 ms
/// of travel is accounted for, and the final node snaps to the exact
/// destination pixel.
pub fn move_tick(entity: &mut Entity, grid: &mut MapGrid) {
    if entity.being().is_none() {
        return;
    }
    let old_pos = entity.pos;
    let being = entity.being_mut().unwrap();
    being.old_pos = old_pos;

    if being.is_dead() {
        return;
    }
    // Attacks own the residual while they run.
    if being.action == Action::Attack {
        return;
    }
    if being.action_time > TICK_MS {
        being.action_time -= TICK_MS;
        return;
    }

    let src_tile = entity.pos.tile();
    let (dst, mask, speed) = {
        let b = entity.being().unwrap();
        (b.dst, b.walk_mask, b.speed)
    };
    let dst_tile = dst.tile();

    if src_tile == dst_tile {
        // Moving while staying on the same tile is free.
        set_position(entity, grid, dst);
        if let Some(b) = entity.being_mut() {
            b.action_time = 0;
        }
        settle_action(entity);
        return;
    }

    // Re-validate the cached path against current walkability; one blocked
    // node discards the whole cache.
    {
        let b = entity.being_mut().unwrap();
        if b.path.iter().any(|&node| !grid.get_walk(node, mask)) {
            b.path.clear();
        }
    }

    if entity.being().unwrap().path.is_empty() {
        let path = grid.find_path(src_tile, dst_tile, mask, TRAVEL_MAX_COST);
        entity.being_mut().unwrap().path = path.into();
    }

    if entity.being().unwrap().path.is_empty() {
        // No path: stay in place.
        entity.clear_destination();
        settle_action(entity);
        return;
    }

    let mut pos = entity.pos;
    let mut prev = src_tile;
    let mut action_time = entity.being().unwrap().action_time;
    loop {
        let b = entity.being_mut().unwrap();
        let Some(next) = b.path.pop_front() else {
            break;
        };
        let diagonal = prev.x != next.x && prev.y != next.y;
        // 362 / 256 approximates the diagonal factor.
        action_time += if diagonal { speed * 362 / 256 } else { speed };
        if b.path.is_empty() {
            // Skip the last tile center: snap to the exact destination.
            pos = dst;
            break;
        }
        pos = next.center();
        prev = next;
        if action_time >= TICK_MS {
            break;
        }
    }

    set_position(entity, grid, pos);
    let b = entity.being_mut().unwrap();
    b.action_time = action_time.saturating_sub(TICK_MS);
    settle_action(entity);
}

/// Walk/stand transition; other actions are left alone.
fn settle_action(entity: &mut Entity) {
    let (pos, dst) = (entity.pos, entity.being().map(|b| b.dst).unwrap_or(entity.pos));
    if let Some(b) = entity.being_mut() {
        if b.action == Action::Walk || b.action == Action::Stand {
            b.action = if b.action_time > 0 || pos != dst {
                Action::Walk
            } else {
                Action::Stand
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Being, EntityKind, Npc, UpdateFlags};
    use crate::map::grid::{BlockMask, MapGrid};
    use crate::point::TilePos;

    fn walker(pos: Point, speed: u32) -> Entity {
        let mut being = Being::new(BlockMask::WALL);
        being.speed = speed;
        being.dst = pos;
        Entity {
            map_id: 1,
            pos,
            flags: UpdateFlags::empty(),
            kind: EntityKind::Npc(Npc {
                being,
                npc_id: 1,
                name: "walker".into(),
                script_function: None,
            }),
        }
    }

    #[test]
    fn one_tile_per_tick_at_matching_speed() {
        let mut grid = MapGrid::new(32, 32);
        let start = TilePos::new(10, 10).center();
        let mut e = walker(start, 100);
        grid.block_tile(start.tile(), BlockType::Monster);
        let dest = Point::new(16 * 32 + 16, 10 * 32 + 16);
        e.set_destination(dest);

        for tick in 1..=6 {
            move_tick(&mut e, &mut grid);
            let expected_tile = 10 + tick;
            assert_eq!(
                e.pos.tile(),
                TilePos::new(expected_tile, 10),
                "tick {}",
                tick
            );
            let action = e.being().unwrap().action;
            if tick < 6 {
                assert_eq!(action, Action::Walk, "tick {}", tick);
            } else {
                assert_eq!(e.pos, dest);
                assert_eq!(action, Action::Stand);
            }
        }
    }

    #[test]
    fn same_tile_move_is_free() {
        let mut grid = MapGrid::new(8, 8);
        let start = Point::new(100, 100);
        let mut e = walker(start, 100);
        grid.block_tile(start.tile(), BlockType::Monster);
        e.set_destination(Point::new(110, 105));
        move_tick(&mut e, &mut grid);
        assert_eq!(e.pos, Point::new(110, 105));
        assert_eq!(e.being().unwrap().action_time, 0);
    }

    #[test]
    fn unreachable_destination_resets_to_source() {
        let mut grid = MapGrid::new(8, 8);
        for y in 0..8 {
            grid.set_perm_walkable(TilePos::new(4, y), false);
        }
        let start = TilePos::new(1, 1).center();
        let mut e = walker(start, 100);
        grid.block_tile(start.tile(), BlockType::Monster);
        e.set_destination(TilePos::new(6, 1).center());
        move_tick(&mut e, &mut grid);
        assert_eq!(e.pos, start);
        assert_eq!(e.being().unwrap().dst, start);
        assert_eq!(e.being().unwrap().action, Action::Stand);
    }

    #[test]
    fn blocked_cache_forces_recompute() {
        let mut grid = MapGrid::new(16, 16);
        let start = TilePos::new(1, 1).center();
        let mut e = walker(start, 100);
        grid.block_tile(start.tile(), BlockType::Monster);
        e.set_destination(TilePos::new(6, 1).center());
        move_tick(&mut e, &mut grid);
        // A wall drops onto the remaining path.
        let cached: Vec<_> = e.being().unwrap().path.iter().copied().collect();
        assert!(!cached.is_empty());
        grid.set_perm_walkable(cached[0], false);
        move_tick(&mut e, &mut grid);
        // Still progressing: the path was recomputed around the wall.
        assert!(e.being().unwrap().path.iter().all(|&n| grid.is_perm_walkable(n)));
    }

    #[test]
    fn slow_movers_wait_out_their_residual() {
        let mut grid = MapGrid::new(32, 32);
        let start = TilePos::new(5, 5).center();
        let mut e = walker(start, 300);
        grid.block_tile(start.tile(), BlockType::Monster);
        e.set_destination(TilePos::new(8, 5).center());

        move_tick(&mut e, &mut grid);
        let after_first = e.pos;
        assert_eq!(after_first.tile(), TilePos::new(6, 5));
        // One tick of pure residual burn-down (300 -> 200 -> 100).
        move_tick(&mut e, &mut grid);
        assert_eq!(e.pos, after_first);
        // Residual at 100 admits the next step.
        move_tick(&mut e, &mut grid);
        assert_eq!(e.pos.tile(), TilePos::new(7, 5));
        // And burns down again.
        move_tick(&mut e, &mut grid);
        assert_eq!(e.pos.tile(), TilePos::new(7, 5));
    }
}
