// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

use proptest::prelude::*;
use rustc_hash::FxHashSet;
use sector_core::constants::GRID_SIZE;
use sector_core::geometry::{
    adjacent_tiles, edge_segment_for_tiles, edge_slots, in_bounds, los_clear, passable_step,
};
use sector_core::{Tile, WallEdge};

fn tile_strategy() -> impl Strategy<Value = Tile> {
    (0..GRID_SIZE, 0..GRID_SIZE).prop_map(|(x, y)| Tile::new(x, y))
}

/// An orthogonally-adjacent pair fully inside the grid.
fn edge_pair_strategy() -> impl Strategy<Value = (Tile, Tile)> {
    (0..GRID_SIZE - 1, 0..GRID_SIZE - 1, any::<bool>()).prop_map(|(x, y, horizontal)| {
        let a = Tile::new(x, y);
        let b = if horizontal {
            Tile::new(x + 1, y)
        } else {
            Tile::new(x, y + 1)
        };
        (a, b)
    })
}

proptest! {
    /// Canonical form is independent of argument order.
    #[test]
    fn canonical_edge_is_order_independent((a, b) in edge_pair_strategy()) {
        prop_assert_eq!(WallEdge::new(a, b), WallEdge::new(b, a));
    }

    /// The boundary segment of an edge is the expected axis-aligned unit
    /// segment between the two tile squares.
    #[test]
    fn edge_segment_is_a_unit_segment_on_the_shared_boundary((a, b) in edge_pair_strategy()) {
        let ((x1, y1), (x2, y2)) = edge_segment_for_tiles(a, b);
        let len = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
        prop_assert!((len - 1.0).abs() < 1e-9);
        // Axis-aligned: one coordinate fixed on the shared boundary line.
        prop_assert!((x1 - x2).abs() < 1e-9 || (y1 - y2).abs() < 1e-9);
    }

    /// Without walls, every interior tile has eight exits and edge tiles
    /// proportionally fewer; all neighbours stay in bounds.
    #[test]
    fn open_grid_adjacency_is_bounded_and_in_bounds(tile in tile_strategy()) {
        let walls = FxHashSet::default();
        let neighbors = adjacent_tiles(tile, &walls);
        prop_assert!(neighbors.len() <= 8);
        prop_assert!(neighbors.iter().all(|&n| in_bounds(n)));
        prop_assert!(neighbors.iter().all(|&n| passable_step(tile, n, &walls)));
    }

    /// A single wall never blocks LOS between tiles on the other side of the
    /// grid axis it does not touch.
    #[test]
    fn passability_is_symmetric((a, b) in edge_pair_strategy(), (c, d) in edge_pair_strategy()) {
        let walls: FxHashSet<WallEdge> = [WallEdge::new(c, d)].into_iter().collect();
        prop_assert_eq!(passable_step(a, b, &walls), passable_step(b, a, &walls));
    }

    /// LOS is reflexive-free of walls along any clear row.
    #[test]
    fn open_rows_have_los(y in 0..GRID_SIZE, x1 in 0..GRID_SIZE, x2 in 0..GRID_SIZE) {
        let walls = FxHashSet::default();
        prop_assert!(los_clear(Tile::new(x1, y), Tile::new(x2, y), &walls));
    }
}

#[test]
fn edge_slots_are_canonical_and_unique() {
    let slots = edge_slots();
    let unique: FxHashSet<WallEdge> = slots.iter().copied().collect();
    assert_eq!(unique.len(), slots.len());
    for edge in slots {
        assert!(edge.a <= edge.b);
    }
}
