use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn covers(tiles: &[TilePlacement], points: &[(f64, f64)], tile_size: f64) -> bool {
    let half = tile_size / 2.0;
    points.iter().all(|&(x, y)| {
        tiles.iter().any(|t| {
            (x - t.x).abs() <= half + 1e-9 && (y - t.y).abs() <= half + 1e-9
        })
    })
}

/// Repeatedly picks the grid anchor covering the most uncovered points.
fn greedy_cover(points: &[(f64, f64)], tile_size: f64, subdivisions: usize) -> usize {
    let grid = AnchorGrid::new(points, tile_size, subdivisions);
    let mut uncovered: Vec<bool> = vec![true; points.len()];
    let mut picked = 0;

    while uncovered.iter().any(|&u| u) {
        let mut best = (0, (0, 0));
        for col in 0..grid.cols {
            for row in 0..grid.rows {
                let count = points
                    .iter()
                    .zip(&uncovered)
                    .filter(|&(p, &u)| u && grid.covering_anchors(*p).contains(&(col, row)))
                    .count();
                if count > best.0 {
                    best = (count, (col, row));
                }
            }
        }
        for (point, flag) in points.iter().zip(uncovered.iter_mut()) {
            if grid.covering_anchors(*point).contains(&best.1) {
                *flag = false;
            }
        }
        picked += 1;
    }
    picked
}

#[test]
fn single_point_gets_one_tile() {
    let tiles = TileCoverSolver::default()
        .solve(&[(120.0, -40.0)], 100.0, 0.0)
        .unwrap();
    assert_eq!(tiles.len(), 1);
    assert!(covers(&tiles, &[(120.0, -40.0)], 100.0));
}

#[test]
fn distant_points_get_one_tile_each() {
    let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64 * 1000.0, i as f64 * 500.0)).collect();
    let tiles = TileCoverSolver::default().solve(&points, 100.0, 5.0).unwrap();
    assert_eq!(tiles.len(), points.len());
}

#[test]
fn no_points_gives_a_tile_at_the_origin() {
    let tiles = TileCoverSolver::default().solve(&[], 100.0, 10.0).unwrap();
    assert_eq!(tiles, vec![TilePlacement { x: 0.0, y: 0.0 }]);
}

#[test]
fn nearby_points_share_a_tile() {
    let points = [(10.0, 10.0), (40.0, 70.0), (90.0, 30.0)];
    let tiles = TileCoverSolver::default().solve(&points, 100.0, 0.0).unwrap();
    assert_eq!(tiles.len(), 1);
    assert!(covers(&tiles, &points, 100.0));
}

#[test]
fn centres_account_for_padding() {
    // The smallest point sits on an anchor, so the tile centre is half a tile
    // past it whatever the padding.
    let tiles = TileCoverSolver::default().solve(&[(0.0, 0.0)], 90.0, 5.0).unwrap();
    assert_eq!(tiles.len(), 1);
    assert!((tiles[0].x - 45.0).abs() < 1e-9);
    assert!((tiles[0].y - 45.0).abs() < 1e-9);
}

#[test]
fn exact_cover_beats_greedy() {
    // Tiles of 2 on a grid of step 1. The anchor at 1 holds the most points,
    // but the two tiles at 0 and 2 cover everything.
    let points: Vec<(f64, f64)> = [0.0, 1.2, 1.4, 2.2, 2.4, 3.5]
        .iter()
        .map(|&x| (x, 0.0))
        .collect();
    let solver = TileCoverSolver::new(2);

    let tiles = solver.solve(&points, 2.0, 0.0).unwrap();
    assert_eq!(tiles.len(), 2);
    assert!(covers(&tiles, &points, 2.0));
    assert_eq!(greedy_cover(&points, 2.0, 2), 3);
}

#[test]
fn never_worse_than_greedy_on_random_points() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..5 {
        let points: Vec<(f64, f64)> = (0..25)
            .map(|_| (rng.random_range(0.0..600.0), rng.random_range(0.0..600.0)))
            .collect();
        let tiles = TileCoverSolver::default().solve(&points, 100.0, 0.0).unwrap();
        assert!(covers(&tiles, &points, 100.0));
        assert!(tiles.len() <= greedy_cover(&points, 100.0, 1));
    }
}

#[test]
fn finer_grid_merges_straddling_clusters() {
    let points = [(0.0, 0.0), (1.5, 0.8), (1.5, 1.2)];
    let coarse = TileCoverSolver::new(1).solve(&points, 1.0, 0.0).unwrap();
    let fine = TileCoverSolver::new(2).solve(&points, 1.0, 0.0).unwrap();
    assert_eq!(coarse.len(), 3);
    assert_eq!(fine.len(), 2);
    assert!(covers(&fine, &points, 1.0));
}

#[test]
fn rejects_non_positive_tile_size() {
    let err = TileCoverSolver::default().solve(&[(0.0, 0.0)], 0.0, 0.0).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

/// Imaging tile sizes as the interpreter derives them: field of view minus
/// twice a border, for common camera pixel sizes.
fn non_dyadic_tiles() -> Vec<f64> {
    [0.065, 0.072, 0.108, 0.11315]
        .iter()
        .map(|ps| 291.0 * ps * 4.0 - 2.0)
        .collect()
}

#[test]
fn single_point_gets_one_tile_for_any_tile_size() {
    let mut rng = StdRng::seed_from_u64(7);
    for tile in non_dyadic_tiles() {
        for _ in 0..500 {
            let point = (
                rng.random_range(-20_000.0..20_000.0),
                rng.random_range(-20_000.0..20_000.0),
            );
            let tiles = TileCoverSolver::default()
                .solve(&[point], tile, 1.0)
                .unwrap_or_else(|err| panic!("{point:?} with tile {tile}: {err}"));
            assert_eq!(tiles.len(), 1);
            assert!(covers(&tiles, &[point], tile));
        }
    }
}

#[test]
fn far_points_get_one_tile_each_for_any_tile_size() {
    let mut rng = StdRng::seed_from_u64(13);
    for tile in non_dyadic_tiles() {
        let points: Vec<(f64, f64)> = (0..6)
            .map(|i| {
                (
                    i as f64 * 3.0 * tile + rng.random_range(0.0..tile),
                    -(i as f64) * 5.0 * tile + rng.random_range(0.0..tile),
                )
            })
            .collect();
        let tiles = TileCoverSolver::default().solve(&points, tile, 1.0).unwrap();
        assert_eq!(tiles.len(), points.len());
        assert!(covers(&tiles, &points, tile));
    }
}

#[test]
fn points_a_whole_tile_apart_are_covered() {
    let mut rng = StdRng::seed_from_u64(17);
    for tile in non_dyadic_tiles() {
        for subdivisions in [1, 2, 3] {
            let (x0, y0) = (
                rng.random_range(-20_000.0..20_000.0),
                rng.random_range(-20_000.0..20_000.0),
            );
            let points: Vec<(f64, f64)> = (0..4)
                .map(|k| (x0 + k as f64 * tile, y0 + k as f64 * tile))
                .collect();
            let tiles = TileCoverSolver::new(subdivisions)
                .solve(&points, tile, 1.0)
                .unwrap();
            assert!(tiles.len() <= points.len());
            assert!(covers(&tiles, &points, tile));
        }
    }
}

#[test]
fn random_clusters_are_covered_for_any_tile_size() {
    let mut rng = StdRng::seed_from_u64(19);
    for tile in non_dyadic_tiles() {
        let points: Vec<(f64, f64)> = (0..25)
            .map(|_| {
                (
                    rng.random_range(-4.0 * tile..4.0 * tile),
                    rng.random_range(-4.0 * tile..4.0 * tile),
                )
            })
            .collect();
        for subdivisions in [1, 2] {
            let tiles = TileCoverSolver::new(subdivisions)
                .solve(&points, tile, 1.0)
                .unwrap();
            assert!(!tiles.is_empty() && tiles.len() <= points.len());
            assert!(covers(&tiles, &points, tile));
        }
    }
}
