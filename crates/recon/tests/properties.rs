// Property tests for alignment and consensus.
// Run with: cargo test -p countyval-recon --test properties

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use countyval_recon::consensus::mode_or_median;
use countyval_recon::{align, reconcile, Cell, Grid, RegionKey};

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
}

/// Small integer counts so sources collide often.
fn arb_cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        1 => Just(None),
        4 => (0u32..6).prop_map(|v| Some(v as f64)),
    ]
}

/// `sources` grids over the same regions and `days` consecutive dates.
fn arb_grids(sources: usize, regions: usize, days: usize) -> impl Strategy<Value = Vec<Grid>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(arb_cell(), days), regions),
        sources,
    )
    .prop_map(move |tables| {
        tables
            .into_iter()
            .map(|rows| {
                let dates = (0..days as i64).map(|i| base() + Duration::days(i)).collect();
                let mut grid = Grid::new(dates).unwrap();
                for (i, cells) in rows.into_iter().enumerate() {
                    grid.insert_row(RegionKey::new(format!("County {i}"), "WA"), cells)
                        .unwrap();
                }
                grid
            })
            .collect()
    })
}

/// A source grid with scattered, unsorted report dates inside March 2020.
fn arb_source_grid() -> impl Strategy<Value = Grid> {
    (
        prop::collection::btree_set(0i64..20, 1..8),
        prop::collection::vec(prop::collection::vec(arb_cell(), 8), 1..4),
    )
        .prop_map(|(offsets, rows)| {
            let mut dates: Vec<NaiveDate> =
                offsets.into_iter().map(|o| base() + Duration::days(o)).collect();
            dates.reverse();
            let mut grid = Grid::new(dates.clone()).unwrap();
            for (i, mut cells) in rows.into_iter().enumerate() {
                cells.truncate(dates.len());
                cells.resize(dates.len(), None);
                grid.insert_row(RegionKey::new(format!("County {i}"), "WA"), cells)
                    .unwrap();
            }
            grid
        })
}

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn alignment_is_idempotent(grid in arb_source_grid(), span in 0i64..25) {
        let end = base() + Duration::days(span);
        let once = align(&grid, base(), Some(end)).unwrap();
        let twice = align(&once, base(), Some(end)).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn alignment_covers_every_day(grid in arb_source_grid(), span in 0i64..25) {
        let end = base() + Duration::days(span);
        let aligned = align(&grid, base(), Some(end)).unwrap();
        prop_assert_eq!(aligned.date_count() as i64, span + 1);
        for pair in aligned.dates().windows(2) {
            prop_assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
        prop_assert_eq!(aligned.region_count(), grid.region_count());
    }

    #[test]
    fn reconcile_keeps_shape(grids in (1usize..5).prop_flat_map(|n| arb_grids(n, 3, 4))) {
        let out = reconcile(&grids).unwrap();
        for grid in [&out.consensus, &out.validity] {
            prop_assert_eq!(grid.dates(), grids[0].dates());
            prop_assert!(grid.regions().eq(grids[0].regions()));
        }
    }

    #[test]
    fn validity_bounds_and_unknown_propagation(
        grids in (1usize..6).prop_flat_map(|n| arb_grids(n, 3, 4)),
    ) {
        let out = reconcile(&grids).unwrap();
        for (region, row) in out.validity.rows() {
            for (col, validity) in row.iter().enumerate() {
                let inputs: Vec<Cell> = grids.iter().map(|g| g.row(region).unwrap()[col]).collect();
                let consensus = out.consensus.row(region).unwrap()[col];
                if inputs.iter().any(|c| c.is_none()) {
                    prop_assert_eq!(*validity, None);
                    prop_assert_eq!(consensus, None);
                    continue;
                }
                let v = validity.unwrap();
                prop_assert!((0.0..=1.0).contains(&v));
                let unanimous = inputs.windows(2).all(|w| w[0] == w[1]);
                prop_assert_eq!(v == 1.0, unanimous);
            }
        }
    }

    #[test]
    fn mode_or_median_is_order_independent(
        mut values in prop::collection::vec((0u32..5).prop_map(|v| v as f64), 1..8),
    ) {
        let forward = mode_or_median(&values);
        values.reverse();
        prop_assert_eq!(forward, mode_or_median(&values));
    }
}
