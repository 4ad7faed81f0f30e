mod common;

use chrono::{DateTime, Utc};
use common::{stac_item, write_collection, write_wtr, Tile};
use netcdf::open;
use opera_cube::prelude::*;
use opera_cube::{assemble, filter_by_cloud_cover, mosaic, write_cube_to_netcdf, CloudFallback};
use tempfile::tempdir;

fn local_store() -> GeoTiffStore {
    let config = StoreConfig {
        use_netrc: false,
        ..StoreConfig::default()
    };
    GeoTiffStore::new(config).expect("Failed to build store")
}

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().expect("valid timestamp")
}

#[test]
fn test_tabulate_assemble_and_export() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    // Same T21HUC grid, two overpasses on one day
    let early = Tile::new(500_000.0, 6_200_000.0, 4, 3, (0..12).collect()).epsg(32721);
    let late = Tile::new(500_000.0, 6_200_000.0, 4, 3, (100..112).collect()).epsg(32721);
    let early_path = write_wtr(dir, "T21HUC", "20240301T134411Z", &early);
    let late_path = write_wtr(dir, "T21HUC", "20240301T141005Z", &late);
    let bwtr_path = dir.join("unused_B02_BWTR.tif");

    // Items listed latest first; tabulation keeps order, the caller sorts
    let items = vec![
        stac_item(
            "late",
            "2024-03-01T14:10:05Z",
            &[("0_B01_WTR", &late_path), ("0_B02_BWTR", &bwtr_path)],
            Some(5.0),
        ),
        stac_item("early", "2024-03-01T13:44:11Z", &[("0_B01_WTR", &early_path)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let results = catalog.search(&SearchRequest::new()).expect("search");

    let table = GranuleTable::from_search(&results, "B01_WTR").expect("tabulate");
    assert_eq!(table.len(), 2);
    assert_eq!(table.records()[0].tile_id, "T21HUC");
    assert_eq!(table.records()[0].time, utc("2024-03-01T14:10:05Z"));

    let table = table.sorted_by_time().for_tile("T21HUC");
    let cube = assemble(&table, &local_store(), &ParallelConfig::with_threads(2)).expect("assemble");

    assert_eq!(
        cube.time,
        vec![utc("2024-03-01T13:44:11Z"), utc("2024-03-01T14:10:05Z")]
    );
    assert_eq!(cube.shape(), &[2, 1, 3, 4]);
    assert_eq!(cube.crs, Crs::Projected(32721));
    assert_eq!(cube.x, vec![500_000.0, 500_030.0, 500_060.0, 500_090.0]);
    assert_eq!(cube.y, vec![6_200_000.0, 6_199_970.0, 6_199_940.0]);
    assert_eq!(cube.data[[0, 0, 1, 2]], 6.0);
    assert_eq!(cube.data[[1, 0, 2, 3]], 111.0);
    assert_eq!(cube.nodata, Some(255.0));

    // Every coordinate pair maps back to its own pixel
    for (row, &y) in cube.y.iter().enumerate() {
        for (col, &x) in cube.x.iter().enumerate() {
            assert_eq!(cube.pixel_of(x, y), Some((row, col)));
        }
    }

    let nc_path = dir.join("cube.nc");
    write_cube_to_netcdf(&cube, &nc_path).expect("write NetCDF");

    let file = open(&nc_path).expect("Failed to open NetCDF file");
    let times: Vec<i64> = file
        .variable("time")
        .expect("time variable")
        .get_values::<i64, _>(..)
        .expect("read time");
    assert_eq!(times, vec![1_709_300_651, 1_709_302_205]);

    let xs: Vec<f64> = file
        .variable("x")
        .expect("x variable")
        .get_values::<f64, _>(..)
        .expect("read x");
    assert_eq!(xs, cube.x);

    let var = file.variable(&cube.name).expect("data variable");
    let dims: Vec<String> = var.dimensions().iter().map(|d| d.name().to_string()).collect();
    assert_eq!(dims, vec!["time", "band", "y", "x"]);
    let values: Vec<f32> = var.get_values::<f32, _>(..).expect("read data");
    assert_eq!(values.len(), 24);
    assert_eq!(values[23], 111.0);
    assert!(file.attribute("history").is_some());
}

#[test]
fn test_mosaic_of_adjacent_tiles() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    let west = Tile::new(300_000.0, 3_800_060.0, 2, 2, vec![1, 2, 3, 4]);
    let east = Tile::new(300_060.0, 3_800_060.0, 2, 2, vec![5, 6, 7, 8]);
    let west_path = write_wtr(dir, "T11SQA", "20240301T182001Z", &west);
    let east_path = write_wtr(dir, "T11SRA", "20240301T182005Z", &east);

    let items = vec![
        stac_item("west", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &west_path)], None),
        stac_item("east", "2024-03-01T18:20:05Z", &[("0_B01_WTR", &east_path)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let results = catalog.search(&SearchRequest::new()).expect("search");
    let table = GranuleTable::from_search(&results, "B01_WTR").expect("tabulate");
    assert_eq!(table.tiles().len(), 2);

    let store = local_store();
    let cube = mosaic(&table, &store, &ParallelConfig::sequential(), &MosaicOptions::default())
        .expect("mosaic");

    assert_eq!(cube.shape(), &[1, 1, 2, 4]);
    assert_eq!(cube.time, vec![utc("2024-03-01T18:20:01Z")]);
    let bounds = cube.bounds();
    assert_eq!(bounds.min_x, 300_000.0);
    assert_eq!(bounds.max_x, 300_120.0);
    assert_eq!(bounds.min_y, 3_800_000.0);
    assert_eq!(bounds.max_y, 3_800_060.0);
    assert_eq!(cube.valid_count(), 8);
    assert_eq!(
        cube.data.iter().copied().collect::<Vec<_>>(),
        vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]
    );

    // The written GeoTIFF reads back onto the same grid
    let tif_path = dir.join("mosaic.tif");
    cube.write_geotiff(&tif_path).expect("write GeoTIFF");
    let frame = store
        .open(tif_path.to_str().expect("utf-8 path"))
        .expect("reopen mosaic");
    assert_eq!(frame.transform, cube.transform);
    assert_eq!(frame.crs, Crs::Projected(32611));
    assert_eq!(frame.data, cube.at_time(0));
    assert_eq!(frame.nodata, Some(255.0));
}

#[test]
fn test_mosaic_rejects_mixed_crs() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    let a = write_wtr(dir, "T11SQA", "20240301T182001Z", &Tile::new(0.0, 60.0, 2, 2, vec![1; 4]));
    let b = write_wtr(
        dir,
        "T12SQA",
        "20240301T182001Z",
        &Tile::new(60.0, 60.0, 2, 2, vec![1; 4]).epsg(32612),
    );
    let items = vec![
        stac_item("a", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &a)], None),
        stac_item("b", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &b)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let table = GranuleTable::from_search(catalog.items(), "B01_WTR").expect("tabulate");

    let err = mosaic(&table, &local_store(), &ParallelConfig::default(), &MosaicOptions::default())
        .unwrap_err();
    match err {
        OperaError::CrsMismatch { location, found, .. } => {
            assert!(location.contains("T12SQA"));
            assert_eq!(found, "EPSG:32612");
        }
        other => panic!("expected CrsMismatch, got {other:?}"),
    }
}

#[test]
fn test_mosaic_rejects_separate_acquisitions() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    let tile = Tile::new(0.0, 60.0, 2, 2, vec![1; 4]);
    let a = write_wtr(dir, "T11SQA", "20240301T182001Z", &tile);
    let b = write_wtr(dir, "T11SRA", "20240303T182001Z", &tile);
    let items = vec![
        stac_item("a", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &a)], None),
        stac_item("b", "2024-03-03T18:20:01Z", &[("0_B01_WTR", &b)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let table = GranuleTable::from_search(catalog.items(), "B01_WTR").expect("tabulate");

    let result = mosaic(&table, &local_store(), &ParallelConfig::default(), &MosaicOptions::default());
    assert!(matches!(result, Err(OperaError::MixedAcquisitions { .. })));

    // Restricting to one day leaves a single granule, which mosaics cleanly
    let one_day = table.on_date(utc("2024-03-01T00:00:00Z").date_naive());
    let cube = mosaic(&one_day, &local_store(), &ParallelConfig::default(), &MosaicOptions::default())
        .expect("mosaic one day");
    assert_eq!(cube.shape(), &[1, 1, 2, 2]);
}

#[test]
fn test_assembly_aborts_on_unreadable_granule() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    let present = write_wtr(dir, "T11SQA", "20240301T182001Z", &Tile::new(0.0, 60.0, 2, 2, vec![1; 4]));
    let missing = dir.join(common::dswx_name("T11SQA", "20240311T182001Z", "B01_WTR"));
    let items = vec![
        stac_item("a", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &present)], None),
        stac_item("b", "2024-03-11T18:20:01Z", &[("0_B01_WTR", &missing)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let table = GranuleTable::from_search(catalog.items(), "B01_WTR").expect("tabulate");

    let err = assemble(&table, &local_store(), &ParallelConfig::sequential()).unwrap_err();
    assert!(matches!(err, OperaError::IoError(_)));
    assert!(err.to_string().contains("20240311T182001Z"));
}

#[test]
fn test_assembly_rejects_shifted_grid() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    let a = write_wtr(dir, "T11SQA", "20240301T182001Z", &Tile::new(0.0, 60.0, 2, 2, vec![1; 4]));
    let b = write_wtr(dir, "T11SQA", "20240311T182001Z", &Tile::new(30.0, 60.0, 2, 2, vec![1; 4]));
    let items = vec![
        stac_item("a", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &a)], None),
        stac_item("b", "2024-03-11T18:20:01Z", &[("0_B01_WTR", &b)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");
    let table = GranuleTable::from_search(catalog.items(), "B01_WTR").expect("tabulate");

    let err = assemble(&table, &local_store(), &ParallelConfig::default()).unwrap_err();
    match err {
        OperaError::GridMismatch { location, .. } => assert_eq!(location, b.to_string_lossy()),
        other => panic!("expected GridMismatch, got {other:?}"),
    }
}

#[test]
fn test_cloud_filter_reads_fallback_layer() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();

    // One of four pixels is cloud (253): 25 percent
    let partly = write_wtr(dir, "T11SQA", "20240305T182001Z", &Tile::new(0.0, 60.0, 2, 2, vec![0, 1, 253, 0]));
    let clear = dir.join(common::dswx_name("T11SQA", "20240301T182001Z", "B01_WTR"));
    let cloudy = dir.join(common::dswx_name("T11SQA", "20240303T182001Z", "B01_WTR"));
    let bwtr = dir.join(common::dswx_name("T11SQA", "20240307T182001Z", "B02_BWTR"));

    let items = vec![
        stac_item("clear", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &clear)], Some(10.0)),
        stac_item("cloudy", "2024-03-03T18:20:01Z", &[("0_B01_WTR", &cloudy)], Some(80.0)),
        stac_item("partly", "2024-03-05T18:20:01Z", &[("0_B01_WTR", &partly)], None),
        stac_item("no-wtr", "2024-03-07T18:20:01Z", &[("0_B02_BWTR", &bwtr)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");

    let kept = filter_by_cloud_cover(catalog.items(), 30.0, &local_store(), &CloudFallback::default())
        .expect("filter");
    let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["clear", "partly"]);

    let strict = filter_by_cloud_cover(catalog.items(), 20.0, &local_store(), &CloudFallback::default())
        .expect("filter");
    assert_eq!(strict.len(), 1);
}

#[test]
fn test_search_request_narrows_results() {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let dir = temp_dir.path();
    let path = dir.join(common::dswx_name("T11SQA", "20240301T182001Z", "B01_WTR"));

    let items = vec![
        stac_item("march", "2024-03-01T18:20:01Z", &[("0_B01_WTR", &path)], None),
        stac_item("april", "2024-04-01T18:20:01Z", &[("0_B01_WTR", &path)], None),
    ];
    let catalog = ItemCollection::from_path(write_collection(dir, items)).expect("load items");

    let request = SearchRequest::new()
        .bbox([-116.5, 33.5, -115.0, 35.0])
        .datetime_range(Some(utc("2024-03-01T00:00:00Z")), Some(utc("2024-03-31T23:59:59Z")))
        .collection("OPERA_L3_DSWX-HLS_V1");
    let hits = catalog.search(&request).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "march");

    let elsewhere = SearchRequest::new().bbox([10.0, 10.0, 11.0, 11.0]);
    assert!(catalog.search(&elsewhere).expect("search").is_empty());
}
