//! End-to-end tests of the three operations.
//!
//! Every test builds a synthetic dataset in a temporary directory, runs an
//! operation through its public entry point and inspects what was written.
//!
//! Run with: `cargo test --test operations`

mod common;

use std::path::Path;

use serde_json::Value;

use midasflow::config::EngineConfig;
use midasflow::dataset::{read_node_values, NodeValues};
use midasflow::ops::{
    mefa, melfp, meshed, run_mefa, run_melfp, run_meshed, MefaOptions, MelfpOptions,
    MeshedOptions, COORDS_HEADER, HIERARCHY_FILE,
};
use midasflow::Status;

use common::{entries, grid_dataset, outlet, outlets_layer, read_layer, table_dataset, OutletSpec};

// ============================================================================
// Fixtures
// ============================================================================

/// Five nodes: a chain 4 → 3 → 2 → 1 with a branch 5 → 2.
fn five_node_chain(dir: &Path) {
    table_dataset(
        dir,
        &[
            (1, 0, 0.0, 0.0),
            (2, 1, 1.0, 0.0),
            (3, 2, 2.0, 0.0),
            (4, 3, 3.0, 0.0),
            (5, 2, 1.0, 1.0),
        ],
    );
}

/// Twelve nodes: a trunk 5 → 4 → 3 → 2 → 1 along y = 0, tributary A
/// (8 → 7 → 6) joining at 3, tributary B (11 → 10 → 9) joining at 5, and a
/// stub 12 joining at 5.
fn trunk_network(dir: &Path) {
    table_dataset(
        dir,
        &[
            (1, 0, 0.0, 0.0),
            (2, 1, 1.0, 0.0),
            (3, 2, 2.0, 0.0),
            (4, 3, 3.0, 0.0),
            (5, 4, 4.0, 0.0),
            (6, 3, 2.0, 1.0),
            (7, 6, 2.0, 2.0),
            (8, 7, 2.0, 3.0),
            (9, 5, 4.0, 1.0),
            (10, 9, 4.0, 2.0),
            (11, 10, 4.0, 3.0),
            (12, 5, 5.0, 0.0),
        ],
    );
}

/// Trunk outlet 10 at node 1, tributary outlets 20 at node 7 and 30 at node 9.
fn trunk_outlets(path: &Path) {
    outlets_layer(
        path,
        &[
            outlet(0.0, 0.0, 10),
            outlet(2.0, 2.0, 20),
            outlet(4.0, 1.0, 30),
        ],
    );
}

fn table_values<T: Copy>(values: NodeValues<T>) -> Vec<(i64, T)> {
    match values {
        NodeValues::Table(values) => values,
        NodeValues::Grid { .. } => panic!("expected table values"),
    }
}

fn engine() -> EngineConfig {
    EngineConfig::new().with_tracing_stack_size(4)
}

// ============================================================================
// mefa
// ============================================================================

#[test]
fn test_mefa_five_node_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("chain");
    five_node_chain(&input);
    let out = tmp.path().join("fac");

    let options = MefaOptions::new(&input)
        .with_accum_path(&out)
        .with_num_threads(3);
    let report = run_mefa(&options, &engine()).unwrap();
    assert_eq!(report.nodes, 5);
    assert_eq!(report.headwaters, 2);
    assert_eq!(report.max_accumulation, Some(5.0));
    assert_eq!(report.outputs, vec![out.clone()]);

    let values = table_values(read_node_values::<f64>(&out).unwrap());
    assert_eq!(
        values,
        vec![(1, 5.0), (2, 4.0), (3, 2.0), (4, 1.0), (5, 1.0)]
    );
}

#[test]
fn test_mefa_grid_compressed() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("fdr");
    // E E S
    // E E pit
    #[rustfmt::skip]
    grid_dataset(&input, 2, 3, 2, &[
        1, 1, 4,
        1, 1, 0,
    ]);
    let out = tmp.path().join("fac");

    let options = MefaOptions {
        compress_output: true,
        use_lessmem: true,
        ..MefaOptions::new(&input).with_accum_path(&out)
    };
    assert_eq!(mefa(&options, &engine()), 0);

    match read_node_values::<f64>(&out).unwrap() {
        NodeValues::Grid { shape, values } => {
            assert_eq!((shape.rows, shape.cols), (2, 3));
            assert_eq!(values, vec![1.0, 2.0, 3.0, 1.0, 2.0, 6.0]);
        }
        NodeValues::Table(_) => panic!("expected a grid"),
    }
}

#[test]
fn test_mefa_missing_dataset_is_input_error() {
    let tmp = tempfile::tempdir().unwrap();
    let options = MefaOptions::new(tmp.path().join("nowhere")).with_accum_path(tmp.path().join("fac"));
    assert_eq!(mefa(&options, &engine()), Status::InputError.code());
    assert!(entries(tmp.path()).is_empty());
}

// ============================================================================
// meshed
// ============================================================================

#[test]
fn test_meshed_shared_trunk() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    trunk_outlets(&outlets);
    let out = tmp.path().join("basins");

    let options = MeshedOptions::new(&input)
        .with_outlets(&outlets, Some("id"))
        .with_output_path(&out)
        .with_num_threads(4);
    let report = run_meshed(&options, &engine()).unwrap();
    assert_eq!(report.nodes, 12);
    assert_eq!(report.basins, 3);
    assert_eq!(report.roots, 1);
    assert_eq!(report.unassigned, 0);

    let basins = table_values(read_node_values::<u32>(&out).unwrap());
    let expected = [10, 10, 10, 10, 10, 10, 20, 20, 30, 30, 30, 10];
    let ids: Vec<i64> = (1..=12).collect();
    assert_eq!(
        basins,
        ids.into_iter().zip(expected).collect::<Vec<(i64, u32)>>()
    );

    let hierarchy = std::fs::read_to_string(out.join(HIERARCHY_FILE)).unwrap();
    assert_eq!(hierarchy, "id,down_id,nodes\n10,,7\n20,10,2\n30,10,3\n");

    let layer = read_layer(&out.join("basins.geojson"));
    let features = layer["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);
    assert_eq!(features[0]["properties"]["id"], 10);
    assert_eq!(features[1]["properties"]["down_id"], 10);
}

#[test]
fn test_meshed_grid_with_separate_hierarchy() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("fdr");
    // every cell drains east, the last column drains south to the pit
    #[rustfmt::skip]
    grid_dataset(&input, 3, 3, 2, &[
        1, 1, 4,
        1, 1, 4,
        1, 1, 0,
    ]);
    let outlets = tmp.path().join("outlets.geojson");
    // pit cell (2, 2) and cell (0, 2)
    outlets_layer(&outlets, &[outlet(2.5, -2.5, 1), outlet(2.5, -0.5, 2)]);
    let out = tmp.path().join("basins");
    let hier = tmp.path().join("tree.csv");

    let options = MeshedOptions {
        hier_path: Some(hier.clone()),
        save_outlets: true,
        ..MeshedOptions::new(&input)
            .with_outlets(&outlets, Some("id"))
            .with_output_path(&out)
    };
    assert_eq!(meshed(&options, &engine()), 0);

    match read_node_values::<u32>(&out).unwrap() {
        NodeValues::Grid { values, .. } => {
            assert_eq!(values, vec![2, 2, 2, 1, 1, 1, 1, 1, 1]);
        }
        NodeValues::Table(_) => panic!("expected a grid"),
    }
    assert_eq!(
        std::fs::read_to_string(&hier).unwrap(),
        "id,down_id,nodes\n1,,6\n2,1,3\n"
    );
    assert!(!out.join(HIERARCHY_FILE).exists());

    let saved = read_layer(&out.join("outlets.geojson"));
    assert_eq!(saved["features"].as_array().unwrap().len(), 2);
    assert_eq!(
        saved["features"][1]["geometry"]["coordinates"],
        serde_json::json!([2.5, -0.5])
    );
}

#[test]
fn test_meshed_skips_bad_outlets() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    outlets_layer(
        &outlets,
        &[
            outlet(0.0, 0.0, 10),
            // same node as the first outlet
            outlet(0.1, 0.0, 11),
            OutletSpec {
                x: 4.0,
                y: 1.0,
                id: Some(-3),
                oid: None,
            },
        ],
    );
    let options = MeshedOptions::new(&input)
        .with_outlets(&outlets, Some("id"))
        .with_output_path(tmp.path().join("basins"));
    let report = run_meshed(&options, &engine()).unwrap();
    assert_eq!(report.basins, 1);
    assert_eq!(report.outlets_read, 3);
    assert_eq!(report.diagnostics.rejected_outlets(), 2);
}

// ============================================================================
// melfp
// ============================================================================

fn lengths(layer: &Value) -> Vec<Value> {
    layer["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"]["length"].clone())
        .collect()
}

#[test]
fn test_melfp_full_and_length_only_agree() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    trunk_outlets(&outlets);

    let run = |find_full: bool, name: &str| {
        let out = tmp.path().join(name);
        let options = MelfpOptions {
            heads_name: Some("heads".to_string()),
            coors_path: Some(tmp.path().join(format!("{}.csv", name))),
            ..MelfpOptions::new(&input)
                .with_outlets(&outlets, Some("id"))
                .with_output_path(&out)
                .with_find_full(find_full)
        };
        let report = run_melfp(&options, &engine()).unwrap();
        assert_eq!(report.paths, 3);
        assert_eq!(report.flagged, 0);
        out
    };
    let full = run(true, "full");
    let short = run(false, "short");

    let full_layer = read_layer(&full.join("lfp.geojson"));
    let short_layer = read_layer(&short.join("lfp.geojson"));
    assert_eq!(lengths(&full_layer), lengths(&short_layer));
    assert_eq!(
        lengths(&full_layer),
        vec![Value::from(7.0), Value::from(1.0), Value::from(2.0)]
    );

    let trunk = &full_layer["features"][0]["geometry"];
    assert_eq!(trunk["type"], "LineString");
    assert_eq!(trunk["coordinates"][0], serde_json::json!([4.0, 3.0]));
    assert_eq!(trunk["coordinates"].as_array().unwrap().len(), 8);
    assert!(short_layer["features"][0]["geometry"].is_null());

    let heads = read_layer(&short.join("heads.geojson"));
    assert_eq!(
        heads["features"][1]["geometry"]["coordinates"],
        serde_json::json!([2.0, 3.0])
    );

    let coords = std::fs::read_to_string(tmp.path().join("short.csv")).unwrap();
    let lines: Vec<&str> = coords.lines().collect();
    assert_eq!(lines[0], COORDS_HEADER);
    assert_eq!(lines[1], "10,,7,4,3,0,0");
}

#[test]
fn test_melfp_groups_by_object() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    outlets_layer(
        &outlets,
        &[
            OutletSpec { x: 2.0, y: 2.0, id: Some(20), oid: Some("east") },
            OutletSpec { x: 4.0, y: 1.0, id: Some(30), oid: Some("east") },
            OutletSpec { x: 40.0, y: 40.0, id: Some(40), oid: Some("lost") },
        ],
    );
    let out = tmp.path().join("lfp");
    let options = MelfpOptions {
        oid_col: Some("oid".to_string()),
        outlets_opts: Some("snap=0.5".to_string()),
        lfp_name: Some("paths".to_string()),
        ..MelfpOptions::new(&input)
            .with_outlets(&outlets, Some("id"))
            .with_output_path(&out)
    };
    let report = run_melfp(&options, &engine()).unwrap();
    assert_eq!(report.paths, 2);
    assert_eq!(report.flagged, 1);

    let layer = read_layer(&out.join("paths.geojson"));
    let features = layer["features"].as_array().unwrap();
    assert_eq!(features[0]["properties"]["id"], 30);
    assert_eq!(features[0]["properties"]["oid"], "east");
    assert_eq!(features[0]["properties"]["length"], 2.0);
    assert_eq!(features[1]["properties"]["flagged"], true);
    assert!(features[1]["properties"]["length"].is_null());
}

// ============================================================================
// Structural failures
// ============================================================================

#[test]
fn test_self_reference_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    table_dataset(
        &input,
        &[(1, 0, 0.0, 0.0), (2, 2, 1.0, 0.0), (3, 2, 2.0, 0.0)],
    );
    let outlets = input.join("outlets.geojson");
    outlets_layer(&outlets, &[outlet(0.0, 0.0, 1), outlet(1.0, 0.0, 2)]);
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let structural = Status::StructuralIntegrity.code();
    let accum = MefaOptions::new(&input).with_accum_path(out.join("fac"));
    assert_eq!(mefa(&accum, &engine()), structural);

    let mesh = MeshedOptions {
        hier_path: Some(out.join("tree.csv")),
        ..MeshedOptions::new(&input).with_output_path(out.join("basins"))
    };
    assert_eq!(meshed(&mesh, &engine()), structural);

    let paths = MelfpOptions {
        coors_path: Some(out.join("coors.csv")),
        ..MelfpOptions::new(&input)
            .with_output_path(out.join("lfp"))
            .with_find_full(true)
    };
    assert_eq!(melfp(&paths, &engine()), structural);

    assert!(entries(&out).is_empty());
}

#[test]
fn test_dangling_pointer_is_structural() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    table_dataset(&input, &[(1, 0, 0.0, 0.0), (2, 99, 1.0, 0.0)]);
    let options = MefaOptions::new(&input).with_accum_path(tmp.path().join("fac"));
    let err = run_mefa(&options, &engine()).unwrap_err();
    assert_eq!(err.status(), Status::StructuralIntegrity);
    assert!(!tmp.path().join("fac").exists());
}

// ============================================================================
// Output placement
// ============================================================================

#[test]
fn test_files_inside_output_directory_survive_commit() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    trunk_outlets(&outlets);

    let basins = tmp.path().join("basins");
    std::fs::create_dir_all(&basins).unwrap();
    std::fs::write(basins.join("stale.txt"), "old run").unwrap();
    let mesh = MeshedOptions {
        hier_path: Some(basins.join("tree.csv")),
        ..MeshedOptions::new(&input)
            .with_outlets(&outlets, Some("id"))
            .with_output_path(&basins)
            .with_num_threads(2)
    };
    let report = run_meshed(&mesh, &engine()).unwrap();
    assert_eq!(report.outputs, vec![basins.clone()]);
    let hierarchy = std::fs::read_to_string(basins.join("tree.csv")).unwrap();
    assert_eq!(hierarchy, "id,down_id,nodes\n10,,7\n20,10,2\n30,10,3\n");
    assert!(basins.join("basins.geojson").is_file());
    assert!(!basins.join("stale.txt").exists());
    assert!(!basins.join(HIERARCHY_FILE).exists());

    let lfp = tmp.path().join("lfp");
    let paths = MelfpOptions {
        coors_path: Some(lfp.join("tables").join("coors.csv")),
        ..MelfpOptions::new(&input)
            .with_outlets(&outlets, Some("id"))
            .with_output_path(&lfp)
    };
    run_melfp(&paths, &engine()).unwrap();
    let coords = std::fs::read_to_string(lfp.join("tables").join("coors.csv")).unwrap();
    assert_eq!(coords.lines().nth(1), Some("10,,7,4,3,0,0"));
    assert!(lfp.join("lfp.geojson").is_file());

    // Only the two outputs remain; no staging directory is left behind.
    assert_eq!(entries(tmp.path()), vec!["basins", "lfp", "net", "outlets.geojson"]);
}

#[test]
fn test_output_enclosing_another_is_input_error() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("net");
    trunk_network(&input);
    let outlets = tmp.path().join("outlets.geojson");
    trunk_outlets(&outlets);
    let out = tmp.path().join("out");

    let mesh = MeshedOptions {
        hier_path: Some(out.join("..").join("out")),
        ..MeshedOptions::new(&input)
            .with_outlets(&outlets, Some("id"))
            .with_output_path(&out)
    };
    let err = run_meshed(&mesh, &engine()).unwrap_err();
    assert_eq!(err.status(), Status::InputError);
    assert!(!out.exists());
}

// ============================================================================
// Less-memory mode
// ============================================================================

const TILED_SIDE: usize = 9;

/// A 9x9 grid in 3x3 tiles. Every cell drains E, SE or S, so paths cross
/// tile borders in all three directions; pointers off the grid are sinks and
/// the bottom-right cell is a pit.
fn tiled_grid(dir: &Path) {
    let values: Vec<i32> = (0..TILED_SIDE * TILED_SIDE)
        .map(|node| {
            let (r, c) = (node / TILED_SIDE, node % TILED_SIDE);
            if node == TILED_SIDE * TILED_SIDE - 1 {
                0
            } else {
                [1, 2, 4][(r * 5 + c * 7 + r * c) % 3]
            }
        })
        .collect();
    grid_dataset(dir, TILED_SIDE, TILED_SIDE, 3, &values);
}

fn cell_center(r: usize, c: usize) -> (f64, f64) {
    (c as f64 + 0.5, -(r as f64 + 0.5))
}

struct TiledRun {
    accumulation: Vec<f64>,
    basins: Vec<u32>,
    hierarchy: String,
    paths: Value,
}

fn grid_values<T: Copy>(values: NodeValues<T>) -> Vec<T> {
    match values {
        NodeValues::Grid { values, .. } => values,
        NodeValues::Table(_) => panic!("expected a grid"),
    }
}

#[test]
fn test_paged_grid_matches_resident() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("fdr");
    tiled_grid(&input);
    let outlets = tmp.path().join("outlets.geojson");
    let cells = [(8, 8, 1), (4, 4, 2), (2, 7, 3), (6, 1, 4), (8, 5, 5)];
    let specs: Vec<OutletSpec> = cells
        .iter()
        .map(|&(r, c, id)| {
            let (x, y) = cell_center(r, c);
            outlet(x, y, id)
        })
        .collect();
    outlets_layer(&outlets, &specs);
    let engine = EngineConfig::new()
        .with_tracing_stack_size(2)
        .with_max_local_tiles(1);

    let run = |lessmem: bool, threads: usize| -> TiledRun {
        let out = tmp.path().join(format!("run-{}-{}", lessmem, threads));
        let accum = MefaOptions {
            use_lessmem: lessmem,
            ..MefaOptions::new(&input)
                .with_accum_path(out.join("fac"))
                .with_num_threads(threads)
        };
        run_mefa(&accum, &engine).unwrap();

        let mesh = MeshedOptions {
            use_lessmem: lessmem,
            ..MeshedOptions::new(&input)
                .with_outlets(&outlets, Some("id"))
                .with_output_path(out.join("basins"))
                .with_num_threads(threads)
        };
        let report = run_meshed(&mesh, &engine).unwrap();
        assert_eq!(report.basins, cells.len());

        let paths = MelfpOptions {
            use_lessmem: lessmem,
            ..MelfpOptions::new(&input)
                .with_outlets(&outlets, Some("id"))
                .with_output_path(out.join("lfp"))
                .with_find_full(true)
                .with_num_threads(threads)
        };
        let report = run_melfp(&paths, &engine).unwrap();
        assert_eq!(report.paths, cells.len());

        TiledRun {
            accumulation: grid_values(read_node_values::<f64>(&out.join("fac")).unwrap()),
            basins: grid_values(read_node_values::<u32>(&out.join("basins")).unwrap()),
            hierarchy: std::fs::read_to_string(out.join("basins").join(HIERARCHY_FILE)).unwrap(),
            paths: read_layer(&out.join("lfp").join("lfp.geojson"))["features"].clone(),
        }
    };

    let reference = run(false, 1);
    for &(r, c, id) in &cells {
        assert_eq!(reference.basins[r * TILED_SIDE + c], id as u32);
    }
    assert!(reference.accumulation.iter().all(|&v| v >= 1.0));

    for (lessmem, threads) in [(true, 1), (false, 4), (true, 4)] {
        let other = run(lessmem, threads);
        let label = format!("lessmem={} threads={}", lessmem, threads);
        assert_eq!(other.accumulation, reference.accumulation, "{}", label);
        assert_eq!(other.basins, reference.basins, "{}", label);
        assert_eq!(other.hierarchy, reference.hierarchy, "{}", label);
        assert_eq!(other.paths, reference.paths, "{}", label);
    }
}
