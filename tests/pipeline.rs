//! End-to-end tests for the compile and pack pipeline
//!
//! Sources are built programmatically in the shape the external JMS
//! parser would produce. Skeletons are a simple parent chain so node
//! indices and parent stamping are easy to reason about.

use knitbone::{
    kb_error::KbError,
    merge::merge_sources,
    model::MergedModel,
    pipeline::{compile, pack, Pipeline, State},
    source::{
        CompileOptions, SourceFile, SourceMarker, SourceMaterial,
        SourceMesh, SourceModel, SourceNode, SourcePermutation,
        SourceRegion, SourceTriangle, SourceVertex,
    },
    strip::triangles_from_strip,
    types::{LodTier, MAX_GEOMETRIES, MAX_NODES},
    validate::validate_sources,
};
use nalgebra_glm as glm;
use std::sync::{atomic::AtomicBool, Once};

static INIT: Once = Once::new();

/// Initializes logging in a "once per test run" manner. Call at the
/// start of each test that needs logging.
fn init_tests() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

/// A skeleton of `count` nodes where each node's first child is the
/// next one, so the parent of node i is i - 1
fn chain_nodes(count: usize) -> Vec<SourceNode> {
    (0..count)
        .map(|i| SourceNode {
            name: format!("node{i}"),
            first_child: if i + 1 < count {
                (i + 1) as i32
            } else {
                -1
            },
            sibling: -1,
            rotation: glm::Quat::identity(),
            translation: glm::vec3(0.0, 0.0, i as f32),
        })
        .collect()
}

/// A triangle fan of `triangles` faces around vertex 0, every vertex
/// rigidly bound to node 0
fn fan_mesh(tier: LodTier, material: i32, triangles: usize) -> SourceMesh {
    let vertices = (0..triangles + 2)
        .map(|i| SourceVertex {
            position: glm::vec3(i as f32, 0.0, 0.0),
            normal: glm::vec3(0.0, 0.0, 1.0),
            uv: [0.25, 0.5],
            ..Default::default()
        })
        .collect();
    let triangles = (0..triangles)
        .map(|t| SourceTriangle {
            material,
            indices: [0, (t + 1) as u32, (t + 2) as u32],
        })
        .collect();
    SourceMesh {
        tier,
        vertices,
        triangles,
    }
}

fn material(path: &str) -> SourceMaterial {
    SourceMaterial {
        shader_class: "shdr".to_string(),
        path: path.to_string(),
    }
}

/// One source file with a single region/permutation/mesh
fn simple_file(
    file: &str,
    nodes: Vec<SourceNode>,
    region: &str,
    permutation: &str,
    mesh: SourceMesh,
    materials: Vec<SourceMaterial>,
) -> SourceFile {
    SourceFile {
        name: file.to_string(),
        model: SourceModel {
            checksum: 0xCAFE,
            nodes,
            materials,
            markers: Vec::new(),
            regions: vec![SourceRegion {
                name: region.to_string(),
                permutations: vec![SourcePermutation {
                    name: permutation.to_string(),
                    meshes: vec![mesh],
                }],
            }],
        },
    }
}

fn compile_one(file: SourceFile) -> MergedModel {
    compile(&[file], &CompileOptions::default())
        .expect("compile should succeed")
        .model
}

#[test]
fn merged_nodes_equal_reference() {
    init_tests();
    let nodes = chain_nodes(4);
    let file = simple_file(
        "base.jms",
        nodes.clone(),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    let model = compile_one(file);
    assert_eq!(model.nodes.len(), nodes.len());
    for (merged, source) in model.nodes.iter().zip(&nodes) {
        assert_eq!(merged.name, source.name);
        assert_eq!(merged.first_child, source.first_child);
        assert_eq!(merged.sibling, source.sibling);
        assert_eq!(merged.translation, source.translation);
    }
    // Chain skeleton: parent of i is i - 1
    let parents: Vec<i32> = model.nodes.iter().map(|n| n.parent).collect();
    assert_eq!(parents, vec![-1, 0, 1, 2]);
}

#[test]
fn two_files_two_materials_two_geometries() {
    init_tests();
    let a = simple_file(
        "a.jms",
        chain_nodes(MAX_NODES),
        "body",
        "intact",
        fan_mesh(LodTier::SuperHigh, 0, 10),
        vec![material("rock")],
    );
    let b = simple_file(
        "b.jms",
        chain_nodes(MAX_NODES),
        "body",
        "damaged",
        fan_mesh(LodTier::SuperHigh, 0, 5),
        vec![material("metal")],
    );
    let out = compile(&[a, b], &CompileOptions::default())
        .expect("compile should succeed");
    assert!(out.report.errors.is_empty());
    let model = out.model;
    assert_eq!(model.materials.len(), 2);
    assert_eq!(model.nodes.len(), MAX_NODES);

    let packed = pack(&model).expect("pack should succeed");
    assert_eq!(packed.geometries.len(), 2);
    assert_eq!(packed.shaders.len(), 2);
    // Both permutations point at a real geometry for the top tier
    let region = &packed.regions[0];
    assert_eq!(region.permutations.len(), 2);
    let mut referenced: Vec<i16> = region
        .permutations
        .iter()
        .map(|p| p.lod_geometry[0])
        .collect();
    referenced.sort_unstable();
    assert_eq!(referenced, vec![0, 1]);
    // The second file's triangles were remapped to the merged material
    // list, so one part references shader 0 and the other shader 1
    let mut shader_indices: Vec<i16> = packed
        .geometries
        .iter()
        .flat_map(|g| g.parts.iter().map(|p| p.shader_index))
        .collect();
    shader_indices.sort_unstable();
    assert_eq!(shader_indices, vec![0, 1]);
}

#[test]
fn node_count_mismatch_excludes_file() {
    init_tests();
    let a = simple_file(
        "a.jms",
        chain_nodes(MAX_NODES),
        "body",
        "intact",
        fan_mesh(LodTier::SuperHigh, 0, 3),
        vec![material("rock")],
    );
    let b = simple_file(
        "b.jms",
        chain_nodes(MAX_NODES - 1),
        "body",
        "damaged",
        fan_mesh(LodTier::SuperHigh, 0, 3),
        vec![material("metal")],
    );
    let out = compile(&[a, b], &CompileOptions::default())
        .expect("compile should proceed with the accepted file");
    assert_eq!(out.report.errors.len(), 1);
    assert!(matches!(
        out.report.errors[0].error,
        KbError::NodeCountMismatch {
            expected: MAX_NODES,
            actual: 63,
        }
    ));
    // Only file a's contribution remains
    assert_eq!(out.model.materials.len(), 1);
    assert_eq!(out.model.regions[0].permutations.len(), 1);
}

#[test]
fn empty_source_set_aborts() {
    init_tests();
    let report = compile(&[], &CompileOptions::default())
        .err()
        .expect("compile should abort");
    assert!(report.is_fatal());
    assert!(matches!(
        report.errors[0].error,
        KbError::NoValidSources
    ));
}

#[test]
fn node_limit_boundary() {
    init_tests();
    // Exactly 64 nodes compiles
    let ok = simple_file(
        "a.jms",
        chain_nodes(MAX_NODES),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 1),
        vec![material("rock")],
    );
    assert!(compile(&[ok], &CompileOptions::default()).is_ok());

    // 65 is rejected before merge
    let over = simple_file(
        "a.jms",
        chain_nodes(MAX_NODES + 1),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 1),
        vec![material("rock")],
    );
    let report = compile(&[over], &CompileOptions::default())
        .err()
        .expect("compile should abort");
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e.error, KbError::TooManyNodes(65))));
}

/// Builds one file whose region has `count` permutations, each with a
/// one-triangle top tier mesh
fn many_permutations(count: usize) -> SourceFile {
    let permutations = (0..count)
        .map(|i| SourcePermutation {
            name: format!("perm{i:03}"),
            meshes: vec![fan_mesh(LodTier::SuperHigh, 0, 1)],
        })
        .collect();
    SourceFile {
        name: "many.jms".to_string(),
        model: SourceModel {
            checksum: 1,
            nodes: chain_nodes(2),
            materials: vec![material("rock")],
            markers: Vec::new(),
            regions: vec![SourceRegion {
                name: "body".to_string(),
                permutations,
            }],
        },
    }
}

#[test]
fn geometry_limit_boundary() {
    init_tests();
    // Exactly 256 geometries packs
    let model = compile_one(many_permutations(MAX_GEOMETRIES));
    let packed = pack(&model).expect("256 geometries should pack");
    assert_eq!(packed.geometries.len(), MAX_GEOMETRIES);

    // 257 aborts with no partial tables
    let model = compile_one(many_permutations(MAX_GEOMETRIES + 1));
    let err = pack(&model).err().expect("257 geometries should abort");
    assert!(matches!(err, KbError::GeometryOverflow(257)));
}

#[test]
fn oversized_marker_set_goes_global() {
    init_tests();
    let mut file = simple_file(
        "a.jms",
        chain_nodes(4),
        "body",
        "damaged",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    file.model.markers = (0..40)
        .map(|i| SourceMarker {
            name: format!("marker{i:02}"),
            region: 0,
            permutation: "damaged".to_string(),
            node: 1,
            rotation: glm::Quat::identity(),
            translation: glm::vec3(1.0, 2.0, 3.0),
        })
        .collect();

    let model = compile_one(file);
    // Hoisted out of the permutation, grouped by name
    assert_eq!(model.global_markers.len(), 40);
    let permutation = &model.regions[0].permutations[0];
    assert!(permutation.markers.is_empty());
    assert!(!permutation.has_no_geometry());

    let packed = pack(&model).expect("pack should succeed");
    assert_eq!(packed.global_markers.len(), 40);
    for header in &packed.global_markers {
        assert_eq!(header.instances.len(), 1);
        // Resolved back to the only permutation of the only region
        assert_eq!(header.instances[0].region, 0);
        assert_eq!(header.instances[0].permutation, 0);
        assert_eq!(header.instances[0].node, 1);
    }
}

#[test]
fn small_marker_set_stays_local() {
    init_tests();
    let mut file = simple_file(
        "a.jms",
        chain_nodes(4),
        "body",
        "damaged",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    file.model.markers = vec![SourceMarker {
        name: "head".to_string(),
        region: 0,
        permutation: "damaged".to_string(),
        node: 2,
        rotation: glm::Quat::identity(),
        translation: glm::vec3(0.0, 0.0, 0.0),
    }];
    let model = compile_one(file);
    assert!(model.global_markers.is_empty());
    assert_eq!(model.regions[0].permutations[0].markers.len(), 1);
}

#[test]
fn empty_permutation_is_dropped() {
    init_tests();
    let mut file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "full",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    // A second permutation with an empty mesh and no markers
    file.model.regions[0].permutations.push(SourcePermutation {
        name: "empty".to_string(),
        meshes: vec![SourceMesh {
            tier: LodTier::SuperHigh,
            vertices: Vec::new(),
            triangles: Vec::new(),
        }],
    });
    let model = compile_one(file);
    let names: Vec<&str> = model.regions[0]
        .permutations
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["full"]);
}

#[test]
fn uv_scale_is_floor_clamped() {
    init_tests();
    let mut mesh = fan_mesh(LodTier::SuperHigh, 0, 1);
    for v in &mut mesh.vertices {
        v.uv = [0.5, 0.25];
    }
    let file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "default",
        mesh,
        vec![material("rock")],
    );
    let model = compile_one(file);
    assert_eq!(model.u_scale, 1.0);
    assert_eq!(model.v_scale, 1.0);

    let mut mesh = fan_mesh(LodTier::SuperHigh, 0, 1);
    mesh.vertices[1].uv = [3.0, -2.5];
    let file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "default",
        mesh,
        vec![material("rock")],
    );
    let model = compile_one(file);
    assert_eq!(model.u_scale, 3.0);
    assert_eq!(model.v_scale, 2.5);
}

#[test]
fn active_node_counts_follow_usage() {
    init_tests();
    let mut mesh = fan_mesh(LodTier::SuperHigh, 0, 1);
    mesh.vertices[2].node0 = 5;
    let mut file = simple_file(
        "a.jms",
        chain_nodes(8),
        "body",
        "default",
        mesh,
        vec![material("rock")],
    );
    file.model.regions[0].permutations[0]
        .meshes
        .push(fan_mesh(LodTier::Low, 0, 1));
    let model = compile_one(file);
    let packed = pack(&model).expect("pack should succeed");
    // Top tier uses nodes 0 and 5, so 6 leading nodes are active
    assert_eq!(packed.node_counts[LodTier::SuperHigh.slot()], 6);
    // The low tier only uses node 0
    assert_eq!(packed.node_counts[LodTier::Low.slot()], 1);
    // Tiers with no geometry have no active nodes
    assert_eq!(packed.node_counts[LodTier::Medium.slot()], 0);
}

#[test]
fn vertex_records_round_trip_through_bytes() {
    init_tests();
    let mut mesh = fan_mesh(LodTier::SuperHigh, 0, 2);
    mesh.vertices[1].node1 = 1;
    mesh.vertices[1].node1_weight = 0.25;
    let file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "default",
        mesh,
        vec![material("rock")],
    );
    let model = compile_one(file);
    let packed = pack(&model).expect("pack should succeed");
    let part = &packed.geometries[0].parts[0];
    let bytes = part.vertex_bytes();
    assert_eq!(bytes.len(), part.vertices.len() * 68);
    for (i, v) in part.vertices.iter().enumerate() {
        let mut record = [0u8; 68];
        record.copy_from_slice(&bytes[i * 68..(i + 1) * 68]);
        let back =
            knitbone::pack::tables::PackedVertex::from_bytes(&record);
        assert_eq!(v.position, back.position);
        assert_eq!(v.normal, back.normal);
        assert_eq!(v.uv, back.uv);
        assert_eq!(v.node0, back.node0);
        assert_eq!(v.node1, back.node1);
        assert_eq!(v.node0_weight, back.node0_weight);
        assert_eq!(v.node1_weight, back.node1_weight);
    }
    // Blend weights complement each other
    assert_eq!(part.vertices[1].node1_weight, 0.25);
    assert_eq!(part.vertices[1].node0_weight, 0.75);
}

#[test]
fn compiling_twice_is_identical() {
    init_tests();
    let build = || {
        let a = simple_file(
            "a.jms",
            chain_nodes(8),
            "body",
            "intact",
            fan_mesh(LodTier::SuperHigh, 0, 6),
            vec![material("rock")],
        );
        let b = simple_file(
            "b.jms",
            chain_nodes(8),
            "hull",
            "damaged",
            fan_mesh(LodTier::High, 0, 4),
            vec![material("metal")],
        );
        let model = compile(&[a, b], &CompileOptions::default())
            .expect("compile should succeed")
            .model;
        pack(&model).expect("pack should succeed")
    };
    let first = build();
    let second = build();
    assert_eq!(first.node_counts, second.node_counts);
    assert_eq!(first.geometries.len(), second.geometries.len());
    for (g1, g2) in first.geometries.iter().zip(&second.geometries) {
        assert_eq!(g1.parts.len(), g2.parts.len());
        for (p1, p2) in g1.parts.iter().zip(&g2.parts) {
            assert_eq!(p1.vertex_bytes(), p2.vertex_bytes());
            assert_eq!(p1.strip_bytes(), p2.strip_bytes());
        }
    }
    for (r1, r2) in first.regions.iter().zip(&second.regions) {
        assert_eq!(r1.name, r2.name);
        for (p1, p2) in r1.permutations.iter().zip(&r2.permutations) {
            assert_eq!(p1.lod_geometry, p2.lod_geometry);
        }
    }
}

#[test]
fn pipeline_state_machine() {
    init_tests();
    let mut pipeline = Pipeline::new();
    assert_eq!(pipeline.state(), State::Idle);
    assert!(!pipeline.is_busy());

    let file = simple_file(
        "a.jms",
        chain_nodes(4),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    let out = pipeline
        .compile(&[file], &CompileOptions::default())
        .expect("compile should succeed");
    assert_eq!(pipeline.state(), State::Merging);

    pipeline.pack(&out.model).expect("pack should succeed");
    assert_eq!(pipeline.state(), State::Committed);

    // A failed compile aborts the pipeline
    let report = pipeline
        .compile(&[], &CompileOptions::default())
        .err()
        .expect("empty source set should abort");
    assert!(report.is_fatal());
    assert_eq!(pipeline.state(), State::Aborted);
}

#[test]
fn pipeline_resets_cancel_flag() {
    init_tests();
    let mut pipeline = Pipeline::new();
    // The flag is cleared at the start of each compile, so a stale
    // request from an earlier run does not cancel this one
    pipeline.cancel_flag().store(
        true,
        std::sync::atomic::Ordering::Relaxed,
    );
    let file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 1),
        vec![material("rock")],
    );
    assert!(pipeline
        .compile(&[file], &CompileOptions::default())
        .is_ok());
}

#[test]
fn cancellation_stops_at_file_boundaries() {
    init_tests();
    let sources = [
        simple_file(
            "a.jms",
            chain_nodes(2),
            "body",
            "intact",
            fan_mesh(LodTier::SuperHigh, 0, 1),
            vec![material("rock")],
        ),
        simple_file(
            "b.jms",
            chain_nodes(2),
            "body",
            "damaged",
            fan_mesh(LodTier::SuperHigh, 0, 1),
            vec![material("metal")],
        ),
    ];
    let flag = AtomicBool::new(true);

    // The reference file is checked structurally, then the flag is
    // polled before the next file is compared
    let v = validate_sources(&sources, Some(&flag));
    assert_eq!(v.accepted, vec![0]);
    assert_eq!(v.errors.len(), 1);
    assert_eq!(v.errors[0].file, "b.jms");
    assert!(matches!(v.errors[0].error, KbError::Cancelled));

    // Merge polls before every file, so it stops before the first
    let errors = merge_sources(
        &sources,
        &[0, 1],
        &CompileOptions::default(),
        Some(&flag),
    )
    .err()
    .expect("merge should cancel");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file, "a.jms");
    assert!(matches!(errors[0].error, KbError::Cancelled));
}

#[test]
fn files_consolidate_into_one_mesh() {
    init_tests();
    // Both files feed the same (region, permutation, tier)
    let a = simple_file(
        "a.jms",
        chain_nodes(4),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 2),
        vec![material("rock")],
    );
    let b = simple_file(
        "b.jms",
        chain_nodes(4),
        "body",
        "default",
        fan_mesh(LodTier::SuperHigh, 0, 3),
        vec![material("metal")],
    );
    let out = compile(&[a, b], &CompileOptions::default())
        .expect("compile should succeed");
    assert!(out.report.errors.is_empty());
    let model = out.model;
    assert_eq!(model.regions[0].permutations.len(), 1);
    let mesh = model.regions[0].permutations[0]
        .mesh(LodTier::SuperHigh)
        .expect("consolidated mesh");
    // 4 vertices and 2 triangles from a, 5 and 3 from b
    assert_eq!(mesh.vertices.len(), 9);
    assert_eq!(mesh.triangles.len(), 5);
    // The second file's triangles were rebased past the first file's
    // vertices
    assert!(mesh.triangles[2..]
        .iter()
        .all(|t| t.indices.iter().all(|&i| i >= 4)));

    let packed = pack(&model).expect("pack should succeed");
    assert_eq!(packed.geometries.len(), 1);
    let parts = &packed.geometries[0].parts;
    assert_eq!(parts.len(), 2);
    // One part per material, each carrying its own file's faces with
    // part-local vertex indices
    assert_eq!(parts[0].shader_index, 0);
    assert_eq!(parts[1].shader_index, 1);
    assert_eq!(parts[0].vertices.len(), 4);
    assert_eq!(parts[1].vertices.len(), 5);
    assert_eq!(triangles_from_strip(&parts[0].indices).len(), 2);
    assert_eq!(triangles_from_strip(&parts[1].indices).len(), 3);
}

#[test]
fn permutations_sort_by_name() {
    init_tests();
    let mut file = simple_file(
        "a.jms",
        chain_nodes(2),
        "body",
        "zeta",
        fan_mesh(LodTier::SuperHigh, 0, 1),
        vec![material("rock")],
    );
    file.model.regions[0].permutations.push(SourcePermutation {
        name: "alpha".to_string(),
        meshes: vec![fan_mesh(LodTier::SuperHigh, 0, 1)],
    });
    let model = compile_one(file);
    let names: Vec<&str> = model.regions[0]
        .permutations
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}
