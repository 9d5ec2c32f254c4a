//! Merge engine
//!
//! Folds all accepted source documents into one `MergedModel`: the
//! reference skeleton with derived parent links, materials appended in
//! file order, regions and permutations consolidated by name, per-LOD
//! node usage and texture coordinate extents accumulated for the
//! packer, and oversized permutation marker sets hoisted into the
//! global marker table. Any per-file error aborts the whole compile;
//! no partial merge is ever used.

use crate::{
    kb_error::{KbError, SourceError},
    model::{
        GlobalMarker, MergedMarker, MergedMesh, MergedModel, MergedNode,
        MergedPermutation, MergedRegion, MergedTriangle, MergedVertex,
    },
    source::{CompileOptions, SourceFile, SourceNode},
    types::{LOD_COUNT, MAX_LOCAL_MARKERS, UNIT_SCALE},
};
use itertools::Itertools;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Merges the accepted source documents into one model
///
/// `accepted` holds indices into `sources` as produced by
/// `validate_sources`; the first entry is the reference document whose
/// skeleton and checksum are copied verbatim.
///
/// # Errors
/// Returns the accumulated per-file errors. If any file produced an
/// error the partial merge is discarded.
pub fn merge_sources(
    sources: &[SourceFile],
    accepted: &[usize],
    options: &CompileOptions,
    cancel: Option<&AtomicBool>,
) -> Result<MergedModel, Vec<SourceError>> {
    let Some(&ref_index) = accepted.first() else {
        return Err(vec![SourceError {
            file: String::new(),
            error: KbError::NoValidSources,
        }]);
    };
    let reference = &sources[ref_index];
    let node_count = reference.model.nodes.len();

    let mut model = MergedModel {
        checksum: reference.model.checksum,
        unit_scale: UNIT_SCALE * options.scale,
        nodes: derive_parents(&reference.model.nodes),
        materials: Vec::new(),
        regions: Vec::new(),
        global_markers: BTreeMap::new(),
        node_usage: [0u64; LOD_COUNT],
        u_scale: 1.0,
        v_scale: 1.0,
    };
    let mut errors: Vec<SourceError> = Vec::new();
    let mut max_u = 0.0f32;
    let mut max_v = 0.0f32;

    // Region names are collected up front and sorted so the output
    // ordering does not depend on which file mentioned a region first.
    let region_names: Vec<String> = accepted
        .iter()
        .flat_map(|&i| sources[i].model.regions.iter())
        .map(|r| r.name.clone())
        .sorted()
        .dedup()
        .collect();
    model.regions = region_names
        .iter()
        .map(|name| MergedRegion {
            name: name.clone(),
            permutations: Vec::new(),
        })
        .collect();

    let mut material_offset = 0usize;
    for &file_index in accepted {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(vec![SourceError {
                    file: sources[file_index].name.clone(),
                    error: KbError::Cancelled,
                }]);
            }
        }
        let file = &sources[file_index];
        let file_errors = merge_file(
            file,
            &mut model,
            material_offset,
            node_count,
            &mut max_u,
            &mut max_v,
        );
        errors.extend(file_errors);
        material_offset += file.model.materials.len();
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    finish_permutations(&mut model);
    model.u_scale = max_u.max(1.0);
    model.v_scale = max_v.max(1.0);

    info!(
        "Merged {} files: {} nodes, {} materials, {} regions",
        accepted.len(),
        model.nodes.len(),
        model.materials.len(),
        model.regions.len(),
    );
    Ok(model)
}

/// Converts the intrusive first-child/sibling representation into nodes
/// with explicit parent indices, walking sibling chains breadth first
/// from the root. Done exactly once; everything downstream reads
/// `parent` only.
#[must_use]
pub fn derive_parents(nodes: &[SourceNode]) -> Vec<MergedNode> {
    let mut merged: Vec<MergedNode> = nodes
        .iter()
        .map(|n| MergedNode {
            name: n.name.clone(),
            first_child: n.first_child,
            sibling: n.sibling,
            parent: -1,
            rotation: n.rotation,
            translation: n.translation,
        })
        .collect();

    let mut queue = std::collections::VecDeque::new();
    let mut stamped = vec![false; merged.len()];
    if !merged.is_empty() {
        queue.push_back(0usize);
        stamped[0] = true;
    }
    while let Some(index) = queue.pop_front() {
        let mut child = merged[index].first_child;
        while child >= 0 {
            let c = child as usize;
            // A malformed chain could revisit a node; bail out of it
            if stamped[c] {
                break;
            }
            stamped[c] = true;
            merged[c].parent = i32::try_from(index).unwrap_or(-1);
            queue.push_back(c);
            child = merged[c].sibling;
        }
    }
    merged
}

/// Merges one file's materials, meshes and markers into the model,
/// returning that file's errors
fn merge_file(
    file: &SourceFile,
    model: &mut MergedModel,
    material_offset: usize,
    node_count: usize,
    max_u: &mut f32,
    max_v: &mut f32,
) -> Vec<SourceError> {
    let mut errors = Vec::new();
    let fail = |error: KbError| SourceError {
        file: file.name.clone(),
        error,
    };

    // Materials are a plain ordered append. Duplicate shader paths are
    // intentionally kept; index equals position in the merged list.
    model.materials.extend(file.model.materials.iter().cloned());
    let material_count = file.model.materials.len();

    // Field-level borrows so meshes and the usage masks can be updated
    // in the same pass
    let regions = &mut model.regions;
    let node_usage = &mut model.node_usage;

    for region in &file.model.regions {
        // Region names were collected up front so this always resolves
        let Some(region_index) =
            regions.iter().position(|r| r.name == region.name)
        else {
            continue;
        };
        for permutation in &region.permutations {
            for mesh in &permutation.meshes {
                let slot = mesh.tier.slot();
                let merged_perm = find_or_create_permutation(
                    &mut regions[region_index],
                    &permutation.name,
                );
                let merged_mesh =
                    merged_perm.meshes[slot].get_or_insert_with(
                        MergedMesh::default,
                    );
                let base = merged_mesh.vertices.len() as u32;

                for vertex in &mesh.vertices {
                    if !node_in_range(vertex.node0, node_count, false)
                        || !node_in_range(vertex.node1, node_count, true)
                    {
                        let bad = if node_in_range(
                            vertex.node0,
                            node_count,
                            false,
                        ) {
                            vertex.node1
                        } else {
                            vertex.node0
                        };
                        errors.push(fail(KbError::NodeIndexOutOfRange(bad)));
                        continue;
                    }
                    node_usage[slot] |= 1u64 << vertex.node0;
                    if vertex.node1 >= 0 && vertex.node1_weight > 0.0 {
                        node_usage[slot] |= 1u64 << vertex.node1;
                    }
                    *max_u = max_u.max(vertex.uv[0].abs());
                    *max_v = max_v.max(vertex.uv[1].abs());
                    merged_mesh.vertices.push(MergedVertex {
                        position: vertex.position,
                        normal: vertex.normal,
                        uv: vertex.uv,
                        node0: vertex.node0,
                        node1: vertex.node1,
                        node1_weight: vertex.node1_weight,
                    });
                }

                let vertex_count = mesh.vertices.len() as u32;
                for triangle in &mesh.triangles {
                    if let Some(&bad) = triangle
                        .indices
                        .iter()
                        .find(|&&i| i >= vertex_count)
                    {
                        errors
                            .push(fail(KbError::VertexIndexOutOfRange(bad)));
                        continue;
                    }
                    if triangle.material < 0
                        || triangle.material as usize >= material_count
                    {
                        errors.push(fail(KbError::MaterialIndexOutOfRange(
                            triangle.material,
                        )));
                        continue;
                    }
                    merged_mesh.triangles.push(MergedTriangle {
                        material: material_offset
                            + triangle.material as usize,
                        indices: [
                            base + triangle.indices[0],
                            base + triangle.indices[1],
                            base + triangle.indices[2],
                        ],
                    });
                }
            }
        }
    }

    // Markers reference a region by index within this file and a
    // permutation by name. They are collected in file order.
    for marker in &file.model.markers {
        if marker.region < 0
            || marker.region as usize >= file.model.regions.len()
        {
            errors.push(fail(KbError::MarkerRegionOutOfRange(marker.region)));
            continue;
        }
        if !node_in_range(marker.node, node_count, false) {
            errors.push(fail(KbError::NodeIndexOutOfRange(marker.node)));
            continue;
        }
        let region_name =
            &file.model.regions[marker.region as usize].name;
        let Some(region_index) =
            regions.iter().position(|r| &r.name == region_name)
        else {
            continue;
        };
        let merged_perm = find_or_create_permutation(
            &mut regions[region_index],
            &marker.permutation,
        );
        merged_perm.markers.push(MergedMarker {
            name: marker.name.clone(),
            node: marker.node,
            rotation: marker.rotation,
            translation: marker.translation,
        });
    }

    debug!("{}: {} errors", file.name, errors.len());
    errors
}

fn node_in_range(index: i32, count: usize, optional: bool) -> bool {
    if optional && index == -1 {
        return true;
    }
    index >= 0 && (index as usize) < count
}

fn find_or_create_permutation<'a>(
    region: &'a mut MergedRegion,
    name: &str,
) -> &'a mut MergedPermutation {
    // First-appearance order during the merge; `finish_permutations`
    // sorts by name afterwards
    let index =
        match region.permutations.iter().position(|p| p.name == name) {
            Some(i) => i,
            None => {
                region
                    .permutations
                    .push(MergedPermutation::new(name.to_string()));
                region.permutations.len() - 1
            }
        };
    &mut region.permutations[index]
}

/// Sorts each region's permutations by name, drops permutations that
/// contribute nothing and hoists oversized marker sets into the global
/// table. The drop test runs against the pre-hoist marker set, so a
/// permutation that only lost its markers to the global table is still
/// kept.
fn finish_permutations(model: &mut MergedModel) {
    for (region_index, region) in model.regions.iter_mut().enumerate() {
        region
            .permutations
            .sort_unstable_by(|a, b| a.name.cmp(&b.name));
        region.permutations.retain(|p| {
            let keep = !p.has_no_geometry() || !p.markers.is_empty();
            if !keep {
                debug!(
                    "Dropping empty permutation \"{}\" in region \"{}\"",
                    p.name, region.name,
                );
            }
            keep
        });
        for permutation in &mut region.permutations {
            if permutation.markers.len() <= MAX_LOCAL_MARKERS {
                continue;
            }
            info!(
                "Hoisting {} markers from permutation \"{}\"",
                permutation.markers.len(),
                permutation.name,
            );
            for marker in permutation.markers.drain(..) {
                model
                    .global_markers
                    .entry(marker.name.clone())
                    .or_default()
                    .push(GlobalMarker {
                        region: region_index,
                        permutation: permutation.name.clone(),
                        node: marker.node,
                        rotation: marker.rotation,
                        translation: marker.translation,
                    });
            }
        }
    }
}
