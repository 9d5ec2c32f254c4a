//! Table emission
//!
//! Walks the merged model in its own deterministic iteration order
//! (regions are already name-sorted, permutations keep first-appearance
//! order, tiers run highest to lowest) so compiling the same source set
//! twice yields identical tables. Packing is all-or-nothing: the
//! geometry cap is checked in the planning step before any table is
//! built.
//!
//! Emission is staged so the pipeline can report progress: `plan_model`
//! assigns geometry indices and builds the region table,
//! `build_geometries` stripifies every part, and `assemble` produces
//! the final table set. `pack_model` runs all three.

use super::tables::{
    finish_strip, fixed_name, fixed_tag, PackedGeometry, PackedMarker,
    PackedMarkerHeader, PackedMarkerInstance, PackedModel, PackedNode,
    PackedPart, PackedPermutation, PackedRegion, PackedShader,
    PackedVertex,
};
use crate::{
    kb_error::KbError,
    model::{MergedMesh, MergedModel, MergedVertex},
    strip,
    types::{LodTier, LOD_COUNT, MAX_GEOMETRIES, STRIP_END},
};
use ahash::AHashMap;
use itertools::Itertools;
use log::{info, warn};
use nalgebra_glm as glm;
use std::collections::hash_map::Entry;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Geometry assignment produced by `plan_model`: the meshes to compile,
/// in geometry-index order, and the region table already pointing at
/// those indices
pub(crate) struct PackPlan<'a> {
    pub meshes: Vec<&'a MergedMesh>,
    pub regions: Vec<PackedRegion>,
}

/// Packs a merged model into the output table set
///
/// # Errors
/// May return `KbError`. `GeometryOverflow` is raised by the planning
/// step so a failed pack never leaves partial tables behind.
pub fn pack_model(model: &MergedModel) -> Result<PackedModel, KbError> {
    let plan = plan_model(model)?;
    let geometries = build_geometries(&plan, model.unit_scale)?;
    assemble(model, plan, geometries)
}

/// Assigns geometry indices and builds the region/permutation table
pub(crate) fn plan_model(
    model: &MergedModel,
) -> Result<PackPlan<'_>, KbError> {
    let geometry_count: usize = model
        .regions
        .iter()
        .flat_map(|r| r.permutations.iter())
        .map(|p| {
            p.meshes
                .iter()
                .flatten()
                .filter(|m| !m.triangles.is_empty())
                .count()
        })
        .sum();
    if geometry_count > MAX_GEOMETRIES {
        return Err(KbError::GeometryOverflow(geometry_count));
    }

    let mut meshes: Vec<&MergedMesh> = Vec::new();
    let mut regions = Vec::new();
    for region in &model.regions {
        let mut permutations = Vec::new();
        for permutation in &region.permutations {
            let mut lod_geometry = [-1i16; LOD_COUNT];
            for tier in LodTier::ALL {
                let Some(mesh) = permutation.mesh(tier) else {
                    continue;
                };
                if mesh.triangles.is_empty() {
                    continue;
                }
                lod_geometry[tier.slot()] = i16::try_from(meshes.len())
                    .map_err(|_| KbError::IndexTooLarge)?;
                meshes.push(mesh);
            }
            let markers = permutation
                .markers
                .iter()
                .map(|m| {
                    Ok(PackedMarker {
                        name: fixed_name(&m.name),
                        node: to_i16(m.node)?,
                        rotation: quat_array(&m.rotation),
                        translation: scaled(
                            &m.translation,
                            model.unit_scale,
                        ),
                    })
                })
                .collect::<Result<Vec<_>, KbError>>()?;
            permutations.push(PackedPermutation {
                name: fixed_name(&permutation.name),
                lod_geometry,
                markers,
            });
        }
        regions.push(PackedRegion {
            name: fixed_name(&region.name),
            permutations,
        });
    }
    Ok(PackPlan { meshes, regions })
}

/// Stripifies and packs every planned geometry. Part work is
/// independent per mesh so this may run in parallel; output order is
/// the plan's index order either way.
pub(crate) fn build_geometries(
    plan: &PackPlan<'_>,
    unit_scale: f32,
) -> Result<Vec<PackedGeometry>, KbError> {
    #[cfg(feature = "rayon")]
    let it = plan.meshes.par_iter();
    #[cfg(not(feature = "rayon"))]
    let it = plan.meshes.iter();
    it.map(|mesh| build_geometry(mesh, unit_scale)).collect()
}

/// Builds the remaining tables around the compiled geometries
pub(crate) fn assemble(
    model: &MergedModel,
    plan: PackPlan<'_>,
    geometries: Vec<PackedGeometry>,
) -> Result<PackedModel, KbError> {
    let nodes = pack_nodes(model);
    let shaders = model
        .materials
        .iter()
        .map(|m| PackedShader {
            shader_class: fixed_tag(&m.shader_class),
            path: m.path.clone(),
        })
        .collect::<Vec<_>>();
    let global_markers = pack_global_markers(model)?;

    let mut node_counts = [0u16; LOD_COUNT];
    for tier in LodTier::ALL {
        let mask = model.node_usage[tier.slot()];
        node_counts[tier.slot()] = (64 - mask.leading_zeros()) as u16;
    }

    info!(
        "Packed {} geometries, {} shaders, {} global marker names",
        geometries.len(),
        shaders.len(),
        global_markers.len(),
    );
    Ok(PackedModel {
        checksum: model.checksum,
        u_scale: model.u_scale,
        v_scale: model.v_scale,
        node_counts,
        nodes,
        shaders,
        regions: plan.regions,
        geometries,
        global_markers,
    })
}

fn pack_nodes(model: &MergedModel) -> Vec<PackedNode> {
    model
        .nodes
        .iter()
        .map(|n| {
            let translation = scaled(&n.translation, model.unit_scale);
            let distance = if n.parent >= 0 {
                glm::length(&(n.translation * model.unit_scale))
            } else {
                0.0
            };
            PackedNode {
                name: fixed_name(&n.name),
                sibling: clamp_i16(n.sibling),
                first_child: clamp_i16(n.first_child),
                parent: clamp_i16(n.parent),
                translation,
                rotation: quat_array(&n.rotation),
                distance_from_parent: distance,
            }
        })
        .collect()
}

/// Builds one geometry from a merged mesh: one part per material used,
/// in ascending material order, each with its own remapped vertex
/// buffer and finished strip stream
fn build_geometry(
    mesh: &MergedMesh,
    unit_scale: f32,
) -> Result<PackedGeometry, KbError> {
    let materials: Vec<usize> = mesh
        .triangles
        .iter()
        .map(|t| t.material)
        .sorted_unstable()
        .dedup()
        .collect();

    let mut parts = Vec::with_capacity(materials.len());
    for material in materials {
        let mut remap: AHashMap<u32, u16> = AHashMap::new();
        let mut vertices: Vec<PackedVertex> = Vec::new();
        let mut local_triangles: Vec<[u16; 3]> = Vec::new();

        for triangle in
            mesh.triangles.iter().filter(|t| t.material == material)
        {
            let mut local = [0u16; 3];
            for (slot, &index) in triangle.indices.iter().enumerate() {
                let next = vertices.len();
                let local_index = match remap.entry(index) {
                    Entry::Occupied(e) => *e.get(),
                    Entry::Vacant(e) => {
                        // STRIP_END can never be a vertex index
                        if next >= usize::from(STRIP_END) {
                            return Err(KbError::VertexCountTooLarge);
                        }
                        let i = next as u16;
                        e.insert(i);
                        vertices.push(pack_vertex(
                            &mesh.vertices[index as usize],
                            unit_scale,
                        )?);
                        i
                    }
                };
                local[slot] = local_index;
            }
            local_triangles.push(local);
        }

        let strips = strip::stripify(&local_triangles);
        let indices = finish_strip(strip::link_strips(&strips));
        parts.push(PackedPart {
            shader_index: to_i16(i32::try_from(material).unwrap_or(-1))?,
            centroid: [0.0; 3],
            vertices,
            indices,
        });
    }
    Ok(PackedGeometry { parts })
}

fn pack_vertex(
    vertex: &MergedVertex,
    unit_scale: f32,
) -> Result<PackedVertex, KbError> {
    let node1_weight = if vertex.node1 >= 0 {
        vertex.node1_weight
    } else {
        0.0
    };
    Ok(PackedVertex {
        position: scaled(&vertex.position, unit_scale),
        normal: [vertex.normal.x, vertex.normal.y, vertex.normal.z],
        binormal: [0.0; 3],
        tangent: [0.0; 3],
        uv: [vertex.uv[0], 1.0 - vertex.uv[1]],
        node0: to_i16(vertex.node0)?,
        node1: to_i16(vertex.node1)?,
        node0_weight: 1.0 - node1_weight,
        node1_weight,
    })
}

/// Resolves each global marker instance's permutation name back to an
/// index by linear search in its region's permutation list; first
/// matching name wins. Instances whose permutation was dropped during
/// merge are skipped with a warning.
fn pack_global_markers(
    model: &MergedModel,
) -> Result<Vec<PackedMarkerHeader>, KbError> {
    let mut headers = Vec::new();
    for (name, markers) in &model.global_markers {
        let mut instances = Vec::new();
        for marker in markers {
            let region = &model.regions[marker.region];
            let Some(permutation_index) = region
                .permutations
                .iter()
                .position(|p| p.name == marker.permutation)
            else {
                warn!(
                    "marker \"{name}\" references dropped permutation \
                     \"{}\" in region \"{}\"",
                    marker.permutation, region.name,
                );
                continue;
            };
            instances.push(PackedMarkerInstance {
                region: to_i16(i32::try_from(marker.region).unwrap_or(-1))?,
                permutation: to_i16(
                    i32::try_from(permutation_index).unwrap_or(-1),
                )?,
                node: to_i16(marker.node)?,
                rotation: quat_array(&marker.rotation),
                translation: scaled(&marker.translation, model.unit_scale),
            });
        }
        headers.push(PackedMarkerHeader {
            name: fixed_name(name),
            instances,
        });
    }
    Ok(headers)
}

fn to_i16(value: i32) -> Result<i16, KbError> {
    i16::try_from(value).map_err(|_| KbError::IndexTooLarge)
}

const fn clamp_i16(value: i32) -> i16 {
    // Node indices passed validation so this never saturates in
    // practice
    if value > i16::MAX as i32 {
        i16::MAX
    } else if value < i16::MIN as i32 {
        i16::MIN
    } else {
        value as i16
    }
}

fn quat_array(q: &glm::Quat) -> [f32; 4] {
    [q.i, q.j, q.k, q.w]
}

fn scaled(v: &glm::Vec3, scale: f32) -> [f32; 3] {
    [v.x * scale, v.y * scale, v.z * scale]
}
