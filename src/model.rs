//! Merged in-memory model
//!
//! Single source of truth between merging and packing. Created fresh
//! for every compile and discarded once the binary tables exist (or on
//! error). The node table is a flat arena: tree structure arrives as
//! intrusive first-child/sibling links and the merge stamps an explicit
//! `parent` on every node, which is what every later stage uses.

use crate::{
    source::SourceMaterial,
    types::{LodTier, LOD_COUNT},
};
use nalgebra_glm as glm;
use std::collections::BTreeMap;

pub struct MergedModel {
    pub checksum: u32,
    /// Source-to-world conversion applied by the packer, including any
    /// user scale option
    pub unit_scale: f32,
    pub nodes: Vec<MergedNode>,
    pub materials: Vec<SourceMaterial>,
    /// Sorted lexicographically by name during merge
    pub regions: Vec<MergedRegion>,
    /// Markers hoisted out of oversized permutations, keyed by marker
    /// name. Built once by the merge, consumed once by the packer.
    pub global_markers: BTreeMap<String, Vec<GlobalMarker>>,
    /// Per-tier bitmask of node indices referenced by any vertex at
    /// that detail level, across all permutations
    pub node_usage: [u64; LOD_COUNT],
    /// Model-wide texture coordinate scale, floor-clamped to 1.0
    pub u_scale: f32,
    pub v_scale: f32,
}

#[derive(Clone, Debug)]
pub struct MergedNode {
    pub name: String,
    pub first_child: i32,
    pub sibling: i32,
    /// Derived during merge; immutable afterwards
    pub parent: i32,
    pub rotation: glm::Quat,
    pub translation: glm::Vec3,
}

pub struct MergedRegion {
    pub name: String,
    pub permutations: Vec<MergedPermutation>,
}

pub struct MergedPermutation {
    pub name: String,
    /// One optional mesh per detail tier, indexed by `LodTier::slot`
    pub meshes: [Option<MergedMesh>; LOD_COUNT],
    /// Markers still local to this permutation (not hoisted)
    pub markers: Vec<MergedMarker>,
}

impl MergedPermutation {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            meshes: Default::default(),
            markers: Vec::new(),
        }
    }

    #[must_use]
    pub fn mesh(&self, tier: LodTier) -> Option<&MergedMesh> {
        self.meshes[tier.slot()].as_ref()
    }

    /// True when no tier has any triangles
    #[must_use]
    pub fn has_no_geometry(&self) -> bool {
        self.meshes
            .iter()
            .flatten()
            .all(|m| m.triangles.is_empty())
    }
}

/// Consolidated triangle soup for one (permutation, tier). Material
/// indices are already remapped into the merged material list.
#[derive(Default)]
pub struct MergedMesh {
    pub vertices: Vec<MergedVertex>,
    pub triangles: Vec<MergedTriangle>,
}

#[derive(Clone, Copy, Debug)]
pub struct MergedVertex {
    pub position: glm::Vec3,
    pub normal: glm::Vec3,
    pub uv: [f32; 2],
    pub node0: i32,
    pub node1: i32,
    pub node1_weight: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct MergedTriangle {
    pub material: usize,
    pub indices: [u32; 3],
}

#[derive(Clone, Debug)]
pub struct MergedMarker {
    pub name: String,
    pub node: i32,
    pub rotation: glm::Quat,
    pub translation: glm::Vec3,
}

/// One instance of a hoisted marker. The owning permutation is kept by
/// name and resolved back to an index at pack time.
#[derive(Clone, Debug)]
pub struct GlobalMarker {
    pub region: usize,
    pub permutation: String,
    pub node: i32,
    pub rotation: glm::Quat,
    pub translation: glm::Vec3,
}
