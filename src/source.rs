//! Structured source records
//!
//! A JMS document is parsed by an external collaborator into the types
//! here before compilation begins. The text grammar itself is not this
//! crate's concern, only the entities it describes: a skeleton, a
//! materials list, markers, and a region/permutation/LOD mesh table.

use crate::{kb_error::KbError, types::LodTier};
use nalgebra_glm as glm;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One parsed source document plus the name used to report problems
/// with it
pub struct SourceFile {
    pub name: String,
    pub model: SourceModel,
}

/// Everything one JMS document contributes to a compile
#[derive(Default)]
pub struct SourceModel {
    /// Integrity value over the node list, carried through to the
    /// output tag
    pub checksum: u32,
    pub nodes: Vec<SourceNode>,
    pub materials: Vec<SourceMaterial>,
    pub markers: Vec<SourceMarker>,
    pub regions: Vec<SourceRegion>,
}

/// A skeleton node. Tree structure is encoded intrusively through
/// `first_child` and `sibling`, with -1 meaning none.
#[derive(Clone, Debug)]
pub struct SourceNode {
    pub name: String,
    pub first_child: i32,
    pub sibling: i32,
    pub rotation: glm::Quat,
    pub translation: glm::Vec3,
}

/// A shader reference. Order in the materials list defines the material
/// index used by triangles. Duplicate paths are kept as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMaterial {
    /// Four character tag class of the referenced shader
    pub shader_class: String,
    pub path: String,
}

/// A named attachment point. `region` indexes this file's region list
/// and `permutation` names a permutation within that region.
#[derive(Clone, Debug)]
pub struct SourceMarker {
    pub name: String,
    pub region: i32,
    pub permutation: String,
    pub node: i32,
    pub rotation: glm::Quat,
    pub translation: glm::Vec3,
}

pub struct SourceRegion {
    pub name: String,
    pub permutations: Vec<SourcePermutation>,
}

pub struct SourcePermutation {
    pub name: String,
    pub meshes: Vec<SourceMesh>,
}

/// Triangle soup for one detail tier of one permutation
pub struct SourceMesh {
    pub tier: LodTier,
    pub vertices: Vec<SourceVertex>,
    pub triangles: Vec<SourceTriangle>,
}

/// A vertex with up to two contributing nodes. `node1` is -1 when the
/// vertex is rigid; `node1_weight` is the secondary blend weight.
#[derive(Clone, Copy, Debug)]
pub struct SourceVertex {
    pub position: glm::Vec3,
    pub normal: glm::Vec3,
    pub uv: [f32; 2],
    pub node0: i32,
    pub node1: i32,
    pub node1_weight: f32,
}

impl Default for SourceVertex {
    fn default() -> Self {
        Self {
            position: glm::Vec3::zeros(),
            normal: glm::Vec3::zeros(),
            uv: [0.0, 0.0],
            node0: 0,
            node1: -1,
            node1_weight: 0.0,
        }
    }
}

/// Three indices into the owning mesh's vertex list plus the material
/// index the face is rendered with
#[derive(Clone, Copy, Debug)]
pub struct SourceTriangle {
    pub material: i32,
    pub indices: [u32; 3],
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
pub struct CompileOptions {
    /// Extra multiplier on top of the fixed source-to-world unit
    /// conversion, for sources authored at a non-standard scale
    pub scale: f32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { scale: 1.0f32 }
    }
}

impl CompileOptions {
    /// Loads options from a YAML sidecar file
    ///
    /// # Errors
    /// May return `KbError`
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, KbError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }
}
