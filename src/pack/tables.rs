//! Packed output tables
//!
//! These are the structured shapes the external tag serializer expects,
//! with names already truncated into their fixed fields and all indices
//! resolved. Scalar fields serialize little-endian; the strip index
//! stream is the one big-endian exception, and `strip_bytes` handles
//! it along with the 0xFFFF terminator and padding.

use crate::types::{LOD_COUNT, NAME_LEN, STRIP_END};
use bytemuck::{Pod, Zeroable};

/// Byte length of one packed vertex record:
/// 14 x f32 + 2 x i16 + 2 x f32
pub const VERTEX_RECORD_LEN: usize = 68;

/// The complete table set for one compiled model
pub struct PackedModel {
    pub checksum: u32,
    /// Base texture coordinate scale, u then v
    pub u_scale: f32,
    pub v_scale: f32,
    /// Active node count per detail tier, highest to lowest
    pub node_counts: [u16; LOD_COUNT],
    pub nodes: Vec<PackedNode>,
    pub shaders: Vec<PackedShader>,
    pub regions: Vec<PackedRegion>,
    pub geometries: Vec<PackedGeometry>,
    pub global_markers: Vec<PackedMarkerHeader>,
}

pub struct PackedNode {
    pub name: [u8; 32],
    pub sibling: i16,
    pub first_child: i16,
    pub parent: i16,
    /// World units (unit conversion already applied)
    pub translation: [f32; 3],
    /// i, j, k, w
    pub rotation: [f32; 4],
    pub distance_from_parent: f32,
}

pub struct PackedShader {
    pub shader_class: [u8; 4],
    pub path: String,
}

pub struct PackedRegion {
    pub name: [u8; 32],
    pub permutations: Vec<PackedPermutation>,
}

pub struct PackedPermutation {
    pub name: [u8; 32],
    /// Geometry index per detail tier, -1 for none
    pub lod_geometry: [i16; LOD_COUNT],
    pub markers: Vec<PackedMarker>,
}

/// A marker kept local to its permutation
pub struct PackedMarker {
    pub name: [u8; 32],
    pub node: i16,
    pub rotation: [f32; 4],
    pub translation: [f32; 3],
}

pub struct PackedGeometry {
    pub parts: Vec<PackedPart>,
}

/// Per-material payload of a geometry. `indices` is the finished strip
/// stream: linked strips, terminated and padded with `STRIP_END`.
pub struct PackedPart {
    pub shader_index: i16,
    /// Placeholder; centroid computation is not this pipeline's job
    pub centroid: [f32; 3],
    pub vertices: Vec<PackedVertex>,
    pub indices: Vec<u16>,
}

impl PackedPart {
    /// Serializes the vertex records, 68 bytes each, little-endian
    #[must_use]
    pub fn vertex_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.vertices.len() * VERTEX_RECORD_LEN);
        for v in &self.vertices {
            out.extend_from_slice(&v.to_bytes());
        }
        out
    }

    /// Serializes the strip stream as big-endian 16 bit values
    #[must_use]
    pub fn strip_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.indices.len() * 2);
        for &i in &self.indices {
            out.extend_from_slice(&i.to_be_bytes());
        }
        out
    }
}

/// One name-grouped entry of the global marker table
pub struct PackedMarkerHeader {
    pub name: [u8; 32],
    pub instances: Vec<PackedMarkerInstance>,
}

pub struct PackedMarkerInstance {
    pub region: i16,
    pub permutation: i16,
    pub node: i16,
    pub rotation: [f32; 4],
    pub translation: [f32; 3],
}

/// Fixed 68 byte vertex record
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Zeroable, Pod)]
pub struct PackedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Placeholder, always zero
    pub binormal: [f32; 3],
    /// Placeholder, always zero
    pub tangent: [f32; 3],
    /// V already flipped
    pub uv: [f32; 2],
    pub node0: i16,
    pub node1: i16,
    pub node0_weight: f32,
    pub node1_weight: f32,
}

impl PackedVertex {
    /// Little-endian serialization in field order
    #[must_use]
    pub fn to_bytes(&self) -> [u8; VERTEX_RECORD_LEN] {
        let mut out = [0u8; VERTEX_RECORD_LEN];
        let mut at = 0usize;
        let mut put_f32 = |buf: &mut [u8; VERTEX_RECORD_LEN], v: f32| {
            buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
            at += 4;
        };
        for v in self
            .position
            .iter()
            .chain(&self.normal)
            .chain(&self.binormal)
            .chain(&self.tangent)
            .chain(&self.uv)
        {
            put_f32(&mut out, *v);
        }
        out[56..58].copy_from_slice(&self.node0.to_le_bytes());
        out[58..60].copy_from_slice(&self.node1.to_le_bytes());
        out[60..64].copy_from_slice(&self.node0_weight.to_le_bytes());
        out[64..68].copy_from_slice(&self.node1_weight.to_le_bytes());
        out
    }

    /// Reinterprets a 68 byte record, the inverse of `to_bytes`
    #[must_use]
    pub fn from_bytes(bytes: &[u8; VERTEX_RECORD_LEN]) -> Self {
        let f = |at: usize| {
            f32::from_le_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
            ])
        };
        Self {
            position: [f(0), f(4), f(8)],
            normal: [f(12), f(16), f(20)],
            binormal: [f(24), f(28), f(32)],
            tangent: [f(36), f(40), f(44)],
            uv: [f(48), f(52)],
            node0: i16::from_le_bytes([bytes[56], bytes[57]]),
            node1: i16::from_le_bytes([bytes[58], bytes[59]]),
            node0_weight: f(60),
            node1_weight: f(64),
        }
    }
}

/// Truncates a name into a fixed 32 byte field with a terminating nul
#[must_use]
pub fn fixed_name(name: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Four character shader tag class, space padded
#[must_use]
pub fn fixed_tag(class: &str) -> [u8; 4] {
    let mut out = [b' '; 4];
    let bytes = class.as_bytes();
    let len = bytes.len().min(4);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Appends the terminator and pads the stream to a multiple of 3
#[must_use]
pub fn finish_strip(mut indices: Vec<u16>) -> Vec<u16> {
    indices.push(STRIP_END);
    while indices.len() % 3 != 0 {
        indices.push(STRIP_END);
    }
    indices
}
