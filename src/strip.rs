//! Triangle strip generation
//!
//! Converts an indexed triangle list into triangle strips: sequences of
//! vertex indices where every consecutive triple forms a triangle, with
//! winding alternating triple to triple. Strips are grown greedily over
//! the face adjacency graph, split when they would exceed the format's
//! length limit, and linked into a single index stream with degenerate
//! bridging triangles that renderers (and the reconstruction here)
//! skip.
//!
//! The invariant that matters: reconstructing triangles from the output
//! must give back exactly the input triangle set. `triangles_from_strip`
//! exists so tests can check that directly.

use crate::types::{MAX_STRIP_LEN, STRIP_END};
use ahash::AHashMap;
use log::debug;
use smallvec::SmallVec;

type EdgeMap = AHashMap<(u16, u16), SmallVec<[u32; 2]>>;

/// Converts a triangle list into one or more strips, each at most
/// `MAX_STRIP_LEN` indices long
#[must_use]
pub fn stripify(triangles: &[[u16; 3]]) -> Vec<Vec<u16>> {
    stripify_with_limit(triangles, MAX_STRIP_LEN)
}

/// Links separate strips into one index stream by bridging with
/// degenerate triangles. The last index of each strip and the first of
/// the next are repeated, plus one more duplicate when needed to keep
/// the next strip's first triangle on even winding parity.
#[must_use]
pub fn link_strips(strips: &[Vec<u16>]) -> Vec<u16> {
    let mut iter = strips.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut out = first.clone();
    for strip in iter {
        let Some(&last) = out.last() else {
            out.extend_from_slice(strip);
            continue;
        };
        let Some(&head) = strip.first() else {
            continue;
        };
        out.push(last);
        out.push(head);
        if out.len() % 2 != 0 {
            // Keeps the appended strip's triangles on even parity
            out.push(head);
        }
        out.extend_from_slice(strip);
    }
    out
}

/// Reads triangles back out of a strip stream: every consecutive index
/// triple, winding flipped on odd positions, degenerate triples
/// skipped, stopping at the first `STRIP_END`
#[must_use]
pub fn triangles_from_strip(stream: &[u16]) -> Vec<[u16; 3]> {
    let mut out = Vec::new();
    if stream.len() < 3 {
        return out;
    }
    for k in 0..=stream.len() - 3 {
        let (a, b, c) = (stream[k], stream[k + 1], stream[k + 2]);
        if a == STRIP_END || b == STRIP_END || c == STRIP_END {
            break;
        }
        if a == b || b == c || a == c {
            continue;
        }
        out.push(if k % 2 == 0 { [a, b, c] } else { [b, a, c] });
    }
    out
}

fn stripify_with_limit(
    triangles: &[[u16; 3]],
    limit: usize,
) -> Vec<Vec<u16>> {
    let edges = build_edge_map(triangles);
    let mut visited = vec![false; triangles.len()];
    let mut strips = Vec::new();

    loop {
        let Some(seed) = pick_seed(triangles, &edges, &visited) else {
            break;
        };
        strips.push(grow(seed, triangles, &edges, &mut visited, limit));
    }
    debug!(
        "Stripified {} triangles into {} strips",
        triangles.len(),
        strips.len(),
    );
    strips
}

const fn edge_key(a: u16, b: u16) -> (u16, u16) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn build_edge_map(triangles: &[[u16; 3]]) -> EdgeMap {
    let mut edges = EdgeMap::new();
    for (id, t) in triangles.iter().enumerate() {
        for i in 0..3 {
            edges
                .entry(edge_key(t[i], t[(i + 1) % 3]))
                .or_default()
                .push(id as u32);
        }
    }
    edges
}

/// Picks the unvisited triangle with the fewest unvisited neighbours.
/// Starting at low-degree faces keeps isolated fans from being left
/// over as single-triangle strips. Ties break on the lowest triangle
/// index so output is deterministic.
fn pick_seed(
    triangles: &[[u16; 3]],
    edges: &EdgeMap,
    visited: &[bool],
) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (id, t) in triangles.iter().enumerate() {
        if visited[id] {
            continue;
        }
        let degree = (0..3)
            .map(|i| {
                edges
                    .get(&edge_key(t[i], t[(i + 1) % 3]))
                    .map_or(0, |list| {
                        list.iter()
                            .filter(|&&n| {
                                n as usize != id && !visited[n as usize]
                            })
                            .count()
                    })
            })
            .sum::<usize>();
        match best {
            Some((_, d)) if d <= degree => {}
            _ => best = Some((id, degree)),
        }
        if degree == 0 {
            break;
        }
    }
    best.map(|(id, _)| id)
}

/// Finds an unvisited triangle adjacent over edge {u, v} whose winding
/// matches what the next strip position needs: directed edge (u, v) on
/// even parity, (v, u) on odd
fn find_next(
    u: u16,
    v: u16,
    even: bool,
    triangles: &[[u16; 3]],
    edges: &EdgeMap,
    visited: &[bool],
) -> Option<(usize, u16)> {
    let (a, b) = if even { (u, v) } else { (v, u) };
    for &id in edges.get(&edge_key(u, v))? {
        let id = id as usize;
        if visited[id] {
            continue;
        }
        let t = triangles[id];
        for i in 0..3 {
            if t[i] == a && t[(i + 1) % 3] == b {
                return Some((id, t[(i + 2) % 3]));
            }
        }
    }
    None
}

fn grow(
    seed: usize,
    triangles: &[[u16; 3]],
    edges: &EdgeMap,
    visited: &mut [bool],
    limit: usize,
) -> Vec<u16> {
    visited[seed] = true;
    let t = triangles[seed];

    // Any rotation of the seed emits it with correct winding at even
    // parity; prefer one whose trailing edge can actually be extended.
    let rotations =
        [[t[0], t[1], t[2]], [t[1], t[2], t[0]], [t[2], t[0], t[1]]];
    let start = rotations
        .iter()
        .find(|r| {
            find_next(r[1], r[2], false, triangles, edges, visited)
                .is_some()
        })
        .unwrap_or(&rotations[0]);

    let mut strip = vec![start[0], start[1], start[2]];
    while strip.len() < limit {
        let u = strip[strip.len() - 2];
        let v = strip[strip.len() - 1];
        let even = (strip.len() - 2) % 2 == 0;
        let Some((id, w)) =
            find_next(u, v, even, triangles, edges, visited)
        else {
            break;
        };
        visited[id] = true;
        strip.push(w);
    }
    strip
}
