//! Collision mesh extraction
//!
//! Solid tiles are traced into closed outlines along tile edges, simplified,
//! and split into convex polygons the physics engine can use as colliders.
//! All coordinates are in tile units; callers offset them to world space.

use ahash::AHashMap;
use glam::Vec2;
use rapier2d::prelude::{Point, SharedShape};
use smallvec::SmallVec;

/// Maximum deviation (tiles) allowed when simplifying outlines
pub const SIMPLIFY_EPSILON: f32 = 1.0;

type Corner = (i32, i32);

/// Trace the outlines of all occupied cells in a `w` x `h` bitmap
///
/// Each outline is a closed loop of tile corners (first point not repeated),
/// wound clockwise around solid matter in y-down coordinates.
pub fn trace_outlines(w: i32, h: i32, occupied: impl Fn(i32, i32) -> bool) -> Vec<Vec<Vec2>> {
    let solid = |x: i32, y: i32| x >= 0 && y >= 0 && x < w && y < h && occupied(x, y);

    let mut edges: Vec<(Corner, Corner)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if !solid(x, y) {
                continue;
            }
            if !solid(x, y - 1) {
                edges.push(((x, y), (x + 1, y)));
            }
            if !solid(x + 1, y) {
                edges.push(((x + 1, y), (x + 1, y + 1)));
            }
            if !solid(x, y + 1) {
                edges.push(((x + 1, y + 1), (x, y + 1)));
            }
            if !solid(x - 1, y) {
                edges.push(((x, y + 1), (x, y)));
            }
        }
    }

    let mut outgoing: AHashMap<Corner, SmallVec<[usize; 2]>> = AHashMap::new();
    for (i, (from, _)) in edges.iter().enumerate() {
        outgoing.entry(*from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut loops = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut corners = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            let (from, to) = edges[current];
            corners.push(from);
            let next = outgoing
                .get(&to)
                .and_then(|candidates| candidates.iter().copied().find(|&e| !used[e]));
            match next {
                Some(e) => current = e,
                None => break,
            }
        }
        let outline = drop_collinear(&corners);
        if outline.len() >= 3 {
            loops.push(outline);
        }
    }
    loops
}

fn drop_collinear(corners: &[Corner]) -> Vec<Vec2> {
    let n = corners.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = corners[(i + n - 1) % n];
        let here = corners[i];
        let next = corners[(i + 1) % n];
        let cross = (here.0 - prev.0) * (next.1 - here.1) - (here.1 - prev.1) * (next.0 - here.0);
        if cross != 0 {
            out.push(Vec2::new(here.0 as f32, here.1 as f32));
        }
    }
    out
}

/// Douglas-Peucker simplification of a closed outline
pub fn simplify(outline: &[Vec2], epsilon: f32) -> Vec<Vec2> {
    if outline.len() <= 4 {
        return outline.to_vec();
    }

    // Split the loop at its two most distant points and simplify each half
    let far = (1..outline.len())
        .max_by(|&a, &b| {
            let da = outline[a].distance_squared(outline[0]);
            let db = outline[b].distance_squared(outline[0]);
            da.total_cmp(&db)
        })
        .unwrap_or(outline.len() / 2);

    let mut first: Vec<Vec2> = outline[..=far].to_vec();
    let mut second: Vec<Vec2> = outline[far..].to_vec();
    second.push(outline[0]);

    first = douglas_peucker(&first, epsilon);
    second = douglas_peucker(&second, epsilon);

    first.pop();
    second.pop();
    first.extend(second);
    first
}

fn douglas_peucker(points: &[Vec2], epsilon: f32) -> Vec<Vec2> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let (start, end) = (points[0], points[points.len() - 1]);

    let mut max_distance = 0.0;
    let mut index = 0;
    for (i, p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = distance_to_segment(*p, start, end);
        if d > max_distance {
            max_distance = d;
            index = i;
        }
    }

    if max_distance <= epsilon {
        return vec![start, end];
    }
    let mut left = douglas_peucker(&points[..=index], epsilon);
    let right = douglas_peucker(&points[index..], epsilon);
    left.pop();
    left.extend(right);
    left
}

fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Split outlines into convex polygons
pub fn decompose(outlines: &[Vec<Vec2>]) -> Vec<Vec<Vec2>> {
    let mut vertices: Vec<Point<f32>> = Vec::new();
    let mut indices: Vec<[u32; 2]> = Vec::new();
    for outline in outlines.iter().filter(|o| o.len() >= 3) {
        let base = vertices.len() as u32;
        let n = outline.len() as u32;
        vertices.extend(outline.iter().map(|p| Point::new(p.x, p.y)));
        indices.extend((0..n).map(|i| [base + i, base + (i + 1) % n]));
    }
    if vertices.len() < 3 {
        return Vec::new();
    }

    let shape = SharedShape::convex_decomposition(&vertices, &indices);
    let mut polygons = Vec::new();
    if let Some(compound) = shape.as_compound() {
        for (iso, part) in compound.shapes() {
            if let Some(poly) = part.as_convex_polygon() {
                let points: Vec<Vec2> = poly
                    .points()
                    .iter()
                    .map(|p| {
                        let q = iso.transform_point(p);
                        Vec2::new(q.x, q.y)
                    })
                    .collect();
                if points.len() >= 3 {
                    polygons.push(points);
                }
            }
        }
    }

    if polygons.is_empty() {
        // Degenerate decomposition: fall back to one hull per outline
        for outline in outlines {
            let points: Vec<Point<f32>> = outline.iter().map(|p| Point::new(p.x, p.y)).collect();
            if let Some(hull) = SharedShape::convex_hull(&points)
                && let Some(poly) = hull.as_convex_polygon()
            {
                polygons.push(poly.points().iter().map(|p| Vec2::new(p.x, p.y)).collect());
            }
        }
    }
    polygons
}

/// Outlines plus convex pieces for an occupancy bitmap
pub fn build_polygons(
    w: i32,
    h: i32,
    occupied: impl Fn(i32, i32) -> bool,
) -> (Vec<Vec<Vec2>>, Vec<Vec<Vec2>>) {
    let outlines: Vec<Vec<Vec2>> = trace_outlines(w, h, occupied)
        .iter()
        .map(|o| simplify(o, SIMPLIFY_EPSILON))
        .filter(|o| o.len() >= 3)
        .collect();
    let convex = decompose(&outlines);
    (outlines, convex)
}

/// Shoelace area (positive for clockwise loops in y-down coordinates)
pub fn polygon_area(points: &[Vec2]) -> f32 {
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let (a, b) = (points[i], points[(i + 1) % n]);
        sum += a.x * b.y - b.x * a.y;
    }
    sum * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tile_outline() {
        let loops = trace_outlines(3, 3, |x, y| x == 1 && y == 1);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].len(), 4);
        assert_eq!(polygon_area(&loops[0]), 1.0);
    }

    #[test]
    fn test_rectangle_collapses_to_four_corners() {
        let loops = trace_outlines(10, 10, |x, y| (2..8).contains(&x) && (3..6).contains(&y));
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].len(), 4);
        assert_eq!(polygon_area(&loops[0]).abs(), 18.0);
    }

    #[test]
    fn test_hole_gives_two_loops() {
        let ring = |x: i32, y: i32| (0..5).contains(&x) && (0..5).contains(&y) && !(x == 2 && y == 2);
        let loops = trace_outlines(5, 5, ring);
        assert_eq!(loops.len(), 2);
        let total: f32 = loops.iter().map(|l| polygon_area(l)).sum();
        // Outer loop and hole are wound oppositely
        assert_eq!(total.abs(), 24.0);
    }

    #[test]
    fn test_separate_blobs() {
        let loops = trace_outlines(8, 2, |x, _| x == 0 || x == 7);
        assert_eq!(loops.len(), 2);
    }

    #[test]
    fn test_simplify_staircase() {
        // A 1-tile staircase is within epsilon of its diagonal
        let stairs = |x: i32, y: i32| y >= x;
        let loops = trace_outlines(20, 20, stairs);
        assert_eq!(loops.len(), 1);
        let simplified = simplify(&loops[0], 1.0);
        assert!(simplified.len() < loops[0].len());
        assert!(simplified.len() >= 3);
    }

    #[test]
    fn test_decompose_rectangle() {
        let (outlines, convex) = build_polygons(6, 6, |x, y| (1..5).contains(&x) && (1..5).contains(&y));
        assert_eq!(outlines.len(), 1);
        assert!(!convex.is_empty());
        for poly in &convex {
            assert!(poly.len() >= 3);
            for p in poly {
                assert!((0.9..=5.1).contains(&p.x) && (0.9..=5.1).contains(&p.y), "{:?}", p);
            }
        }
    }

    #[test]
    fn test_empty_bitmap() {
        let (outlines, convex) = build_polygons(4, 4, |_, _| false);
        assert!(outlines.is_empty());
        assert!(convex.is_empty());
    }
}
