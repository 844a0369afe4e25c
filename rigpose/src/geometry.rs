use crate::runtime::Skeleton;
use crate::ClippingAttachment;

/// Ear-clipping triangulation of simple polygons and re-merging of the result into convex
/// polygons. Polygons are flat `[x0, y0, x1, y1, ..]` lists.
#[derive(Debug, Default)]
pub struct Triangulator {
    indices: Vec<usize>,
    concave: Vec<bool>,
}

fn point(vertices: &[f32], index: usize) -> [f32; 2] {
    [vertices[index * 2], vertices[index * 2 + 1]]
}

fn positive_area(p1: [f32; 2], p2: [f32; 2], p3: [f32; 2]) -> bool {
    p1[0] * (p3[1] - p2[1]) + p2[0] * (p1[1] - p3[1]) + p3[0] * (p2[1] - p1[1]) >= 0.0
}

fn winding(p1: [f32; 2], p2: [f32; 2], p3: [f32; 2]) -> i32 {
    let px = p2[0] - p1[0];
    let py = p2[1] - p1[1];
    if p3[0] * py - p3[1] * px + px * p1[1] - p1[0] * py >= 0.0 {
        1
    } else {
        -1
    }
}

fn is_concave(index: usize, vertex_count: usize, vertices: &[f32], indices: &[usize]) -> bool {
    let previous = indices[(vertex_count + index - 1) % vertex_count];
    let next = indices[(index + 1) % vertex_count];
    !positive_area(
        point(vertices, previous),
        point(vertices, indices[index]),
        point(vertices, next),
    )
}

impl Triangulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns triangle indices into `vertices`. Polygons with fewer than three points yield no
    /// triangles.
    pub fn triangulate(&mut self, vertices: &[f32]) -> Vec<u16> {
        let mut vertex_count = vertices.len() / 2;
        if vertex_count < 3 {
            return Vec::new();
        }
        let indices = &mut self.indices;
        indices.clear();
        indices.extend(0..vertex_count);
        let concave = &mut self.concave;
        concave.clear();
        concave.extend((0..vertex_count).map(|i| is_concave(i, vertex_count, vertices, indices)));

        let mut triangles = Vec::with_capacity((vertex_count - 2) * 3);
        while vertex_count > 3 {
            // Find an ear tip: a convex corner whose triangle contains no concave corner.
            let mut previous = vertex_count - 1;
            let mut i = 0;
            let mut next = 1;
            loop {
                if !concave[i] {
                    let p1 = point(vertices, indices[previous]);
                    let p2 = point(vertices, indices[i]);
                    let p3 = point(vertices, indices[next]);
                    let mut ii = (next + 1) % vertex_count;
                    let mut ear = true;
                    while ii != previous {
                        if concave[ii] {
                            let v = point(vertices, indices[ii]);
                            if positive_area(p3, p1, v)
                                && positive_area(p1, p2, v)
                                && positive_area(p2, p3, v)
                            {
                                ear = false;
                                break;
                            }
                        }
                        ii = (ii + 1) % vertex_count;
                    }
                    if ear {
                        break;
                    }
                }
                if next == 0 {
                    // No ear found; take the last convex corner, or the first corner.
                    while i > 0 && concave[i] {
                        i -= 1;
                    }
                    break;
                }
                previous = i;
                i = next;
                next = (next + 1) % vertex_count;
            }

            for index in [(vertex_count + i - 1) % vertex_count, i, (i + 1) % vertex_count] {
                triangles.push(indices[index] as u16);
            }
            indices.remove(i);
            concave.remove(i);
            vertex_count -= 1;

            let previous_index = (vertex_count + i - 1) % vertex_count;
            let next_index = if i == vertex_count { 0 } else { i };
            concave[previous_index] = is_concave(previous_index, vertex_count, vertices, indices);
            concave[next_index] = is_concave(next_index, vertex_count, vertices, indices);
        }
        if vertex_count == 3 {
            triangles.extend([indices[2] as u16, indices[0] as u16, indices[1] as u16]);
        }
        triangles
    }

    /// Merges triangle fans from `triangulate` into convex polygons.
    pub fn decompose(&mut self, vertices: &[f32], triangles: &[u16]) -> Vec<Vec<f32>> {
        let mut polygons: Vec<Vec<f32>> = Vec::new();
        let mut polygon_indices: Vec<Vec<usize>> = Vec::new();

        let mut polygon: Vec<f32> = Vec::new();
        let mut indices: Vec<usize> = Vec::new();
        let mut fan_base = None;
        let mut last_winding = 0;

        for triangle in triangles.chunks_exact(3) {
            let [t1, t2, t3] = [triangle[0], triangle[1], triangle[2]].map(usize::from);
            let (p1, p2, p3) = (point(vertices, t1), point(vertices, t2), point(vertices, t3));

            // A triangle sharing the fan base extends the fan if the result stays convex.
            let mut merged = false;
            if fan_base == Some(t1) && polygon.len() >= 4 {
                let o = polygon.len() - 4;
                let last_two = ([polygon[o], polygon[o + 1]], [polygon[o + 2], polygon[o + 3]]);
                let winding1 = winding(last_two.0, last_two.1, p3);
                let winding2 = winding(p3, [polygon[0], polygon[1]], [polygon[2], polygon[3]]);
                if winding1 == last_winding && winding2 == last_winding {
                    polygon.extend(p3);
                    indices.push(t3);
                    merged = true;
                }
            }
            if !merged {
                if !polygon.is_empty() {
                    polygons.push(std::mem::take(&mut polygon));
                    polygon_indices.push(std::mem::take(&mut indices));
                }
                polygon.extend(p1.into_iter().chain(p2).chain(p3));
                indices.extend([t1, t2, t3]);
                last_winding = winding(p1, p2, p3);
                fan_base = Some(t1);
            }
        }
        if !polygon.is_empty() {
            polygons.push(polygon);
            polygon_indices.push(indices);
        }

        // Fold leftover single triangles into fans they extend convexly.
        let n = polygons.len();
        for i in 0..n {
            let (Some(&first_index), Some(&last_index)) =
                (polygon_indices[i].first(), polygon_indices[i].last())
            else {
                continue;
            };
            let poly = &polygons[i];
            let o = poly.len() - 4;
            let mut prev_prev = [poly[o], poly[o + 1]];
            let mut prev = [poly[o + 2], poly[o + 3]];
            let first = [poly[0], poly[1]];
            let second = [poly[2], poly[3]];
            let base_winding = winding(prev_prev, prev, first);

            let mut ii = 0;
            while ii < n {
                let other = &polygon_indices[ii];
                if ii == i || other.len() != 3 || other[0] != first_index || other[1] != last_index {
                    ii += 1;
                    continue;
                }
                let other_last = other[2];
                let other_poly = &polygons[ii];
                let p3 = [other_poly[4], other_poly[5]];
                if winding(prev_prev, prev, p3) == base_winding
                    && winding(p3, first, second) == base_winding
                {
                    polygons[ii].clear();
                    polygon_indices[ii].clear();
                    polygons[i].extend(p3);
                    polygon_indices[i].push(other_last);
                    prev_prev = prev;
                    prev = p3;
                    ii = 0;
                    continue;
                }
                ii += 1;
            }
        }

        polygons.retain(|polygon| !polygon.is_empty());
        polygons
    }
}

/// Reverses `polygon` in place if it winds counter-clockwise.
fn make_clockwise(polygon: &mut [f32]) {
    let len = polygon.len();
    if len < 6 {
        return;
    }
    let mut area = polygon[len - 2] * polygon[1] - polygon[0] * polygon[len - 1];
    for i in (0..len - 3).step_by(2) {
        area += polygon[i] * polygon[i + 3] - polygon[i + 2] * polygon[i + 1];
    }
    if area < 0.0 {
        return;
    }
    let last_x = len - 2;
    for i in (0..len / 2).step_by(2) {
        let other = last_x - i;
        polygon.swap(i, other);
        polygon.swap(i + 1, other + 1);
    }
}

/// Output of `SkeletonClipping::clip_triangles`: one position, UV and color per vertex.
/// `dark_colors` is filled only for two-color tinting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClippedMesh {
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub colors: Vec<[f32; 4]>,
    pub dark_colors: Vec<[f32; 4]>,
    pub triangles: Vec<u16>,
}

impl ClippedMesh {
    fn clear(&mut self) {
        self.vertices.clear();
        self.uvs.clear();
        self.colors.clear();
        self.dark_colors.clear();
        self.triangles.clear();
    }

    fn push_colors(&mut self, count: usize, light: [f32; 4], dark: Option<[f32; 4]>) {
        self.colors.extend(std::iter::repeat_n(light, count));
        if let Some(dark) = dark {
            self.dark_colors.extend(std::iter::repeat_n(dark, count));
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct ActiveClip {
    end_slot: Option<usize>,
}

/// Clips rendered triangles against the polygon of the active clipping attachment.
#[derive(Debug, Default)]
pub struct SkeletonClipping {
    triangulator: Triangulator,
    active: Option<ActiveClip>,
    clipping_polygon: Vec<f32>,
    clipping_polygons: Vec<Vec<f32>>,
    clip_output: Vec<f32>,
    scratch: Vec<f32>,
    clipped: ClippedMesh,
}

impl SkeletonClipping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts clipping with the attachment on `slot_index` and returns the number of convex
    /// polygons it decomposed into. Does nothing while another clip is active.
    pub fn clip_start(
        &mut self,
        skeleton: &Skeleton,
        slot_index: usize,
        clip: &ClippingAttachment,
    ) -> usize {
        if self.active.is_some() {
            return 0;
        }
        let n = clip.vertex.world_vertices_length();
        if n < 6 {
            return 0;
        }
        self.clipping_polygon.clear();
        clip.vertex
            .compute_world_vertices(skeleton, slot_index, 0, n, &mut self.clipping_polygon, 0, 2);
        make_clockwise(&mut self.clipping_polygon);
        let triangles = self.triangulator.triangulate(&self.clipping_polygon);
        let mut polygons = self
            .triangulator
            .decompose(&self.clipping_polygon, &triangles);
        if polygons.is_empty() {
            log::warn!("clipping attachment {:?} has a degenerate polygon", clip.name);
            return 0;
        }
        for polygon in &mut polygons {
            make_clockwise(polygon);
            // Closed, so every edge is `[i, i + 1] -> [i + 2, i + 3]`.
            polygon.extend([polygon[0], polygon[1]]);
        }
        self.clipping_polygons = polygons;
        self.active = Some(ActiveClip {
            end_slot: clip.end_slot,
        });
        self.clipping_polygons.len()
    }

    /// Ends clipping if `slot_index` is the active clip's end slot.
    pub fn clip_end_with_slot(&mut self, slot_index: usize) {
        if self
            .active
            .is_some_and(|active| active.end_slot == Some(slot_index))
        {
            self.clip_end();
        }
    }

    pub fn clip_end(&mut self) {
        if self.active.take().is_none() {
            return;
        }
        self.clipping_polygons.clear();
        self.clipped.clear();
    }

    pub fn is_clipping(&self) -> bool {
        self.active.is_some()
    }

    /// Clips `triangles` against every convex clip polygon. Vertex positions are `stride` floats
    /// apart, UVs are packed pairs. Vertices introduced by clipping get barycentric UVs. Every
    /// output vertex gets the `light` color, and the `dark` color when two-color tinting is used.
    pub fn clip_triangles(
        &mut self,
        vertices: &[f32],
        triangles: &[u16],
        uvs: &[f32],
        stride: usize,
        light: [f32; 4],
        dark: Option<[f32; 4]>,
    ) -> &ClippedMesh {
        let out = &mut self.clipped;
        out.clear();
        let mut index: u16 = 0;

        'triangles: for triangle in triangles.chunks_exact(3) {
            let corner = |i: u16| {
                let o = usize::from(i) * stride;
                let t = usize::from(i) * 2;
                ([vertices[o], vertices[o + 1]], [uvs[t], uvs[t + 1]])
            };
            let (p1, uv1) = corner(triangle[0]);
            let (p2, uv2) = corner(triangle[1]);
            let (p3, uv3) = corner(triangle[2]);

            for polygon in &self.clipping_polygons {
                if !clip_triangle(p1, p2, p3, polygon, &mut self.clip_output, &mut self.scratch) {
                    out.vertices.extend(p1.into_iter().chain(p2).chain(p3));
                    out.uvs.extend(uv1.into_iter().chain(uv2).chain(uv3));
                    out.push_colors(3, light, dark);
                    out.triangles.extend([index, index + 1, index + 2]);
                    index = index.wrapping_add(3);
                    continue 'triangles;
                }
                if self.clip_output.is_empty() {
                    continue;
                }

                let d0 = p2[1] - p3[1];
                let d1 = p3[0] - p2[0];
                let d2 = p1[0] - p3[0];
                let d4 = p3[1] - p1[1];
                let d = 1.0 / (d0 * d2 + d1 * (p1[1] - p3[1]));
                for xy in self.clip_output.chunks_exact(2) {
                    let (x, y) = (xy[0], xy[1]);
                    out.vertices.extend([x, y]);
                    let c0 = x - p3[0];
                    let c1 = y - p3[1];
                    let a = (d0 * c0 + d1 * c1) * d;
                    let b = (d4 * c0 + d2 * c1) * d;
                    let c = 1.0 - a - b;
                    out.uvs.extend([
                        uv1[0] * a + uv2[0] * b + uv3[0] * c,
                        uv1[1] * a + uv2[1] * b + uv3[1] * c,
                    ]);
                }

                out.push_colors(self.clip_output.len() / 2, light, dark);
                let last = (self.clip_output.len() / 2 - 1) as u16;
                for ii in 1..last {
                    out.triangles.extend([index, index + ii, index + ii + 1]);
                }
                index = index.wrapping_add(last + 1);
            }
        }
        &self.clipped
    }
}

/// Sutherland-Hodgman clip of one triangle against a closed convex polygon. Returns false if
/// the triangle is entirely inside; otherwise `output` holds the clipped polygon, empty when
/// nothing remains.
fn clip_triangle(
    p1: [f32; 2],
    p2: [f32; 2],
    p3: [f32; 2],
    clipping_area: &[f32],
    output: &mut Vec<f32>,
    scratch: &mut Vec<f32>,
) -> bool {
    let mut clipped = false;
    let mut input = std::mem::take(scratch);
    input.clear();
    input.extend(p1.into_iter().chain(p2).chain(p3).chain(p1));
    let mut result = std::mem::take(output);
    result.clear();

    let last_edge = clipping_area.len() - 4;
    let mut i = 0;
    loop {
        let edge_x = clipping_area[i];
        let edge_y = clipping_area[i + 1];
        let ex = edge_x - clipping_area[i + 2];
        let ey = edge_y - clipping_area[i + 3];

        let output_start = result.len();
        for segment in input.windows(4).step_by(2) {
            let (x, y, x2, y2) = (segment[0], segment[1], segment[2], segment[3]);
            let inside2 = ey * (edge_x - x2) > ex * (edge_y - y2);
            let s1 = ey * (edge_x - x) - ex * (edge_y - y);
            let (ix, iy) = (x2 - x, y2 - y);
            let t = s1 / (ix * ey - iy * ex);
            if s1 > 0.0 {
                if inside2 {
                    result.extend([x2, y2]);
                    continue;
                }
                // Leaving the edge.
                if (0.0..=1.0).contains(&t) {
                    result.extend([x + ix * t, y + iy * t]);
                } else {
                    result.extend([x2, y2]);
                    continue;
                }
            } else if inside2 {
                // Entering the edge.
                if (0.0..=1.0).contains(&t) {
                    result.extend([x + ix * t, y + iy * t, x2, y2]);
                } else {
                    result.extend([x2, y2]);
                    continue;
                }
            }
            clipped = true;
        }

        if output_start == result.len() {
            // Entirely outside this edge.
            result.clear();
            *output = result;
            *scratch = input;
            return true;
        }
        result.extend([result[0], result[1]]);
        if i == last_edge {
            break;
        }
        std::mem::swap(&mut input, &mut result);
        result.clear();
        i += 2;
    }

    result.truncate(result.len() - 2);
    *output = result;
    *scratch = input;
    clipped
}
