//! Shape detectors over edge maps: circles, long straight segments, and
//! large quadrilaterals.
//!
//! All detectors return counts only. They are tuned for hand-held photos of
//! a single item, where a wheel or a box frame is the thing to catch.

#![allow(missing_docs)]

use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::hough::{LineDetectionOptions, detect_lines};
use imageproc::point::Point;

const EDGE: u8 = 255;

/// Gradient-voting circle detector parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleParams {
    /// Accumulator resolution divisor.
    pub dp: f64,
    /// Minimum distance between accepted centres.
    pub min_dist: f64,
    /// Upper Canny threshold; the lower one is half of it.
    pub canny_high: f32,
    /// Votes needed for a centre and edge support needed for its radius.
    pub threshold: u32,
    pub min_radius: u32,
    pub max_radius: u32,
    pub blur_sigma: f32,
}

impl Default for CircleParams {
    fn default() -> Self {
        Self {
            dp: 1.2,
            min_dist: 50.0,
            canny_high: 100.0,
            threshold: 40,
            min_radius: 30,
            max_radius: 300,
            blur_sigma: 2.0,
        }
    }
}

/// Centre candidates examined for a radius, strongest first.
const MAX_CENTRE_CANDIDATES: usize = 64;

/// Count near-circular outlines in `gray`.
#[must_use]
pub fn count_circles(gray: &GrayImage, params: &CircleParams) -> usize {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 || params.max_radius < params.min_radius {
        return 0;
    }

    let smooth = gaussian_blur_f32(gray, params.blur_sigma);
    let edges = canny(&smooth, params.canny_high / 2.0, params.canny_high);
    let gx = horizontal_sobel(&smooth);
    let gy = vertical_sobel(&smooth);

    let acc_w = (f64::from(width) / params.dp).ceil() as usize + 1;
    let acc_h = (f64::from(height) / params.dp).ceil() as usize + 1;
    let mut acc = vec![0u32; acc_w * acc_h];
    let mut edge_points = Vec::new();

    for (x, y, px) in edges.enumerate_pixels() {
        if px[0] != EDGE {
            continue;
        }
        let dx = f64::from(gx.get_pixel(x, y)[0]);
        let dy = f64::from(gy.get_pixel(x, y)[0]);
        let magnitude = dx.hypot(dy);
        if magnitude < 1.0 {
            continue;
        }
        let (ux, uy) = (dx / magnitude, dy / magnitude);
        let (fx, fy) = (f64::from(x), f64::from(y));
        edge_points.push((fx, fy));

        for sign in [-1.0, 1.0] {
            for r in params.min_radius..=params.max_radius {
                let cx = f64::from(r).mul_add(sign * ux, fx);
                let cy = f64::from(r).mul_add(sign * uy, fy);
                if cx < 0.0 || cy < 0.0 || cx >= f64::from(width) || cy >= f64::from(height) {
                    break;
                }
                let ax = (cx / params.dp) as usize;
                let ay = (cy / params.dp) as usize;
                acc[ay * acc_w + ax] += 1;
            }
        }
    }

    let mut centres = local_maxima(&acc, acc_w, acc_h, params.threshold);
    centres.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)).then(a.1.cmp(&b.1)));
    centres.truncate(MAX_CENTRE_CANDIDATES);

    let mut accepted: Vec<(f64, f64)> = Vec::new();
    for (_, ax, ay) in centres {
        let cx = (ax as f64 + 0.5) * params.dp;
        let cy = (ay as f64 + 0.5) * params.dp;
        let crowded = accepted
            .iter()
            .any(|(ox, oy)| (cx - ox).hypot(cy - oy) < params.min_dist);
        if crowded {
            continue;
        }
        if best_radius_support(&edge_points, cx, cy, params) >= params.threshold {
            accepted.push((cx, cy));
        }
    }
    accepted.len()
}

fn local_maxima(acc: &[u32], w: usize, h: usize, threshold: u32) -> Vec<(u32, usize, usize)> {
    let mut out = Vec::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let v = acc[y * w + x];
            if v <= threshold {
                continue;
            }
            // Strict on one side, lenient on the other, so plateaus yield one peak.
            if v > acc[y * w + x - 1]
                && v >= acc[y * w + x + 1]
                && v > acc[(y - 1) * w + x]
                && v >= acc[(y + 1) * w + x]
            {
                out.push((v, x, y));
            }
        }
    }
    out
}

fn best_radius_support(points: &[(f64, f64)], cx: f64, cy: f64, params: &CircleParams) -> u32 {
    let span = (params.max_radius - params.min_radius + 1) as usize;
    let mut hist = vec![0u32; span];
    for &(x, y) in points {
        let d = (x - cx).hypot(y - cy).round();
        if d < f64::from(params.min_radius) || d > f64::from(params.max_radius) {
            continue;
        }
        hist[d as usize - params.min_radius as usize] += 1;
    }
    hist.into_iter().max().unwrap_or(0)
}

/// Probabilistic-style segment detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentParams {
    pub vote_threshold: u32,
    pub suppression_radius: u32,
    pub min_length: u32,
    pub max_gap: u32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            vote_threshold: 80,
            suppression_radius: 8,
            min_length: 50,
            max_gap: 10,
        }
    }
}

/// Count straight edge segments at least `min_length` long.
///
/// Hough lines are found first, then each line is walked across the edge map
/// and split into runs wherever the gap exceeds `max_gap`.
#[must_use]
pub fn count_line_segments(edges: &GrayImage, params: &SegmentParams) -> usize {
    let (width, height) = edges.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    let lines = detect_lines(
        edges,
        LineDetectionOptions {
            vote_threshold: params.vote_threshold,
            suppression_radius: params.suppression_radius,
        },
    );
    let reach = f64::from(width).hypot(f64::from(height)).ceil() as i64;

    let is_edge = |x: f64, y: f64| -> bool {
        let (xi, yi) = (x.round() as i64, y.round() as i64);
        xi >= 0
            && yi >= 0
            && xi < i64::from(width)
            && yi < i64::from(height)
            && edges.get_pixel(xi as u32, yi as u32)[0] == EDGE
    };

    let mut segments = 0;
    for line in lines {
        let theta = f64::from(line.angle_in_degrees).to_radians();
        let (sin, cos) = theta.sin_cos();
        let (ox, oy) = (f64::from(line.r) * cos, f64::from(line.r) * sin);

        let mut run: Option<(i64, i64)> = None;
        for t in -reach..=reach {
            let tf = t as f64;
            let (x, y) = (tf.mul_add(-sin, ox), tf.mul_add(cos, oy));
            let hit = is_edge(x, y) || is_edge(x + cos, y + sin) || is_edge(x - cos, y - sin);
            if !hit {
                continue;
            }
            run = match run {
                Some((start, last)) if t - last <= i64::from(params.max_gap) => Some((start, t)),
                Some((start, last)) => {
                    if last - start >= i64::from(params.min_length) {
                        segments += 1;
                    }
                    Some((t, t))
                }
                None => Some((t, t)),
            };
        }
        if let Some((start, last)) = run {
            if last - start >= i64::from(params.min_length) {
                segments += 1;
            }
        }
    }
    segments
}

/// Count large, roughly square outer contours in an edge map.
#[must_use]
pub fn count_rectangles(edges: &GrayImage) -> usize {
    let total = f64::from(edges.width()) * f64::from(edges.height());
    if total == 0.0 {
        return 0;
    }
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter(|contour| {
            let area = polygon_area(&contour.points);
            if area < 500.0 {
                return false;
            }
            let perimeter = arc_length(&contour.points, true);
            let approx = approximate_polygon_dp(&contour.points, 0.04 * perimeter, true);
            if approx.len() != 4 {
                return false;
            }
            let (w, h) = bounding_size(&approx);
            let aspect = if h > 0 { f64::from(w) / f64::from(h) } else { 0.0 };
            (0.5..=2.0).contains(&aspect) && area > total * 0.05
        })
        .count()
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (twice as f64 / 2.0).abs()
}

fn bounding_size(points: &[Point<i32>]) -> (i32, i32) {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    (max_x - min_x + 1, max_y - min_y + 1)
}
