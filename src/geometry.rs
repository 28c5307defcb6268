use crate::{
    datatypes::{Marker, Vertex},
    model::ModelParameters,
};

/// Straight boundary segment between two polygon vertices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub marker: Option<Marker>,
}

/// Closed polygon of the flow domain. Segment `i` joins vertex `i` to vertex
/// `i + 1`, the last one closes back to vertex 0.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub vertices: Vec<Vertex>,
    pub segments: Vec<Segment>,
}

impl Geometry {
    /// Builds the ground rectangle with the dividing wall cut down from the
    /// middle of the top edge.
    ///
    /// The top edge right of the wall is the open side and the top edge left
    /// of the wall is the dam side. The wall faces, the wall foot, and the
    /// outer sides are left unmarked and act as impermeable boundaries.
    pub fn from_model(model: &ModelParameters) -> Geometry {
        let (w, h, d, t) = (model.w, model.h, model.d, model.t);

        let vertices = vec![
            Vertex { x: 0.0, y: 0.0 },
            Vertex { x: w, y: 0.0 },
            Vertex { x: w, y: h },
            Vertex { x: (w + t) / 2.0, y: h },
            Vertex { x: (w + t) / 2.0, y: h - d },
            Vertex { x: (w - t) / 2.0, y: h - d },
            Vertex { x: (w - t) / 2.0, y: h },
            Vertex { x: 0.0, y: h },
        ];

        let markers = [
            None,
            None,
            Some(Marker::OpenSide),
            None,
            None,
            None,
            Some(Marker::DamSide),
            None,
        ];

        let segments = markers
            .iter()
            .enumerate()
            .map(|(i, marker)| Segment {
                start: i,
                end: (i + 1) % vertices.len(),
                marker: *marker,
            })
            .collect();

        Geometry { vertices, segments }
    }

    pub fn segment_endpoints(&self, segment: &Segment) -> (Vertex, Vertex) {
        (self.vertices[segment.start], self.vertices[segment.end])
    }

    /// Signed area, positive for a counter-clockwise polygon
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        0.5 * (0..n)
            .map(|i| {
                let a = self.vertices[i];
                let b = self.vertices[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum::<f64>()
    }

    /// Even-odd ray casting test. Points exactly on the boundary may land on
    /// either side.
    pub fn contains(&self, point: Vertex) -> bool {
        let n = self.vertices.len();
        let mut inside = false;

        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }

    /// Length of the longest side of the bounding box
    pub fn extent(&self) -> f64 {
        let (mut x_min, mut x_max) = (f64::MAX, f64::MIN);
        let (mut y_min, mut y_max) = (f64::MAX, f64::MIN);
        for v in &self.vertices {
            x_min = x_min.min(v.x);
            x_max = x_max.max(v.x);
            y_min = y_min.min(v.y);
            y_max = y_max.max(v.y);
        }
        f64::max(x_max - x_min, y_max - y_min)
    }
}

/// True if `point` lies on the segment `a`-`b` within `tolerance`
pub fn on_segment(point: Vertex, a: Vertex, b: Vertex, tolerance: f64) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length = f64::sqrt(dx * dx + dy * dy);
    if length == 0.0 {
        return f64::hypot(point.x - a.x, point.y - a.y) <= tolerance;
    }

    // distance from the supporting line
    let cross = (dx * (point.y - a.y) - dy * (point.x - a.x)) / length;
    if cross.abs() > tolerance {
        return false;
    }

    let along = (dx * (point.x - a.x) + dy * (point.y - a.y)) / length;
    along >= -tolerance && along <= length + tolerance
}
