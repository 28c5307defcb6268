use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Write,
    path::PathBuf,
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::{debug, info, warn};

use crate::{
    datatypes::{Element, Marker, Mesh, Vertex},
    error::{FlowError, Result},
    geometry::{on_segment, Geometry},
};

/// Relative tolerance used to decide whether a node lies on a boundary segment
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Gmsh element type id of a 2-node line
const GMSH_LINE: usize = 1;
/// Gmsh element type id of a 3-node triangle
const GMSH_TRIANGLE: usize = 2;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Turns a polygon into linear triangles
pub trait Mesher: Send + Sync {
    /// Triangulates `geometry` with elements no larger than `el_size_factor`
    fn mesh(&self, geometry: &Geometry, el_size_factor: f64) -> Result<Mesh>;
}

/// Available mesher implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MesherKind {
    /// Built-in grid mesher for rectilinear polygons
    #[default]
    Structured,
    /// External Gmsh executable
    Gmsh,
}

fn check_size_factor(el_size_factor: f64) -> Result<()> {
    if !(el_size_factor > 0.0) || !el_size_factor.is_finite() {
        return Err(FlowError::Mesher(format!(
            "Element size factor must be positive, got {el_size_factor}"
        )));
    }
    Ok(())
}

/// Collects the nodes lying on each marked segment of the geometry
fn mark_boundary(geometry: &Geometry, nodes: &[Vertex]) -> BTreeMap<Marker, BTreeSet<usize>> {
    let tolerance = BOUNDARY_TOLERANCE * geometry.extent();
    let mut boundary: BTreeMap<Marker, BTreeSet<usize>> = BTreeMap::new();

    for segment in &geometry.segments {
        let Some(marker) = segment.marker else {
            continue;
        };
        let (a, b) = geometry.segment_endpoints(segment);
        let set = boundary.entry(marker).or_default();

        for (i, node) in nodes.iter().enumerate() {
            if on_segment(*node, a, b, tolerance) {
                set.insert(i);
            }
        }
    }

    boundary
}

/// Signed area of a triangle, positive when counter-clockwise
pub fn signed_area(v0: Vertex, v1: Vertex, v2: Vertex) -> f64 {
    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Grid mesher for polygons whose edges are all axis aligned.
///
/// Grid lines pass through every vertex coordinate, so the polygon boundary
/// is resolved exactly and every cell is either fully inside or fully
/// outside the domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredMesher;

impl StructuredMesher {
    /// Sorted grid coordinates along one axis. Every breakpoint is kept and
    /// each interval is split into parts no longer than `size`.
    fn grid_lines(mut breakpoints: Vec<f64>, size: f64, tolerance: f64) -> Vec<f64> {
        breakpoints.sort_by(|a, b| a.total_cmp(b));
        breakpoints.dedup_by(|a, b| (*a - *b).abs() <= tolerance);

        let mut lines = Vec::with_capacity(breakpoints.len());
        lines.push(breakpoints[0]);

        for pair in breakpoints.windows(2) {
            let length = pair[1] - pair[0];
            let parts = usize::max(1, (length / size - 1e-9).ceil() as usize);
            for k in 1..parts {
                lines.push(pair[0] + length * k as f64 / parts as f64);
            }
            lines.push(pair[1]);
        }

        lines
    }
}

impl Mesher for StructuredMesher {
    fn mesh(&self, geometry: &Geometry, el_size_factor: f64) -> Result<Mesh> {
        check_size_factor(el_size_factor)?;

        for segment in &geometry.segments {
            let (a, b) = geometry.segment_endpoints(segment);
            if a.x != b.x && a.y != b.y {
                return Err(FlowError::Mesher(format!(
                    "Structured mesher only supports axis aligned edges, \
                     segment {}-{} is slanted",
                    segment.start, segment.end
                )));
            }
        }

        let tolerance = BOUNDARY_TOLERANCE * geometry.extent();
        let xs = Self::grid_lines(
            geometry.vertices.iter().map(|v| v.x).collect(),
            el_size_factor,
            tolerance,
        );
        let ys = Self::grid_lines(
            geometry.vertices.iter().map(|v| v.y).collect(),
            el_size_factor,
            tolerance,
        );
        debug!("structured grid of {} x {} lines", xs.len(), ys.len());

        let nx = xs.len();
        let mut grid_ids: Vec<Option<usize>> = vec![None; nx * ys.len()];
        let mut nodes: Vec<Vertex> = Vec::new();
        let mut elements: Vec<Element> = Vec::new();

        let mut node_id = |i: usize, j: usize, nodes: &mut Vec<Vertex>| -> usize {
            *grid_ids[j * nx + i].get_or_insert_with(|| {
                nodes.push(Vertex { x: xs[i], y: ys[j] });
                nodes.len() - 1
            })
        };

        for j in 0..ys.len() - 1 {
            for i in 0..nx - 1 {
                let center = Vertex {
                    x: 0.5 * (xs[i] + xs[i + 1]),
                    y: 0.5 * (ys[j] + ys[j + 1]),
                };
                if !geometry.contains(center) {
                    continue;
                }

                let n00 = node_id(i, j, &mut nodes);
                let n10 = node_id(i + 1, j, &mut nodes);
                let n11 = node_id(i + 1, j + 1, &mut nodes);
                let n01 = node_id(i, j + 1, &mut nodes);

                elements.push(Element {
                    nodes: [n00, n10, n11],
                });
                elements.push(Element {
                    nodes: [n00, n11, n01],
                });
            }
        }

        if elements.is_empty() {
            return Err(FlowError::Mesher(
                "Structured mesher produced no elements".to_owned(),
            ));
        }

        let boundary = mark_boundary(geometry, &nodes);

        info!(
            "meshed {} nodes and {} elements",
            nodes.len(),
            elements.len()
        );

        Ok(Mesh {
            nodes,
            elements,
            boundary,
        })
    }
}

/// Mesher that shells out to Gmsh
#[derive(Debug, Clone)]
pub struct GmshMesher {
    pub executable: PathBuf,
    /// Directory for the temporary .geo and .msh files
    pub work_dir: PathBuf,
}

impl Default for GmshMesher {
    fn default() -> Self {
        GmshMesher {
            executable: PathBuf::from("gmsh"),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl GmshMesher {
    pub fn new(executable: PathBuf) -> GmshMesher {
        GmshMesher {
            executable,
            ..Default::default()
        }
    }

    /// Runs Gmsh on a .geo file and returns the contents of the .msh output
    fn compute_mesh(&self, geo_contents: &str) -> Result<String> {
        let stem = format!(
            "groundflow-{}-{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let geo_filepath = self.work_dir.join(format!("{stem}.geo"));
        let msh_filepath = self.work_dir.join(format!("{stem}.msh"));

        std::fs::write(&geo_filepath, geo_contents).map_err(|err| {
            FlowError::Mesher(format!(
                "Failed to create {}: {err}",
                geo_filepath.display()
            ))
        })?;

        debug!("running {}", self.executable.display());
        let output = std::process::Command::new(&self.executable)
            .arg(&geo_filepath)
            .arg("-2")
            .arg("-format")
            .arg("msh4")
            .arg("-o")
            .arg(&msh_filepath)
            .output();

        if let Err(err) = std::fs::remove_file(&geo_filepath) {
            warn!("failed to delete {}: {err}", geo_filepath.display());
        }

        let output = match output {
            Ok(out) => out,
            Err(err) => {
                return Err(FlowError::Mesher(format!("Gmsh failed to start: {err}")));
            }
        };
        if !output.status.success() {
            return Err(FlowError::Mesher(format!(
                "Gmsh exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let contents = std::fs::read_to_string(&msh_filepath).map_err(|err| {
            FlowError::Mesher(format!("Unable to open generated mesh file: {err}"))
        })?;
        if let Err(err) = std::fs::remove_file(&msh_filepath) {
            warn!("failed to delete {}: {err}", msh_filepath.display());
        }

        Ok(contents)
    }
}

impl Mesher for GmshMesher {
    fn mesh(&self, geometry: &Geometry, el_size_factor: f64) -> Result<Mesh> {
        check_size_factor(el_size_factor)?;

        let geo = build_geo(geometry, el_size_factor);
        let contents = self.compute_mesh(&geo)?;
        let mesh = parse_mesh(&contents, geometry)?;

        info!(
            "loaded {} nodes and {} elements from gmsh",
            mesh.nodes.len(),
            mesh.elements.len()
        );

        Ok(mesh)
    }
}

/// Writes a Gmsh .geo script for the polygon. Segment `i` becomes curve
/// `i + 1` so boundary markers can be recovered from the curve tags.
pub fn build_geo(geometry: &Geometry, el_size_factor: f64) -> String {
    let mut geo = String::new();

    // writing into a String cannot fail
    let _ = writeln!(geo, "// Define points");
    for (i, vertex) in geometry.vertices.iter().enumerate() {
        let _ = writeln!(
            geo,
            "Point({}) = {{ {}, {}, 0, {} }};",
            i + 1,
            vertex.x,
            vertex.y,
            el_size_factor
        );
    }

    let _ = writeln!(geo, "\n// Connect points");
    for (i, segment) in geometry.segments.iter().enumerate() {
        let _ = writeln!(
            geo,
            "Line({}) = {{ {}, {} }};",
            i + 1,
            segment.start + 1,
            segment.end + 1
        );
    }

    let loop_ids: Vec<String> = (1..=geometry.segments.len())
        .map(|i| i.to_string())
        .collect();
    let _ = writeln!(geo, "\n// Register loop");
    let _ = writeln!(geo, "Curve Loop(1) = {{ {} }};", loop_ids.join(", "));

    let _ = writeln!(geo, "\n// Define surface");
    let _ = writeln!(geo, "Plane Surface(1) = {{ 1 }};");

    let _ = write!(
        geo,
        "\n// Define Mesh Settings\n\
         Mesh.ElementOrder = 1;\n\
         Mesh.Algorithm = 6;\n\
         Mesh.CharacteristicLengthMax = {el_size_factor};\n"
    );

    geo
}

enum MeshParseState {
    Nodes,
    Elements,
    Limbo,
}

fn parse_numbers<T: FromStr>(line: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| {
                FlowError::Mesher(format!("Unexpected value '{token}' in mesh data"))
            })
        })
        .collect()
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| FlowError::Mesher("Mesh file ended inside a data block".to_owned()))
}

/// Parses the `$Nodes` and `$Elements` sections of a Gmsh msh 4 file.
///
/// Triangles become elements. Line elements on a curve whose segment carries
/// a marker add their nodes to that marker's set.
pub fn parse_mesh(contents: &str, geometry: &Geometry) -> Result<Mesh> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines().map(|l| l.trim());

    let mut vertices_by_tag: BTreeMap<usize, Vertex> = BTreeMap::new();
    let mut triangles_by_tag: Vec<[usize; 3]> = Vec::new();
    let mut marked_by_tag: BTreeMap<Marker, BTreeSet<usize>> = BTreeMap::new();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_numbers(line)?;
                if block.len() != 4 {
                    return Err(FlowError::Mesher(format!(
                        "Malformed node block header '{line}'"
                    )));
                }
                let num_nodes_local = block[3];

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> = parse_numbers(next_line(&mut lines)?)?;
                    match tag.first() {
                        Some(t) => node_tags.push(*t),
                        None => {
                            return Err(FlowError::Mesher("Empty node tag line".to_owned()))
                        }
                    }
                }

                for tag in node_tags {
                    let coords: Vec<f64> = parse_numbers(next_line(&mut lines)?)?;
                    if coords.len() < 2 {
                        return Err(FlowError::Mesher(format!(
                            "Node {tag} has fewer than two coordinates"
                        )));
                    }
                    vertices_by_tag.insert(
                        tag,
                        Vertex {
                            x: coords[0],
                            y: coords[1],
                        },
                    );
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let block: Vec<usize> = parse_numbers(line)?;
                if block.len() != 4 {
                    return Err(FlowError::Mesher(format!(
                        "Malformed element block header '{line}'"
                    )));
                }
                let (entity_dim, entity_tag, element_type, num_elements) =
                    (block[0], block[1], block[2], block[3]);

                let marker = match entity_dim {
                    1 => entity_tag
                        .checked_sub(1)
                        .and_then(|i| geometry.segments.get(i))
                        .and_then(|s| s.marker),
                    _ => None,
                };

                if entity_dim == 2 && element_type != GMSH_TRIANGLE {
                    return Err(FlowError::Mesher(format!(
                        "Unsupported surface element type {element_type}, expected linear triangles"
                    )));
                }

                for _ in 0..num_elements {
                    let data: Vec<usize> = parse_numbers(next_line(&mut lines)?)?;

                    if entity_dim == 2 {
                        if data.len() < 4 {
                            return Err(FlowError::Mesher(format!(
                                "Triangle {} has fewer than three nodes",
                                data.first().copied().unwrap_or_default()
                            )));
                        }
                        triangles_by_tag.push([data[1], data[2], data[3]]);
                    } else if let (Some(marker), GMSH_LINE) = (marker, element_type) {
                        marked_by_tag
                            .entry(marker)
                            .or_default()
                            .extend(data.iter().skip(1).copied());
                    }
                }
            }
        }
    }

    // Gmsh tags are 1-based and may have gaps, renumber densely
    let index_of: HashMap<usize, usize> = vertices_by_tag
        .keys()
        .enumerate()
        .map(|(i, tag)| (*tag, i))
        .collect();
    let nodes: Vec<Vertex> = vertices_by_tag.into_values().collect();

    let lookup = |tag: usize| -> Result<usize> {
        index_of.get(&tag).copied().ok_or_else(|| {
            FlowError::Mesher(format!("Element references unknown node {tag}"))
        })
    };

    let mut elements: Vec<Element> = Vec::with_capacity(triangles_by_tag.len());
    for tags in triangles_by_tag {
        let mut element = Element {
            nodes: [lookup(tags[0])?, lookup(tags[1])?, lookup(tags[2])?],
        };
        let [v0, v1, v2] = element.nodes.map(|i| nodes[i]);
        if signed_area(v0, v1, v2) < 0.0 {
            element.nodes.swap(1, 2);
        }
        elements.push(element);
    }

    if elements.is_empty() {
        return Err(FlowError::Mesher("Mesh file contains no triangles".to_owned()));
    }

    let mut boundary: BTreeMap<Marker, BTreeSet<usize>> = BTreeMap::new();
    for (marker, tags) in marked_by_tag {
        let set = boundary.entry(marker).or_default();
        for tag in tags {
            set.insert(lookup(tag)?);
        }
    }

    Ok(Mesh {
        nodes,
        elements,
        boundary,
    })
}

/// Builds the mesher selected on the command line
pub fn from_kind(kind: MesherKind, gmsh_executable: Option<PathBuf>) -> Box<dyn Mesher> {
    match kind {
        MesherKind::Structured => Box::new(StructuredMesher),
        MesherKind::Gmsh => match gmsh_executable {
            Some(path) => Box::new(GmshMesher::new(path)),
            None => Box::new(GmshMesher::default()),
        },
    }
}
