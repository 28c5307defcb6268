use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{
    datatypes::{SolvedModel, SweepResult},
    error::{FlowError, Result},
};

/// VTK cell type id of a linear triangle
const VTK_TRIANGLE: u8 = 5;

/// Writes the results of one solve to a visualization artifact
pub trait ResultExporter {
    /// Writes `solved` under `identifier` and returns the path written
    fn export(&self, identifier: &str, solved: &SolvedModel) -> Result<PathBuf>;
}

/// Writes VTK XML unstructured grid files (`.vtu`)
#[derive(Debug, Clone, Copy, Default)]
pub struct VtuExporter;

impl ResultExporter for VtuExporter {
    fn export(&self, identifier: &str, solved: &SolvedModel) -> Result<PathBuf> {
        let path = PathBuf::from(format!("{identifier}.vtu"));
        info!("exporting results to {}", path.display());

        let file = create(&path)?;
        let mut writer = BufWriter::new(file);
        write_vtu(&mut writer, solved)?;
        writer.flush().map_err(|err| export_error(&path, err))?;

        Ok(path)
    }
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|err| export_error(path, err))
}

fn export_error(path: &Path, err: impl std::fmt::Display) -> FlowError {
    FlowError::Export(format!("Failed to write {}: {err}", path.display()))
}

fn xml_error(err: impl std::fmt::Display) -> FlowError {
    FlowError::Export(format!("Failed to write vtu data: {err}"))
}

fn start<W: Write>(writer: &mut Writer<W>, tag: &str, attributes: &[(&str, &str)]) -> Result<()> {
    let mut element = BytesStart::new(tag);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer
        .write_event(Event::Start(element))
        .map_err(xml_error)
}

fn end<W: Write>(writer: &mut Writer<W>, tag: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)
}

fn data_array<W: Write>(
    writer: &mut Writer<W>,
    attributes: &[(&str, &str)],
    values: Vec<String>,
) -> Result<()> {
    let mut all = vec![("format", "ascii")];
    all.extend_from_slice(attributes);

    start(writer, "DataArray", &all)?;
    writer
        .write_event(Event::Text(BytesText::new(&values.join(" "))))
        .map_err(xml_error)?;
    end(writer, "DataArray")
}

/// Serializes a solved model as a VTK XML unstructured grid. Points get a
/// zero z coordinate and connectivity is 0-based.
pub fn write_vtu<W: Write>(inner: W, solved: &SolvedModel) -> Result<()> {
    let SolvedModel { mesh, result } = solved;
    let mut writer = Writer::new_with_indent(inner, b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(xml_error)?;

    start(
        &mut writer,
        "VTKFile",
        &[
            ("type", "UnstructuredGrid"),
            ("version", "0.1"),
            ("byte_order", "LittleEndian"),
        ],
    )?;
    start(&mut writer, "UnstructuredGrid", &[])?;

    let num_points = mesh.nodes.len().to_string();
    let num_cells = mesh.elements.len().to_string();
    start(
        &mut writer,
        "Piece",
        &[
            ("NumberOfPoints", num_points.as_str()),
            ("NumberOfCells", num_cells.as_str()),
        ],
    )?;

    start(&mut writer, "PointData", &[("Scalars", "potential")])?;
    data_array(
        &mut writer,
        &[("type", "Float64"), ("Name", "potential")],
        result.a.iter().map(|v| v.to_string()).collect(),
    )?;
    end(&mut writer, "PointData")?;

    start(
        &mut writer,
        "CellData",
        &[("Scalars", "flux magnitude"), ("Vectors", "flux")],
    )?;
    data_array(
        &mut writer,
        &[("type", "Float64"), ("Name", "flux magnitude")],
        result.eff_flux.iter().map(|v| v.to_string()).collect(),
    )?;
    data_array(
        &mut writer,
        &[
            ("type", "Float64"),
            ("Name", "flux"),
            ("NumberOfComponents", "3"),
        ],
        result
            .qs
            .iter()
            .map(|q| format!("{} {} 0", q[0], q[1]))
            .collect(),
    )?;
    end(&mut writer, "CellData")?;

    start(&mut writer, "Points", &[])?;
    data_array(
        &mut writer,
        &[("type", "Float64"), ("NumberOfComponents", "3")],
        mesh.nodes
            .iter()
            .map(|v| format!("{} {} 0", v.x, v.y))
            .collect(),
    )?;
    end(&mut writer, "Points")?;

    start(&mut writer, "Cells", &[])?;
    data_array(
        &mut writer,
        &[("type", "Int64"), ("Name", "connectivity")],
        mesh.elements
            .iter()
            .map(|e| format!("{} {} {}", e.nodes[0], e.nodes[1], e.nodes[2]))
            .collect(),
    )?;
    data_array(
        &mut writer,
        &[("type", "Int64"), ("Name", "offsets")],
        (1..=mesh.elements.len())
            .map(|i| (3 * i).to_string())
            .collect(),
    )?;
    data_array(
        &mut writer,
        &[("type", "UInt8"), ("Name", "types")],
        vec![VTK_TRIANGLE.to_string(); mesh.elements.len()],
    )?;
    end(&mut writer, "Cells")?;

    end(&mut writer, "Piece")?;
    end(&mut writer, "UnstructuredGrid")?;
    end(&mut writer, "VTKFile")?;

    writer
        .into_inner()
        .flush()
        .map_err(xml_error)
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `solved` - The solved model
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(solved: &SolvedModel, nodes_output: &Path, elements_output: &Path) -> Result<()> {
    let SolvedModel { mesh, result } = solved;

    let mut nodes_file = BufWriter::new(create(nodes_output)?);
    let node_err = |err: std::io::Error| export_error(nodes_output, err);

    writeln!(nodes_file, "node,x,y,potential,reaction").map_err(node_err)?;
    for (i, node) in mesh.nodes.iter().enumerate() {
        writeln!(
            nodes_file,
            "{i},{x},{y},{a},{r}",
            x = node.x,
            y = node.y,
            a = result.a[i],
            r = result.r[i],
        )
        .map_err(node_err)?;
    }
    nodes_file.flush().map_err(node_err)?;

    let mut elements_file = BufWriter::new(create(elements_output)?);
    let element_err = |err: std::io::Error| export_error(elements_output, err);

    writeln!(elements_file, "element,n0,n1,n2,qx,qy,eff_flux").map_err(element_err)?;
    for (i, element) in mesh.elements.iter().enumerate() {
        writeln!(
            elements_file,
            "{i},{n0},{n1},{n2},{qx},{qy},{eff}",
            n0 = element.nodes[0],
            n1 = element.nodes[1],
            n2 = element.nodes[2],
            qx = result.qs[i][0],
            qy = result.qs[i][1],
            eff = result.eff_flux[i],
        )
        .map_err(element_err)?;
    }
    elements_file.flush().map_err(element_err)?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

/// Writes the swept values and their maximum flux as CSV
pub fn write_sweep_summary(result: &SweepResult, path: &Path) -> Result<()> {
    let mut file = BufWriter::new(create(path)?);
    let err = |e: std::io::Error| export_error(path, e);

    writeln!(file, "{},max_flux", result.axis.letter()).map_err(err)?;
    for (value, max_flux) in result.range.iter().zip(&result.max_flux) {
        writeln!(file, "{value},{max_flux}").map_err(err)?;
    }
    file.flush().map_err(err)?;

    info!("wrote parameter study summary to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Element, Mesh, SolutionResult, SweepAxis, Vertex};

    fn small_solution() -> SolvedModel {
        SolvedModel {
            mesh: Mesh {
                nodes: vec![
                    Vertex { x: 0.0, y: 0.0 },
                    Vertex { x: 1.0, y: 0.0 },
                    Vertex { x: 1.0, y: 1.0 },
                    Vertex { x: 0.0, y: 1.0 },
                ],
                elements: vec![
                    Element { nodes: [0, 1, 2] },
                    Element { nodes: [0, 2, 3] },
                ],
                ..Default::default()
            },
            result: SolutionResult {
                a: vec![1.0, 0.0, 0.0, 1.0],
                r: vec![0.5, -0.5, -0.5, 0.5],
                gradients: vec![[-1.0, 0.0], [-1.0, 0.0]],
                qs: vec![[2.5, 0.0], [2.5, 0.0]],
                eff_flux: vec![2.5, 2.5],
            },
        }
    }

    #[test]
    fn vtu_contains_fields_and_topology() {
        let mut buffer: Vec<u8> = Vec::new();
        write_vtu(&mut buffer, &small_solution()).unwrap();
        let vtu = String::from_utf8(buffer).unwrap();

        assert!(vtu.starts_with("<?xml version=\"1.0\"?>"));
        assert!(vtu.contains("NumberOfPoints=\"4\" NumberOfCells=\"2\""));
        assert!(vtu.contains("Name=\"potential\">1 0 0 1</DataArray>"));
        assert!(vtu.contains("Name=\"flux magnitude\">2.5 2.5</DataArray>"));
        assert!(vtu.contains(">2.5 0 0 2.5 0 0</DataArray>"));
        assert!(vtu.contains(">0 0 0 1 0 0 1 1 0 0 1 0</DataArray>"));
        assert!(vtu.contains("Name=\"connectivity\">0 1 2 0 2 3</DataArray>"));
        assert!(vtu.contains("Name=\"offsets\">3 6</DataArray>"));
        assert!(vtu.contains("Name=\"types\">5 5</DataArray>"));
        assert!(vtu.trim_end().ends_with("</VTKFile>"));
    }

    #[test]
    fn exporter_appends_extension() {
        let base = std::env::temp_dir().join(format!("groundflow-export-{}", std::process::id()));
        let identifier = format!("{}_d001", base.display());

        let path = VtuExporter.export(&identifier, &small_solution()).unwrap();
        assert_eq!(path, PathBuf::from(format!("{identifier}.vtu")));
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn unwritable_target_is_export_error() {
        let res = VtuExporter.export("/nonexistent-dir/groundflow/out", &small_solution());
        assert!(matches!(res, Err(FlowError::Export(_))));
    }

    #[test]
    fn csv_tables_have_one_row_per_entity() {
        let dir = std::env::temp_dir();
        let nodes = dir.join(format!("groundflow-nodes-{}.csv", std::process::id()));
        let elements = dir.join(format!("groundflow-elements-{}.csv", std::process::id()));

        csv_output(&small_solution(), &nodes, &elements).unwrap();

        let nodes_csv = std::fs::read_to_string(&nodes).unwrap();
        let elements_csv = std::fs::read_to_string(&elements).unwrap();
        std::fs::remove_file(&nodes).unwrap();
        std::fs::remove_file(&elements).unwrap();

        assert_eq!(nodes_csv.lines().count(), 5);
        assert_eq!(nodes_csv.lines().nth(3), Some("2,1,1,0,-0.5"));
        assert_eq!(elements_csv.lines().count(), 3);
        assert_eq!(elements_csv.lines().nth(2), Some("1,0,2,3,2.5,0,2.5"));
    }

    #[test]
    fn sweep_summary_lists_each_step() {
        let path = std::env::temp_dir().join(format!("groundflow-summary-{}.csv", std::process::id()));
        let mut result = SweepResult::new(SweepAxis::Thickness, 2);
        result.range = vec![1.0, 2.0];
        result.max_flux = vec![3.5, 4.25];

        write_sweep_summary(&result, &path).unwrap();
        let summary = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(summary, "t,max_flux\n1,3.5\n2,4.25\n");
    }
}
