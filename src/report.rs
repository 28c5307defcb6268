use std::fmt;

use crate::{
    datatypes::SolvedModel,
    model::{ModelParameters, MODEL_VERSION},
};

const WIDTH: usize = 60;

/// Text summary of a single solve: echoed inputs, mesh size, maximum
/// effective flux, and per-node and per-element tables.
///
/// Node and element numbers in the tables are 1-based.
pub struct Report<'a> {
    pub model: &'a ModelParameters,
    pub solved: &'a SolvedModel,
}

impl<'a> Report<'a> {
    pub fn new(model: &'a ModelParameters, solved: &'a SolvedModel) -> Report<'a> {
        Report { model, solved }
    }
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "{:~^WIDTH$}", format!(" {title} "))
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.model;
        let mesh = &self.solved.mesh;
        let result = &self.solved.result;

        let banner = format!("Report of Groundwater flow | Version {MODEL_VERSION}");
        writeln!(f, "{:=^WIDTH$}", "")?;
        writeln!(f, "{banner:^WIDTH$}")?;
        writeln!(f, "{:=^WIDTH$}", "")?;

        section(f, "Model input")?;
        writeln!(f, "Element dimensions [m]")?;
        writeln!(f, "w: {}", model.w)?;
        writeln!(f, "h: {}", model.h)?;
        writeln!(f, "d: {}", model.d)?;
        writeln!(f, "t: {}", model.t)?;
        writeln!(f, "p: {}", model.p)?;
        writeln!(f)?;
        writeln!(f, "Permeability [m/day]")?;
        writeln!(f, "kx: {}", model.kx)?;
        writeln!(f, "ky: {}", model.ky)?;
        writeln!(f)?;
        writeln!(f, "Thickness [m]")?;
        writeln!(f, "ep: {:?}", model.ep)?;
        writeln!(f)?;
        writeln!(f, "Maximum element size [-]")?;
        writeln!(f, "el_size_factor: {}", model.el_size_factor)?;

        section(f, "Model output")?;
        writeln!(f, "Number of nodes [-]")?;
        writeln!(f, "nnode: {}", mesh.nodes.len())?;
        writeln!(f)?;
        writeln!(f, "Number of elements [-]")?;
        writeln!(f, "nelem: {}", mesh.elements.len())?;
        writeln!(f)?;
        writeln!(f, "Maximal effective flux [m^2/day]")?;
        writeln!(f, "Max eff_flux: {:.2}", result.max_flux())?;

        writeln!(f)?;
        writeln!(f, "Per Node")?;
        writeln!(
            f,
            "{:>6} {:>10} {:>10} {:>12}",
            "Node", "X [m]", "Y [m]", "Head [m]"
        )?;
        writeln!(f, "{:-<6} {:-<10} {:-<10} {:-<12}", "", "", "", "")?;
        for (i, node) in mesh.nodes.iter().enumerate() {
            let head = result.a.get(i).copied().unwrap_or(f64::NAN);
            writeln!(
                f,
                "{:>6} {:>10.2} {:>10.2} {:>12.2}",
                i + 1,
                node.x,
                node.y,
                head
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Per Element{:>38}", "[m^2/day]")?;
        writeln!(
            f,
            "{:>6} {:>6} {:>6} {:>6} {:>9} {:>9} {:>9}",
            "Elem", "n1", "n2", "n3", "qx", "qy", "eff"
        )?;
        writeln!(
            f,
            "{:-<6} {:-<6} {:-<6} {:-<6} {:-<9} {:-<9} {:-<9}",
            "", "", "", "", "", "", ""
        )?;
        for (i, element) in mesh.elements.iter().enumerate() {
            let [qx, qy] = result.qs.get(i).copied().unwrap_or([f64::NAN; 2]);
            let eff = result.eff_flux.get(i).copied().unwrap_or(f64::NAN);
            writeln!(
                f,
                "{:>6} {:>6} {:>6} {:>6} {:>9.2} {:>9.2} {:>9.2}",
                i + 1,
                element.nodes[0] + 1,
                element.nodes[1] + 1,
                element.nodes[2] + 1,
                qx,
                qy,
                eff
            )?;
        }

        writeln!(f, "{:=^WIDTH$}", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Element, Mesh, SolutionResult, Vertex};

    fn solved() -> SolvedModel {
        SolvedModel {
            mesh: Mesh {
                nodes: vec![
                    Vertex { x: 0.0, y: 0.0 },
                    Vertex { x: 1.0, y: 0.0 },
                    Vertex { x: 0.0, y: 1.0 },
                ],
                elements: vec![Element { nodes: [0, 1, 2] }],
                ..Default::default()
            },
            result: SolutionResult {
                a: vec![1.0, 0.0, 1.0],
                r: vec![0.0; 3],
                gradients: vec![[-1.0, 0.0]],
                qs: vec![[2.5, 0.0]],
                eff_flux: vec![2.5],
            },
        }
    }

    #[test]
    fn report_has_banner_and_counts() {
        let model = ModelParameters::default();
        let solved = solved();
        let text = Report::new(&model, &solved).to_string();

        assert!(text.contains("Report of Groundwater flow | Version 7"));
        assert!(text.contains("nnode: 3"));
        assert!(text.contains("nelem: 1"));
        assert!(text.contains("Max eff_flux: 2.50"));
        assert!(text.contains("kx: 20"));
        assert!(text.contains("ep: [1.0]"));
        assert!(text.lines().next().unwrap().chars().all(|c| c == '='));
    }

    #[test]
    fn tables_are_one_based() {
        let model = ModelParameters::default();
        let solved = solved();
        let text = Report::new(&model, &solved).to_string();

        let node_rows: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "Per Node")
            .skip(3)
            .take(3)
            .collect();
        assert_eq!(node_rows[0].split_whitespace().next(), Some("1"));
        assert_eq!(
            node_rows[1].split_whitespace().collect::<Vec<_>>(),
            vec!["2", "1.00", "0.00", "0.00"]
        );

        let element_row = text
            .lines()
            .skip_while(|l| !l.starts_with("Per Element"))
            .nth(3)
            .unwrap();
        assert_eq!(
            element_row.split_whitespace().collect::<Vec<_>>(),
            vec!["1", "1", "2", "3", "2.50", "0.00", "2.50"]
        );
    }
}
