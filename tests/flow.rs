use std::{cell::RefCell, path::PathBuf};

use groundflow::{
    datatypes::{Marker, SolvedModel, SweepAxis},
    export::ResultExporter,
    model::ModelParameters,
    progress::RecordingObserver,
    solver::SolverKind,
    sweep::run_sweep,
    Pipeline, Result,
};

#[derive(Default)]
struct MemoryExporter {
    max_flux: RefCell<Vec<(String, f64)>>,
}

impl ResultExporter for MemoryExporter {
    fn export(&self, identifier: &str, solved: &SolvedModel) -> Result<PathBuf> {
        self.max_flux
            .borrow_mut()
            .push((identifier.to_owned(), solved.result.max_flux()));
        Ok(PathBuf::from(format!("{identifier}.vtu")))
    }
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("groundflow-it-{}-{name}", std::process::id()))
}

#[test]
fn standard_model_respects_boundary_heads() {
    let model = ModelParameters::default();
    let solved = Pipeline::default().execute(&model, None).unwrap();

    let open: Vec<usize> = solved.mesh.marked_nodes(Marker::OpenSide).collect();
    let dam: Vec<usize> = solved.mesh.marked_nodes(Marker::DamSide).collect();
    assert!(!open.is_empty());
    assert!(!dam.is_empty());
    assert!(open.iter().all(|n| !dam.contains(n)));

    for n in open {
        assert_eq!(solved.result.a[n], 0.0);
    }
    for n in dam {
        assert_eq!(solved.result.a[n], 10.0);
    }

    // interior potentials stay between the two fixed heads
    for a in &solved.result.a {
        assert!(*a >= -1e-9 && *a <= 10.0 + 1e-9);
    }
}

#[test]
fn reactions_vanish_at_free_nodes() {
    let solved = Pipeline::default()
        .execute(&ModelParameters::default(), None)
        .unwrap();

    let fixed: Vec<usize> = solved
        .mesh
        .marked_nodes(Marker::OpenSide)
        .chain(solved.mesh.marked_nodes(Marker::DamSide))
        .collect();

    let scale = solved.result.r.iter().fold(0.0_f64, |m, r| m.max(r.abs()));
    assert!(scale > 0.0);

    for (n, r) in solved.result.r.iter().enumerate() {
        if !fixed.contains(&n) {
            assert!(r.abs() <= 1e-8 * scale, "node {n} has reaction {r}");
        }
    }

    // inflow on the dam side balances outflow on the open side
    let total: f64 = fixed.iter().map(|n| solved.result.r[*n]).sum();
    assert!(total.abs() <= 1e-8 * scale);
}

#[test]
fn effective_flux_is_flux_magnitude() {
    let solved = Pipeline::default()
        .execute(&ModelParameters::default(), None)
        .unwrap();

    assert_eq!(solved.result.eff_flux.len(), solved.mesh.elements.len());
    assert_eq!(solved.result.qs.len(), solved.mesh.elements.len());
    for (q, eff) in solved.result.qs.iter().zip(&solved.result.eff_flux) {
        assert!((eff - f64::hypot(q[0], q[1])).abs() <= 1e-12 * eff.max(1.0));
    }
    assert!(solved.result.max_flux() > 0.0);
}

#[test]
fn solvers_agree_on_standard_model() {
    let model = ModelParameters::default();
    let direct = Pipeline::default().execute(&model, None).unwrap();
    let iterative = Pipeline {
        solver: SolverKind::ConjugateGradient,
        ..Default::default()
    }
    .execute(&model, None)
    .unwrap();

    for (a, b) in direct.result.a.iter().zip(&iterative.result.a) {
        assert!((a - b).abs() < 1e-3, "{a} != {b}");
    }
}

#[test]
fn observer_does_not_change_results() {
    let model = ModelParameters::default();
    let observer = RecordingObserver::default();

    let quiet = Pipeline::default().execute(&model, None).unwrap();
    let watched = Pipeline::default().execute(&model, Some(&observer)).unwrap();

    assert_eq!(quiet.result.a, watched.result.a);
    assert_eq!(quiet.result.eff_flux, watched.result.eff_flux);
    assert_eq!(observer.events.borrow().last().unwrap().0, 100);
}

#[test]
fn depth_sweep_covers_range_and_restores_model() {
    let mut model = ModelParameters::default();
    model.el_size_factor = 2.0;
    let before = model.clone();
    let exporter = MemoryExporter::default();

    let result = run_sweep(&Pipeline::default(), &mut model, &exporter, "study", None).unwrap();

    assert_eq!(model, before);
    assert_eq!(result.axis, SweepAxis::Depth);
    assert_eq!(result.range.len(), 10);
    assert_eq!(result.range[0], 2.0);
    assert_eq!(result.range[9], 8.0);
    assert_eq!(result.max_flux.len(), 10);
    assert_eq!(result.exports.len(), 10);
    assert!(result.failed_exports.is_empty());

    let exported = exporter.max_flux.borrow();
    assert_eq!(exported[0].0, "study_d001");
    assert_eq!(exported[9].0, "study_d010");
    for ((_, exported_flux), flux) in exported.iter().zip(&result.max_flux) {
        assert_eq!(exported_flux, flux);
    }
}

#[test]
fn sweep_results_do_not_depend_on_observer() {
    let mut model = ModelParameters::default();
    model.el_size_factor = 2.0;
    model.sweep.steps = 3;
    let observer = RecordingObserver::default();

    let quiet = run_sweep(
        &Pipeline::default(),
        &mut model,
        &MemoryExporter::default(),
        "quiet",
        None,
    )
    .unwrap();
    let watched = run_sweep(
        &Pipeline::default(),
        &mut model,
        &MemoryExporter::default(),
        "watched",
        Some(&observer),
    )
    .unwrap();

    assert_eq!(quiet.range, watched.range);
    assert_eq!(quiet.max_flux, watched.max_flux);
}

#[test]
fn saved_model_solves_identically() {
    let path = scratch("model.json");
    let mut model = ModelParameters::default();
    model.d = 3.5;
    model.kx = 12.5;
    model.save(&path).unwrap();

    let loaded = ModelParameters::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, model);

    let a = Pipeline::default().execute(&model, None).unwrap();
    let b = Pipeline::default().execute(&loaded, None).unwrap();
    assert_eq!(a.result.a, b.result.a);
}
