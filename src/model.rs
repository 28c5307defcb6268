use std::path::Path;

use json::JsonValue;
use log::info;

use crate::{
    datatypes::SweepAxis,
    error::{FlowError, Result},
};

/// Version tag written to and required from model files
pub const MODEL_VERSION: u32 = 7;

/// Sweep configuration attached to a model
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub axis: SweepAxis,
    /// Final wall depth of a depth sweep
    pub d_end: f64,
    /// Final wall thickness of a thickness sweep
    pub t_end: f64,
    pub steps: usize,
}

/// Input of the flow model: domain size, wall geometry, head, and material
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    /// Width of the ground
    pub w: f64,
    /// Height of the ground
    pub h: f64,
    /// Depth of the dividing wall
    pub d: f64,
    /// Thickness of the dividing wall
    pub t: f64,
    /// Pressure head on the dam side of the wall
    pub p: f64,
    pub kx: f64,
    pub ky: f64,
    /// Element thickness, first entry is used
    pub ep: Vec<f64>,
    /// Maximum element edge length
    pub el_size_factor: f64,
    pub sweep: SweepSpec,
}

impl Default for ModelParameters {
    fn default() -> Self {
        ModelParameters {
            w: 50.0,
            h: 10.0,
            d: 2.0,
            t: 1.0,
            p: 10.0,
            kx: 20.0,
            ky: 20.0,
            ep: vec![1.0],
            el_size_factor: 1.0,
            sweep: SweepSpec {
                axis: SweepAxis::Depth,
                d_end: 8.0,
                t_end: 10.0,
                steps: 10,
            },
        }
    }
}

impl ModelParameters {
    /// True if `w > t`, `h > d` and every scalar input is strictly positive
    pub fn valid_model(&self) -> bool {
        let positive = [self.w, self.h, self.d, self.t, self.p, self.kx, self.ky];

        self.w > self.t && self.h > self.d && positive.iter().all(|v| *v > 0.0)
    }

    /// True if the selected sweep axis ends strictly between its start value
    /// and the domain size, with at least one step.
    ///
    /// Only the selected axis is checked: a depth study never looks at `t_end`.
    pub fn valid_sweep(&self) -> bool {
        if self.sweep.steps < 1 {
            return false;
        }

        match self.sweep.axis {
            SweepAxis::Depth => self.h > self.sweep.d_end && self.sweep.d_end > self.d,
            SweepAxis::Thickness => self.w > self.sweep.t_end && self.sweep.t_end > self.t,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.valid_model() {
            return Err(FlowError::Input(format!(
                "Invalid model: requires w > t > 0, h > d > 0 and positive p, kx, ky \
                 (w={}, h={}, d={}, t={}, p={}, kx={}, ky={})",
                self.w, self.h, self.d, self.t, self.p, self.kx, self.ky
            )));
        }
        Ok(())
    }

    pub fn validate_sweep(&self) -> Result<()> {
        self.validate()?;

        if !self.valid_sweep() {
            let reason = match self.sweep.axis {
                SweepAxis::Depth => format!(
                    "depth sweep requires h > dEnd > d (h={}, dEnd={}, d={})",
                    self.h, self.sweep.d_end, self.d
                ),
                SweepAxis::Thickness => format!(
                    "thickness sweep requires w > tEnd > t (w={}, tEnd={}, t={})",
                    self.w, self.sweep.t_end, self.t
                ),
            };
            return Err(FlowError::Input(format!(
                "Invalid parameter study: {reason}, steps={}",
                self.sweep.steps
            )));
        }
        Ok(())
    }

    /// Element thickness used by the element kernels
    pub fn thickness(&self) -> Result<f64> {
        match self.ep.first() {
            Some(ep) if *ep > 0.0 => Ok(*ep),
            Some(ep) => Err(FlowError::Input(format!(
                "Element thickness must be positive, got {ep}"
            ))),
            None => Err(FlowError::Input("Element thickness list is empty".to_owned())),
        }
    }

    /// Serializes every field into a JSON object
    pub fn to_json(&self) -> JsonValue {
        let mut data = JsonValue::new_object();

        data["version"] = MODEL_VERSION.into();
        data["w"] = self.w.into();
        data["h"] = self.h.into();
        data["d"] = self.d.into();
        data["t"] = self.t.into();
        data["p"] = self.p.into();
        data["kx"] = self.kx.into();
        data["ky"] = self.ky.into();
        data["ep"] = self.ep.clone().into();
        data["el_size_factor"] = self.el_size_factor.into();

        data["dStudy"] = (self.sweep.axis == SweepAxis::Depth).into();
        data["dEnd"] = self.sweep.d_end.into();
        data["tEnd"] = self.sweep.t_end.into();
        data["steps"] = self.sweep.steps.into();

        data
    }

    /// Parses a model from a JSON object. The version tag must match
    /// [`MODEL_VERSION`].
    pub fn from_json(data: &JsonValue) -> Result<ModelParameters> {
        if !data.is_object() {
            return Err(FlowError::Persistence(
                "Model file is not a JSON object".to_owned(),
            ));
        }

        match data["version"].as_u32() {
            Some(MODEL_VERSION) => (),
            Some(v) => {
                return Err(FlowError::Persistence(format!(
                    "Model file is from version {v}, expected version {MODEL_VERSION}"
                )))
            }
            None => {
                return Err(FlowError::Persistence(
                    "Model file missing version field".to_owned(),
                ))
            }
        }

        let ep_json = &data["ep"];
        if !ep_json.is_array() {
            return Err(FlowError::Persistence(
                "Model file missing ep list".to_owned(),
            ));
        }
        let mut ep: Vec<f64> = Vec::with_capacity(ep_json.len());
        for member in ep_json.members() {
            match member.as_f64() {
                Some(v) => ep.push(v),
                None => {
                    return Err(FlowError::Persistence(
                        "Non-numeric value in ep list".to_owned(),
                    ))
                }
            }
        }

        let d_study = match data["dStudy"].as_bool() {
            Some(b) => b,
            None => {
                return Err(FlowError::Persistence(
                    "Model file missing dStudy flag".to_owned(),
                ))
            }
        };

        let steps = match data["steps"].as_usize() {
            Some(s) => s,
            None => {
                return Err(FlowError::Persistence(
                    "Model file missing integer steps field".to_owned(),
                ))
            }
        };

        Ok(ModelParameters {
            w: read_f64(data, "w")?,
            h: read_f64(data, "h")?,
            d: read_f64(data, "d")?,
            t: read_f64(data, "t")?,
            p: read_f64(data, "p")?,
            kx: read_f64(data, "kx")?,
            ky: read_f64(data, "ky")?,
            ep,
            el_size_factor: read_f64(data, "el_size_factor")?,
            sweep: SweepSpec {
                axis: if d_study {
                    SweepAxis::Depth
                } else {
                    SweepAxis::Thickness
                },
                d_end: read_f64(data, "dEnd")?,
                t_end: read_f64(data, "tEnd")?,
                steps,
            },
        })
    }

    /// Writes the model to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_json().pretty(4);

        std::fs::write(path, contents).map_err(|err| {
            FlowError::Persistence(format!(
                "The file {} could not be written: {err}",
                path.display()
            ))
        })?;

        info!("saved model to {}", path.display());
        Ok(())
    }

    /// Reads a model from a JSON file
    pub fn from_file(path: &Path) -> Result<ModelParameters> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                return Err(FlowError::Persistence(format!(
                    "The file {} could not be found or read: {err}",
                    path.display()
                )))
            }
        };

        let data = match json::parse(&contents) {
            Ok(d) => d,
            Err(err) => {
                return Err(FlowError::Persistence(format!(
                    "Error in model file json {}: {err}",
                    path.display()
                )))
            }
        };

        ModelParameters::from_json(&data)
    }

    /// Replaces this model with the contents of `path`. On failure the model
    /// is left untouched.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let loaded = ModelParameters::from_file(path)?;
        *self = loaded;

        info!("loaded model from {}", path.display());
        Ok(())
    }
}

fn read_f64(data: &JsonValue, key: &str) -> Result<f64> {
    match data[key].as_f64() {
        Some(v) => Ok(v),
        None => Err(FlowError::Persistence(format!(
            "Model file missing numeric field {key}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("groundflow-model-{}-{name}", std::process::id()))
    }

    #[test]
    fn default_model_is_valid() {
        let model = ModelParameters::default();
        assert!(model.valid_model());
        assert!(model.valid_sweep());
    }

    #[test]
    fn width_must_exceed_thickness() {
        let mut model = ModelParameters::default();
        model.t = model.w;
        assert!(!model.valid_model());

        model.t = model.w - 1e-9;
        assert!(model.valid_model());
    }

    #[test]
    fn height_must_exceed_depth() {
        let mut model = ModelParameters::default();
        model.d = model.h;
        assert!(!model.valid_model());

        model.d = model.h - 1e-9;
        assert!(model.valid_model());
    }

    #[test]
    fn every_scalar_must_be_positive() {
        let setters: [fn(&mut ModelParameters, f64); 7] = [
            |m, v| m.w = v,
            |m, v| m.h = v,
            |m, v| m.d = v,
            |m, v| m.t = v,
            |m, v| m.p = v,
            |m, v| m.kx = v,
            |m, v| m.ky = v,
        ];

        for set in setters {
            let mut model = ModelParameters::default();
            set(&mut model, 0.0);
            assert!(!model.valid_model(), "zero accepted: {model:?}");

            let mut model = ModelParameters::default();
            set(&mut model, -1.0);
            assert!(!model.valid_model(), "negative accepted: {model:?}");
        }
    }

    #[test]
    fn validate_reports_input_error() {
        let mut model = ModelParameters::default();
        model.kx = 0.0;
        assert!(matches!(model.validate(), Err(FlowError::Input(_))));
    }

    #[test]
    fn depth_sweep_bounds() {
        let mut model = ModelParameters::default();

        model.sweep.d_end = model.d;
        assert!(!model.valid_sweep());

        model.sweep.d_end = model.h;
        assert!(!model.valid_sweep());

        model.sweep.d_end = model.d - 0.5;
        assert!(!model.valid_sweep());

        model.sweep.d_end = 0.5 * (model.d + model.h);
        assert!(model.valid_sweep());
    }

    #[test]
    fn thickness_sweep_bounds() {
        let mut model = ModelParameters::default();
        model.sweep.axis = SweepAxis::Thickness;

        model.sweep.t_end = model.t;
        assert!(!model.valid_sweep());

        model.sweep.t_end = model.w;
        assert!(!model.valid_sweep());

        model.sweep.t_end = 10.0;
        assert!(model.valid_sweep());
    }

    #[test]
    fn depth_sweep_ignores_thickness_end() {
        let mut model = ModelParameters::default();
        model.sweep.t_end = -4.0;
        assert!(model.valid_sweep());

        model.sweep.d_end = model.h + 1.0;
        model.sweep.t_end = 10.0;
        assert!(!model.valid_sweep());
    }

    #[test]
    fn zero_steps_is_invalid() {
        let mut model = ModelParameters::default();
        model.sweep.steps = 0;
        assert!(!model.valid_sweep());
    }

    #[test]
    fn empty_thickness_list_is_rejected() {
        let mut model = ModelParameters::default();
        model.ep.clear();
        assert!(model.thickness().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = scratch_file("roundtrip.json");

        let model = ModelParameters {
            w: 42.5,
            h: 12.25,
            d: 3.5,
            t: 0.75,
            p: 7.0,
            kx: 15.0,
            ky: 30.5,
            ep: vec![2.0],
            el_size_factor: 0.5,
            sweep: SweepSpec {
                axis: SweepAxis::Thickness,
                d_end: 9.0,
                t_end: 4.25,
                steps: 6,
            },
        };
        model.save(&path).unwrap();

        let mut loaded = ModelParameters::default();
        loaded.load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, model);
    }

    #[test]
    fn version_mismatch_leaves_model_unchanged() {
        let path = scratch_file("old_version.json");

        let mut data = ModelParameters::default().to_json();
        data["version"] = 6.into();
        data["w"] = 99.0.into();
        std::fs::write(&path, data.dump()).unwrap();

        let mut model = ModelParameters::default();
        model.d = 4.0;
        let before = model.clone();

        let res = model.load(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(res, Err(FlowError::Persistence(_))));
        assert_eq!(model, before);
    }

    #[test]
    fn missing_field_leaves_model_unchanged() {
        let path = scratch_file("missing_field.json");

        let mut data = ModelParameters::default().to_json();
        data["w"] = 12.0.into();
        data.remove("ky");
        std::fs::write(&path, data.dump()).unwrap();

        let mut model = ModelParameters::default();
        let before = model.clone();

        assert!(model.load(&path).is_err());
        std::fs::remove_file(&path).unwrap();
        assert_eq!(model, before);
    }

    #[test]
    fn unreadable_file_is_persistence_error() {
        let mut model = ModelParameters::default();
        let res = model.load(&scratch_file("does_not_exist.json"));
        assert!(matches!(res, Err(FlowError::Persistence(_))));
    }
}
