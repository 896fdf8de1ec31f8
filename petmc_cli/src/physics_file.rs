//! The physics data file: isotope decay parameters and material tables,
//! as JSON.

use anyhow::{bail, Context, Result};
use petmc::isotope::{Isotope, Positron};
use petmc::material::{GammaStats, Material, MaterialTables, XrayEscape};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct IsotopeSpec {
    #[serde(default)]
    acolinearity_deg_fwhm: f64,
    /// Zero means a stable (infinite half-life) source.
    #[serde(default)]
    half_life_s: f64,
    model: String,
    #[serde(default)]
    fwhm_mm: f64,
    #[serde(default)]
    k1: f64,
    #[serde(default)]
    k2: f64,
    #[serde(default)]
    prob_c: f64,
    #[serde(default)]
    max_range_mm: f64,
    positron_emiss_prob: f64,
    #[serde(default)]
    prompt_gamma_energy_mev: f64,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Deserialize)]
struct MaterialSpec {
    #[serde(default)]
    default: bool,
    #[serde(default)]
    disable_interactions: bool,
    energy: Vec<f64>,
    matten_phot: Vec<f64>,
    matten_comp: Vec<f64>,
    matten_rayl: Vec<f64>,
    x: Vec<f64>,
    form_factor: Vec<f64>,
    scattering_func: Vec<f64>,
    #[serde(default)]
    k_shell_binding_mev: Option<f64>,
    #[serde(default)]
    fluorescence_yield: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PhysicsSpec {
    isotopes: BTreeMap<String, IsotopeSpec>,
    materials: BTreeMap<String, MaterialSpec>,
}

/// Everything the loader needs from the physics file.
pub struct PhysicsData {
    /// Materials in scene index order; the ambient material is first.
    pub materials: Vec<Material>,
    /// Isotope prototypes by name.
    pub isotopes: BTreeMap<String, Isotope>,
    /// The isotope flagged as the default, when one is.
    pub default_isotope: Option<String>,
}

fn build_isotope(name: &str, spec: &IsotopeSpec) -> Result<Isotope> {
    let half_life = if spec.half_life_s > 0.0 {
        spec.half_life_s
    } else {
        f64::INFINITY
    };
    let mut positron = Positron::new(
        spec.acolinearity_deg_fwhm,
        half_life,
        spec.positron_emiss_prob,
        spec.prompt_gamma_energy_mev,
    );
    match spec.model.as_str() {
        "none" => {}
        "gauss" => positron.set_range_gaussian(spec.fwhm_mm, spec.max_range_mm),
        "levin_exp" => {
            positron.set_range_levin_exp(spec.prob_c, spec.k1, spec.k2, spec.max_range_mm);
        }
        other => bail!("isotope {name}: unknown positron range model: {other}"),
    }
    Ok(Isotope::from(positron))
}

fn build_material(name: &str, index: i32, spec: &MaterialSpec) -> Result<Material> {
    let lengths = [
        spec.energy.len(),
        spec.matten_phot.len(),
        spec.matten_comp.len(),
        spec.matten_rayl.len(),
    ];
    if lengths.iter().any(|&len| len != lengths[0]) {
        bail!("material {name}: attenuation tables have mismatched lengths");
    }
    if spec.x.len() != spec.form_factor.len() || spec.x.len() != spec.scattering_func.len() {
        bail!("material {name}: form factor tables have mismatched lengths");
    }
    let xray = match (spec.k_shell_binding_mev, spec.fluorescence_yield) {
        (Some(binding_energy), Some(fluorescence_yield)) => Some(XrayEscape {
            binding_energy,
            fluorescence_yield,
        }),
        (None, None) => None,
        _ => bail!("material {name}: K-shell data needs both binding energy and yield"),
    };
    let mut stats = GammaStats::new(
        MaterialTables {
            energy: spec.energy.clone(),
            photoelectric: spec.matten_phot.clone(),
            compton: spec.matten_comp.clone(),
            rayleigh: spec.matten_rayl.clone(),
            x: spec.x.clone(),
            form_factor: spec.form_factor.clone(),
            scattering_func: spec.scattering_func.clone(),
        },
        xray,
    );
    if spec.disable_interactions {
        stats.set_interactions_enabled(false);
    }
    Ok(Material {
        name: name.to_string(),
        index,
        stats,
    })
}

/// Parses a physics file.  The ambient material is the one flagged
/// `default`, or the first by name when none is.
///
/// # Errors
///
/// Fails on malformed JSON or inconsistent tables.
pub fn parse_physics(contents: &str) -> Result<PhysicsData> {
    let spec: PhysicsSpec =
        serde_json::from_str(contents).context("unable to parse physics file")?;

    let mut isotopes = BTreeMap::new();
    let mut default_isotope = None;
    for (name, iso_spec) in &spec.isotopes {
        isotopes.insert(name.clone(), build_isotope(name, iso_spec)?);
        if iso_spec.default {
            default_isotope = Some(name.clone());
        }
    }

    let ambient = spec
        .materials
        .iter()
        .find_map(|(name, mat)| mat.default.then(|| name.clone()))
        .or_else(|| spec.materials.keys().next().cloned())
        .context("physics file defines no materials")?;

    let mut materials = Vec::with_capacity(spec.materials.len());
    materials.push(build_material(&ambient, 0, &spec.materials[&ambient])?);
    for (name, mat_spec) in &spec.materials {
        if *name == ambient {
            continue;
        }
        let index = i32::try_from(materials.len())?;
        materials.push(build_material(name, index, mat_spec)?);
    }

    Ok(PhysicsData {
        materials,
        isotopes,
        default_isotope,
    })
}

/// Reads and parses a physics file from disk.
///
/// # Errors
///
/// Propagates I/O and parse failures.
pub fn load_physics(path: &Path) -> Result<PhysicsData> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read physics file {}", path.display()))?;
    parse_physics(&contents)
}

/// Resolves the physics file against the `PETMC_INCLUDE` search path when
/// it does not exist as given.
#[must_use]
pub fn resolve_physics_path(path: &Path) -> std::path::PathBuf {
    if path.exists() {
        return path.to_path_buf();
    }
    if let Ok(search) = std::env::var("PETMC_INCLUDE") {
        for dir in search.split(':').filter(|dir| !dir.is_empty()) {
            let candidate = Path::new(dir).join(path);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    path.to_path_buf()
}
