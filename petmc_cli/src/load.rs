//! The scene command language: line oriented, first token is the
//! command, `#` begins a comment.  Repeat blocks are unrolled before
//! execution, and configuration errors are collected with their file and
//! line so a run reports all of them before aborting.

use crate::config::Config;
use crate::physics_file::PhysicsData;
use anyhow::Result;
use ndarray::Array3;
use petmc::fileutil;
use petmc::isotope::{Beam, GaussianBeam, Isotope};
use petmc::kdtree::SplitAlgorithm;
use petmc::output::Format;
use petmc::scene::{Frame, Scene, Shape, Viewable};
use petmc::source::{SourceKind, SourceList};
use petmc::vecmath::{RigidMap, Vector3};
use std::fmt;
use std::fs;
use std::path::Path;

/// One configuration error with its origin.
#[derive(Clone, Debug)]
pub struct LoadError {
    /// File the offending line came from.
    pub file: String,
    /// One-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// The fully loaded simulation setup.
#[derive(Debug)]
pub struct LoadedScene {
    /// The geometry with its acceleration tree built.
    pub scene: Scene,
    /// The configured sources.
    pub sources: SourceList,
    /// Run configuration from the scene file.
    pub config: Config,
}

#[derive(Clone, Debug)]
struct SceneLine {
    file: String,
    line_no: usize,
    text: String,
}

/// Loads a scene command file against already-loaded physics data.
///
/// # Errors
///
/// Returns every configuration error found, annotated with file and
/// line.
pub fn load_scene_file(path: &Path, physics: PhysicsData) -> Result<LoadedScene, Vec<LoadError>> {
    let mut errors = Vec::new();
    let lines = read_lines(path, &mut errors, 0);
    let lines = unroll_repeats(&lines, &mut errors);
    let mut loaded = execute(&lines, path, physics, &mut errors);

    if let Some(loaded) = loaded.as_mut() {
        loaded.sources.set_simulation_time(loaded.config.simulation_time);
        loaded.sources.set_start_time(loaded.config.start_time);
        if let Err(err) = loaded.scene.build_tree(SplitAlgorithm::MacDonaldBooth) {
            errors.push(LoadError {
                file: path.display().to_string(),
                line: 0,
                message: err.to_string(),
            });
        }
    }
    match loaded {
        Some(loaded) if errors.is_empty() => Ok(loaded),
        _ => Err(errors),
    }
}

/// Reads a file into annotated lines, stripping comments and expanding
/// `include` directives relative to the including file.
fn read_lines(path: &Path, errors: &mut Vec<LoadError>, depth: usize) -> Vec<SceneLine> {
    let file_name = path.display().to_string();
    if depth > 16 {
        errors.push(LoadError {
            file: file_name,
            line: 0,
            message: "include files nested too deeply".to_string(),
        });
        return Vec::new();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            errors.push(LoadError {
                file: file_name,
                line: 0,
                message: err.to_string(),
            });
            return Vec::new();
        }
    };

    let mut lines = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let mut tokens = text.split_whitespace();
        if tokens.next() == Some("include") {
            if let Some(name) = tokens.next() {
                let dir = fileutil::dir_posix(&file_name);
                let included = fileutil::join_posix(dir, name);
                lines.extend(read_lines(Path::new(&included), errors, depth + 1));
            } else {
                errors.push(LoadError {
                    file: file_name.clone(),
                    line: idx + 1,
                    message: "include requires a file name".to_string(),
                });
            }
            continue;
        }
        lines.push(SceneLine {
            file: file_name.clone(),
            line_no: idx + 1,
            text: text.to_string(),
        });
    }
    lines
}

/// Unrolls `begin_repeat` blocks, innermost first.  `basic` repeats wrap
/// the body in matching push/pop; `grid` prefixes each copy with a
/// centered translation; `rotate` with an incremental axis rotation.
fn unroll_repeats(lines: &[SceneLine], errors: &mut Vec<LoadError>) -> Vec<SceneLine> {
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = &lines[idx];
        let tokens: Vec<&str> = line.text.split_whitespace().collect();
        match tokens.first().copied() {
            Some("begin_repeat") => {
                let Some(end) = find_matching_end(lines, idx) else {
                    errors.push(error_at(line, "begin_repeat without end_repeat"));
                    return out;
                };
                let body = unroll_repeats(&lines[idx + 1..end], errors);
                expand_repeat(line, &tokens[1..], &body, &mut out, errors);
                idx = end + 1;
            }
            Some("end_repeat") => {
                errors.push(error_at(line, "end_repeat without begin_repeat"));
                idx += 1;
            }
            _ => {
                out.push(line.clone());
                idx += 1;
            }
        }
    }
    out
}

fn find_matching_end(lines: &[SceneLine], begin: usize) -> Option<usize> {
    let mut depth = 0;
    for (idx, line) in lines.iter().enumerate().skip(begin) {
        match line.text.split_whitespace().next() {
            Some("begin_repeat") => depth += 1,
            Some("end_repeat") => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn expand_repeat(
    origin: &SceneLine,
    desc: &[&str],
    body: &[SceneLine],
    out: &mut Vec<SceneLine>,
    errors: &mut Vec<LoadError>,
) {
    let synth = |text: String| SceneLine {
        file: origin.file.clone(),
        line_no: origin.line_no,
        text,
    };
    let emit_copy = |prefix: Option<String>, out: &mut Vec<SceneLine>| {
        out.push(synth("push".to_string()));
        if let Some(prefix) = prefix {
            out.push(synth(prefix));
        }
        out.extend(body.iter().cloned());
        out.push(synth("pop".to_string()));
    };

    match desc.first().copied() {
        Some("grid") => {
            let Some(values) = parse_floats(&desc[1..], 6) else {
                errors.push(error_at(origin, "grid repeat needs nx ny nz dx dy dz"));
                return;
            };
            let counts = [values[0], values[1], values[2]];
            let steps = [values[3], values[4], values[5]];
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let counts: [usize; 3] = [counts[0] as usize, counts[1] as usize, counts[2] as usize];
            for ix in 0..counts[0] {
                for iy in 0..counts[1] {
                    for iz in 0..counts[2] {
                        // Centered grid: copies straddle the origin.
                        let offset = |i: usize, n: usize, d: f64| {
                            (index_f64(i) - (index_f64(n) - 1.0) / 2.0) * d
                        };
                        let prefix = format!(
                            "t {} {} {}",
                            offset(ix, counts[0], steps[0]),
                            offset(iy, counts[1], steps[1]),
                            offset(iz, counts[2], steps[2]),
                        );
                        emit_copy(Some(prefix), out);
                    }
                }
            }
        }
        Some("rotate") => {
            let Some(values) = parse_floats(&desc[1..], 5) else {
                errors.push(error_at(origin, "rotate repeat needs n deg ax ay az"));
                return;
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = values[0] as usize;
            for copy in 0..n {
                let prefix = format!(
                    "raxis {} {} {} {}",
                    values[2],
                    values[3],
                    values[4],
                    index_f64(copy) * values[1],
                );
                emit_copy(Some(prefix), out);
            }
        }
        Some(first) => {
            // Either `basic N` or a bare count.
            let count = if first == "basic" {
                desc.get(1).and_then(|v| v.parse::<usize>().ok())
            } else {
                first.parse::<usize>().ok()
            };
            let Some(count) = count else {
                errors.push(error_at(origin, "begin_repeat needs a copy count"));
                return;
            };
            for _ in 0..count {
                emit_copy(None, out);
            }
        }
        None => errors.push(error_at(origin, "begin_repeat needs a repeat type")),
    }
}

fn index_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

fn error_at(line: &SceneLine, message: impl Into<String>) -> LoadError {
    LoadError {
        file: line.file.clone(),
        line: line.line_no,
        message: message.into(),
    }
}

fn parse_floats(tokens: &[&str], count: usize) -> Option<Vec<f64>> {
    if tokens.len() < count {
        return None;
    }
    tokens[..count]
        .iter()
        .map(|t| t.parse().ok())
        .collect()
}

/// A frame built from a local axis, carried into world space by the
/// active transform.
fn world_frame(map: &RigidMap, local_axis: &Vector3) -> Frame {
    let local = Frame::from_axis(local_axis);
    Frame {
        u: map.transform_vector(&local.u),
        v: map.transform_vector(&local.v),
        w: map.transform_vector(&local.w),
    }
}

struct Loader {
    scene: Scene,
    sources: SourceList,
    config: Config,
    matrix_stack: Vec<RigidMap>,
    cur_material: i32,
    next_det_id: i32,
    activity_scale: f64,
    /// Triangles being captured for a vector source, with its activity.
    vector_capture: Option<(f64, Vec<Shape>)>,
    scene_dir: String,
}

impl Loader {
    fn matrix(&self) -> &RigidMap {
        self.matrix_stack.last().unwrap()
    }

    fn compose(&mut self, map: &RigidMap) {
        let current = self.matrix_stack.last_mut().unwrap();
        *current = current.compose(map);
    }

    fn add_shape(&mut self, shape: Shape, det_id: i32) {
        if let Some((_, triangles)) = self.vector_capture.as_mut() {
            triangles.push(shape);
        } else {
            self.scene.add_viewable(Viewable {
                shape,
                mat_id: self.cur_material,
                det_id,
            });
        }
    }
}

#[allow(clippy::too_many_lines)]
fn execute(
    lines: &[SceneLine],
    scene_path: &Path,
    physics: PhysicsData,
    errors: &mut Vec<LoadError>,
) -> Option<LoadedScene> {
    let mut sources = SourceList::new();
    for (name, isotope) in &physics.isotopes {
        sources.add_isotope(name, isotope.clone());
    }
    if let Some(default) = &physics.default_isotope {
        let _ = sources.set_current_isotope(default);
    }

    let mut loader = Loader {
        scene: Scene::new(physics.materials),
        sources,
        config: Config::default(),
        matrix_stack: vec![RigidMap::identity()],
        cur_material: 0,
        next_det_id: 0,
        activity_scale: 1.0,
        vector_capture: None,
        scene_dir: fileutil::dir_posix(&scene_path.display().to_string()).to_string(),
    };

    let mut idx = 0;
    while idx < lines.len() {
        let line = &lines[idx];
        idx += 1;
        let tokens: Vec<&str> = line.text.split_whitespace().collect();
        let (&command, args) = tokens.split_first().unwrap();
        if let Err(message) = run_command(&mut loader, command, args, lines, &mut idx) {
            errors.push(error_at(line, message));
        }
    }

    if loader.vector_capture.is_some() {
        errors.push(LoadError {
            file: scene_path.display().to_string(),
            line: 0,
            message: "start_vecsrc without end_vecsrc".to_string(),
        });
    }
    if loader.matrix_stack.len() != 1 {
        errors.push(LoadError {
            file: scene_path.display().to_string(),
            line: 0,
            message: "unmatched push".to_string(),
        });
    }

    Some(LoadedScene {
        scene: loader.scene,
        sources: loader.sources,
        config: loader.config,
    })
}

/// Executes one command.  `idx` already points past the command line and
/// advances further for commands that consume following lines.
#[allow(clippy::too_many_lines)]
fn run_command(
    loader: &mut Loader,
    command: &str,
    args: &[&str],
    lines: &[SceneLine],
    idx: &mut usize,
) -> Result<(), String> {
    match command {
        "m" => {
            let name = args.first().ok_or("m requires a material name")?;
            loader.cur_material = loader
                .scene
                .material_id(name)
                .ok_or_else(|| format!("unknown material: {name}"))?;
        }
        // Viewer shading parameters; geometry and physics ignore them.
        "color" => {}
        "push" => {
            let top = *loader.matrix();
            loader.matrix_stack.push(top);
        }
        "pop" => {
            if loader.matrix_stack.len() <= 1 {
                return Err("pop without matching push".to_string());
            }
            loader.matrix_stack.pop();
        }
        "t" => {
            let v = parse_floats(args, 3).ok_or("t requires x y z")?;
            loader.compose(&RigidMap::translation(Vector3::new(v[0], v[1], v[2])));
        }
        "raxis" => {
            let v = parse_floats(args, 4).ok_or("raxis requires ax ay az deg")?;
            let axis = Vector3::new(v[0], v[1], v[2]);
            loader.compose(&RigidMap::rotation(
                &axis,
                v[3] / 180.0 * std::f64::consts::PI,
            ));
        }
        "sphere" => {
            let v = parse_floats(args, 4).ok_or("sphere requires cx cy cz r")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            loader.add_shape(
                Shape::Sphere {
                    center,
                    radius: v[3],
                },
                -1,
            );
        }
        "cyl" => {
            let v = parse_floats(args, 8).ok_or("cyl requires cx cy cz ax ay az r l")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            loader.add_shape(
                Shape::Cylinder {
                    center,
                    frame,
                    radius: v[6],
                    half_length: 0.5 * v[7],
                },
                -1,
            );
        }
        "elliptic_cyl" => {
            let v = parse_floats(args, 9).ok_or("elliptic_cyl requires cx cy cz ax ay az r1 r2 l")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            loader.add_shape(
                Shape::EllipticCylinder {
                    center,
                    frame,
                    radius1: v[6],
                    radius2: v[7],
                    half_length: 0.5 * v[8],
                },
                -1,
            );
        }
        "ellipsoid" => {
            let v = parse_floats(args, 9).ok_or("ellipsoid requires cx cy cz ax ay az r1 r2 r3")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            loader.add_shape(
                Shape::Ellipsoid {
                    center,
                    frame,
                    radii: Vector3::new(v[6], v[7], v[8]),
                },
                -1,
            );
        }
        "ann_cyl" => {
            // A tube is two nested volumes: the outer cylinder of the
            // current material, and an inner cylinder restoring the
            // ambient material.
            let v = parse_floats(args, 9).ok_or("ann_cyl requires cx cy cz ax ay az ri ro l")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            loader.add_shape(
                Shape::Cylinder {
                    center,
                    frame,
                    radius: v[7],
                    half_length: 0.5 * v[8],
                },
                -1,
            );
            let saved = loader.cur_material;
            loader.cur_material = 0;
            loader.add_shape(
                Shape::Cylinder {
                    center,
                    frame,
                    radius: v[6],
                    half_length: 0.5 * v[8],
                },
                -1,
            );
            loader.cur_material = saved;
        }
        "k" => {
            let v = parse_floats(args, 6).ok_or("k requires cx cy cz sx sy sz")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = Frame {
                u: loader.matrix().transform_vector(&Vector3::UNIT_X),
                v: loader.matrix().transform_vector(&Vector3::UNIT_Y),
                w: loader.matrix().transform_vector(&Vector3::UNIT_Z),
            };
            let det_id = loader.next_det_id;
            loader.next_det_id += 1;
            loader.add_shape(
                Shape::Parallelepiped {
                    center,
                    frame,
                    half: Vector3::new(0.5 * v[3], 0.5 * v[4], 0.5 * v[5]),
                },
                det_id,
            );
        }
        "array" => {
            let v = parse_floats(args, 12)
                .ok_or("array requires cx cy cz nx ny nz dx dy dz sx sy sz")?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let counts = [v[3] as usize, v[4] as usize, v[5] as usize];
            let frame = Frame {
                u: loader.matrix().transform_vector(&Vector3::UNIT_X),
                v: loader.matrix().transform_vector(&Vector3::UNIT_Y),
                w: loader.matrix().transform_vector(&Vector3::UNIT_Z),
            };
            for ix in 0..counts[0] {
                for iy in 0..counts[1] {
                    for iz in 0..counts[2] {
                        let offset = |i: usize, n: usize, d: f64| {
                            (index_f64(i) - (index_f64(n) - 1.0) / 2.0) * d
                        };
                        let local = Vector3::new(
                            v[0] + offset(ix, counts[0], v[6]),
                            v[1] + offset(iy, counts[1], v[7]),
                            v[2] + offset(iz, counts[2], v[8]),
                        );
                        let det_id = loader.next_det_id;
                        loader.next_det_id += 1;
                        loader.add_shape(
                            Shape::Parallelepiped {
                                center: loader.matrix().transform_point(&local),
                                frame,
                                half: Vector3::new(0.5 * v[9], 0.5 * v[10], 0.5 * v[11]),
                            },
                            det_id,
                        );
                    }
                }
            }
        }
        "p" => {
            let count: usize = args
                .first()
                .and_then(|a| a.parse().ok())
                .ok_or("p requires a vertex count")?;
            if count < 3 {
                return Err("polygons need at least 3 vertices".to_string());
            }
            let mut vertices = Vec::with_capacity(count);
            for _ in 0..count {
                let vertex_line = lines
                    .get(*idx)
                    .ok_or("polygon vertices run past the end of the file")?;
                *idx += 1;
                let tokens: Vec<&str> = vertex_line.text.split_whitespace().collect();
                let v = parse_floats(&tokens, 3).ok_or("polygon vertex requires x y z")?;
                vertices.push(loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2])));
            }
            for ii in 1..count - 1 {
                loader.add_shape(
                    Shape::Triangle {
                        v0: vertices[0],
                        v1: vertices[ii],
                        v2: vertices[ii + 1],
                    },
                    -1,
                );
            }
        }
        "isotope" => {
            match args {
                [name] => loader
                    .sources
                    .set_current_isotope(name)
                    .map_err(|err: petmc::error::Error| err.to_string())?,
                ["beam", rest @ ..] => {
                    let v = parse_floats(rest, 5).ok_or("beam requires ax ay az angle energy")?;
                    loader.sources.set_current_isotope_value(Isotope::from(Beam::new(
                        loader.matrix().transform_vector(&Vector3::new(v[0], v[1], v[2])),
                        v[3],
                        v[4],
                    )));
                }
                ["gauss_beam", rest @ ..] => {
                    let v =
                        parse_floats(rest, 5).ok_or("gauss_beam requires ax ay az angle energy")?;
                    loader
                        .sources
                        .set_current_isotope_value(Isotope::from(GaussianBeam::new(
                            loader.matrix().transform_vector(&Vector3::new(v[0], v[1], v[2])),
                            v[3],
                            v[4],
                        )));
                }
                _ => return Err("isotope requires a name or a beam description".to_string()),
            }
        }
        "scale_act" => {
            let v = parse_floats(args, 1).ok_or("scale_act requires a factor")?;
            loader.activity_scale = v[0];
        }
        "pt_src" => {
            let v = parse_floats(args, 4).ok_or("pt_src requires x y z act")?;
            let position = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            add_source(loader, SourceKind::Point { position }, v[3])?;
        }
        "sp_src" => {
            let v = parse_floats(args, 5).ok_or("sp_src requires cx cy cz r act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            add_source(
                loader,
                SourceKind::Sphere {
                    center,
                    radius: v[3],
                },
                v[4],
            )?;
        }
        "rect_src" => {
            let v = parse_floats(args, 7).ok_or("rect_src requires cx cy cz sx sy sz act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = Frame {
                u: loader.matrix().transform_vector(&Vector3::UNIT_X),
                v: loader.matrix().transform_vector(&Vector3::UNIT_Y),
                w: loader.matrix().transform_vector(&Vector3::UNIT_Z),
            };
            add_source(
                loader,
                SourceKind::Rect {
                    center,
                    frame,
                    size: Vector3::new(v[3], v[4], v[5]),
                },
                v[6],
            )?;
        }
        "cyl_src" => {
            let v = parse_floats(args, 9).ok_or("cyl_src requires cx cy cz ax ay az r l act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            add_source(
                loader,
                SourceKind::Cylinder {
                    center,
                    frame,
                    radius: v[6],
                    length: v[7],
                },
                v[8],
            )?;
        }
        "elliptic_cyl_src" => {
            let v = parse_floats(args, 10)
                .ok_or("elliptic_cyl_src requires cx cy cz ax ay az r1 r2 l act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            add_source(
                loader,
                SourceKind::EllipticCylinder {
                    center,
                    frame,
                    radius1: v[6],
                    radius2: v[7],
                    length: v[8],
                },
                v[9],
            )?;
        }
        "annulus_cyl_src" => {
            let v =
                parse_floats(args, 9).ok_or("annulus_cyl_src requires cx cy cz ax ay az r l act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            add_source(
                loader,
                SourceKind::AnnulusCylinder {
                    center,
                    frame,
                    radius: v[6],
                    length: v[7],
                },
                v[8],
            )?;
        }
        "annulus_elliptic_cyl_src" => {
            let v = parse_floats(args, 10)
                .ok_or("annulus_elliptic_cyl_src requires cx cy cz ax ay az r1 r2 l act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            add_source(
                loader,
                SourceKind::annulus_elliptic_cylinder(center, frame, v[6], v[7], v[8]),
                v[9],
            )?;
        }
        "ellipsoid_src" => {
            let v = parse_floats(args, 10)
                .ok_or("ellipsoid_src requires cx cy cz ax ay az r1 r2 r3 act")?;
            let center = loader.matrix().transform_point(&Vector3::new(v[0], v[1], v[2]));
            let frame = world_frame(loader.matrix(), &Vector3::new(v[3], v[4], v[5]));
            add_source(
                loader,
                SourceKind::Ellipsoid {
                    center,
                    frame,
                    radii: Vector3::new(v[6], v[7], v[8]),
                },
                v[9],
            )?;
        }
        "voxel_src" => {
            // voxel_src file nx ny nz sx sy sz act
            if args.len() < 8 {
                return Err("voxel_src requires file nx ny nz sx sy sz act".to_string());
            }
            let image_path = fileutil::join_posix(&loader.scene_dir, args[0]);
            let v = parse_floats(&args[1..], 7).ok_or("voxel_src requires numeric arguments")?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let dims = (v[0] as usize, v[1] as usize, v[2] as usize);
            let contents = fs::read_to_string(&image_path)
                .map_err(|err| format!("{image_path}: {err}"))?;
            let weights: Vec<f64> = contents
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|err| format!("{image_path}: {err}"))?;
            if weights.len() != dims.0 * dims.1 * dims.2 {
                return Err(format!(
                    "{image_path}: expected {} voxels, found {}",
                    dims.0 * dims.1 * dims.2,
                    weights.len()
                ));
            }
            let image = Array3::from_shape_vec(dims, weights)
                .map_err(|err| format!("{image_path}: {err}"))?;
            let frame = Frame {
                u: loader.matrix().transform_vector(&Vector3::UNIT_X),
                v: loader.matrix().transform_vector(&Vector3::UNIT_Y),
                w: loader.matrix().transform_vector(&Vector3::UNIT_Z),
            };
            // The grid is centered on the active transform's origin.
            let half = Vector3::new(
                0.5 * v[3] * index_f64(dims.0),
                0.5 * v[4] * index_f64(dims.1),
                0.5 * v[5] * index_f64(dims.2),
            );
            let origin = loader.matrix().transform_point(&(-half));
            let kind = SourceKind::voxel(
                origin,
                frame,
                Vector3::new(v[3], v[4], v[5]),
                image,
            )
            .map_err(|err| err.to_string())?;
            add_source(loader, kind, v[6])?;
        }
        "start_vecsrc" => {
            let v = parse_floats(args, 1).ok_or("start_vecsrc requires an activity")?;
            if loader.vector_capture.is_some() {
                return Err("nested start_vecsrc".to_string());
            }
            loader.vector_capture = Some((v[0], Vec::new()));
        }
        "end_vecsrc" => {
            let (activity, triangles) = loader
                .vector_capture
                .take()
                .ok_or("end_vecsrc without start_vecsrc")?;
            if triangles.is_empty() {
                return Err("vector source has no triangles".to_string());
            }
            let mut mesh = Scene::new(vec![loader.scene.materials()[0].clone()]);
            for shape in triangles {
                mesh.add_viewable(Viewable {
                    shape,
                    mat_id: 0,
                    det_id: -1,
                });
            }
            let kind = SourceKind::vector(mesh).map_err(|err| err.to_string())?;
            add_source(loader, kind, activity)?;
        }
        "hits_output" => {
            loader.config.hits_output = Some(single_arg(args, "hits_output")?);
        }
        "singles_output" => {
            loader.config.singles_output = Some(single_arg(args, "singles_output")?);
        }
        "coinc_output" => {
            loader.config.coinc_outputs.push(single_arg(args, "coinc_output")?);
        }
        "hits_format" => {
            loader.config.format_hits =
                Format::parse(&single_arg(args, "hits_format")?).map_err(|err| err.to_string())?;
        }
        "singles_format" => {
            loader.config.format_singles = Format::parse(&single_arg(args, "singles_format")?)
                .map_err(|err| err.to_string())?;
        }
        "coinc_format" => {
            loader.config.format_coinc =
                Format::parse(&single_arg(args, "coinc_format")?).map_err(|err| err.to_string())?;
        }
        "process" => {
            if args.is_empty() {
                return Err("process requires a description".to_string());
            }
            loader.config.process_lines.push(args.join(" "));
        }
        "process_file" => {
            let name = single_arg(args, "process_file")?;
            loader
                .config
                .process_files
                .push(fileutil::join_posix(&loader.scene_dir, &name));
        }
        "mapping_file" => {
            let name = single_arg(args, "mapping_file")?;
            loader.config.mapping_file = Some(fileutil::join_posix(&loader.scene_dir, &name));
        }
        "time" => {
            let v = parse_floats(args, 1).ok_or("time requires seconds")?;
            loader.config.simulation_time = v[0];
        }
        "start_time" => {
            let v = parse_floats(args, 1).ok_or("start_time requires seconds")?;
            loader.config.start_time = v[0];
        }
        "seed" => {
            loader.config.seed = args
                .first()
                .and_then(|a| a.parse().ok())
                .ok_or("seed requires an integer")?;
        }
        "log_positron" => loader.config.log_nuclear_decays = true,
        "log_all" => loader.config.log_nonsensitive = true,
        "log_errors" => loader.config.log_errors = true,
        "log_nondepositing" => loader.config.log_nondepositing = true,
        other => return Err(format!("unknown command: {other}")),
    }
    Ok(())
}

fn single_arg(args: &[&str], command: &str) -> Result<String, String> {
    args.first()
        .map(|&a| a.to_string())
        .ok_or_else(|| format!("{command} requires an argument"))
}

fn add_source(loader: &mut Loader, kind: SourceKind, activity_uci: f64) -> Result<(), String> {
    loader
        .sources
        .add_source(kind, activity_uci * loader.activity_scale)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics_file::{parse_physics, tests::PHYSICS_JSON};
    use assert_fs::prelude::*;

    fn load(scene_text: &str) -> Result<LoadedScene, Vec<LoadError>> {
        let dir = assert_fs::TempDir::new().unwrap();
        let scene = dir.child("scene.pet");
        scene.write_str(scene_text).unwrap();
        let physics = parse_physics(PHYSICS_JSON).unwrap();
        let result = load_scene_file(scene.path(), physics);
        dir.close().unwrap();
        result
    }

    #[test]
    fn minimal_scene_loads() {
        let loaded = load(
            "# a point source in a water sphere\n\
             m water\n\
             sphere 0 0 0 5\n\
             sp_src 0 0 0 1 10.0\n\
             time 2.0\n\
             seed 7\n",
        )
        .unwrap();
        assert_eq!(loaded.scene.viewables().len(), 1);
        assert_eq!(loaded.sources.sources().len(), 1);
        float_cmp::assert_approx_eq!(f64, loaded.config.simulation_time, 2.0);
        assert_eq!(loaded.config.seed, 7);
    }

    #[test]
    fn detector_ids_count_up_in_creation_order() {
        let loaded = load(
            "m lso\n\
             k 0 0 0 1 1 1\n\
             k 3 0 0 1 1 1\n\
             array 0 10 0 2 1 1 4 0 0 1 1 1\n\
             isotope BackBack\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        let det_ids: Vec<i32> = loaded.scene.viewables().iter().map(|v| v.det_id).collect();
        assert_eq!(det_ids, vec![0, 1, 2, 3]);
        assert_eq!(loaded.scene.no_detectors(), 4);
    }

    #[test]
    fn grid_repeat_unrolls_centered_copies() {
        let loaded = load(
            "m lso\n\
             begin_repeat grid 2 1 1 4 0 0\n\
             k 0 0 0 1 1 1\n\
             end_repeat\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        assert_eq!(loaded.scene.viewables().len(), 2);
        let centers: Vec<f64> = loaded
            .scene
            .viewables()
            .iter()
            .map(|v| match &v.shape {
                Shape::Parallelepiped { center, .. } => center.x,
                _ => unreachable!(),
            })
            .collect();
        // Two copies, 4 cm apart, centered on the origin.
        float_cmp::assert_approx_eq!(f64, centers[0], -2.0);
        float_cmp::assert_approx_eq!(f64, centers[1], 2.0);
    }

    #[test]
    fn rotate_repeat_spins_copies_around_the_axis() {
        let loaded = load(
            "m lso\n\
             begin_repeat rotate 4 90 0 0 1\n\
             k 10 0 0 1 1 1\n\
             end_repeat\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        assert_eq!(loaded.scene.viewables().len(), 4);
        let centers: Vec<Vector3> = loaded
            .scene
            .viewables()
            .iter()
            .map(|v| match &v.shape {
                Shape::Parallelepiped { center, .. } => *center,
                _ => unreachable!(),
            })
            .collect();
        float_cmp::assert_approx_eq!(f64, centers[0].x, 10.0, epsilon = 1e-9);
        float_cmp::assert_approx_eq!(f64, centers[1].y, 10.0, epsilon = 1e-9);
        float_cmp::assert_approx_eq!(f64, centers[2].x, -10.0, epsilon = 1e-9);
        float_cmp::assert_approx_eq!(f64, centers[3].y, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn nested_repeats_multiply() {
        let loaded = load(
            "m lso\n\
             begin_repeat 2\n\
             begin_repeat 3\n\
             sphere 0 0 0 1\n\
             end_repeat\n\
             end_repeat\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        assert_eq!(loaded.scene.viewables().len(), 6);
    }

    #[test]
    fn transform_stack_applies_to_geometry() {
        let loaded = load(
            "m water\n\
             push\n\
             t 5 0 0\n\
             sphere 0 0 0 1\n\
             pop\n\
             sphere 0 0 0 1\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        let centers: Vec<f64> = loaded
            .scene
            .viewables()
            .iter()
            .map(|v| match &v.shape {
                Shape::Sphere { center, .. } => center.x,
                _ => unreachable!(),
            })
            .collect();
        float_cmp::assert_approx_eq!(f64, centers[0], 5.0);
        float_cmp::assert_approx_eq!(f64, centers[1], 0.0);
    }

    #[test]
    fn polygons_become_triangle_fans() {
        let loaded = load(
            "m water\n\
             p 4\n\
             0 0 0\n\
             1 0 0\n\
             1 1 0\n\
             0 1 0\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap();
        // A quad fans into two triangles.
        assert_eq!(loaded.scene.viewables().len(), 2);
    }

    #[test]
    fn vector_source_captures_polygons() {
        let loaded = load(
            "m water\n\
             sphere 0 0 0 10\n\
             start_vecsrc 5.0\n\
             p 3\n\
             0 0 0\n\
             1 0 0\n\
             0 1 0\n\
             end_vecsrc\n",
        )
        .unwrap();
        // The captured triangle goes to the source, not the scene.
        assert_eq!(loaded.scene.viewables().len(), 1);
        assert_eq!(loaded.sources.sources().len(), 1);
    }

    #[test]
    fn errors_are_collected_with_file_and_line() {
        let errors = load(
            "m water\n\
             frobnicate 1 2 3\n\
             sphere 0 0 0\n\
             m unobtainium\n\
             sphere 0 0 0 1\n\
             pt_src 0 0 0 1.0\n",
        )
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].line, 2);
        assert!(errors[0].message.contains("unknown command"));
        assert_eq!(errors[1].line, 3);
        assert_eq!(errors[2].line, 4);
        assert!(errors[2].message.contains("unobtainium"));
    }

    #[test]
    fn unmatched_repeat_is_an_error() {
        let errors = load("begin_repeat 3\nsphere 0 0 0 1\n").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("begin_repeat without end_repeat")));
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let dir = assert_fs::TempDir::new().unwrap();
        let detector = dir.child("detector.pet");
        detector.write_str("m lso\nk 0 0 0 1 1 1\n").unwrap();
        let scene = dir.child("scene.pet");
        scene
            .write_str("include detector.pet\nisotope BackBack\npt_src 0 0 0 1.0\ntime 0.1\n")
            .unwrap();
        let physics = parse_physics(PHYSICS_JSON).unwrap();
        let loaded = load_scene_file(scene.path(), physics).unwrap();
        assert_eq!(loaded.scene.viewables().len(), 1);
        dir.close().unwrap();
    }

    #[test]
    fn process_lines_and_outputs_accumulate() {
        let loaded = load(
            "m water\n\
             sphere 0 0 0 1\n\
             pt_src 0 0 0 1.0\n\
             process blur energy 0.10 at 0.511\n\
             process coinc window 10e-9\n\
             singles_output singles.dat\n\
             singles_format var_binary\n\
             coinc_output coinc.dat\n\
             log_all\n",
        )
        .unwrap();
        assert_eq!(loaded.config.process_lines.len(), 2);
        assert_eq!(loaded.config.singles_output.as_deref(), Some("singles.dat"));
        assert_eq!(loaded.config.format_singles, Format::VarBinary);
        assert_eq!(loaded.config.coinc_outputs.len(), 1);
        assert!(loaded.config.log_nonsensitive);
    }
}
