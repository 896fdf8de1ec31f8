#![allow(missing_docs)]

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

const PHYSICS_JSON: &str = r#"{
    "isotopes": {
        "BackBack": {
            "acolinearity_deg_fwhm": 0.0,
            "default": true,
            "half_life_s": 0.0,
            "model": "none",
            "positron_emiss_prob": 1.0,
            "prompt_gamma_energy_mev": 0.0
        }
    },
    "materials": {
        "air": {
            "default": true,
            "disable_interactions": true,
            "energy": [0.001, 1.5],
            "matten_phot": [0.0001, 0.0001],
            "matten_comp": [0.0001, 0.0001],
            "matten_rayl": [0.0001, 0.0001],
            "x": [0.0, 1e10],
            "form_factor": [1.0, 0.001],
            "scattering_func": [0.001, 1.0]
        },
        "lso": {
            "energy": [0.001, 0.1, 0.511, 1.5],
            "matten_phot": [100.0, 10.0, 0.6, 0.1],
            "matten_comp": [0.5, 0.6, 0.25, 0.15],
            "matten_rayl": [1.0, 0.1, 0.01, 0.002],
            "x": [0.0, 1e9, 1e10],
            "form_factor": [30.0, 5.0, 0.5],
            "scattering_func": [0.01, 0.8, 1.0]
        }
    }
}"#;

const SCENE: &str = "m lso\n\
begin_repeat rotate 6 60 0 0 1\n\
k 8 0 0 2 2 4\n\
end_repeat\n\
isotope BackBack\n\
sp_src 0 0 0 0.5 20.0\n\
time 1e-4\n\
seed 3\n\
process blur energy 0.10 at 0.511\n\
process filter egate_low 0.400\n\
process coinc window 10e-9\n";

fn workspace(scene: &str) -> (assert_fs::TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = assert_fs::TempDir::new().unwrap();
    let physics = dir.child("physics.json");
    physics.write_str(PHYSICS_JSON).unwrap();
    let scene_file = dir.child("scene.pet");
    scene_file.write_str(scene).unwrap();
    let physics_path = physics.path().to_path_buf();
    let scene_path = scene_file.path().to_path_buf();
    (dir, scene_path, physics_path)
}

#[test]
fn help() {
    Command::cargo_bin("petmc")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Monte Carlo simulator"));
}

#[test]
fn simulation_runs_and_reports_stats() {
    let (dir, scene, physics) = workspace(SCENE);
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .assert()
        .success()
        .stdout(predicate::str::contains("decays:"))
        .stdout(predicate::str::contains("coinc events"));
    dir.close().unwrap();
}

#[test]
fn singles_output_is_written() {
    let (dir, scene, physics) = workspace(SCENE);
    let singles = dir.child("singles.dat");
    let mut scene_text = std::fs::read_to_string(&scene).unwrap();
    scene_text.push_str(&format!(
        "singles_output {}\n",
        singles.path().display()
    ));
    std::fs::write(&scene, scene_text).unwrap();

    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .assert()
        .success();
    singles.assert(predicate::path::exists());
    dir.close().unwrap();
}

#[test]
fn scene_errors_are_reported_with_lines() {
    let (dir, scene, physics) = workspace("m lso\nfrobnicate\nsphere 0 0 0 1\npt_src 0 0 0 1\n");
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown command: frobnicate"))
        .stderr(predicate::str::contains("scene.pet:2"));
    dir.close().unwrap();
}

#[test]
fn missing_physics_file_fails_with_config_error() {
    let (dir, scene, _) = workspace(SCENE);
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg("no_such_physics.json")
        .assert()
        .failure()
        .code(1);
    dir.close().unwrap();
}

#[test]
fn bad_process_file_fails_with_process_error() {
    let (dir, scene, physics) = workspace(SCENE);
    let process = dir.child("processes.txt");
    process.write_str("warp detector 1.0\n").unwrap();
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .arg("--process-file")
        .arg(process.path())
        .assert()
        .failure()
        .code(3);
    dir.close().unwrap();
}

#[test]
fn write_map_round_trips() {
    let (dir, scene, physics) = workspace(SCENE);
    let map_file = dir.child("detectors.map");
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .arg("--write_map")
        .arg(map_file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote mapping file"));
    map_file.assert(predicate::str::contains("detector"));

    // The written mapping is accepted back.
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .arg("--mapping")
        .arg(map_file.path())
        .assert()
        .success();
    dir.close().unwrap();
}

#[test]
fn print_splits_lists_every_worker() {
    let (dir, scene, physics) = workspace(SCENE);
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .arg("--threads")
        .arg("2")
        .arg("--print_splits")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker 0:"))
        .stdout(predicate::str::contains("worker 1:"));
    dir.close().unwrap();
}

#[test]
fn overlap_test_passes_on_a_clean_scene() {
    let (dir, scene, physics) = workspace(SCENE);
    Command::cargo_bin("petmc")
        .unwrap()
        .arg(&scene)
        .arg("--physics")
        .arg(&physics)
        .arg("--run_overlap_test")
        .assert()
        .success()
        .stdout(predicate::str::contains("no overlaps detected"));
    dir.close().unwrap();
}
