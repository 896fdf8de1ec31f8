//! Worker-parallel simulation driving: each worker owns a source-list
//! and DAQ-model replica over a disjoint time slice, traces decays into
//! the DAQ buffer, and flushes finished events to its own output
//! segment.

use crate::config::Config;
use anyhow::{Context, Result};
use petmc::daq::{DaqModel, DaqStats};
use petmc::output::{Format, Output, WriteFlags};
use petmc::rng::Rng;
use petmc::scene::Scene;
use petmc::source::SourceList;
use petmc::transport::{GammaRayTrace, TraceStats};
use rayon::prelude::*;
use std::fs;
use std::io::Write as _;
use std::path::Path;

/// Soft cap on buffered interactions between DAQ flushes.
const INTERACTIONS_SOFT_MAX: usize = 100_000;

/// Wait window of the implicit first sorter.  Photons of one decay reach
/// the detectors out of time order by at most their flight-time spread,
/// so a microsecond covers any bench-scale geometry.
pub const INITIAL_SORT_WINDOW: f64 = 1e-6;

/// Statistics one worker accumulated.
pub struct WorkerSummary {
    /// Transport counters.
    pub trace: TraceStats,
    /// DAQ pipeline counters.
    pub daq: DaqStats,
}

struct WorkerOutputs {
    hits: Option<Output>,
    singles: Option<Output>,
    coinc: Vec<Output>,
}

/// The output file name a worker writes; segments carry a rank suffix so
/// they can be concatenated afterwards.
fn segment_name(base: &str, global_rank: usize, total_workers: usize) -> String {
    if total_workers > 1 {
        format!("{base}.rank_{global_rank}")
    } else {
        base.to_string()
    }
}

fn coinc_file_name(config: &Config, idx: usize) -> Option<String> {
    match config.coinc_outputs.len() {
        0 => None,
        len if idx < len => Some(config.coinc_outputs[idx].clone()),
        _ => Some(format!("{}.{idx}", config.coinc_outputs[0])),
    }
}

fn open_outputs(
    config: &Config,
    no_coinc: usize,
    global_rank: usize,
    total_workers: usize,
) -> Result<WorkerOutputs> {
    // Later segments skip the header so plain concatenation of the
    // segments yields one well-formed file.
    let write_header = global_rank == 0;
    let open = |name: &str, format: Format| {
        Output::to_file(
            Path::new(&segment_name(name, global_rank, total_workers)),
            format,
            WriteFlags::all(),
            write_header,
        )
        .map_err(anyhow::Error::from)
    };

    let hits = config
        .hits_output
        .as_deref()
        .map(|name| open(name, config.format_hits))
        .transpose()?;
    let singles = config
        .singles_output
        .as_deref()
        .map(|name| open(name, config.format_singles))
        .transpose()?;
    let mut coinc = Vec::new();
    for idx in 0..no_coinc {
        if let Some(name) = coinc_file_name(config, idx) {
            coinc.push(open(&name, config.format_coinc)?);
        }
    }
    Ok(WorkerOutputs {
        hits,
        singles,
        coinc,
    })
}

fn run_worker(
    config: &Config,
    scene: &Scene,
    sources: &SourceList,
    daq_template: &DaqModel,
    global_rank: usize,
    total_workers: usize,
) -> Result<WorkerSummary> {
    let mut sources = sources.clone();
    if total_workers > 1 {
        sources.adjust_time_for_split(global_rank, total_workers);
    }
    sources.init();

    let mut daq = daq_template.clone();
    let mut rng = Rng::with_seed(config.seed + global_rank as u64);
    let mut trace_stats = TraceStats::default();
    let tracer = GammaRayTrace::new(scene, sources.source_positions(), config.log_policy())?;
    let mut outputs = open_outputs(config, daq.no_coinc_processes(), global_rank, total_workers)?;

    daq.reserve(INTERACTIONS_SOFT_MAX + 50);
    while sources.simulation_incomplete() {
        while sources.simulation_incomplete() {
            if let Some(decay) = sources.decay(&mut rng) {
                let mut interactions = Vec::new();
                tracer.trace_decay(&decay, &mut interactions, &mut rng, &mut trace_stats);
                daq.consume(interactions);
            }
            if daq.buffered() > INTERACTIONS_SOFT_MAX {
                break;
            }
        }

        daq.process_hits(&mut rng);
        if let Some(output) = outputs.hits.as_mut() {
            output.log_events(daq.hits_range())?;
        }

        daq.process_singles(&mut rng);
        if let Some(output) = outputs.singles.as_mut() {
            output.log_events(daq.singles_range())?;
        }
        for idx in 0..daq.no_coinc_processes() {
            daq.process_coinc(idx, &mut rng);
            if let Some(output) = outputs.coinc.get_mut(idx) {
                output.log_coinc(daq.coinc_range())?;
            }
        }

        daq.clear_complete();
    }

    daq.stop_hits(&mut rng);
    if let Some(output) = outputs.hits.as_mut() {
        output.log_events(daq.hits_range())?;
        output.flush()?;
    }
    daq.stop_singles(&mut rng);
    if let Some(output) = outputs.singles.as_mut() {
        output.log_events(daq.singles_range())?;
        output.flush()?;
    }
    for idx in 0..daq.no_coinc_processes() {
        daq.stop_coinc(idx, &mut rng);
        if let Some(output) = outputs.coinc.get_mut(idx) {
            output.log_coinc(daq.coinc_range())?;
            output.flush()?;
        }
    }

    Ok(WorkerSummary {
        trace: trace_stats,
        daq: daq.stats(),
    })
}

/// Concatenates this process's per-worker segments into the base file
/// and removes them.
fn combine_segments(base: &str, global_ranks: &[usize], total_workers: usize) -> Result<()> {
    let mut combined = fs::File::create(base)
        .with_context(|| format!("unable to combine output {base}"))?;
    for &global_rank in global_ranks {
        let segment = segment_name(base, global_rank, total_workers);
        let contents =
            fs::read(&segment).with_context(|| format!("missing output segment {segment}"))?;
        combined.write_all(&contents)?;
        fs::remove_file(&segment)?;
    }
    Ok(())
}

/// Runs the full simulation: `threads` workers of cluster rank `rank` of
/// `size`, each on a disjoint time slice of equal expected photons.
/// Within a single-process run the per-worker output segments are
/// concatenated afterwards; in cluster mode the segments of the other
/// ranks are concatenated post-hoc by the caller.
///
/// # Errors
///
/// Fails when any worker fails to open or write its outputs.
pub fn run_simulation(
    config: &Config,
    scene: &Scene,
    sources: &SourceList,
    daq_template: &DaqModel,
    threads: usize,
    rank: usize,
    size: usize,
) -> Result<Vec<WorkerSummary>> {
    let total_workers = threads * size;
    let worker_ranks: Vec<usize> = (0..threads).map(|t| rank * threads + t).collect();

    let summaries: Result<Vec<WorkerSummary>> = worker_ranks
        .par_iter()
        .map(|&global_rank| {
            run_worker(config, scene, sources, daq_template, global_rank, total_workers)
        })
        .collect();
    let summaries = summaries?;

    if total_workers > 1 && size == 1 {
        for base in config
            .hits_output
            .iter()
            .chain(config.singles_output.iter())
            .cloned()
            .chain((0..daq_template.no_coinc_processes()).filter_map(|idx| coinc_file_name(config, idx)))
        {
            combine_segments(&base, &worker_ranks, total_workers)?;
        }
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load_scene_file;
    use crate::physics_file::{parse_physics, tests::PHYSICS_JSON};
    use assert_fs::prelude::*;
    use petmc::mapping;

    fn scene_text(singles: &str, coinc: &str) -> String {
        format!(
            "m water\n\
             sphere 0 0 0 3\n\
             m lso\n\
             begin_repeat rotate 8 45 0 0 1\n\
             k 10 0 0 2 2 4\n\
             end_repeat\n\
             isotope BackBack\n\
             sp_src 0 0 0 1 50.0\n\
             time 1e-3\n\
             seed 5\n\
             process blur energy 0.10 at 0.511\n\
             process filter egate_low 0.400\n\
             process coinc window 10e-9\n\
             singles_output {singles}\n\
             coinc_output {coinc}\n"
        )
    }

    #[test]
    fn end_to_end_run_produces_singles_and_coincidences() {
        let dir = assert_fs::TempDir::new().unwrap();
        let singles_path = dir.child("singles.dat");
        let coinc_path = dir.child("coinc.dat");
        let scene_file = dir.child("scene.pet");
        scene_file
            .write_str(&scene_text(
                singles_path.path().to_str().unwrap(),
                coinc_path.path().to_str().unwrap(),
            ))
            .unwrap();

        let physics = parse_physics(PHYSICS_JSON).unwrap();
        let loaded = load_scene_file(scene_file.path(), physics).unwrap();

        let mapping = mapping::default_mapping(loaded.scene.no_detectors());
        let mut daq = DaqModel::new(INITIAL_SORT_WINDOW);
        daq.set_processes(&loaded.config.process_lines, &mapping).unwrap();

        let summaries = run_simulation(
            &loaded.config,
            &loaded.scene,
            &loaded.sources,
            &daq,
            1,
            0,
            1,
        )
        .unwrap();

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert!(summary.trace.decays > 0);
        assert_eq!(summary.trace.photons, 2 * summary.trace.decays);
        assert!(summary.daq.no_events > 0);

        singles_path.assert(predicates::path::exists());
        coinc_path.assert(predicates::path::exists());
        let singles = fs::read_to_string(singles_path.path()).unwrap();
        assert!(!singles.is_empty());
        dir.close().unwrap();
    }

    #[test]
    fn split_workers_cover_the_run_and_concatenate() {
        let dir = assert_fs::TempDir::new().unwrap();
        let singles_path = dir.child("singles.dat");
        let coinc_path = dir.child("coinc.dat");
        let scene_file = dir.child("scene.pet");
        scene_file
            .write_str(&scene_text(
                singles_path.path().to_str().unwrap(),
                coinc_path.path().to_str().unwrap(),
            ))
            .unwrap();

        let physics = parse_physics(PHYSICS_JSON).unwrap();
        let loaded = load_scene_file(scene_file.path(), physics).unwrap();
        let mapping = mapping::default_mapping(loaded.scene.no_detectors());
        let mut daq = DaqModel::new(INITIAL_SORT_WINDOW);
        daq.set_processes(&loaded.config.process_lines, &mapping).unwrap();

        let summaries = run_simulation(
            &loaded.config,
            &loaded.scene,
            &loaded.sources,
            &daq,
            2,
            0,
            1,
        )
        .unwrap();

        assert_eq!(summaries.len(), 2);
        // The segments were merged and removed.
        singles_path.assert(predicates::path::exists());
        assert!(!dir.path().join("singles.dat.rank_0").exists());
        assert!(!dir.path().join("singles.dat.rank_1").exists());
        dir.close().unwrap();
    }
}
