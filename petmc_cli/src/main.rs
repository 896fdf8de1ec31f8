//! The `petmc` binary: parses the command line, loads physics and scene,
//! and drives the simulation with the documented exit codes.

use clap::Parser;
use petmc::daq::DaqModel;
use petmc::mapping::{self, IdMapping};
use petmc::output::Format;
use petmc::rng::Rng;
use petmc::transport;
use petmc_cli::config::Config;
use petmc_cli::load::{self, LoadedScene};
use petmc_cli::physics_file;
use petmc_cli::simulation::{self, WorkerSummary};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "petmc",
    about = "Monte Carlo simulator of PET acquisitions",
    version
)]
struct Opts {
    /// Scene command file.
    scene: PathBuf,
    /// Physics data file, searched via PETMC_INCLUDE when not found
    /// directly.
    #[arg(long, short = 'p', value_name = "FILE")]
    physics: PathBuf,
    /// Detector component mapping file; defaults to one detector
    /// component per detector.
    #[arg(long, short = 'm', value_name = "FILE")]
    mapping: Option<PathBuf>,
    /// Additional process description file.
    #[arg(long, short = 'd', value_name = "FILE")]
    process_file: Option<PathBuf>,
    /// Seed override for the scene file's seed.
    #[arg(long, short = 's')]
    seed: Option<u64>,
    /// Worker threads within this process.
    #[arg(long, short = 't', default_value_t = 1)]
    threads: usize,
    /// Cluster rank of this process.
    #[arg(long, default_value_t = 0)]
    rank: usize,
    /// Number of cluster processes.
    #[arg(long, default_value_t = 1)]
    size: usize,
    /// Keep positions in binary outputs.
    #[arg(long = "write_pos")]
    write_pos: bool,
    /// Write the detector component mapping to FILE and exit.
    #[arg(long = "write_map", value_name = "FILE")]
    write_map: Option<PathBuf>,
    /// Print the per-worker time splits and exit.
    #[arg(long = "print_splits")]
    print_splits: bool,
    /// Ray-sample the geometry for overlaps and exit.
    #[arg(long = "run_overlap_test")]
    run_overlap_test: bool,
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    let physics_path = physics_file::resolve_physics_path(&opts.physics);
    let physics = match physics_file::load_physics(&physics_path) {
        Ok(physics) => physics,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(1);
        }
    };

    let mut loaded = match load::load_scene_file(&opts.scene, physics) {
        Ok(loaded) => loaded,
        Err(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            eprintln!("{} scene error(s)", errors.len());
            return ExitCode::from(1);
        }
    };
    apply_overrides(&opts, &mut loaded.config);

    let mapping = match load_mapping(&opts, &loaded.config, &loaded.scene) {
        Ok(mapping) => mapping,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(2);
        }
    };

    let daq = match build_daq(&loaded.config, &mapping) {
        Ok(daq) => daq,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(3);
        }
    };

    if let Some(map_path) = &opts.write_map {
        return match mapping::write_mapping_file(map_path, &mapping) {
            Ok(()) => {
                println!("wrote mapping file to {}", map_path.display());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(5)
            }
        };
    }

    if opts.print_splits {
        return match print_splits(&opts, &loaded) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::from(6)
            }
        };
    }

    if opts.run_overlap_test {
        let mut rng = Rng::with_seed(loaded.config.seed);
        return match transport::test_overlap(&loaded.scene, &mut rng, 100_000) {
            Ok(()) => {
                println!("no overlaps detected");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(4)
            }
        };
    }

    match simulation::run_simulation(
        &loaded.config,
        &loaded.scene,
        &loaded.sources,
        &daq,
        opts.threads,
        opts.rank,
        opts.size,
    ) {
        Ok(summaries) => {
            print_summaries(&summaries);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(4)
        }
    }
}

fn apply_overrides(opts: &Opts, config: &mut Config) {
    if let Some(seed) = opts.seed {
        config.seed = seed;
    }
    if let Some(process_file) = &opts.process_file {
        config
            .process_files
            .push(process_file.display().to_string());
    }
    if opts.write_pos {
        // Binary outputs keep their position columns.
        if config.format_hits == Format::NoPosBinary {
            config.format_hits = Format::FullBinary;
        }
        if config.format_singles == Format::NoPosBinary {
            config.format_singles = Format::FullBinary;
        }
        if config.format_coinc == Format::NoPosBinary {
            config.format_coinc = Format::FullBinary;
        }
    }
}

fn load_mapping(
    opts: &Opts,
    config: &Config,
    scene: &petmc::scene::Scene,
) -> anyhow::Result<IdMapping> {
    let path = opts
        .mapping
        .clone()
        .or_else(|| config.mapping_file.as_ref().map(PathBuf::from));
    match path {
        Some(path) => Ok(mapping::load_mapping_file(&path)?),
        None => Ok(mapping::default_mapping(scene.no_detectors())),
    }
}

fn build_daq(config: &Config, mapping: &IdMapping) -> anyhow::Result<DaqModel> {
    let mut lines = config.process_lines.clone();
    for file in &config.process_files {
        let contents = std::fs::read_to_string(file)
            .map_err(|err| anyhow::anyhow!("{file}: {err}"))?;
        lines.extend(
            contents
                .lines()
                .map(|line| line.split('#').next().unwrap_or("").trim().to_string())
                .filter(|line| !line.is_empty()),
        );
    }
    let mut daq = DaqModel::new(simulation::INITIAL_SORT_WINDOW);
    daq.set_processes(&lines, mapping)?;
    Ok(daq)
}

fn print_splits(opts: &Opts, loaded: &LoadedScene) -> anyhow::Result<()> {
    let total_workers = opts.threads * opts.size;
    if total_workers == 0 {
        anyhow::bail!("no workers configured");
    }
    for worker in 0..total_workers {
        let mut sources = loaded.sources.clone();
        sources.adjust_time_for_split(worker, total_workers);
        println!(
            "worker {worker}: start {:.6e} duration {:.6e}",
            sources.start_time(),
            sources.simulation_time()
        );
    }
    Ok(())
}

fn print_summaries(summaries: &[WorkerSummary]) {
    let mut trace = petmc::transport::TraceStats::default();
    for summary in summaries {
        trace.decays += summary.trace.decays;
        trace.photons += summary.trace.photons;
        trace.no_interaction += summary.trace.no_interaction;
        trace.photoelectric += summary.trace.photoelectric;
        trace.xray_escape += summary.trace.xray_escape;
        trace.compton += summary.trace.compton;
        trace.rayleigh += summary.trace.rayleigh;
        trace.photoelectric_sensitive += summary.trace.photoelectric_sensitive;
        trace.xray_escape_sensitive += summary.trace.xray_escape_sensitive;
        trace.compton_sensitive += summary.trace.compton_sensitive;
        trace.rayleigh_sensitive += summary.trace.rayleigh_sensitive;
        trace.error += summary.trace.error;
    }
    print!("{trace}");
    for (idx, summary) in summaries.iter().enumerate() {
        println!("worker {idx} daq:");
        print!("{}", summary.daq);
    }
}
