//! Run configuration accumulated from the scene file and the command
//! line.

use petmc::output::Format;
use petmc::transport::LogPolicy;

/// Everything a simulation run needs besides the scene and sources.
#[derive(Clone, Debug)]
pub struct Config {
    /// Simulated acquisition duration, seconds.
    pub simulation_time: f64,
    /// Acquisition start time, seconds.
    pub start_time: f64,
    /// Base RNG seed; each worker offsets it.
    pub seed: u64,
    /// Log non-depositing (Rayleigh) interactions.
    pub log_nondepositing: bool,
    /// Log the decays themselves as marker records.
    pub log_nuclear_decays: bool,
    /// Log interactions outside sensitive volumes.
    pub log_nonsensitive: bool,
    /// Log error records for abandoned photons.
    pub log_errors: bool,
    /// Output file for raw hits, when requested.
    pub hits_output: Option<String>,
    /// Output file for processed singles, when requested.
    pub singles_output: Option<String>,
    /// Output files, one per coincidence processor.
    pub coinc_outputs: Vec<String>,
    /// Format of the hits file.
    pub format_hits: Format,
    /// Format of the singles file.
    pub format_singles: Format,
    /// Format of the coincidence files.
    pub format_coinc: Format,
    /// Inline `process` lines from the scene file.
    pub process_lines: Vec<String>,
    /// Process description files to append.
    pub process_files: Vec<String>,
    /// Mapping file from the scene, overridable on the command line.
    pub mapping_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulation_time: 1.0,
            start_time: 0.0,
            seed: 1,
            log_nondepositing: false,
            log_nuclear_decays: false,
            log_nonsensitive: false,
            log_errors: false,
            hits_output: None,
            singles_output: None,
            coinc_outputs: Vec::new(),
            format_hits: Format::FullAscii,
            format_singles: Format::FullAscii,
            format_coinc: Format::FullAscii,
            process_lines: Vec::new(),
            process_files: Vec::new(),
            mapping_file: None,
        }
    }
}

impl Config {
    /// The transport logging policy implied by the flags.
    #[must_use]
    pub const fn log_policy(&self) -> LogPolicy {
        LogPolicy {
            nondepositing: self.log_nondepositing,
            nuclear_decays: self.log_nuclear_decays,
            nonsensitive: self.log_nonsensitive,
            errors: self.log_errors,
        }
    }
}
