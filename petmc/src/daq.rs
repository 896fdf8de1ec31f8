//! The data-acquisition pipeline: a chain of in-place processors over one
//! contiguous, time-sorted event buffer, plus coincidence sorters that run
//! in parallel over the singles stream.
//!
//! Every processor finalizes a prefix of its input per call and reports
//! how far it got; the model keeps a per-processor ready cursor so each
//! processor only ever sees events its predecessor has declared final.
//! Processors flag `dropped` or rewrite fields in place; the only point
//! where the buffer shrinks is [`DaqModel::clear_complete`].

pub mod blur;
pub mod coinc;
pub mod deadtime;
pub mod filter;
pub mod merge;
pub mod sort;

use crate::error::{Error, Result};
use crate::event::Interaction;
use crate::mapping::IdMapping;
use crate::rng::Rng;
use enum_dispatch::enum_dispatch;
use std::fmt;

pub use blur::BlurProcess;
pub use coinc::CoincProcess;
pub use deadtime::DeadtimeProcess;
pub use filter::FilterProcess;
pub use merge::MergeProcess;
pub use sort::SortProcess;

/// A time blur is capped at this many FWHMs on either side of the event.
pub const DEFAULT_MAX_TIME_BLUR: f64 = 3.0;

/// Counters kept per processor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProcessStats {
    /// Events finalized and kept.
    pub no_kept: i64,
    /// Events dropped by this processor.
    pub no_dropped: i64,
    /// Events that took part in accepted pair coincidences.
    pub no_coinc_pair_events: i64,
    /// Events that took part in multiple coincidences.
    pub no_coinc_multiples_events: i64,
    /// Events alone in their coincidence window.
    pub no_coinc_single_events: i64,
    /// Accepted coincidence groups; also the next group id.
    pub no_coinc_events: i64,
}

impl ProcessStats {
    /// Total events this processor has finalized.
    #[must_use]
    pub const fn no_events(&self) -> i64 {
        self.no_kept
            + self.no_dropped
            + self.no_coinc_pair_events
            + self.no_coinc_multiples_events
            + self.no_coinc_single_events
    }
}

impl std::ops::AddAssign for ProcessStats {
    fn add_assign(&mut self, rhs: Self) {
        self.no_kept += rhs.no_kept;
        self.no_dropped += rhs.no_dropped;
        self.no_coinc_pair_events += rhs.no_coinc_pair_events;
        self.no_coinc_multiples_events += rhs.no_coinc_multiples_events;
        self.no_coinc_single_events += rhs.no_coinc_single_events;
        self.no_coinc_events += rhs.no_coinc_events;
    }
}

/// The contract of every pipeline stage.
///
/// `process` consumes events from the front of `events` until the last
/// one whose handling would require looking past the end, returning the
/// number of leading events now final.  It may rewrite events in place
/// (set `dropped`, blur fields, merge energies, stamp `coinc_id`) but
/// never inserts or erases, and only the sorter reorders.  `stop` is the
/// same operation under the promise that no more events will ever follow,
/// so everything must be finalized.
#[enum_dispatch]
pub trait Process {
    /// Runs over `events`, returning the ready offset in `0..=len`.
    fn process(&self, events: &mut [Interaction], rng: &mut Rng, stats: &mut ProcessStats)
        -> usize;
    /// Finalizes every event in `events`.
    fn stop(&self, events: &mut [Interaction], rng: &mut Rng, stats: &mut ProcessStats);
}

/// The closed set of singles processors.
#[enum_dispatch(Process)]
#[derive(Clone, Debug)]
pub enum ProcessEnum {
    /// Time sorting.
    SortProcess,
    /// Energy or time blurring.
    BlurProcess,
    /// Energy gating.
    FilterProcess,
    /// Pile-up merging.
    MergeProcess,
    /// Component deadtime.
    DeadtimeProcess,
}

/// Aggregate statistics over the whole pipeline.
#[derive(Clone, Debug, Default)]
pub struct DaqStats {
    /// Events entering the pipeline.
    pub no_events: i64,
    /// Events surviving the last singles processor.
    pub no_kept: i64,
    /// Events dropped anywhere in the singles chain.
    pub no_dropped: i64,
    /// Events dropped by merge processors.
    pub no_merged: i64,
    /// Events dropped by filter processors.
    pub no_filtered: i64,
    /// Events dropped by deadtime processors.
    pub no_deadtimed: i64,
    /// Kept count per singles processor.
    pub no_kept_per_proc: Vec<i64>,
    /// Dropped count per singles processor.
    pub no_dropped_per_proc: Vec<i64>,
    /// Whether each singles processor was user-specified (implicit
    /// sorters are not reported individually).
    pub print_info: Vec<bool>,
    /// Statistics of every coincidence processor.
    pub coinc_stats: Vec<ProcessStats>,
}

impl fmt::Display for DaqStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "events: {}", self.no_events)?;
        writeln!(f, "kept: {}", self.no_kept)?;
        writeln!(f, "dropped: {}", self.no_dropped)?;
        writeln!(f, "merged: {}", self.no_merged)?;
        writeln!(f, "filtered: {}", self.no_filtered)?;
        writeln!(f, "deadtimed: {}", self.no_deadtimed)?;
        for (idx, (kept, dropped)) in self
            .no_kept_per_proc
            .iter()
            .zip(&self.no_dropped_per_proc)
            .enumerate()
        {
            if *self.print_info.get(idx).unwrap_or(&false) {
                writeln!(f, "process {idx}: kept {kept}, dropped {dropped}")?;
            }
        }
        for (idx, stats) in self.coinc_stats.iter().enumerate() {
            writeln!(f, "coinc process {idx}:")?;
            writeln!(f, "  coinc events            : {}", stats.no_coinc_events)?;
            writeln!(f, "  events in coinc pair    : {}", stats.no_coinc_pair_events)?;
            writeln!(
                f,
                "  events in coinc multiple: {}",
                stats.no_coinc_multiples_events
            )?;
            writeln!(
                f,
                "  events in coinc single  : {}",
                stats.no_coinc_single_events
            )?;
        }
        Ok(())
    }
}

/// The DAQ model for one worker: the shared event buffer, the ordered
/// singles processors, and the parallel coincidence processors.
#[derive(Clone, Debug, Default)]
pub struct DaqModel {
    processes: Vec<(ProcessEnum, ProcessStats)>,
    coinc_processes: Vec<(CoincProcess, ProcessStats)>,
    print_info: Vec<bool>,
    buffer: Vec<Interaction>,
    process_ready_distance: Vec<usize>,
    singles_ready: usize,
    coinc_ready: usize,
    min_coinc_ready_dist: usize,
    /// Where the final hits flush starts once the stream has stopped.
    hits_stop_from: usize,
    hits_stopped: bool,
    singles_stopped: bool,
    coinc_stopped: bool,
}

impl DaqModel {
    /// Creates a model.  When `initial_sort_window` is positive, a time
    /// sorter with that wait window is prepended so every downstream
    /// processor can assume time-monotonic input.
    #[must_use]
    pub fn new(initial_sort_window: f64) -> Self {
        let mut model = Self::default();
        if initial_sort_window > 0.0 {
            model.add_process(ProcessEnum::from(SortProcess::new(initial_sort_window)), false);
        }
        model
    }

    /// Appends a processor; coincidence processors go to their own list.
    pub fn add_process(&mut self, process: ProcessEnum, print: bool) {
        self.processes.push((process, ProcessStats::default()));
        self.print_info.push(print);
        self.process_ready_distance.push(0);
    }

    /// Appends a coincidence processor.
    pub fn add_coinc_process(&mut self, process: CoincProcess) {
        self.coinc_processes.push((process, ProcessStats::default()));
    }

    /// Builds the user's processors from textual descriptions.  A time
    /// blur inserts its follow-up sorter automatically.
    ///
    /// # Errors
    ///
    /// Fails on malformed descriptions or unknown mapping names.
    pub fn set_processes(&mut self, lines: &[String], mapping: &IdMapping) -> Result<()> {
        for line in lines {
            let desc = ProcessDescription::parse(line)?;
            match factory(&desc, mapping)? {
                Built::Singles(process) => {
                    let follow_up_sort = if let ProcessEnum::BlurProcess(ref blur) = process {
                        blur.time_sort_window()
                    } else {
                        None
                    };
                    self.add_process(process, true);
                    if let Some(window) = follow_up_sort {
                        self.add_process(ProcessEnum::from(SortProcess::new(window)), false);
                    }
                }
                Built::Coinc(process) => self.add_coinc_process(process),
            }
        }
        Ok(())
    }

    /// Number of singles processors.
    #[must_use]
    pub fn no_processes(&self) -> usize {
        self.processes.len()
    }

    /// Number of coincidence processors.
    #[must_use]
    pub fn no_coinc_processes(&self) -> usize {
        self.coinc_processes.len()
    }

    /// Appends freshly traced interactions to the buffer.
    pub fn consume(&mut self, interactions: Vec<Interaction>) {
        self.buffer.extend(interactions);
    }

    /// Number of events currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Reserves buffer capacity ahead of the flush threshold.
    pub fn reserve(&mut self, capacity: usize) {
        self.buffer.reserve(capacity);
    }

    /// Events finalized by the first processor and not yet written out.
    #[must_use]
    pub fn hits_range(&self) -> &[Interaction] {
        if self.hits_stopped {
            &self.buffer[self.hits_stop_from..]
        } else {
            let front = self.process_ready_distance.first().copied().unwrap_or(0);
            &self.buffer[..front]
        }
    }

    /// Events finalized by the whole singles chain and not yet written.
    #[must_use]
    pub fn singles_range(&self) -> &[Interaction] {
        if self.singles_stopped {
            &self.buffer[self.singles_ready..]
        } else {
            &self.buffer[..self.singles_ready]
        }
    }

    /// Events finalized by the most recently run coincidence processor.
    #[must_use]
    pub fn coinc_range(&self) -> &[Interaction] {
        if self.coinc_stopped {
            &self.buffer
        } else {
            &self.buffer[..self.coinc_ready]
        }
    }

    /// Runs only the first processor, which is the initial sorter when an
    /// `initial_sort_window` was configured.
    pub fn process_hits(&mut self, rng: &mut Rng) {
        self.singles_stopped = false;
        self.hits_stopped = false;
        let mut ready = self.buffer.len();
        if let Some((process, stats)) = self.processes.first_mut() {
            let begin = self.process_ready_distance[0];
            ready = begin + process.process(&mut self.buffer[begin..ready], rng, stats);
            self.process_ready_distance[0] = ready;
        }
        self.singles_ready = ready;
        self.min_coinc_ready_dist = ready;
    }

    /// Runs every singles processor over the prefix its predecessor has
    /// declared ready.
    pub fn process_singles(&mut self, rng: &mut Rng) {
        self.singles_stopped = false;
        let mut ready = self.buffer.len();
        for (ii, (process, stats)) in self.processes.iter_mut().enumerate() {
            let begin = self.process_ready_distance[ii];
            ready = begin + process.process(&mut self.buffer[begin..ready], rng, stats);
            self.process_ready_distance[ii] = ready;
        }
        self.singles_ready = ready;
        self.min_coinc_ready_dist = ready;
    }

    /// Runs coincidence processor `idx` over the singles-ready prefix.
    pub fn process_coinc(&mut self, idx: usize, rng: &mut Rng) {
        self.coinc_stopped = false;
        let (process, stats) = &mut self.coinc_processes[idx];
        self.coinc_ready = process.process(&mut self.buffer[..self.singles_ready], rng, stats);
        self.min_coinc_ready_dist = self.min_coinc_ready_dist.min(self.coinc_ready);
    }

    /// Finalizes the first processor's pending events.
    pub fn stop_hits(&mut self, rng: &mut Rng) {
        self.hits_stopped = true;
        let end = self.buffer.len();
        self.hits_stop_from = self.process_ready_distance.first().copied().unwrap_or(0);
        if let Some((process, stats)) = self.processes.first_mut() {
            let begin = self.process_ready_distance[0];
            process.stop(&mut self.buffer[begin..end], rng, stats);
            self.process_ready_distance[0] = end;
        }
    }

    /// Finalizes every singles processor's pending events.
    pub fn stop_singles(&mut self, rng: &mut Rng) {
        self.singles_stopped = true;
        let end = self.buffer.len();
        for (ii, (process, stats)) in self.processes.iter_mut().enumerate() {
            let begin = self.process_ready_distance[ii];
            process.stop(&mut self.buffer[begin..end], rng, stats);
            self.process_ready_distance[ii] = end;
        }
    }

    /// Finalizes coincidence processor `idx` over the whole buffer.
    pub fn stop_coinc(&mut self, idx: usize, rng: &mut Rng) {
        self.coinc_stopped = true;
        let (process, stats) = &mut self.coinc_processes[idx];
        process.stop(&mut self.buffer, rng, stats);
    }

    /// Erases the head of the buffer that every processor is done with
    /// and rebases the stored cursors.
    pub fn clear_complete(&mut self) {
        let cleared = self.min_coinc_ready_dist;
        self.buffer.drain(..cleared);
        self.hits_stop_from = self.hits_stop_from.saturating_sub(cleared);
        for dist in &mut self.process_ready_distance {
            *dist -= cleared;
        }
        self.singles_ready -= cleared;
        self.min_coinc_ready_dist = 0;
    }

    /// Aggregates the pipeline's statistics.
    #[must_use]
    pub fn stats(&self) -> DaqStats {
        let mut report = DaqStats {
            no_events: self
                .processes
                .first()
                .map(|(_, s)| s.no_events())
                .or_else(|| self.coinc_processes.first().map(|(_, s)| s.no_events()))
                .unwrap_or(0),
            no_kept: self.processes.last().map_or(0, |(_, s)| s.no_kept),
            ..DaqStats::default()
        };
        for (process, stats) in &self.processes {
            report.no_dropped += stats.no_dropped;
            match process {
                ProcessEnum::MergeProcess(_) => report.no_merged += stats.no_dropped,
                ProcessEnum::FilterProcess(_) => report.no_filtered += stats.no_dropped,
                ProcessEnum::DeadtimeProcess(_) => report.no_deadtimed += stats.no_dropped,
                _ => {}
            }
            report.no_kept_per_proc.push(stats.no_kept);
            report.no_dropped_per_proc.push(stats.no_dropped);
        }
        report.print_info = self.print_info.clone();
        report.coinc_stats = self.coinc_processes.iter().map(|(_, s)| *s).collect();
        report
    }
}

/// One parsed line of a process file: `type subtype value [options...]`.
#[derive(Clone, Debug, Default)]
pub struct ProcessDescription {
    /// The process type token.
    pub kind: String,
    /// First argument, by convention the subtype.
    pub subtype: String,
    /// All arguments, subtype included.
    pub args: Vec<String>,
}

impl ProcessDescription {
    /// Parses one non-empty description line.
    ///
    /// # Errors
    ///
    /// Fails on an empty line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let kind = tokens
            .next()
            .ok_or_else(|| Error::General("empty process description".to_string()))?
            .to_string();
        let args: Vec<String> = tokens.map(str::to_string).collect();
        let subtype = args.first().cloned().unwrap_or_default();
        Ok(Self {
            kind,
            subtype,
            args,
        })
    }

    /// Parses argument `idx` as a floating point value.
    ///
    /// # Errors
    ///
    /// Fails when the argument is missing or not a number.
    pub fn as_double(&self, idx: usize) -> Result<f64> {
        self.args
            .get(idx)
            .and_then(|arg| arg.parse().ok())
            .ok_or_else(|| {
                Error::General(format!(
                    "{} is not a valid value for {}",
                    self.args.get(idx).map_or("<missing>", String::as_str),
                    self.kind
                ))
            })
    }
}

/// A built processor, routed by pipeline role.
pub enum Built {
    /// Goes into the ordered singles chain.
    Singles(ProcessEnum),
    /// Runs in parallel over the singles stream.
    Coinc(CoincProcess),
}

/// Builds one processor from its description and the id mapping tables.
///
/// # Errors
///
/// Fails on unknown types, malformed arguments, or missing mappings.
pub fn factory(desc: &ProcessDescription, mapping: &IdMapping) -> Result<Built> {
    match desc.kind.as_str() {
        "sort" => {
            if desc.subtype != "time" {
                return Err(Error::General(format!(
                    "unknown sort type: {}",
                    desc.subtype
                )));
            }
            Ok(Built::Singles(ProcessEnum::from(SortProcess::new(
                desc.as_double(1)?,
            ))))
        }
        "blur" => Ok(Built::Singles(ProcessEnum::from(blur_factory(desc)?))),
        "filter" => Ok(Built::Singles(ProcessEnum::from(filter_factory(desc)?))),
        "merge" => Ok(Built::Singles(ProcessEnum::from(merge_factory(
            desc, mapping,
        )?))),
        "deadtime" => Ok(Built::Singles(ProcessEnum::from(deadtime_factory(
            desc, mapping,
        )?))),
        "coinc" => Ok(Built::Coinc(coinc_factory(desc)?)),
        other => Err(Error::General(format!("process type not supported: {other}"))),
    }
}

fn blur_factory(desc: &ProcessDescription) -> Result<BlurProcess> {
    if desc.args.len() < 2 {
        return Err(Error::General(
            "blur format is: blur [type] [value] (options...)".to_string(),
        ));
    }
    match desc.subtype.as_str() {
        "energy" => {
            let value = desc.as_double(1)?;
            if desc.args.len() == 2 {
                Ok(BlurProcess::energy(value))
            } else if desc.args[2] == "at" && desc.args.len() >= 4 {
                Ok(BlurProcess::energy_referenced(value, desc.as_double(3)?))
            } else {
                Err(Error::General(format!(
                    "unrecognized blur option: {}",
                    desc.args[2]
                )))
            }
        }
        "time" => {
            let value = desc.as_double(1)?;
            Ok(BlurProcess::time(value, DEFAULT_MAX_TIME_BLUR * value))
        }
        other => Err(Error::General(format!("unknown blur type: {other}"))),
    }
}

fn filter_factory(desc: &ProcessDescription) -> Result<FilterProcess> {
    if desc.args.len() < 2 {
        return Err(Error::General(
            "filter format is: filter [type] [value]".to_string(),
        ));
    }
    let value = desc.as_double(1)?;
    match desc.subtype.as_str() {
        "egate_low" => Ok(FilterProcess::energy_gate_low(value)),
        "egate_high" => Ok(FilterProcess::energy_gate_high(value)),
        other => Err(Error::General(format!("unknown filter type: {other}"))),
    }
}

fn lookup<'a>(mapping: &'a IdMapping, name: &str) -> Result<&'a Vec<i32>> {
    mapping
        .get(name)
        .ok_or_else(|| Error::General(format!("unknown id map type: {name}")))
}

fn merge_factory(desc: &ProcessDescription, mapping: &IdMapping) -> Result<MergeProcess> {
    if desc.args.len() < 2 {
        return Err(Error::General(
            "merge format is: merge [component] [time] (options...)".to_string(),
        ));
    }
    let id_map = lookup(mapping, &desc.subtype)?.clone();
    let value = desc.as_double(1)?;
    let merge_type = desc.args.get(2).map_or("max", String::as_str);
    match merge_type {
        "max" => Ok(MergeProcess::max(id_map, value)),
        "first" => Ok(MergeProcess::first(id_map, value)),
        "anger" => {
            if desc.args.len() != 6 {
                return Err(Error::General(
                    "anger merge requires 3 block mapping names".to_string(),
                ));
            }
            let bx = lookup(mapping, &desc.args[3])?.clone();
            let by = lookup(mapping, &desc.args[4])?.clone();
            let bz = lookup(mapping, &desc.args[5])?.clone();
            MergeProcess::anger(id_map, value, bx, by, bz)
        }
        other => Err(Error::General(format!("unknown merge type: {other}"))),
    }
}

fn deadtime_factory(desc: &ProcessDescription, mapping: &IdMapping) -> Result<DeadtimeProcess> {
    if desc.args.len() < 2 {
        return Err(Error::General(
            "deadtime format is: deadtime [component] [value] (options...)".to_string(),
        ));
    }
    let id_map = lookup(mapping, &desc.subtype)?.clone();
    let value = desc.as_double(1)?;
    let mut paralyzable = false;
    for option in &desc.args[2..] {
        match option.as_str() {
            "paralyzable" => paralyzable = true,
            "nonparalyzable" => paralyzable = false,
            other => {
                return Err(Error::General(format!(
                    "unrecognized deadtime option: {other}"
                )))
            }
        }
    }
    Ok(DeadtimeProcess::new(id_map, value, paralyzable))
}

fn coinc_factory(desc: &ProcessDescription) -> Result<CoincProcess> {
    if desc.args.len() < 2 {
        return Err(Error::General(
            "coinc format is: coinc [window/delay] [width] (options...)".to_string(),
        ));
    }
    let value = desc.as_double(1)?;
    let (window_offset, option_start) = match desc.subtype.as_str() {
        "window" => (0.0, 2),
        "delay" => {
            if desc.args.len() < 3 {
                return Err(Error::General("no delay offset specified".to_string()));
            }
            (desc.as_double(2)?, 3)
        }
        other => return Err(Error::General(format!("unknown coinc type: {other}"))),
    };
    let mut reject_multiples = true;
    let mut paralyzable = false;
    for option in &desc.args[option_start..] {
        match option.as_str() {
            "keep_multiples" => reject_multiples = false,
            "paralyzable" => paralyzable = true,
            other => {
                return Err(Error::General(format!("unrecognized coinc option: {other}")))
            }
        }
    }
    Ok(CoincProcess::new(
        value,
        reject_multiples,
        paralyzable,
        window_offset,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Color, Interaction, Kind, NuclearDecay};
    use crate::mapping;
    use crate::vecmath::Vector3;

    fn event(time: f64, energy: f64, det_id: i32) -> Interaction {
        let decay = NuclearDecay::new(0, time, 0, Vector3::ZERO, 0.0);
        let mut event = Interaction::from_decay(&decay, 0);
        event.kind = Kind::Photoelectric;
        event.color = Color::Blue;
        event.energy = energy;
        event.det_id = det_id;
        event
    }

    fn model_from_lines(lines: &[&str], no_detectors: usize) -> DaqModel {
        let mapping = mapping::default_mapping(no_detectors);
        let lines: Vec<String> = lines.iter().map(|&l| l.to_string()).collect();
        let mut model = DaqModel::new(1e-6);
        model.set_processes(&lines, &mapping).unwrap();
        model
    }

    #[test]
    fn initial_sort_window_prepends_a_sorter() {
        let model = DaqModel::new(1e-9);
        assert_eq!(model.no_processes(), 1);
        let model = DaqModel::new(-1.0);
        assert_eq!(model.no_processes(), 0);
    }

    #[test]
    fn time_blur_gets_a_follow_up_sorter() {
        let model = model_from_lines(&["blur time 300e-12"], 1);
        // Initial sorter, the blur, and its follow-up sorter.
        assert_eq!(model.no_processes(), 3);
    }

    #[test]
    fn factory_rejects_unknown_types() {
        let mapping = mapping::default_mapping(1);
        let desc = ProcessDescription::parse("window coinc 10e-9").unwrap();
        assert!(factory(&desc, &mapping).is_err());
        let desc = ProcessDescription::parse("merge missing_map 1.0 max").unwrap();
        assert!(factory(&desc, &mapping).is_err());
    }

    #[test]
    fn pipeline_runs_filter_and_coincidence_end_to_end() {
        let mut model = model_from_lines(&["filter egate_low 0.400", "coinc window 10e-9"], 4);
        assert_eq!(model.no_coinc_processes(), 1);

        let mut rng = crate::rng::Rng::with_seed(0);
        model.consume(vec![
            event(0.0, 0.511, 0),
            event(5e-9, 0.511, 1),
            // Low-energy event inside the second window gets filtered
            // before the coincidence sorter sees it.
            event(100e-9, 0.100, 2),
            event(103e-9, 0.511, 3),
            event(106e-9, 0.511, 0),
            event(1.0, 0.511, 1),
        ]);
        assert_eq!(model.buffered(), 6);

        model.process_singles(&mut rng);
        model.process_coinc(0, &mut rng);
        // Only the first pair's window is closed this round; the second
        // pair cannot close its window without events past the ready end.
        let accepted: Vec<i64> = model
            .coinc_range()
            .iter()
            .filter(|e| !e.dropped)
            .map(|e| e.coinc_id)
            .collect();
        assert_eq!(accepted, vec![0, 0]);

        model.clear_complete();
        model.stop_singles(&mut rng);
        model.stop_coinc(0, &mut rng);

        let stats = model.stats();
        assert_eq!(stats.no_filtered, 1);
        assert_eq!(stats.coinc_stats[0].no_coinc_events, 2);
        assert_eq!(stats.coinc_stats[0].no_coinc_pair_events, 4);
        // The trailing lone event is a single.
        assert_eq!(stats.coinc_stats[0].no_coinc_single_events, 1);
    }

    #[test]
    fn clear_complete_rebases_the_cursors() {
        let mut model = model_from_lines(&["filter egate_low 0.400"], 1);
        let mut rng = crate::rng::Rng::with_seed(0);
        model.consume(vec![
            event(0.0, 0.511, 0),
            event(0.5, 0.511, 0),
            event(1.0, 0.511, 0),
        ]);
        model.process_singles(&mut rng);
        // The sorter holds back events within its wait window of the
        // newest time.
        assert_eq!(model.singles_ready, 2);
        model.clear_complete();
        assert_eq!(model.singles_ready, 0);
        assert_eq!(model.buffered(), 1);
    }

    #[test]
    fn description_parsing_splits_type_subtype_args() {
        let desc = ProcessDescription::parse("merge block 100e-9 anger bx by bz").unwrap();
        assert_eq!(desc.kind, "merge");
        assert_eq!(desc.subtype, "block");
        assert_eq!(desc.args.len(), 6);
        float_cmp::assert_approx_eq!(f64, desc.as_double(1).unwrap(), 100e-9);
        assert!(desc.as_double(2).is_err());
    }
}
