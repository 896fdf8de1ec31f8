//! The event data model: transient photons, nuclear decays, and the
//! [`Interaction`] records that are the sole currency of the DAQ pipeline.

use crate::vecmath::Vector3;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// What happened at an interaction point.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Kind {
    /// The nuclear decay itself, logged as a marker event.
    NuclearDecay,
    /// Photoelectric absorption.
    Photoelectric,
    /// Compton scattering off an atomic electron.
    Compton,
    /// Coherent (Rayleigh) scattering; deposits no energy.
    Rayleigh,
    /// A K-shell fluorescence photon escaped the absorption site.
    XrayEscape,
    /// No interaction; the photon left the scene.
    NoInteraction,
    /// The trace-depth limit was exhausted.
    ErrorTraceDepth,
    /// A back face popped an already-empty material stack.
    ErrorEmptyStack,
    /// A back face's material did not match the stack top.
    ErrorMatch,
}

impl Kind {
    /// Small integer code used by the packed binary output format.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::NuclearDecay => 0,
            Self::Photoelectric => 1,
            Self::XrayEscape => 2,
            Self::Compton => 3,
            Self::Rayleigh => 4,
            Self::NoInteraction => 5,
            Self::ErrorTraceDepth => 6,
            Self::ErrorEmptyStack => 7,
            Self::ErrorMatch => 8,
        }
    }
}

/// Distinguishes the two annihilation partners from a prompt gamma.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Color {
    /// First annihilation photon.
    #[default]
    Blue,
    /// Second annihilation photon, launched opposite the blue one.
    Red,
    /// Prompt gamma or decay marker.
    Yellow,
}

impl Color {
    /// Small integer code used by the packed binary output format.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Blue => 0,
            Self::Red => 1,
            Self::Yellow => 2,
        }
    }
}

/// A photon in flight.  Constructed by a [`NuclearDecay`] and consumed by
/// the transport loop; owns nothing but its primitive fields.
#[derive(Clone, Copy, Debug)]
pub struct Photon {
    /// Current position in cm.
    pub pos: Vector3,
    /// Unit direction of travel.
    pub dir: Vector3,
    /// Current energy in MeV.
    pub energy: f64,
    /// Current time in seconds.
    pub time: f64,
    /// Identifier of the decay this photon came from.
    pub decay_id: i64,
    /// Annihilation-pair color tag.
    pub color: Color,
    /// Source that produced the decay.
    pub src_id: i32,
    /// Detector currently containing the photon; negative outside any
    /// sensitive volume.
    pub det_id: i32,
    /// Compton scattered outside a sensitive volume.
    pub scatter_compton_phantom: bool,
    /// Compton scattered inside a sensitive volume.
    pub scatter_compton_detector: bool,
    /// Rayleigh scattered outside a sensitive volume.
    pub scatter_rayleigh_phantom: bool,
    /// Rayleigh scattered inside a sensitive volume.
    pub scatter_rayleigh_detector: bool,
    /// The photon is a K-shell fluorescence escape.
    pub xray_flouresence: bool,
}

impl Photon {
    /// Creates a photon at the given phase-space point.
    #[must_use]
    pub const fn new(
        pos: Vector3,
        dir: Vector3,
        energy: f64,
        time: f64,
        decay_id: i64,
        color: Color,
        src_id: i32,
    ) -> Self {
        Self {
            pos,
            dir,
            energy,
            time,
            decay_id,
            color,
            src_id,
            det_id: -1,
            scatter_compton_phantom: false,
            scatter_compton_detector: false,
            scatter_rayleigh_phantom: false,
            scatter_rayleigh_detector: false,
            xray_flouresence: false,
        }
    }

    /// True while the photon is inside a sensitive detector volume.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        self.det_id >= 0
    }

    /// Records a Compton scatter in the current volume class.
    pub fn mark_compton_scatter(&mut self) {
        if self.is_sensitive() {
            self.scatter_compton_detector = true;
        } else {
            self.scatter_compton_phantom = true;
        }
    }

    /// Records a Rayleigh scatter in the current volume class.
    pub fn mark_rayleigh_scatter(&mut self) {
        if self.is_sensitive() {
            self.scatter_rayleigh_detector = true;
        } else {
            self.scatter_rayleigh_phantom = true;
        }
    }
}

/// One nuclear decay and the photons it spawned.  A positron decay with a
/// prompt gamma emits up to three photons (blue, red, yellow).
#[derive(Clone, Debug)]
pub struct NuclearDecay {
    /// Identifier shared by every photon and interaction of this decay.
    pub decay_id: i64,
    /// Decay time in seconds.
    pub time: f64,
    /// Source that produced the decay.
    pub src_id: i32,
    /// Decay (annihilation) position in cm.
    pub position: Vector3,
    /// Energy attributed to the decay marker record, in MeV.
    pub energy: f64,
    photons: ArrayVec<Photon, 3>,
}

impl NuclearDecay {
    /// Creates an empty decay record.
    #[must_use]
    pub const fn new(decay_id: i64, time: f64, src_id: i32, position: Vector3, energy: f64) -> Self {
        Self {
            decay_id,
            time,
            src_id,
            position,
            energy,
            photons: ArrayVec::new_const(),
        }
    }

    /// Attaches a photon to this decay.
    ///
    /// # Panics
    ///
    /// Panics if more than three photons are added.
    pub fn add_photon(&mut self, photon: Photon) {
        self.photons.push(photon);
    }

    /// The photons spawned by this decay.
    #[must_use]
    pub fn photons(&self) -> &[Photon] {
        &self.photons
    }

    /// Expected photon multiplicity of this record.
    #[must_use]
    pub fn no_photons(&self) -> usize {
        self.photons.len()
    }
}

/// Untouched coincidence marker.
pub const COINC_UNTOUCHED: i64 = -1;
/// Rejected coincidence marker.
pub const COINC_REJECTED: i64 = -2;

/// One energy deposition (or marker/error) record; the sole currency of
/// the DAQ pipeline.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Interaction {
    /// Identifier shared with every record born of the same decay.
    pub decay_id: i64,
    /// What happened here.
    pub kind: Kind,
    /// Photon color tag.
    pub color: Color,
    /// Event time in seconds.
    pub time: f64,
    /// Event position in cm.
    pub pos: Vector3,
    /// Energy deposited in the material at this point, in MeV.
    pub energy: f64,
    /// Detector id; negative outside any sensitive volume.
    pub det_id: i32,
    /// Source id.
    pub src_id: i32,
    /// Material id at the interaction point.
    pub mat_id: i32,
    /// Compton scattered in a phantom before this event.
    pub scatter_compton_phantom: bool,
    /// Compton scattered in a detector before this event.
    pub scatter_compton_detector: bool,
    /// Rayleigh scattered in a phantom before this event.
    pub scatter_rayleigh_phantom: bool,
    /// Rayleigh scattered in a detector before this event.
    pub scatter_rayleigh_detector: bool,
    /// This record is a K-shell fluorescence escape.
    pub xray_flouresence: bool,
    /// Set when a processor removes the event without erasing its slot.
    pub dropped: bool,
    /// Coincidence tag: −1 untouched, −2 rejected, otherwise the accepted
    /// coincidence group id.
    pub coinc_id: i64,
}

impl Interaction {
    /// A record for the decay itself, used as a time/position marker.
    #[must_use]
    pub const fn from_decay(decay: &NuclearDecay, mat_id: i32) -> Self {
        Self {
            decay_id: decay.decay_id,
            kind: Kind::NuclearDecay,
            color: Color::Yellow,
            time: decay.time,
            pos: decay.position,
            energy: decay.energy,
            det_id: -1,
            src_id: decay.src_id,
            mat_id,
            scatter_compton_phantom: false,
            scatter_compton_detector: false,
            scatter_rayleigh_phantom: false,
            scatter_rayleigh_detector: false,
            xray_flouresence: false,
            dropped: false,
            coinc_id: COINC_UNTOUCHED,
        }
    }

    /// A record for an interaction of `photon` depositing `deposit` MeV.
    #[must_use]
    pub const fn from_photon(kind: Kind, photon: &Photon, mat_id: i32, deposit: f64) -> Self {
        Self {
            decay_id: photon.decay_id,
            kind,
            color: photon.color,
            time: photon.time,
            pos: photon.pos,
            energy: deposit,
            det_id: photon.det_id,
            src_id: photon.src_id,
            mat_id,
            scatter_compton_phantom: photon.scatter_compton_phantom,
            scatter_compton_detector: photon.scatter_compton_detector,
            scatter_rayleigh_phantom: photon.scatter_rayleigh_phantom,
            scatter_rayleigh_detector: photon.scatter_rayleigh_detector,
            xray_flouresence: photon.xray_flouresence,
            dropped: false,
            coinc_id: COINC_UNTOUCHED,
        }
    }

    /// An error record carrying the photon's last known state.
    #[must_use]
    pub const fn error(kind: Kind, photon: &Photon) -> Self {
        Self::from_photon(kind, photon, -1, 0.0)
    }

    /// Folds the four scatter flags into the code used by the packed
    /// binary output.
    #[must_use]
    pub const fn scatter_code(&self) -> i32 {
        (self.scatter_compton_phantom as i32)
            | ((self.scatter_compton_detector as i32) << 1)
            | ((self.scatter_rayleigh_phantom as i32) << 2)
            | ((self.scatter_rayleigh_detector as i32) << 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_marks_follow_sensitivity() {
        let mut photon = Photon::new(
            Vector3::ZERO,
            Vector3::UNIT_X,
            0.511,
            0.0,
            1,
            Color::Blue,
            0,
        );
        photon.mark_compton_scatter();
        assert!(photon.scatter_compton_phantom);
        assert!(!photon.scatter_compton_detector);

        photon.det_id = 3;
        photon.mark_rayleigh_scatter();
        assert!(photon.scatter_rayleigh_detector);
    }

    #[test]
    fn interaction_inherits_photon_state() {
        let mut photon = Photon::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::UNIT_Z,
            0.511,
            1.5e-9,
            7,
            Color::Red,
            2,
        );
        photon.det_id = 4;
        photon.mark_compton_scatter();
        let event = Interaction::from_photon(Kind::Compton, &photon, 5, 0.2);
        assert_eq!(event.decay_id, 7);
        assert_eq!(event.det_id, 4);
        assert_eq!(event.mat_id, 5);
        assert!(event.scatter_compton_detector);
        assert!(!event.dropped);
        assert_eq!(event.coinc_id, COINC_UNTOUCHED);
        assert_eq!(event.scatter_code(), 0b10);
    }

    #[test]
    fn decay_holds_at_most_three_photons() {
        let mut decay = NuclearDecay::new(1, 0.0, 0, Vector3::ZERO, 0.120);
        for color in [Color::Blue, Color::Red, Color::Yellow] {
            decay.add_photon(Photon::new(
                Vector3::ZERO,
                Vector3::UNIT_X,
                0.511,
                0.0,
                1,
                color,
                0,
            ));
        }
        assert_eq!(decay.no_photons(), 3);
    }
}
