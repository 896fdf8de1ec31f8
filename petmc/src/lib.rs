#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `petmc` simulates positron emission tomography acquisitions by Monte
//! Carlo: decays are drawn from geometric activity distributions, each
//! photon is ray traced through a k-d-tree-indexed scene against material
//! physics tables, and the interaction stream is run through a detector
//! electronics (DAQ) pipeline.

mod convert;
pub mod daq;
pub mod error;
pub mod event;
pub mod fileutil;
pub mod isotope;
pub mod kdtree;
pub mod mapping;
pub mod material;
pub mod mathutil;
pub mod output;
pub mod physics;
pub mod rng;
pub mod scene;
pub mod source;
pub mod transport;
pub mod vecmath;
