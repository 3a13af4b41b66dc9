//! Face-forgery detection for short video clips.
//!
//! The crate is organised around three stages:
//!
//! - [`extract`]: sample frames from labeled videos, locate the face and
//!   write a corpus of face crops
//! - [`training`]: fit the classifier in [`model`] to that corpus with
//!   checkpointing, learning-rate decay and early stopping
//! - [`inference`]: classify single images or whole videos, aggregating
//!   frame verdicts by majority vote

pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod faces;
pub mod inference;
pub mod label;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod training;
pub mod video;

pub use error::{DetectError, Result};
pub use label::Label;
