//! Oil-palm ripeness detection served over HTTP.
//!
//! Images arrive as uploads or browser camera captures, run through a YOLO network, and come
//! back annotated with one colored box per fruit bunch and a tally per ripeness class.
pub mod annotate;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod inferer;
pub mod labels;
pub mod meter;
pub mod nn;
pub mod store;
pub mod utils;
