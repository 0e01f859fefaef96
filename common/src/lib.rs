//! Common code shared between `palm_server` and `palm_sender`.
pub mod counts;
pub mod data_url;
pub mod detection;
pub mod report;
