#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::ignored_unit_patterns,
    clippy::items_after_statements
)]

pub mod consts;
pub mod proxies;
pub mod recovery;
pub mod registry;
pub mod startup;
pub mod supervisor;
pub mod sweep;
pub mod telemetry;
