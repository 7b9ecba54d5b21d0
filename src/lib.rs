#![forbid(unsafe_code)]

pub mod cli;
pub mod dashboard;
pub mod embed;
pub mod error;
pub mod extract;
pub mod gather;
pub mod gmail;
pub mod logging;
pub mod ranges;
pub mod release;
pub mod serve;
pub mod store;
