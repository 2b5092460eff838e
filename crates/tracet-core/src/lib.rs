#![forbid(unsafe_code)]

pub mod decision;
pub mod errors;
pub mod event;
pub mod observation;
pub mod proposal;
pub mod traits;
pub mod types;
