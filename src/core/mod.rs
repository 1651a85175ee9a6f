//! Core domain types: identifiers, pipeline definitions, schedules and
//! processing windows.

pub mod clock;
pub mod pipeline;
pub mod schedule;
pub mod types;
pub mod window;
