pub mod logbook;
pub mod params;
pub mod sensors;
pub mod snapshot;
