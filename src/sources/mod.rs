//! Stage implementations for each data source.

pub mod cds;
pub mod era5;
pub mod gcm;
pub mod gridded;
pub mod gsod;
