pub mod backing;
pub mod context;
pub mod descriptor;
pub mod execution;
pub mod frame_in_flight;
pub mod platform;
