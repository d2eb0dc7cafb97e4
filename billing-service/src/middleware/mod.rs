pub mod clinic;

pub use clinic::ClinicContext;
