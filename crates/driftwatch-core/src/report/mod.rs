pub mod console;
pub mod status;

pub use status::StatusSnapshot;
