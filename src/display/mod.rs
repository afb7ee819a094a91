pub mod progress;
pub mod viz;
