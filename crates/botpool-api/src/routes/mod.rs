pub mod jobs;
pub mod modify;
