pub mod downstream;
pub mod jobs;
