//! Application services layer.

pub mod error;
pub mod feed;
pub mod images;
pub mod jobs;
pub mod repos;
