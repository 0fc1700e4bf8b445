pub mod metadata;
pub mod paths;
