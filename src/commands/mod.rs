pub mod build;
pub mod export;
pub mod recommend;
pub mod status;
