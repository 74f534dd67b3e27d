pub mod batch;
pub mod blob;
pub mod document;
pub mod legacy;
pub mod models;
pub mod pg_repository;
pub mod repositories;
