pub mod aggregation;
pub mod api;
pub mod db;
pub mod ingest;
pub mod pm;
pub mod ranking;
pub mod store;
pub mod waqi;
