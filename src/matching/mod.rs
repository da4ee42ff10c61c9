// src/matching/mod.rs
pub mod canonical;
pub mod cascade;
pub mod conflict;
pub mod db;
pub mod manager;
pub mod query;
pub mod strategies;
pub mod writer;
