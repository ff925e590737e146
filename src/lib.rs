// src/lib.rs

//! Harvester: resilient, resumable acquisition of structured records
//! from unreliable web sources.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
