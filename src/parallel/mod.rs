//! Thread-level machinery for the export pipeline.
//!
//! A [`fan_in::FanIn`] runs one fetcher thread per shard and merges their
//! records through a single [`delivery_queue::DeliveryQueue`].

pub mod delivery_queue;
pub mod fan_in;
