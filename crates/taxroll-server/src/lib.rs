//! Read-only lookup API over stored property records.

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
