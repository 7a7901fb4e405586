//! Marlin/Smoothieware firmware support: Marlin's line-oriented,
//! one-ack-at-a-time protocol. Smoothieware's "grbl mode" speaks Grbl's
//! bracketed status format instead, so it reuses [`crate::grbl::GrblParser`]
//! rather than this module — see `parser.rs`.

pub mod parser;

pub use parser::MarlinParser;
