//! Documentation assistant backend.
//!
//! Builds a route index from a documentation tree, answers chat turns through
//! a hosted LLM, turns `NAVIGATE:`/`SET_CONTEXT:`/`SET_PREFERENCE:` lines in
//! replies into validated client actions, and serves search suggestions.

pub mod channels;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod lechat;
pub mod llm;
mod text;
