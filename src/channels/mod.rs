//! Network surfaces of the assistant.

pub mod web;
