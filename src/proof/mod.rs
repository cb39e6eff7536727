//! The proof domain: nodes, events, the fold, and the facade over them.

pub mod event;
pub mod lease;
pub mod node;
pub mod replay;
pub mod scope;
pub mod service;
pub mod state;
pub mod taint;
