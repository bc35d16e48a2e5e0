//! Kiln Engine
//!
//! A local reference backend for the `kiln-training` orchestrator: a
//! byte-histogram softmax classifier with real SGD/Adam updates. Small
//! enough to train anywhere, complete enough to exercise checkpointing,
//! resume, and the full callback chain.

pub mod histogram;

pub use histogram::HistogramEngine;
