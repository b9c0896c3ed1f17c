//! HTTP gateway serving facial-expression classification and single-turn
//! chat replies from pretrained models, loaded lazily on first use.

pub mod api;
pub mod classification;
pub mod config;
pub mod conversation;
pub mod device;
pub mod error;
pub mod generation;
pub mod image_processor;
pub mod model;
pub mod registry;
pub mod sampling;
pub mod tokenizer;
