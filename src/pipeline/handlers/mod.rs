//! Domain handlers: one per data category, each able to extract, store,
//! retrieve and judge its own relevance to a question.

pub mod common;
pub mod duplicate;
pub mod error;
pub mod lab;
pub mod pharmacy;
pub mod prescription;
pub mod registry;
pub mod traits;
pub mod trends;
pub mod types;
pub mod vitals;

pub use common::HandlerDeps;
pub use error::HandlerError;
pub use lab::LabHandler;
pub use pharmacy::PharmacyHandler;
pub use prescription::PrescriptionHandler;
pub use registry::HandlerRegistry;
pub use traits::DomainHandler;
pub use types::*;
pub use vitals::VitalsHandler;
