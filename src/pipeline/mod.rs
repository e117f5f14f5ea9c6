pub mod context;
pub mod coordinator; // Customer-request router
pub mod handlers;
pub mod processor; // Document processing workflow
pub mod response;
pub mod safety;
pub mod structuring;
pub mod workflow;
