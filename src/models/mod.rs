pub mod enums;
pub mod lab;
pub mod lenient;
pub mod medication;
pub mod pharmacy;
pub mod record;
pub mod vital_sign;

pub use lab::*;
pub use medication::*;
pub use pharmacy::*;
pub use record::*;
pub use vital_sign::*;
