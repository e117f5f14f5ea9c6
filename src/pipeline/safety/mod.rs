//! Rule-based safety screening for untrusted input and generated answers.

pub mod keywords;
pub mod sanitize;
pub mod types;
pub mod validator;

pub use keywords::scan_keywords;
pub use sanitize::sanitize_untrusted_text;
pub use types::{SanitizedText, Violation, ViolationCategory};
pub use validator::KeywordSafetyValidator;
