//! Integrations that rely on third-party services.
//!
//! This module groups adapters for captcha providers, the JavaScript
//! interpreter, and the answer prompt implemented by the host application.

pub mod captcha;
pub mod interpreters;
pub mod prompt;

pub use interpreters::BoaJavascriptInterpreter;
