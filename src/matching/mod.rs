//! Rule matching engine
//!
//! Decides whether a raw event satisfies an action definition.
//!
//! # Modules
//!
//! - [`operator`]: Operator evaluation over JSON values
//! - [`autocapture`]: DOM element chain criteria
//! - [`definition`]: Action definitions and the definition matcher

pub mod autocapture;
pub mod definition;
pub mod operator;

pub use autocapture::ElementCriteria;
pub use definition::{ActionDefinition, PropertyFilter};
pub use operator::{evaluate, Operator};
