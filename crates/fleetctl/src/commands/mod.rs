//! CLI command implementations

pub mod instance;
pub mod machine_type;
pub mod node;
pub mod operation;
pub mod template;
