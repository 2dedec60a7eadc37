pub mod compiler;
pub mod probe;
pub mod services;
