pub mod generation;
pub mod scope_guard;

pub use generation::Generations;
pub use scope_guard::{ScopeGuard, TaskGuard};
