pub mod container_runtime;

pub use container_runtime::{ContainerRuntime, RuntimeError, RuntimeResult};

#[cfg(test)]
pub(crate) use container_runtime::testing;
