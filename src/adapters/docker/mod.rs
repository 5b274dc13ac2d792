mod cli;
pub mod parser;

pub use cli::DockerCli;
