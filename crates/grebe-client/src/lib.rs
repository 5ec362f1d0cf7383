pub use error::Error;
pub use registry_client::{RegistryClient, RegistryClientBuilder};

mod error;
mod registry_client;
