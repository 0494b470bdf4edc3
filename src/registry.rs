pub mod endpoint_registry;
pub mod types;

pub use endpoint_registry::EndpointRegistry;
pub use types::{Endpoint, EndpointInfo};
