pub mod resolver;
pub mod synthesizer;

pub use resolver::{DomainResolver, PublicDnsResolver};
pub use synthesizer::{fetch_exception_list, FilterSynthesizer};
