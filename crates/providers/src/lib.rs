//! Provider adapters for the generation proxy.
//!
//! Each module wraps one upstream provider behind the uniform
//! [`ProviderAdapter`] contract: config translation, job submission and
//! status normalization. All traffic goes through the local proxy via
//! [`ProxyClient`].

pub mod adapter;
pub mod dayu;
pub mod http;
pub mod kie;
pub mod registry;
pub mod sutu;
pub mod yijia;
pub mod yunwu;

pub use adapter::{ProgressCallback, ProviderAdapter, SubmitRequest};
pub use http::ProxyClient;
pub use registry::ProviderRegistry;
