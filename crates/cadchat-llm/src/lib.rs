pub mod transformer;
pub mod provider;
pub mod providers;
pub mod error;

pub use error::{LLMError, ConversionError, Result};
pub use transformer::{SchemaTransformer, OpenAiTransformer, LLMStream};
pub use provider::{LLMProvider, BaseProvider, ProviderConfig};
pub use providers::OpenAiProvider;
