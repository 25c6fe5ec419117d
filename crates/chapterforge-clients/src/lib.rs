//! Outbound call infrastructure shared by the LM generator clients and the
//! Media worker's sink collaborators (spec §4.5/§4.7/§6).

pub mod cache_key;
pub mod cached_generator;
pub mod converters;
pub mod generator;
pub mod service_client;
pub mod sinks;

pub use cache_key::{generation_cache_key, GenerationCacheKeyInput};
pub use cached_generator::CachedGeneratorClient;
pub use converters::{DiagramConverter, DiagramXmlConverter, FlowchartDslConverter, SvgConverter};
pub use generator::{GenerationRequest, GenerationResponse, GeneratorClient};
pub use service_client::{ClientStats, ServiceClient};
pub use sinks::{ChatSink, HttpChatSink, HttpObjectStore, HttpVcsSink, KvStore, ObjectStore, VcsSink};
