//! OpenAI-shaped generator client (spec §4.4/§4.7).

mod driver;

pub use driver::OpenAiGeneratorClient;
