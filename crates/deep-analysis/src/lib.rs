pub mod bm25;
pub mod chunk;
pub mod funnel;
pub mod questions;
pub mod rag;
pub mod synthesizer;

pub use funnel::DeepAnalysisEngine;
pub use questions::QuestionGenerator;
pub use rag::RagEngine;
pub use synthesizer::DossierSynthesizer;
