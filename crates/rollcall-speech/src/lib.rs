//! Speech pipeline for Rollcall
//!
//! Turns a parent's voice message into a structured absence reason and a
//! spoken acknowledgment in the parent's language.
//!
//! ```text
//!  recording URL
//!       |
//!  transcribe ──> text + detected language
//!       |
//!  classify   ──> reason, details, concerns, needs follow-up
//!       |
//!  respond    ──> short reply in the same language
//!       |
//!  synthesize ──> audio (base64)
//! ```
//!
//! Every stage goes through the [`SpeechProvider`] port; the pipeline
//! reports which stage failed instead of returning an error.

pub mod error;
pub mod openai;
pub mod pipeline;
pub mod provider;

pub use error::SpeechError;
pub use openai::OpenAiSpeechProvider;
pub use pipeline::{PipelineOutcome, PipelineStage, SpeechPipeline};
pub use provider::{voice_for, Classification, SpeechProvider, SynthesizedAudio, Transcription};
