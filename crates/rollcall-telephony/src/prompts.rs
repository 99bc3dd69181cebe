//! Spoken prompts
//!
//! English, Twi and Ga are voiced; every other language falls back to
//! English until recorded translations exist.

use rollcall_core::models::{CallContext, Language};

use crate::ivr::IvrResponse;
use crate::paths::{self, callback_url};

/// Languages with their own prompt text
pub const VOICED_LANGUAGES: [Language; 3] = [Language::English, Language::Twi, Language::Ga];

/// The language prompts are actually spoken in
pub fn prompt_language(language: Language) -> Language {
    if VOICED_LANGUAGES.contains(&language) {
        language
    } else {
        Language::English
    }
}

/// Reason menu read when the parent picks up
pub fn menu_text(language: Language, context: &CallContext) -> String {
    let school = context.school_name.as_str();
    let child = context.student_name.as_str();

    match prompt_language(language) {
        Language::Twi => format!(
            "Meda wo akye. Yɛfiri {school}. {child} anhyia sukuu nnɛ. \
             Mia 1 sɛ ɔyare, 2 sɛ ɔrekɔ akwantu, 3 sɛ ɔreyɛ adwuma, \
             4 sɛ abusua asɛm bi aba, 5 sɛ ɛyɛ nea ɛka ho, anaa 9 sɛ wobɛkasa ne ɔkyerɛkyerɛfo."
        ),
        Language::Ga => format!(
            "Ojekoo. Yɛfɛɛ {school}. {child} ko sukuu nnɛ. \
             Press 1 sɛ ɔyare, 2 sɛ akwantu, 3 sɛ adwuma, 4 sɛ abusua, 5 sɛ nea ɛka ho, 9 sɛ teacher."
        ),
        _ => format!(
            "Hello. This is {school}. {child} was absent from school today. \
             Press 1 if sick, 2 if traveling, 3 if working, 4 for family emergency, \
             5 for other reason, or 9 to speak to a teacher."
        ),
    }
}

pub fn recording_text(language: Language) -> &'static str {
    match prompt_language(language) {
        Language::Twi => "Yɛsrɛ wo kyerɛw wo nkrasɛm wɔ beep no akyi. Mia hash sɛ wowie.",
        Language::Ga => "Please record your message. Press hash when finish.",
        _ => "Please record your message after the beep. Press hash when done.",
    }
}

pub fn thank_you_text(language: Language) -> &'static str {
    match prompt_language(language) {
        Language::Twi => "Yɛda wo ase. Nante yie.",
        Language::Ga => "Thank you. Goodbye.",
        _ => "Thank you for your response. Goodbye.",
    }
}

/// Reply to the incoming-call webhook
pub fn menu(language: Language, context: &CallContext, public_base_url: &str) -> IvrResponse {
    IvrResponse::new().get_digits(
        menu_text(language, context),
        Some(callback_url(public_base_url, paths::DTMF)),
    )
}

/// Ask for a voice message
pub fn recording(language: Language, public_base_url: &str) -> IvrResponse {
    IvrResponse::new().record(
        recording_text(language),
        Some(callback_url(public_base_url, paths::RECORDING)),
    )
}

/// Thank the parent and hang up
pub fn thank_you(language: Language) -> IvrResponse {
    IvrResponse::goodbye(thank_you_text(language))
}

/// Closing reply when the call cannot be matched or processing failed
pub fn fallback() -> IvrResponse {
    thank_you(Language::English)
}
