//! Supported languages and call language detection

use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages a parent may be addressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    #[default]
    English,
    Twi,
    Ewe,
    Ga,
    Dagbani,
    Hausa,
    Gonja,
    Fante,
    Nzema,
}

impl Language {
    pub const ALL: [Language; 9] = [
        Language::English,
        Language::Twi,
        Language::Ewe,
        Language::Ga,
        Language::Dagbani,
        Language::Hausa,
        Language::Gonja,
        Language::Fante,
        Language::Nzema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Twi => "Twi",
            Language::Ewe => "Ewe",
            Language::Ga => "Ga",
            Language::Dagbani => "Dagbani",
            Language::Hausa => "Hausa",
            Language::Gonja => "Gonja",
            Language::Fante => "Fante",
            Language::Nzema => "Nzema",
        }
    }

    /// Parse a language name or ISO 639 code (case-insensitive).
    ///
    /// Transcription services report codes (`en`, `tw`, `ak`, `ee`, `ha`) or
    /// full names, so both are accepted. "Akan" maps to Twi.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" | "eng" => Some(Language::English),
            "twi" | "tw" | "twi (akan)" | "akan" | "ak" | "aka" => Some(Language::Twi),
            "ewe" | "ee" => Some(Language::Ewe),
            "ga" | "gaa" => Some(Language::Ga),
            "dagbani" | "dag" => Some(Language::Dagbani),
            "hausa" | "ha" | "hau" => Some(Language::Hausa),
            "gonja" | "gjn" => Some(Language::Gonja),
            "fante" | "fanti" | "fat" => Some(Language::Fante),
            "nzema" | "nzi" => Some(Language::Nzema),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a call's language was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Detected from the parent's recorded speech
    AudioMl,
    /// Guessed from the mobile network prefix
    #[default]
    PhonePrefix,
    /// Contact's stated preference
    UserPreference,
    /// Set by a teacher
    Manual,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::AudioMl => "audio_ml",
            DetectionMethod::PhonePrefix => "phone_prefix",
            DetectionMethod::UserPreference => "user_preference",
            DetectionMethod::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "audio_ml" => Some(DetectionMethod::AudioMl),
            "phone_prefix" => Some(DetectionMethod::PhonePrefix),
            "user_preference" => Some(DetectionMethod::UserPreference),
            "manual" => Some(DetectionMethod::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Language used for a call, with provenance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub language: Language,
    pub method: DetectionMethod,
    /// 0.0 ..= 1.0
    pub confidence: f64,
}

impl Default for LanguageInfo {
    fn default() -> Self {
        Self {
            language: Language::English,
            method: DetectionMethod::PhonePrefix,
            confidence: PREFIX_MISS_CONFIDENCE,
        }
    }
}

const PREFIX_HIT_CONFIDENCE: f64 = 0.6;
const PREFIX_MISS_CONFIDENCE: f64 = 0.3;

/// Regional language associated with Ghanaian mobile prefixes
const PREFIX_TABLE: &[(&str, Language)] = &[
    ("024", Language::Twi),
    ("054", Language::Twi),
    ("055", Language::Twi),
    ("020", Language::Ga),
    ("050", Language::Ga),
    ("027", Language::Ewe),
    ("057", Language::Ewe),
    ("026", Language::Dagbani),
    ("056", Language::Dagbani),
];

impl LanguageInfo {
    pub fn preferred(language: Language) -> Self {
        Self {
            language,
            method: DetectionMethod::UserPreference,
            confidence: 1.0,
        }
    }

    /// Guess from the number's network prefix. Accepts local (`024...`) and
    /// international (`+23324...`) forms.
    pub fn from_phone(phone: &str) -> Self {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let local = match digits.strip_prefix("233") {
            Some(rest) => format!("0{}", rest),
            None => digits,
        };

        PREFIX_TABLE
            .iter()
            .find(|(prefix, _)| local.starts_with(prefix))
            .map(|(_, language)| Self {
                language: *language,
                method: DetectionMethod::PhonePrefix,
                confidence: PREFIX_HIT_CONFIDENCE,
            })
            .unwrap_or_default()
    }

    /// Initial language for a new call: stated preference first, then the prefix
    pub fn for_contact(preferred: Option<Language>, phone: &str) -> Self {
        match preferred {
            Some(language) => Self::preferred(language),
            None => Self::from_phone(phone),
        }
    }

    pub fn detected(language: Language, confidence: f64) -> Self {
        Self {
            language,
            method: DetectionMethod::AudioMl,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!(Language::from_str("twi"), Some(Language::Twi));
        assert_eq!(Language::from_str("Akan"), Some(Language::Twi));
        assert_eq!(Language::from_str("en"), Some(Language::English));
        assert_eq!(Language::from_str("klingon"), None);
    }

    #[test]
    fn test_prefix_detection() {
        let info = LanguageInfo::from_phone("0241234567");
        assert_eq!(info.language, Language::Twi);
        assert_eq!(info.method, DetectionMethod::PhonePrefix);
        assert_eq!(info.confidence, 0.6);

        assert_eq!(LanguageInfo::from_phone("+233201234567").language, Language::Ga);
        assert_eq!(LanguageInfo::from_phone("0571234567").language, Language::Ewe);
    }

    #[test]
    fn test_prefix_miss_defaults_to_english() {
        let info = LanguageInfo::from_phone("0231234567");
        assert_eq!(info.language, Language::English);
        assert_eq!(info.confidence, 0.3);
    }

    #[test]
    fn test_preference_wins() {
        let info = LanguageInfo::for_contact(Some(Language::Hausa), "0241234567");
        assert_eq!(info.language, Language::Hausa);
        assert_eq!(info.method, DetectionMethod::UserPreference);
        assert_eq!(info.confidence, 1.0);
    }
}
