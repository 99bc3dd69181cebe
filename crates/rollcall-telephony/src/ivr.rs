//! Voice XML returned to provider webhooks
//!
//! Built as a list of actions and rendered once, so every reply is a
//! well-formed `<Response>` document with escaped text.

use std::fmt::Write;

use crate::constants::{DIGITS_TIMEOUT_SECS, FINISH_ON_KEY, RECORD_MAX_LENGTH_SECS, SAY_VOICE};

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Say(String),
    Play(String),
    GetDigits {
        prompt: String,
        num_digits: u32,
        timeout_secs: u32,
        callback_url: Option<String>,
    },
    Record {
        prompt: String,
        max_length_secs: u32,
        callback_url: Option<String>,
    },
    Hangup,
}

/// A voice XML document under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IvrResponse {
    actions: Vec<Action>,
}

impl IvrResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.actions.push(Action::Say(text.into()));
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.actions.push(Action::Play(url.into()));
        self
    }

    /// Read `prompt` and collect a single key press
    pub fn get_digits(mut self, prompt: impl Into<String>, callback_url: Option<String>) -> Self {
        self.actions.push(Action::GetDigits {
            prompt: prompt.into(),
            num_digits: 1,
            timeout_secs: DIGITS_TIMEOUT_SECS,
            callback_url,
        });
        self
    }

    /// Read `prompt` then record a voice message until `#` or the time limit
    pub fn record(mut self, prompt: impl Into<String>, callback_url: Option<String>) -> Self {
        self.actions.push(Action::Record {
            prompt: prompt.into(),
            max_length_secs: RECORD_MAX_LENGTH_SECS,
            callback_url,
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.actions.push(Action::Hangup);
        self
    }

    /// Speak a closing message and end the call
    pub fn goodbye(message: impl Into<String>) -> Self {
        Self::new().say(message).hangup()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for action in &self.actions {
            write_action(&mut xml, action);
        }
        xml.push_str("</Response>");
        xml
    }
}

fn write_say(xml: &mut String, text: &str) {
    let _ = write!(
        xml,
        r#"<Say voice="{}" playBeep="false">{}</Say>"#,
        SAY_VOICE,
        escape_xml(text)
    );
}

fn callback_attr(callback_url: &Option<String>) -> String {
    callback_url
        .as_deref()
        .map(|url| format!(r#" callbackUrl="{}""#, escape_xml(url)))
        .unwrap_or_default()
}

fn write_action(xml: &mut String, action: &Action) {
    match action {
        Action::Say(text) => write_say(xml, text),
        Action::Play(url) => {
            let _ = write!(xml, r#"<Play url="{}"/>"#, escape_xml(url));
        }
        Action::GetDigits {
            prompt,
            num_digits,
            timeout_secs,
            callback_url,
        } => {
            let _ = write!(
                xml,
                r#"<GetDigits timeout="{}" finishOnKey="{}" numDigits="{}"{}>"#,
                timeout_secs,
                FINISH_ON_KEY,
                num_digits,
                callback_attr(callback_url)
            );
            write_say(xml, prompt);
            xml.push_str("</GetDigits>");
        }
        Action::Record {
            prompt,
            max_length_secs,
            callback_url,
        } => {
            let _ = write!(
                xml,
                r#"<Record finishOnKey="{}" maxLength="{}" trimSilence="true" playBeep="true"{}>"#,
                FINISH_ON_KEY,
                max_length_secs,
                callback_attr(callback_url)
            );
            write_say(xml, prompt);
            xml.push_str("</Record>");
        }
        Action::Hangup => xml.push_str("<Hangup/>"),
    }
}

/// Escape text for element content and attribute values
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
