// src/risk.rs

use serde::{Deserialize, Serialize};

/// Phrases that route a message straight to the safety response.
pub const DEFAULT_RISK_PHRASES: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "killing myself",
    "end my life",
    "ending my life",
    "want to die",
    "wanna die",
    "better off dead",
    "no reason to live",
    "don't want to live",
    "dont want to live",
    "take my own life",
    "self harm",
    "self-harm",
    "hurt myself",
    "hurting myself",
    "cut myself",
    "cutting myself",
    "overdose",
];

/// Crisis contacts returned with every emergency reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContacts {
    #[serde(default = "default_hotline")]
    pub hotline: String,
    #[serde(default = "default_institution_email", alias = "institution_email")]
    pub institution_email: String,
    #[serde(default = "default_institution_phone", alias = "institution_phone")]
    pub institution_phone: String,
}

impl Default for EmergencyContacts {
    fn default() -> Self {
        Self {
            hotline: default_hotline(),
            institution_email: default_institution_email(),
            institution_phone: default_institution_phone(),
        }
    }
}

fn default_hotline() -> String {
    "988 (Suicide & Crisis Lifeline, call or text)".to_string()
}

fn default_institution_email() -> String {
    "counseling@university.edu".to_string()
}

fn default_institution_phone() -> String {
    "555-0100".to_string()
}

/// Fixed reply for a message that tripped the filter.
pub fn safety_message(contacts: &EmergencyContacts) -> String {
    format!(
        "I'm really glad you told me, and I'm concerned about your safety. You don't have to go through this alone. \
         Please reach out right now to the crisis helpline at {hotline}, or contact the campus counseling team at \
         {phone} or {email}. If you are in immediate danger, call your local emergency number or go to the nearest \
         emergency room. A counselor has been notified so someone can follow up with you.",
        hotline = contacts.hotline,
        phone = contacts.institution_phone,
        email = contacts.institution_email,
    )
}

/// Case-insensitive literal substring scan. No stemming, no scoring.
#[derive(Debug, Clone)]
pub struct RiskFilter {
    phrases: Vec<String>,
}

impl Default for RiskFilter {
    fn default() -> Self {
        Self::new(DEFAULT_RISK_PHRASES.iter().copied())
    }
}

impl RiskFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// The first configured phrase contained in `text`, if any.
    pub fn matched_phrase(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn detect(&self, text: &str) -> bool {
        self.matched_phrase(text).is_some()
    }
}
