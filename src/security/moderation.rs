use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Stable category token returned to clients on rejection. The exact rule
/// that fired is never disclosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCategory {
    EmbeddedPhone,
    ScamUrl,
    Spam,
    Profanity,
    OffTopic,
    Other,
}

impl RejectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCategory::EmbeddedPhone => "embedded_phone",
            RejectCategory::ScamUrl => "scam_url",
            RejectCategory::Spam => "spam",
            RejectCategory::Profanity => "profanity",
            RejectCategory::OffTopic => "off_topic",
            RejectCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for RejectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject {
        category: RejectCategory,
        reason: String,
    },
}

impl Verdict {
    fn reject(category: RejectCategory, reason: &str) -> Self {
        Verdict::Reject {
            category,
            reason: reason.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

// Compile regexes once at startup.

/// Phone number families: international, dashed, dotted, parenthesized and
/// bare digit runs.
static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}|\+?\d{10,15}|\d{3}[-.\s]\d{3}[-.\s]\d{4}",
    )
    .unwrap()
});

static SCAM_HOST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(t\.me|telegram\.me|bit\.ly|tinyurl\.com|goo\.gl|rebrand\.ly|ow\.ly|lnk\.co|clickbank\.net)",
    )
    .unwrap()
});

static URL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+|www\.[^\s]+").unwrap());

static ENGLISH_PROFANITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(damn|crap|ass|bitch|bastard|piss|fuck|shit|asshole|dick|cock|pussy|whore|slut|cunt)\b",
    )
    .unwrap()
});

static HINGLISH_PROFANITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(bc|bhosdike|lodu|chutiya|gaandu|gandu|harami|besharam|madarchod|behenchod|chakka|randi|saali)\b",
    )
    .unwrap()
});

static SPAM_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(contact me on telegram|dm me|whatsapp only|text me at|call now|limited offer|act fast|click here|100% guaranteed|make money fast|free money|earn \$\d+|buy now|limited time)",
    )
    .unwrap()
});

/// Keywords that mark a body as on-topic for a rental board.
const RENTAL_KEYWORDS: &[&str] = &[
    "room",
    "flat",
    "apartment",
    "bhk",
    "rent",
    "rental",
    "property",
    "location",
    "available",
    "looking",
    "accommodation",
    "deposit",
    "furnished",
    "sharing",
    "parking",
    "tenant",
    "landlord",
];

const MAX_URLS: usize = 2;
const CAPS_RATIO_LIMIT: f64 = 0.7;
const CAPS_MIN_LETTERS: usize = 10;
const MAX_CHAR_RUN: usize = 5;
const RELEVANCE_MIN_DENSITY: f64 = 0.1;
const RELEVANCE_MIN_WORDS: usize = 3;

#[derive(Debug, Deserialize)]
struct RemoteModerationResponse {
    results: Vec<RemoteModerationResult>,
}

#[derive(Debug, Deserialize)]
struct RemoteModerationResult {
    categories: RemoteCategories,
}

#[derive(Debug, Deserialize)]
struct RemoteCategories {
    #[serde(default)]
    hate: bool,
    #[serde(default)]
    harassment: bool,
    #[serde(default)]
    sexual: bool,
    #[serde(default)]
    violence: bool,
}

/// Content moderator: ordered local filters plus an optional remote check.
#[derive(Clone)]
pub struct ContentModerator {
    api_key: Option<String>,
    http_client: Option<reqwest::Client>,
}

impl ContentModerator {
    pub fn new(api_key: Option<String>) -> Self {
        let http_client = api_key.as_ref().map(|_| reqwest::Client::new());
        Self {
            api_key,
            http_client,
        }
    }

    /// Run every check in order and return the first violation.
    pub async fn moderate(&self, text: &str) -> Verdict {
        let local = self.moderate_local(text);
        if !local.is_accepted() {
            return local;
        }

        if let Some(remote) = self.moderate_remote(text).await {
            return remote;
        }

        Verdict::Accept
    }

    /// The deterministic filter chain. Order matters: cheap pattern checks
    /// run before the relevance heuristic.
    pub fn moderate_local(&self, text: &str) -> Verdict {
        if PHONE_REGEX.is_match(text) {
            return Verdict::reject(
                RejectCategory::EmbeddedPhone,
                "Phone numbers belong in the phone field, not in the message",
            );
        }

        if SCAM_HOST_REGEX.is_match(text) {
            return Verdict::reject(RejectCategory::ScamUrl, "Message links to a blocked host");
        }

        if URL_REGEX.find_iter(text).count() > MAX_URLS {
            return Verdict::reject(RejectCategory::Spam, "Message contains too many URLs");
        }

        if ENGLISH_PROFANITY.is_match(text) || HINGLISH_PROFANITY.is_match(text) {
            return Verdict::reject(
                RejectCategory::Profanity,
                "Offensive or vulgar language detected",
            );
        }

        if SPAM_PHRASES.is_match(text) {
            return Verdict::reject(RejectCategory::Spam, "Message contains spam phrases");
        }

        if has_excessive_caps(text) || has_excessive_repetition(text) {
            return Verdict::reject(RejectCategory::Spam, "Message looks like spam");
        }

        if is_off_topic(text) {
            return Verdict::reject(
                RejectCategory::OffTopic,
                "Message appears off-topic for a rental board",
            );
        }

        Verdict::Accept
    }

    /// Remote moderation API check, enabled by configuration.
    /// Any transport or parse failure passes the message: availability wins
    /// over precision on the rare outage.
    async fn moderate_remote(&self, text: &str) -> Option<Verdict> {
        let api_key = self.api_key.as_ref()?;
        let client = self.http_client.as_ref()?;

        let body = serde_json::json!({
            "input": text,
            "model": "text-moderation-latest",
        });

        let response = match client
            .post("https://api.openai.com/v1/moderations")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Remote moderation request failed, passing message");
                return None;
            }
        };

        let parsed: RemoteModerationResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Remote moderation response unparsable, passing message");
                return None;
            }
        };

        let result = parsed.results.first()?;
        let flagged = result.categories.hate
            || result.categories.harassment
            || result.categories.sexual
            || result.categories.violence;

        if flagged {
            return Some(Verdict::reject(
                RejectCategory::Other,
                "Message violates the content policy",
            ));
        }

        None
    }

    /// Validate the dedicated phone field: 10 to 15 digits once punctuation
    /// is stripped. `None` is always valid.
    pub fn validate_phone_field(&self, phone: Option<&str>) -> bool {
        match phone {
            None => true,
            Some(p) => {
                let digits = p.chars().filter(|c| c.is_ascii_digit()).count();
                (10..=15).contains(&digits)
            }
        }
    }
}

fn has_excessive_caps(text: &str) -> bool {
    let letter_count = text.chars().filter(|c| c.is_alphabetic()).count();
    if letter_count < CAPS_MIN_LETTERS {
        return false;
    }

    let caps_count = text.chars().filter(|c| c.is_uppercase()).count();
    caps_count as f64 / letter_count as f64 > CAPS_RATIO_LIMIT
}

fn has_excessive_repetition(text: &str) -> bool {
    let mut prev_char = '\0';
    let mut run = 0;

    for ch in text.chars() {
        if ch.is_whitespace() {
            prev_char = '\0';
            run = 0;
            continue;
        }
        if ch == prev_char {
            run += 1;
            if run > MAX_CHAR_RUN {
                return true;
            }
        } else {
            prev_char = ch;
            run = 1;
        }
    }

    false
}

fn is_off_topic(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    // Very short bodies are too sparse to judge
    if words.len() <= RELEVANCE_MIN_WORDS {
        return false;
    }

    let keyword_count = words
        .iter()
        .filter(|word| RENTAL_KEYWORDS.iter().any(|kw| word.contains(kw)))
        .count();

    (keyword_count as f64 / words.len() as f64) < RELEVANCE_MIN_DENSITY
}
