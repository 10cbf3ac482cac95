//! Built-in pattern responder in the style of classic ELIZA.
//!
//! Needs no credentials and no network.  The reply is a pure function of the
//! input text and the prior history: rules are tried in order, the first one
//! whose pattern matches (with a non-empty capture, when it has one) answers,
//! and the variant is picked by how many user turns came before.

use std::sync::LazyLock;

use regex::Regex;

use crate::subsystems::memory::{ChatMessage, Role};

/// Reply for empty or whitespace-only input.
pub const CLARIFYING_REPLY: &str = "I didn't quite catch that. What would you like to talk about?";

const GENERIC_REPLIES: &[&str] = &[
    "Please tell me more.",
    "I see. How does that make you feel?",
    "Can you elaborate on that?",
    "Why do you say that?",
    "Very interesting. Please go on.",
    "How does that relate to what you were feeling earlier?",
];

/// Reply used once a conversation runs long without any rule matching.
const LONG_CONVERSATION_REPLY: &str =
    "We have covered a lot together. What feels most important to you right now?";
const LONG_CONVERSATION_TURNS: usize = 10;

struct Rule {
    pattern: Regex,
    /// `{0}` is replaced by the reflected first capture group.
    replies: &'static [&'static str],
}

fn rule(pattern: &str, replies: &'static [&'static str]) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("built-in responder pattern compiles"),
        replies,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(?i)\bi need (.+)", &[
            "Why do you need {0}?",
            "Would it really help you to get {0}?",
            "Are you sure you need {0}?",
        ]),
        rule(r"(?i)\bi(?: am|'m) feeling (.+)", &[
            "How long have you been feeling {0}?",
            "Do you often feel {0}?",
            "What do you think is making you feel {0}?",
        ]),
        rule(r"(?i)\bi feel (.+)", &[
            "Tell me more about feeling {0}.",
            "Do you often feel {0}?",
            "When do you usually feel {0}?",
        ]),
        rule(r"(?i)\bi(?: am|'m) (.+)", &[
            "How long have you been {0}?",
            "Why do you tell me you're {0}?",
            "How do you feel about being {0}?",
        ]),
        rule(r"(?i)\bi can'?t (.+)", &[
            "How do you know you can't {0}?",
            "Perhaps you could {0} if you tried.",
            "What would it take for you to {0}?",
        ]),
        rule(r"(?i)\bbecause (.+)", &[
            "Is that the real reason?",
            "What other reasons come to mind?",
            "Does that reason explain anything else?",
        ]),
        rule(r"(?i)\bsorry\b", &[
            "There are many times when no apology is needed.",
            "What feelings do you have when you apologize?",
        ]),
        rule(r"(?i)\bmy (mother|father|mom|dad|sister|brother|family|wife|husband|partner)\b", &[
            "Tell me more about your {0}.",
            "How do you get along with your {0}?",
            "Who else in your life comes to mind when you think of your {0}?",
        ]),
        rule(r"(?i)\bdream(?:s|ed|t)?\b", &[
            "What does that dream suggest to you?",
            "Do you dream often?",
            "Who appears in your dreams?",
        ]),
        rule(r"(?i)\byou are (.+)", &[
            "What makes you think I am {0}?",
            "Does it please you to believe I am {0}?",
        ]),
        rule(r"(?i)\bwhy don'?t you (.+)", &[
            "Do you really think I don't {0}?",
            "Perhaps eventually I will {0}.",
        ]),
        rule(r"(?i)^\s*(?:yes|yeah|yep)\b", &[
            "You seem quite sure.",
            "OK, but can you elaborate a bit?",
        ]),
        rule(r"(?i)^\s*(?:no|nope)\b", &[
            "Why not?",
            "You are being a bit negative. Why?",
        ]),
        rule(r"(?i)\b(?:hello|hi|hey|greetings)\b", &[
            "Hello. How are you feeling today?",
            "Hi there. What brings you here today?",
        ]),
        rule(r"\?\s*$", &[
            "Why do you ask that?",
            "What do you think?",
            "Perhaps the answer lies within yourself.",
        ]),
    ]
});

/// First-person ⇄ second-person swaps applied to captured fragments.
fn reflect_word(word: &str) -> Option<&'static str> {
    Some(match word {
        "i" => "you",
        "me" => "you",
        "my" => "your",
        "mine" => "yours",
        "myself" => "yourself",
        "am" => "are",
        "was" => "were",
        "i'm" => "you are",
        "i've" => "you have",
        "i'll" => "you will",
        "i'd" => "you would",
        "you" => "me",
        "your" => "my",
        "yours" => "mine",
        "yourself" => "myself",
        "you're" => "I am",
        "you've" => "I have",
        "you'll" => "I will",
        _ => return None,
    })
}

fn reflect(fragment: &str) -> String {
    fragment
        .split_whitespace()
        .map(|w| {
            let lower = w.to_lowercase();
            reflect_word(&lower).map(str::to_string).unwrap_or(lower)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic, stateless responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackResponder;

impl FallbackResponder {
    pub fn new() -> Self {
        Self
    }

    /// Answer `text` given the conversation so far.  Never returns an empty
    /// string.
    pub fn respond(&self, text: &str, history: &[ChatMessage]) -> String {
        let text = text.trim();
        if text.is_empty() {
            return CLARIFYING_REPLY.to_string();
        }

        let turn = history.iter().filter(|m| m.role == Role::User).count();

        for rule in RULES.iter() {
            let Some(caps) = rule.pattern.captures(text) else {
                continue;
            };
            let fragment = caps
                .get(1)
                .map(|m| reflect(m.as_str().trim_end_matches(['.', '!', '?', ',', ';', ':'])));
            if matches!(&fragment, Some(f) if f.is_empty()) {
                continue;
            }
            let template = rule.replies[turn % rule.replies.len()];
            return match fragment {
                Some(f) => template.replace("{0}", &f),
                None => template.to_string(),
            };
        }

        if turn >= LONG_CONVERSATION_TURNS && turn % LONG_CONVERSATION_TURNS == 0 {
            return LONG_CONVERSATION_REPLY.to_string();
        }
        GENERIC_REPLIES[turn % GENERIC_REPLIES.len()].to_string()
    }

    /// Opening line for a fresh conversation.
    pub fn greeting(&self, agent_name: &str) -> String {
        format!("Hello. I am {agent_name}. How are you feeling today?")
    }
}
