//! Timer command parser.
//!
//! Two grammars are accepted, selected by the shape of the input:
//!
//! ```text
//! A: YYYY-MM-DD HH:MM:SS <system> - <structure> [tags...]
//! B: <system> <structure> Reinforced until YYYY.MM.DD HH:MM:SS [tags...]
//! ```
//!
//! A date-shaped first token selects A. Otherwise the literal words
//! `Reinforced until` select B. Anything else is rejected without trying
//! further interpretations. Both grammars produce the same UTC deadline for
//! the same wall-clock digits; "Reinforced until" is a label, not an offset.
//!
//! Trailing `[text]` groups become tags, in order. In grammar A the first
//! standalone `-` separates system from structure, so a structure name may
//! contain further dashes. In grammar B the first word is the system and
//! the rest, up to `Reinforced until`, is the structure.
//!
//! Parsing never rejects a deadline for being in the past.
//!
//! Sovereignty timers have their own fixed layout, handled by
//! [`TimerParser::parse_sov`]:
//!
//! ```text
//! YYYY.MM.DD HH:MM <system> <owner...> <adm>
//! ```

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use super::model::TimerDraft;
use crate::error::ParseError;

/// Canonical rendering of a deadline; grammar A accepts it back unchanged.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const REINFORCED_FORMAT: &str = "%Y.%m.%d %H:%M:%S";
const SOV_FORMAT: &str = "%Y.%m.%d %H:%M";

const DATE_SHAPE: &str = "dddd-dd-dd";
const REINFORCED_DATE_SHAPE: &str = "dddd.dd.dd";
const TIME_SHAPE: &str = "dd:dd:dd";
const SOV_TIME_SHAPE: &str = "dd:dd";

/// Structure label given to every sovereignty timer.
pub const SOV_STRUCTURE: &str = "SOV Timer";
const ADM_RANGE: std::ops::RangeInclusive<f64> = 1.0..=6.0;

/// Units that can trail a structure name in an in-game paste.
const DISTANCE_UNITS: [&str; 3] = ["km", "m", "AU"];

/// Stateless parser for `add` command arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerParser;

impl TimerParser {
    /// Split raw command text into whitespace-separated tokens.
    pub fn tokenize(text: &str) -> Vec<&str> {
        text.split_whitespace().collect()
    }

    /// Parse free text, e.g. everything after `!add`.
    pub fn parse_text(text: &str) -> Result<TimerDraft, ParseError> {
        Self::parse(&Self::tokenize(text))
    }

    /// Parse a token sequence into timer fields.
    pub fn parse(tokens: &[&str]) -> Result<TimerDraft, ParseError> {
        let tokens: Vec<&str> = tokens.iter().flat_map(|t| t.split_whitespace()).collect();

        match tokens.first() {
            Some(first) if has_shape(first, DATE_SHAPE) => parse_absolute(&tokens),
            Some(_) => match find_reinforced(&tokens) {
                Some(pos) => parse_reinforced(&tokens, pos),
                None => Err(ParseError::UnrecognizedFormat),
            },
            None => Err(ParseError::UnrecognizedFormat),
        }
    }

    /// Parse `sov` arguments: `YYYY.MM.DD HH:MM <system> <owner...> <adm>`.
    ///
    /// The owner may span several words; the last word is the ADM, which
    /// must lie in 1..=6. The result is `<system> - SOV Timer [<owner>-ADM<adm>]`.
    pub fn parse_sov(text: &str) -> Result<TimerDraft, ParseError> {
        let tokens = Self::tokenize(text);
        let [date, time, system, rest @ ..] = tokens.as_slice() else {
            return Err(ParseError::SovUsage);
        };
        if !has_shape(date, REINFORCED_DATE_SHAPE) || !has_shape(time, SOV_TIME_SHAPE) {
            return Err(ParseError::BadSovTimestamp {
                input: format!("{date} {time}"),
            });
        }
        let deadline = parse_timestamp(date, time, SOV_FORMAT).map_err(|_| {
            ParseError::BadSovTimestamp {
                input: format!("{date} {time}"),
            }
        })?;

        let [owner @ .., adm] = rest else {
            return Err(ParseError::SovUsage);
        };
        if owner.is_empty() {
            return Err(ParseError::SovUsage);
        }
        let valid_adm = adm
            .parse::<f64>()
            .map(|value| ADM_RANGE.contains(&value))
            .unwrap_or(false);
        if !valid_adm {
            return Err(ParseError::BadAdm {
                input: adm.to_string(),
            });
        }

        Ok(TimerDraft {
            system: system.to_string(),
            structure: SOV_STRUCTURE.to_string(),
            tags: vec![format!("{}-ADM{adm}", owner.join(" "))],
            deadline,
        })
    }
}

/// Render a deadline in grammar A's timestamp form.
pub fn format_deadline(deadline: &DateTime<Utc>) -> String {
    deadline.format(DEADLINE_FORMAT).to_string()
}

fn parse_absolute(tokens: &[&str]) -> Result<TimerDraft, ParseError> {
    let date = tokens[0];
    let time = match tokens.get(1) {
        Some(t) if has_shape(t, TIME_SHAPE) => *t,
        other => {
            return Err(ParseError::BadTimestamp {
                input: join_present(date, other.copied()),
            })
        }
    };
    let deadline = parse_timestamp(date, time, DEADLINE_FORMAT)?;

    let (body, tags) = split_tags(&tokens[2..].join(" "));
    let words: Vec<&str> = body.split_whitespace().collect();
    let dash = words
        .iter()
        .position(|w| *w == "-")
        .ok_or(ParseError::UnrecognizedFormat)?;

    let system = words[..dash].join(" ");
    let structure = words[dash + 1..].join(" ");
    if system.is_empty() || structure.is_empty() {
        return Err(ParseError::UnrecognizedFormat);
    }

    Ok(TimerDraft {
        system,
        structure,
        tags,
        deadline,
    })
}

fn parse_reinforced(tokens: &[&str], pos: usize) -> Result<TimerDraft, ParseError> {
    let after = &tokens[pos + 2..];
    let date = after.first().copied();
    let time = after.get(1).copied();
    let (date, time) = match (date, time) {
        (Some(d), Some(t)) if has_shape(d, REINFORCED_DATE_SHAPE) && has_shape(t, TIME_SHAPE) => {
            (d, t)
        }
        (Some(d), t) => {
            return Err(ParseError::BadTimestamp {
                input: join_present(d, t),
            })
        }
        (None, _) => {
            return Err(ParseError::BadTimestamp {
                input: String::new(),
            })
        }
    };
    let deadline = parse_timestamp(date, time, REINFORCED_FORMAT)?;

    let (trailing, tags) = split_tags(&after[2..].join(" "));
    if !trailing.trim().is_empty() {
        return Err(ParseError::UnrecognizedFormat);
    }

    let prefix = &tokens[..pos];
    if prefix.len() < 2 {
        return Err(ParseError::UnrecognizedFormat);
    }
    let system = prefix[0].to_string();
    let structure = clean_structure(&prefix[1..]);
    if structure.is_empty() {
        return Err(ParseError::UnrecognizedFormat);
    }

    Ok(TimerDraft {
        system,
        structure,
        tags,
        deadline,
    })
}

fn find_reinforced(tokens: &[&str]) -> Option<usize> {
    tokens
        .windows(2)
        .position(|pair| pair[0] == "Reinforced" && pair[1] == "until")
}

fn parse_timestamp(date: &str, time: &str, format: &str) -> Result<DateTime<Utc>, ParseError> {
    let input = format!("{date} {time}");
    match NaiveDateTime::parse_from_str(&input, format) {
        // chrono reads `:60` as a leap second; wall-clock deadlines never have one.
        Ok(naive) if naive.nanosecond() < 1_000_000_000 => Ok(naive.and_utc()),
        _ => Err(ParseError::BadTimestamp { input }),
    }
}

/// `d` matches an ASCII digit, every other pattern byte matches itself.
fn has_shape(token: &str, pattern: &str) -> bool {
    token.len() == pattern.len()
        && token
            .bytes()
            .zip(pattern.bytes())
            .all(|(c, p)| if p == b'd' { c.is_ascii_digit() } else { c == p })
}

fn join_present(first: &str, second: Option<&str>) -> String {
    match second {
        Some(s) => format!("{first} {s}"),
        None => first.to_string(),
    }
}

/// Peel trailing `[tag]` groups off `text`. Returns the remainder and the
/// tags in the order they were written. Empty groups are dropped.
fn split_tags(text: &str) -> (String, Vec<String>) {
    let mut rest = text.trim_end();
    let mut tags = Vec::new();

    while rest.ends_with(']') {
        let Some(open) = rest.rfind('[') else {
            break;
        };
        let tag = rest[open + 1..rest.len() - 1].trim();
        if !tag.is_empty() {
            tags.push(tag.to_string());
        }
        rest = rest[..open].trim_end();
    }

    tags.reverse();
    (rest.to_string(), tags)
}

/// Structure words from an in-game paste, minus a trailing on-grid distance
/// and a leading `»` or `-` separator.
fn clean_structure(words: &[&str]) -> String {
    let distance_words = match words {
        [.., number, unit] if is_number(number) && DISTANCE_UNITS.contains(unit) => 2,
        [.., last] if is_glued_distance(last) => 1,
        _ => 0,
    };

    words[..words.len() - distance_words]
        .join(" ")
        .trim_start_matches(|c: char| c == '»' || c == '-' || c.is_whitespace())
        .to_string()
}

fn is_number(word: &str) -> bool {
    !word.is_empty()
        && word.starts_with(|c: char| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
}

fn is_glued_distance(word: &str) -> bool {
    DISTANCE_UNITS.iter().any(|unit| {
        word.strip_suffix(unit)
            .map(is_number)
            .unwrap_or(false)
    })
}
