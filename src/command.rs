//! Parser for `rhobot try <file>` comments.

pub const SUBJECT: &str = "rhobot";
pub const VERB: &str = "try";

/// A build request extracted from a comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub subject: String,
    pub verb: String,
    pub argument: String,
}

/// Parses a comment body into a [`BuildCommand`].
///
/// The whole comment must be a single line of the form
/// `<subject> <verb> <argument>`, with subject and verb compared
/// case-insensitively. Any line break, even a trailing one, voids the
/// command. The argument keeps its internal whitespace.
///
/// Returns `None` when the comment is not a command.
pub fn parse_command(text: &str) -> Option<BuildCommand> {
    if text.contains(['\n', '\r']) {
        return None;
    }

    let (subject, rest) = split_first_word(text.trim())?;
    let (verb, argument) = split_first_word(rest)?;

    if argument.is_empty()
        || !subject.eq_ignore_ascii_case(SUBJECT)
        || !verb.eq_ignore_ascii_case(VERB)
    {
        return None;
    }

    Some(BuildCommand {
        subject: subject.to_string(),
        verb: verb.to_string(),
        argument: argument.to_string(),
    })
}

/// Splits at the first whitespace run, returning (word, rest without leading whitespace).
fn split_first_word(text: &str) -> Option<(&str, &str)> {
    let pos = text.find(char::is_whitespace)?;
    Some((&text[..pos], text[pos..].trim_start()))
}
