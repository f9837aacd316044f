//! Nom-based line parser.
//!
//! Produces borrowed slices into the input; [`super::parse`] turns them into
//! owned [`Command`](crate::command::Command) values.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

/// Maximum number of parameters on a line.
pub const MAX_PARAMS: usize = 15;

/// Parse the source (the part after `:` and before the first space).
fn parse_source(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command name: letters only, or three digits.
fn parse_command(input: &str) -> IResult<&str, &str> {
    let (rest, cmd) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;

    let is_all_letters = cmd.chars().all(|c| c.is_ascii_alphabetic());
    let is_three_digits = cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit());

    if is_all_letters || is_three_digits {
        Ok((rest, cmd))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::AlphaNumeric,
        )))
    }
}

/// Split the parameters following the command.
///
/// Runs of spaces separate parameters; a parameter starting with `:` takes
/// the rest of the line. Anything left after [`MAX_PARAMS`] is returned as
/// the unparsed remainder.
fn parse_params(input: &str) -> (&str, SmallVec<[&str; MAX_PARAMS]>) {
    let mut params: SmallVec<[&str; MAX_PARAMS]> = SmallVec::new();
    let mut rest = input;

    while rest.starts_with(' ') {
        if params.len() >= MAX_PARAMS {
            break;
        }

        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }

        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            rest = "";
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    (rest, params)
}

/// A parsed line with borrowed slices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedMessage<'a> {
    /// Source without the leading `:`.
    pub source: Option<&'a str>,
    /// Command name as sent.
    pub command: &'a str,
    /// Parameters, trailing included.
    pub params: SmallVec<[&'a str; MAX_PARAMS]>,
}

/// Where and why a parse failed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DetailedParseError {
    pub position: usize,
    pub kind: ErrorKind,
}

impl<'a> ParsedMessage<'a> {
    /// Parse a line with its terminator already removed.
    pub fn parse(input: &'a str) -> Result<Self, DetailedParseError> {
        let result = (|| {
            let (input, source) = opt(parse_source)(input)?;
            let (input, _) = space0(input)?;
            let (input, command) = parse_command(input)?;
            let (rest, params) = parse_params(input);
            if !rest.trim_start_matches(' ').is_empty() {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    rest,
                    ErrorKind::TooLarge,
                )));
            }
            Ok::<_, nom::Err<nom::error::Error<&str>>>((
                rest,
                ParsedMessage {
                    source,
                    command,
                    params,
                },
            ))
        })();

        match result {
            Ok((_, msg)) => Ok(msg),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(DetailedParseError {
                position: input.len() - e.input.len(),
                kind: e.code,
            }),
            Err(nom::Err::Incomplete(_)) => Err(DetailedParseError {
                position: input.len(),
                kind: ErrorKind::Eof,
            }),
        }
    }
}
