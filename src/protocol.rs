//! Protocol parser and command definitions for memstash
//!
//! The wire format is a small subset of the memcached text protocol:
//!
//! ```text
//! get <key> [<key> ...]\r\n
//! set <key> [<flags> <exptime>] <size>\r\n<payload>\r\n
//! ```
//!
//! Header lines are parsed with nom. Framing is incremental: [`CommandParser::parse`]
//! reports how many bytes a frame used, or `None` while the frame is still incomplete.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    bytes::streaming::tag as partial_tag,
    character::complete::{digit1, space0, space1},
    character::streaming::one_of,
    combinator::{all_consuming, eof, map_opt, peek, value},
    multi::many0,
    sequence::{pair, preceded, terminated},
    IResult,
};
use std::str;
use thiserror::Error;

/// Line terminator used throughout the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Flags reported in every `VALUE` line. Reserved, never stored.
pub const FLAGS: u32 = 0;

/// Largest `set` payload, and largest unterminated header line, accepted from one
/// client (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Commands supported by the memstash protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { keys: Vec<String> },
    Set { key: String, size: usize, payload: Vec<u8> },
}

/// Response types from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Stored,
    NotStored,
    /// Hits of a `get`, in request order. Serialized with a trailing `END`.
    Values(Vec<(String, Vec<u8>)>),
}

impl Response {
    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Stored => b"STORED\r\n".to_vec(),
            Response::NotStored => b"NOT-STORED\r\n".to_vec(),
            Response::Values(values) => {
                let mut bytes = Vec::new();
                for (key, value) in values {
                    bytes.extend_from_slice(
                        format!("VALUE {} {} {}\r\n", key, FLAGS, value.len()).as_bytes(),
                    );
                    bytes.extend_from_slice(value);
                    bytes.extend_from_slice(CRLF);
                }
                bytes.extend_from_slice(b"END\r\n");
                bytes
            }
        }
    }
}

/// Errors produced while framing a request.
///
/// Terminal errors end the connection. All others reject a single `set`, which is
/// answered with `NOT-STORED` after its bytes have been consumed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed set header: {0}")]
    MalformedHeader(String),

    #[error("invalid payload size: {0:?}")]
    InvalidSize(String),

    #[error("payload shorter than declared: {actual} of {declared} bytes")]
    PayloadTooShort { declared: usize, actual: usize },

    #[error("payload longer than declared: {actual} instead of {declared} bytes")]
    PayloadTooLong { declared: usize, actual: usize },
}

impl ParseError {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParseError::UnknownCommand(_) | ParseError::FrameTooLarge { .. }
        )
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// One request cut from the connection buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Command(Command),
    /// A `set` whose bytes were consumed but which cannot be applied
    Rejected(ParseError),
}

/// Incremental request parser.
///
/// `parse` never consumes anything itself; the caller advances its buffer by the
/// returned byte count.
#[derive(Debug, Clone)]
pub struct CommandParser {
    max_frame_size: usize,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Keyword {
    Get,
    Set,
}

impl CommandParser {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Attempts to cut one frame from the front of `buf`.
    ///
    /// - `Ok(Some((frame, consumed)))` - a complete frame used `consumed` bytes
    /// - `Ok(None)` - more data is needed
    /// - `Err(e)` - terminal error, the connection must be closed
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (parsed, limit) = match find_crlf(buf) {
            // A set may buffer its whole payload behind the header line
            Some(line_end) => (
                self.parse_frame(buf, line_end)?,
                line_end + 2 * CRLF.len() + self.max_frame_size,
            ),
            None => {
                check_keyword(buf)?;
                (None, self.max_frame_size)
            }
        };

        match parsed {
            None if buf.len() > limit => Err(ParseError::FrameTooLarge {
                size: buf.len(),
                max: self.max_frame_size,
            }),
            parsed => Ok(parsed),
        }
    }

    fn parse_frame(&self, buf: &[u8], line_end: usize) -> ParseResult<Option<(Frame, usize)>> {
        let line = &buf[..line_end];
        let body_start = line_end + CRLF.len();

        let (keyword, args) = match header(line) {
            Ok((_, parsed)) => parsed,
            Err(_) => return Err(ParseError::UnknownCommand(first_word(line))),
        };

        match keyword {
            Keyword::Get => {
                let keys = args
                    .into_iter()
                    .map(decode_key)
                    .filter(|key| !key.is_empty())
                    .collect();
                Ok(Some((Frame::Command(Command::Get { keys }), body_start)))
            }
            Keyword::Set => Ok(self
                .parse_set(&args, &buf[body_start..])?
                .map(|(frame, used)| (frame, body_start + used))),
        }
    }

    /// Frames the payload of a `set` by its declared size.
    ///
    /// The payload is complete once `size` bytes followed by CRLF are buffered; it may
    /// itself contain CRLF. A payload is short when a CRLF shows up before `size`
    /// and either the byte at `size` is not a terminator, or the client stopped
    /// sending right after a CRLF. Rejected payloads consume through their first CRLF.
    fn parse_set(&self, args: &[&[u8]], body: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (key, size) = match set_header(args) {
            Ok(header) => header,
            // Without a usable size the payload is taken to be the next line
            Err(err) => {
                return Ok(find_crlf(body).map(|end| (Frame::Rejected(err), end + CRLF.len())))
            }
        };
        if size > self.max_frame_size {
            return Err(ParseError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let first_crlf = find_crlf(body);
        let short = |end: usize| {
            (
                Frame::Rejected(ParseError::PayloadTooShort {
                    declared: size,
                    actual: end,
                }),
                end + CRLF.len(),
            )
        };

        let frame_end = size + CRLF.len();
        if body.len() >= frame_end {
            if &body[size..frame_end] == CRLF {
                let set = Command::Set {
                    key,
                    size,
                    payload: body[..size].to_vec(),
                };
                return Ok(Some((Frame::Command(set), frame_end)));
            }
            return Ok(match first_crlf {
                Some(end) if end < size => Some(short(end)),
                Some(end) => Some((
                    Frame::Rejected(ParseError::PayloadTooLong {
                        declared: size,
                        actual: end,
                    }),
                    end + CRLF.len(),
                )),
                None => None,
            });
        }

        if body.ends_with(CRLF) {
            return Ok(first_crlf.map(short));
        }
        Ok(None)
    }
}

/// Validates the arguments of a `set` header, returning the key and declared size
fn set_header(args: &[&[u8]]) -> ParseResult<(String, usize)> {
    let (key, declared) = match args {
        [key, declared] | [key, _, _, declared] => (decode_key(key), *declared),
        _ => {
            return Err(ParseError::MalformedHeader(format!(
                "expected `set <key> <size>`, got {} argument(s)",
                args.len()
            )))
        }
    };
    if key.is_empty() {
        return Err(ParseError::MalformedHeader("empty key".to_string()));
    }

    match payload_size(trim(declared)) {
        Ok((_, size)) => Ok((key, size)),
        Err(_) => Err(ParseError::InvalidSize(
            String::from_utf8_lossy(declared).into_owned(),
        )),
    }
}

/// Fails as soon as an unterminated line can no longer start with `get` or `set`
fn check_keyword(buf: &[u8]) -> ParseResult<()> {
    match keyword_prefix(buf) {
        Err(nom::Err::Error(_)) | Err(nom::Err::Failure(_)) => {
            Err(ParseError::UnknownCommand(first_word(buf)))
        }
        _ => Ok(()),
    }
}

fn first_word(line: &[u8]) -> String {
    let word = line
        .split(|&b| matches!(b, b' ' | b'\t' | b'\r'))
        .next()
        .unwrap_or_default();
    String::from_utf8_lossy(word).into_owned()
}

/// Header line: keyword followed by space separated arguments
fn header(line: &[u8]) -> IResult<&[u8], (Keyword, Vec<&[u8]>)> {
    all_consuming(pair(keyword, arguments))(line)
}

/// Streaming variant of [`keyword`]: `Incomplete` while the input is still a prefix
fn keyword_prefix(input: &[u8]) -> IResult<&[u8], char> {
    preceded(
        alt((partial_tag("get"), partial_tag("set"))),
        one_of(" \t\r"),
    )(input)
}

fn keyword(input: &[u8]) -> IResult<&[u8], Keyword> {
    terminated(
        alt((value(Keyword::Get, tag("get")), value(Keyword::Set, tag("set")))),
        peek(alt((space1, eof))),
    )(input)
}

fn arguments(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    terminated(
        many0(preceded(
            space1,
            take_while1(|c: u8| c != b' ' && c != b'\t'),
        )),
        space0,
    )(input)
}

fn payload_size(input: &[u8]) -> IResult<&[u8], usize> {
    all_consuming(map_opt(digit1, |digits: &[u8]| {
        str::from_utf8(digits).ok()?.parse().ok()
    }))(input)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|window| window == CRLF)
}

fn decode_key(raw: &[u8]) -> String {
    String::from_utf8_lossy(trim(raw)).into_owned()
}

/// Strips leading and trailing NUL, CR and LF bytes.
///
/// Some clients pad keys with NULs on `get` but not on `set`; trimming makes both agree.
pub fn trim(bytes: &[u8]) -> &[u8] {
    let is_padding = |b: &u8| matches!(b, b'\0' | b'\r' | b'\n');
    let start = bytes
        .iter()
        .position(|b| !is_padding(b))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !is_padding(b))
        .map_or(start, |last| last + 1);
    &bytes[start..end]
}
