//! Tracker line protocol: command encoding and response decoding.
//!
//! Request: `<VERB> <form-urlencoded args, including domain>\n`.
//! Response: `OK <form-urlencoded fields>\r\n` or `ERR <code>\r\n`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use url::form_urlencoded;

/// Decoded `OK` payload.
pub type Fields = HashMap<String, String>;

/// Tracker verbs used by this client.
pub mod verb {
    pub const CREATE_OPEN: &str = "CREATE_OPEN";
    pub const CREATE_CLOSE: &str = "CREATE_CLOSE";
    pub const DELETE: &str = "DELETE";
    pub const RENAME: &str = "RENAME";
    pub const GET_PATHS: &str = "GET_PATHS";
    pub const GET_DOMAINS: &str = "GET_DOMAINS";
    pub const CREATE_DOMAIN: &str = "CREATE_DOMAIN";
    pub const DELETE_DOMAIN: &str = "DELETE_DOMAIN";
    pub const CREATE_CLASS: &str = "CREATE_CLASS";
    pub const UPDATE_CLASS: &str = "UPDATE_CLASS";
    pub const DELETE_CLASS: &str = "DELETE_CLASS";
    pub const LIST_KEYS: &str = "LIST_KEYS";
    pub const LIST_FIDS: &str = "LIST_FIDS";
    pub const FILE_INFO: &str = "FILE_INFO";
    pub const NOOP: &str = "NOOP";

    /// Verbs with no side effect on the cluster. Everything else mutates.
    pub fn is_read_only(verb: &str) -> bool {
        [GET_PATHS, GET_DOMAINS, LIST_KEYS, LIST_FIDS, FILE_INFO, NOOP]
            .iter()
            .any(|v| v.eq_ignore_ascii_case(verb))
    }
}

/// One tracker command. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    domain: Option<String>,
    verb: String,
    args: Vec<(String, String)>,
}

impl Command {
    /// Command without a domain (e.g. `GET_DOMAINS`).
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            domain: None,
            verb: verb.into(),
            args: Vec::new(),
        }
    }

    pub fn with_domain(domain: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            verb: verb.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument. A repeated key replaces the earlier value in place.
    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.args.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.args.push((key, value)),
        }
        self
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// Value of one argument.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(d) => write!(f, "{} [{}]", self.verb, d),
            None => write!(f, "{}", self.verb),
        }
    }
}

/// Decoded tracker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Fields),
    /// Application error code, verbatim.
    Err(String),
}

/// Protocol-level failure (never an application `ERR`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid verb {0:?}")]
    InvalidVerb(String),
    #[error("got invalid response from tracker: {0:?}")]
    Malformed(String),
    #[error("non-ascii character in command for ascii socket encoding")]
    NotAscii,
}

/// Encode a command as one request line (with trailing `\n`).
/// The command's domain is merged into the arguments; a missing domain encodes as empty.
pub fn encode_command(command: &Command) -> Result<String, ProtocolError> {
    let verb = command.verb();
    if verb.is_empty() || verb.chars().any(|c| c.is_whitespace()) {
        return Err(ProtocolError::InvalidVerb(verb.to_string()));
    }
    let domain = command.domain().unwrap_or("");
    let mut query = form_urlencoded::Serializer::new(String::new());
    let mut saw_domain = false;
    for (k, v) in command.args() {
        if k == "domain" {
            query.append_pair(k, domain);
            saw_domain = true;
        } else {
            query.append_pair(k, v);
        }
    }
    if !saw_domain {
        query.append_pair("domain", domain);
    }
    Ok(format!("{} {}\n", verb, query.finish()))
}

/// Decode one raw response line. Splits on the first space only; anything other
/// than two parts is a [`ProtocolError::Malformed`].
pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    let mut parts = line.splitn(2, ' ');
    let status = parts.next().unwrap_or_default();
    let Some(payload) = parts.next() else {
        return Err(ProtocolError::Malformed(line.to_string()));
    };
    let payload = payload.trim_end_matches(['\r', '\n']);
    if status == "ERR" {
        return Ok(Response::Err(payload.to_string()));
    }
    Ok(Response::Ok(decode_fields(payload)))
}

/// Parse a form-urlencoded field string.
pub fn decode_fields(payload: &str) -> Fields {
    form_urlencoded::parse(payload.as_bytes())
        .into_owned()
        .collect()
}

/// Encode a response line the way a tracker would. Used by tests and tooling.
pub fn encode_response(response: &Response) -> String {
    match response {
        Response::Ok(fields) => {
            let mut pairs: Vec<(&String, &String)> = fields.iter().collect();
            pairs.sort();
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (k, v) in pairs {
                query.append_pair(k, v);
            }
            format!("OK {}\r\n", query.finish())
        }
        Response::Err(code) => format!("ERR {}\r\n", code),
    }
}

/// Text encoding for tracker socket I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEncoding {
    /// 7-bit clean: outgoing non-ASCII is rejected, incoming bytes are masked to 7 bits.
    #[default]
    Ascii,
    /// UTF-8; invalid incoming sequences are replaced.
    Utf8,
}

impl LineEncoding {
    pub fn encode(&self, line: &str) -> Result<Vec<u8>, ProtocolError> {
        match self {
            LineEncoding::Ascii if !line.is_ascii() => Err(ProtocolError::NotAscii),
            _ => Ok(line.as_bytes().to_vec()),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            LineEncoding::Ascii => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
            LineEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl FromStr for LineEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" => Ok(LineEncoding::Ascii),
            "utf8" | "utf-8" => Ok(LineEncoding::Utf8),
            other => Err(format!("unknown socket encoding {other:?}")),
        }
    }
}
