//! # Response Codes
//!
//! Three-level message table `group -> code -> status -> (lang -> message | message)`.
//!
//! Group `0` is reserved for framework codes. Components claim one group each
//! through [`ResponseCodeTable::register_group`], which reports collisions
//! instead of silently replacing entries.

use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Message used when a `(group, code)` pair cannot be resolved.
pub const UNKNOWN_MESSAGE: &str = "Unkown Response Code";

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Informational (prefix 1)
    Info,
    /// Success (prefix 2)
    Success,
    /// Redirect (prefix 3)
    Redirect,
    /// Warning (prefix 4)
    Warning,
    /// Error (prefix 5)
    Error,
    /// No known prefix
    Unknown,
}

impl Status {
    /// Statuses that carry a numeric prefix, in prefix order
    pub const PREFIXED: [Self; 5] = [
        Self::Info,
        Self::Success,
        Self::Redirect,
        Self::Warning,
        Self::Error,
    ];

    /// Numeric prefix placed in front of the code
    #[must_use]
    pub const fn prefix(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Success => 2,
            Self::Redirect => 3,
            Self::Warning => 4,
            Self::Error => 5,
            Self::Unknown => 0,
        }
    }

    /// Status reported in the envelope for a prefix severity
    #[must_use]
    pub const fn from_prefix(prefix: u8) -> Self {
        match prefix {
            1..=3 => Self::Success,
            4 | 5 => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Parse a status name (case-insensitive, trimmed)
    ///
    /// Only the five prefixed statuses are accepted.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "redirect" => Some(Self::Redirect),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Lowercase name as used in tables and envelopes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Redirect => "redirect",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framework codes in group `0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum CoreCode {
    /// Generic results (empty, success, unknown)
    General = 0,
    /// No configuration supplied
    ConfigMissing = 1,
    /// Configuration has no salt
    SaltMissing = 2,
    /// Configuration or invocation bundle could not be decoded
    ConfigMalformed = 3,
    /// Controller produced stray output
    OutputMalformed = 10,
    /// No route matches the request path
    RouteNotFound = 11,
    /// Controller class is not registered
    ClassNotFound = 12,
    /// Controller class has no such method
    MethodNotFound = 13,
    /// Request parameters are not a key/value structure
    MalformedParams = 14,
    /// Controller method is not callable
    MethodNotCallable = 15,
    /// Controller reference is empty or unresolvable
    ControllerNotFound = 16,
    /// Request method not allowed by the route
    MethodNotAllowed = 17,
    /// A parameter failed validation
    ValidationFailed = 20,
    /// Database provider could not connect
    DatabaseConnectError = 31,
    /// Database credentials missing from config
    DatabaseCredentialsMissing = 32,
    /// Database provider not registered
    DatabaseProviderMissing = 33,
    /// Log provider not registered
    LogProviderMissing = 40,
}

impl CoreCode {
    /// Numeric code within group `0`
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// A `(group, code, status?)` triple identifying a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode {
    /// Group id (`0` for framework codes)
    pub group: i64,
    /// Code within the group
    pub code: i64,
    /// Explicit status, overriding any other status hint
    pub status: Option<Status>,
}

impl ResponseCode {
    /// Create a code without an explicit status
    #[must_use]
    pub const fn new(group: i64, code: i64) -> Self {
        Self {
            group,
            code,
            status: None,
        }
    }

    /// Pin the status for this code
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<CoreCode> for ResponseCode {
    fn from(code: CoreCode) -> Self {
        Self::new(0, code.code())
    }
}

impl From<i64> for ResponseCode {
    fn from(code: i64) -> Self {
        Self::new(0, code)
    }
}

impl From<(i64, i64)> for ResponseCode {
    fn from((group, code): (i64, i64)) -> Self {
        Self::new(group, code)
    }
}

impl From<(i64, i64, Status)> for ResponseCode {
    fn from((group, code, status): (i64, i64, Status)) -> Self {
        Self::new(group, code).with_status(status)
    }
}

/// A message, optionally localized by language key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Single message for every language
    Text(String),
    /// Language key to message
    Localized(BTreeMap<String, String>),
}

/// All messages registered for one code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeMessages {
    /// One message regardless of status
    Text(String),
    /// Keyed by status name, or by language for status-less codes
    Keyed(BTreeMap<String, Message>),
}

impl CodeMessages {
    /// Build a status-keyed entry
    #[must_use]
    pub fn statuses(pairs: &[(Status, &str)]) -> Self {
        Self::Keyed(
            pairs
                .iter()
                .map(|(status, message)| {
                    (status.as_str().to_string(), Message::Text((*message).to_string()))
                })
                .collect(),
        )
    }

    fn has_status(&self, status: Status) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Keyed(map) => match map.get(status.as_str()) {
                Some(Message::Text(text)) => !text.is_empty(),
                Some(Message::Localized(langs)) => !langs.is_empty(),
                None => false,
            },
        }
    }

    fn message(&self, status: Status, lang: &str) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Keyed(map) => match map.get(status.as_str()) {
                Some(Message::Localized(langs)) if langs.contains_key(lang) => {
                    langs.get(lang).map(String::as_str)
                }
                Some(Message::Text(text)) => Some(text),
                _ => match map.get(lang) {
                    Some(Message::Text(text)) => Some(text),
                    _ => None,
                },
            },
        }
    }
}

/// Codes of a single group
pub type CodeGroup = BTreeMap<i64, CodeMessages>;

/// Result of resolving a code against the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    /// Resolved group (may fall back to `0`)
    pub group: i64,
    /// Resolved code (may fall back to `0`)
    pub code: i64,
    /// Severity prefix
    pub prefix: u8,
    /// Status to report in the envelope
    pub status: Status,
    /// Message for the requested language
    pub message: String,
}

impl ResolvedCode {
    fn unknown() -> Self {
        Self {
            group: 0,
            code: 0,
            prefix: Status::Error.prefix(),
            status: Status::Error,
            message: UNKNOWN_MESSAGE.to_string(),
        }
    }

    /// Envelope code string `"{group}-{prefix}{code}"`, code padded to two digits
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("{}-{}{:02}", self.group, self.prefix, self.code)
    }
}

/// A collision found while registering component codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeConflict {
    /// Component registers codes but exposes no group id
    MissingGroupId {
        /// Component name
        component: String,
    },
    /// Group id already claimed
    GroupInUse {
        /// Group id
        group: i64,
        /// Component name
        component: String,
    },
    /// Code key already present in the group
    CodeInUse {
        /// Group id
        group: i64,
        /// Code key
        code: i64,
        /// Component name
        component: String,
    },
}

impl fmt::Display for CodeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGroupId { component } => write!(
                f,
                "To register Response Codes a Component must include a unique id. Component ({component}) missing id"
            ),
            Self::GroupInUse { group, component } => write!(
                f,
                "Group Code ({group}) on Component ({component}) is already in use by another Component."
            ),
            Self::CodeInUse {
                code, component, ..
            } => write!(f, "Code ({code}) on Component ({component}) is already in use."),
        }
    }
}

/// The full response code table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResponseCodeTable(BTreeMap<i64, CodeGroup>);

/// Group or code key; accepts integers and numeric strings
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct CodeKey(i64);

impl<'de> Deserialize<'de> for CodeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = CodeKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer code key")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CodeKey, E> {
                Ok(CodeKey(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CodeKey, E> {
                i64::try_from(v)
                    .map(CodeKey)
                    .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CodeKey, E> {
                v.trim()
                    .parse()
                    .map(CodeKey)
                    .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

impl<'de> Deserialize<'de> for ResponseCodeTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<CodeKey, BTreeMap<CodeKey, CodeMessages>>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(group, codes)| {
                    (group.0, codes.into_iter().map(|(code, messages)| (code.0, messages)).collect())
                })
                .collect(),
        ))
    }
}

impl ResponseCodeTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Framework table with group `0` populated
    #[must_use]
    pub fn core() -> Self {
        use Status::{Error, Info, Success, Warning};

        let one = |status: Status, message: &str| CodeMessages::statuses(&[(status, message)]);

        let mut group = CodeGroup::new();
        group.insert(
            0,
            CodeMessages::statuses(&[
                (Info, "Empty Results."),
                (Success, "Success!"),
                (Warning, "Unknown Results."),
                (Error, "Error: Unknown Error."),
            ]),
        );
        group.insert(1, one(Error, "Error: Missing Config File"));
        group.insert(2, one(Error, "Error: Missing Salt in Config File"));
        group.insert(3, one(Error, "Error: Unknown configuration error on run."));

        group.insert(
            10,
            one(
                Error,
                "Error: Response Output is Malformed. Check Controller or Routes for Headers already sent",
            ),
        );
        group.insert(11, one(Warning, "Error: Route Not Found."));
        group.insert(12, one(Warning, "Error: Class Not Found."));
        group.insert(13, one(Warning, "Error: Class Method Not Found."));
        group.insert(14, one(Error, "Error: Returned Data is not in JSON format."));
        group.insert(
            15,
            one(Error, "Error: Class Method is not Callable. Make sure it is Public."),
        );
        group.insert(16, one(Warning, "Error: Controller Not Found."));
        group.insert(17, one(Warning, "Error: Method not allowed by Route."));

        group.insert(20, one(Warning, "Error: Field did not Validate."));

        group.insert(
            30,
            CodeMessages::statuses(&[
                (Success, "Database Migration Ran Successfully"),
                (Error, "Error: Database Migrate had an Error"),
            ]),
        );
        group.insert(31, one(Error, "Error: Database Connect Error."));
        group.insert(32, one(Error, "Error: Missing Database Credentials from config."));
        group.insert(33, one(Error, "Error: Database Provider not found."));

        group.insert(40, one(Error, "Error: Log Provider not found."));

        group.insert(
            50,
            CodeMessages::statuses(&[
                (Success, "Test Passed Successfully."),
                (Error, "Error: Test Failed."),
            ]),
        );
        group.insert(51, one(Error, "Error: Retrieving Tests."));
        group.insert(52, one(Error, "Error: No Tests Configured."));
        group.insert(53, one(Error, "Error: No Test with that name Configured."));
        group.insert(
            54,
            CodeMessages::statuses(&[
                (Success, "Remote Response Connected Successfully."),
                (Warning, "Error: Remote Response Connection Failed"),
                (Error, "Error: Remote Response Unknown Error"),
            ]),
        );

        group.insert(60, one(Error, "Error: Background Process did not return Process ID."));
        group.insert(61, one(Error, "Error: Background Process could not find autoload."));
        group.insert(62, one(Error, "Error: Unknown response from Background Process."));

        group.insert(70, one(Error, "Error: Rate Limit Exceeded."));
        group.insert(71, one(Error, "Error: Rate Limit Key Not Found."));
        group.insert(72, one(Error, "Error: Rate Limit Directory Not Created."));

        let mut table = BTreeMap::new();
        table.insert(0, group);
        Self(table)
    }

    /// Overlay another table code by code; entries in `other` win
    pub fn merge(&mut self, other: &Self) {
        for (group, codes) in &other.0 {
            let target = self.0.entry(*group).or_default();
            for (code, messages) in codes {
                target.insert(*code, messages.clone());
            }
        }
    }

    /// Whether a group id is claimed
    #[must_use]
    pub fn has_group(&self, group: i64) -> bool {
        self.0.contains_key(&group)
    }

    /// Look up one entry
    #[must_use]
    pub fn get(&self, group: i64, code: i64) -> Option<&CodeMessages> {
        self.0.get(&group).and_then(|codes| codes.get(&code))
    }

    /// Register a component's codes under `group`
    ///
    /// Conflicts are returned for the caller to report; later registrations
    /// overwrite earlier ones.
    pub fn register_group(
        &mut self,
        group: i64,
        codes: &CodeGroup,
        component: &str,
    ) -> Vec<CodeConflict> {
        let mut conflicts = Vec::new();

        if self.has_group(group) {
            conflicts.push(CodeConflict::GroupInUse {
                group,
                component: component.to_string(),
            });
        }

        let target = self.0.entry(group).or_default();
        for (code, messages) in codes {
            if target.contains_key(code) {
                conflicts.push(CodeConflict::CodeInUse {
                    group,
                    code: *code,
                    component: component.to_string(),
                });
            }
            target.insert(*code, messages.clone());
        }

        conflicts
    }

    /// Resolve a code to its message and final prefix/status
    ///
    /// Fallback chain: exact status, status implied by the prefix severity,
    /// first status present for the code, then the unknown-code entry.
    #[must_use]
    pub fn resolve(&self, group: i64, code: i64, status: Status, lang: &str) -> ResolvedCode {
        let Some(entry) = self.get(group, code) else {
            return ResolvedCode::unknown();
        };

        let mut status = status;
        let mut envelope_status = Status::from_prefix(status.prefix());

        if !entry.has_status(status) {
            if envelope_status != Status::Unknown && entry.has_status(envelope_status) {
                status = envelope_status;
            } else if let Some(first) = Status::PREFIXED
                .iter()
                .copied()
                .find(|candidate| entry.has_status(*candidate))
            {
                status = first;
                envelope_status = first;
            }
        }

        match entry.message(status, lang) {
            Some(message) => ResolvedCode {
                group,
                code,
                prefix: status.prefix(),
                status: envelope_status,
                message: message.to_string(),
            },
            None => ResolvedCode::unknown(),
        }
    }
}
