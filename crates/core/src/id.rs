//! Strongly-typed, prefixed identifiers.
//!
//! Every identifier serializes as `<prefix>_<value>` (e.g. `event_0190...`).
//! A nil value is the `empty()` sentinel, used to mean "unset".

use core::fmt;
use core::hash::Hash;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::DomainError;

/// Common contract of all identifier kinds.
pub trait Identifier:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = DomainError> + Send + Sync + 'static
{
    /// String prefix used in the serialized form.
    const PREFIX: &'static str;

    /// The "unset" sentinel.
    fn empty() -> Self;

    fn is_empty(&self) -> bool;

    /// Strict parse; fails on malformed input.
    fn parse(input: &str) -> Result<Self, DomainError> {
        input.parse()
    }

    /// Total parse; `None` on malformed input.
    fn try_parse(input: &str) -> Option<Self> {
        input.parse().ok()
    }
}

/// Identifier of an aggregate instance.
///
/// The stream key is derived from the identifier's string form, so two
/// aggregate id types with distinct prefixes never share a stream.
pub trait AggregateIdentity: Identifier {
    fn stream_id(&self) -> StreamId {
        StreamId::new(self.to_string())
    }
}

/// Split `<prefix>_<rest>` and return `rest`.
pub fn strip_prefix<'a>(prefix: &'static str, input: &'a str) -> Result<&'a str, DomainError> {
    input
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .ok_or_else(|| DomainError::invalid_id(prefix, input, format!("expected '{prefix}_' prefix")))
}

/// Parse the uuid part of a `<prefix>_<uuid>` identifier.
pub fn parse_prefixed_uuid(prefix: &'static str, input: &str) -> Result<Uuid, DomainError> {
    let raw = strip_prefix(prefix, input)?;
    Uuid::parse_str(raw).map_err(|e| DomainError::invalid_id(prefix, input, e.to_string()))
}

/// Declare a uuid-backed identifier with a fixed prefix.
///
/// ```ignore
/// keel_core::prefixed_uuid_id! {
///     /// Identifier of an account aggregate.
///     pub struct AccountId => "account";
/// }
/// impl keel_core::AggregateIdentity for AccountId {}
/// ```
#[macro_export]
macro_rules! prefixed_uuid_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident => $prefix:literal;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name($crate::__private::Uuid);

        impl $name {
            /// New time-ordered (UUIDv7) identifier.
            pub fn new() -> Self {
                Self($crate::__private::Uuid::now_v7())
            }

            pub const fn from_uuid(uuid: $crate::__private::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::__private::Uuid {
                &self.0
            }
        }

        impl $crate::Identifier for $name {
            const PREFIX: &'static str = $prefix;

            fn empty() -> Self {
                Self($crate::__private::Uuid::nil())
            }

            fn is_empty(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&format_args!("{}", self))
                    .finish()
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $crate::id::parse_prefixed_uuid($prefix, s).map(Self)
            }
        }

        impl From<$crate::__private::Uuid> for $name {
            fn from(value: $crate::__private::Uuid) -> Self {
                Self(value)
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> $crate::__private::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: $crate::__private::serde::Deserializer<'de>,
            {
                let raw = <String as $crate::__private::serde::Deserialize>::deserialize(deserializer)?;
                raw.parse()
                    .map_err(<D::Error as $crate::__private::serde::de::Error>::custom)
            }
        }
    };
}

prefixed_uuid_id! {
    /// Identifier of a single event.
    pub struct EventId => "event";
}

prefixed_uuid_id! {
    /// Identifier of a single command execution request.
    pub struct CommandId => "command";
}

prefixed_uuid_id! {
    /// Identifier shared by a causal chain of commands (used for publication waits).
    pub struct CommandSequenceId => "sequence";
}

prefixed_uuid_id! {
    /// Identifier of a tenant (storage partition boundary).
    pub struct TenantId => "tenant";
}

prefixed_uuid_id! {
    /// Identifier of the acting principal (user, service, saga).
    pub struct PrincipalId => "principal";
}

/// Compact identifier of a persisted payload type. The default is the empty id.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeMappingId(u32);

impl TypeMappingId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// The id allocated after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Identifier for TypeMappingId {
    const PREFIX: &'static str = "type";

    fn empty() -> Self {
        Self(0)
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TypeMappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl fmt::Debug for TypeMappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeMappingId").field(&self.0).finish()
    }
}

impl FromStr for TypeMappingId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = strip_prefix(Self::PREFIX, s)?;
        raw.parse::<u32>()
            .map(Self)
            .map_err(|e| DomainError::invalid_id(Self::PREFIX, s, e.to_string()))
    }
}

impl Serialize for TypeMappingId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeMappingId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Storage partition key of one aggregate's event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn of<I: AggregateIdentity>(aggregate_id: &I) -> Self {
        aggregate_id.stream_id()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
