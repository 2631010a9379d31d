//! Identifiers naming the two halves of a connection: the user and the storage provider.
//!
//! Provider identifiers are slugs (`google-drive`, `amazon-s3`) because they double as
//! configuration keys, metric labels, and template values. User identifiers are opaque values
//! from the host application; they only have to be printable without whitespace.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const PROVIDER_ID_MAX_LEN: usize = 64;
const USER_ID_MAX_LEN: usize = 256;

macro_rules! def_id {
	($name:ident, $label:literal, $check:path, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates and wraps the identifier.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				Self::try_from(value.into())
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				$check($label, &value)?;

				Ok(Self(value))
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", $label, self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

/// Rejected identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// `User` or `Provider`.
		kind: &'static str,
	},
	/// A character outside the allowed set.
	#[error("{kind} identifier contains the disallowed character {character:?}.")]
	InvalidCharacter {
		/// `User` or `Provider`.
		kind: &'static str,
		/// First offending character.
		character: char,
	},
	/// Longer than the kind allows.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// `User` or `Provider`.
		kind: &'static str,
		/// Maximum length in bytes.
		max: usize,
	},
}

def_id! {
	UserId,
	"User",
	check_user,
	"Opaque identifier of the end user owning a connection."
}
def_id! {
	ProviderId,
	"Provider",
	check_provider,
	"Lowercase slug of a registered storage provider, e.g. `google-drive`."
}

fn check_user(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	check_shape(kind, value, USER_ID_MAX_LEN, |c| !c.is_whitespace() && !c.is_control())
}

fn check_provider(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	check_shape(kind, value, PROVIDER_ID_MAX_LEN, |c| {
		c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
	})
}

fn check_shape(
	kind: &'static str,
	value: &str,
	max: usize,
	allowed: impl Fn(char) -> bool,
) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if let Some(character) = value.chars().find(|c| !allowed(*c)) {
		return Err(IdentifierError::InvalidCharacter { kind, character });
	}
	if value.len() > max {
		return Err(IdentifierError::TooLong { kind, max });
	}

	Ok(())
}
