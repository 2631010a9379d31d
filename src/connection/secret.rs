//! Credential strings that stay out of logs.

// self
use crate::_prelude::*;

const REDACTED: &str = "***";

/// Access token, refresh token, or key secret.
///
/// Formatting never reveals the value; persistence does, so stores must be trusted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a credential value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// The raw value, for handing to a provider client only.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// `true` for an empty credential, which the engine never accepts.
	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({REDACTED})")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatting_hides_the_value() {
		let secret = TokenSecret::new("1//0refresh-123");

		assert_eq!(format!("{secret:?}"), "TokenSecret(***)");
		assert_eq!(secret.to_string(), "***");
		assert_eq!(secret.expose(), "1//0refresh-123");
		assert!(TokenSecret::new("  ").is_empty());
	}

	#[test]
	fn serializes_as_a_plain_string() {
		let json = serde_json::to_string(&TokenSecret::new("abc")).expect("Secret should serialize.");

		assert_eq!(json, "\"abc\"");
	}
}
