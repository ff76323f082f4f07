//! Role sets carried by tokens and principals.

// crates.io
use serde::{Deserializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Errors emitted when validating roles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RoleValidationError {
	/// Empty role entries are not allowed.
	#[error("Role entries cannot be empty.")]
	Empty,
	/// Roles cannot contain embedded whitespace characters.
	#[error("Role contains whitespace: {role}.")]
	ContainsWhitespace {
		/// The offending role string.
		role: String,
	},
}

/// Deduplicated, sorted set of role names.
///
/// Ordering is normalized so two tokens granting the same roles compare equal regardless of
/// claim order.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);
impl RoleSet {
	/// Creates a normalized role set from any iterator.
	pub fn new<I, S>(roles: I) -> Result<Self, RoleValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for role in roles {
			let role = role.into();

			if role.is_empty() {
				return Err(RoleValidationError::Empty);
			}
			if role.chars().any(char::is_whitespace) {
				return Err(RoleValidationError::ContainsWhitespace { role });
			}

			set.insert(role);
		}

		Ok(Self(set))
	}

	/// Number of distinct roles.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no roles are granted.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set grants `role`.
	pub fn contains(&self, role: &str) -> bool {
		self.0.contains(role)
	}

	/// Returns true if every role in `required` is granted.
	pub fn contains_all(&self, required: &RoleSet) -> bool {
		required.0.is_subset(&self.0)
	}

	/// Iterator over roles in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}
}
impl Debug for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("RoleSet").field(&self.0).finish()
	}
}
impl Display for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let joined = self.iter().collect::<Vec<_>>().join(" ");

		f.write_str(&joined)
	}
}
impl FromStr for RoleSet {
	type Err = RoleValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s.split_whitespace())
	}
}
impl<'de> Deserialize<'de> for RoleSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		Self::new(values).map_err(DeError::custom)
	}
}
