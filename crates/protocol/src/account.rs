//! Account data returned by a consumed session.

use serde::{Deserialize, Serialize};

/// Member account fields extracted after a successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
	/// Member number as shown by the portal.
	pub id: String,
	pub name: String,
	/// Balance with currency symbols and separators removed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub balance: Option<f64>,
	pub currency: String,
}

/// Parses a displayed money amount such as `"$12,345.67"` or `"AUD 1 000"`.
///
/// Returns `None` when no digits are present.
pub fn parse_amount(text: &str) -> Option<f64> {
	let numeric: String = text
		.chars()
		.filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
		.collect();
	if !numeric.chars().any(|c| c.is_ascii_digit()) {
		return None;
	}
	numeric.parse().ok()
}
