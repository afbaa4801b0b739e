//! Selector compilation for in-page element lookup.
//!
//! Plain CSS is handed to `querySelectorAll`. Two text extensions are layered
//! on top:
//!
//! - `text=Some words` matches the innermost elements whose rendered text
//!   contains the words (case-insensitive, whitespace-collapsed)
//! - `css:has-text("words")` narrows the matches of a compound selector to
//!   those whose text contains the words
//!
//! A selector is compiled into a [`Plan`] which is serialized as JSON into a
//! fixed resolver script, so selector text never needs JS string escaping.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Combinator {
	Descendant,
	Child,
	Adjacent,
	Sibling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Step {
	pub combinator: Combinator,
	pub css: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub has_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Plan {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	pub steps: Vec<Step>,
}

const HAS_TEXT: &str = ":has-text(";

pub(crate) fn compile(selector: &str) -> Result<Plan> {
	let selector = selector.trim();
	let invalid = |reason: &str| Error::InvalidSelector {
		selector: selector.to_string(),
		reason: reason.to_string(),
	};

	if selector.is_empty() {
		return Err(invalid("empty selector"));
	}

	if let Some(needle) = selector.strip_prefix("text=") {
		let needle = unquote(needle.trim());
		if needle.is_empty() {
			return Err(invalid("empty text"));
		}
		return Ok(Plan {
			text: Some(needle.to_string()),
			steps: Vec::new(),
		});
	}

	let mut steps = Vec::new();
	let mut css = String::new();
	let mut has_text: Option<String> = None;
	let mut combinator = Combinator::Descendant;
	let mut depth = 0usize;
	let mut quote: Option<char> = None;
	let mut i = 0;

	while i < selector.len() {
		let rest = &selector[i..];
		let Some(c) = rest.chars().next() else { break };
		i += c.len_utf8();

		if let Some(q) = quote {
			css.push(c);
			if c == '\\' {
				if let Some(next) = selector[i..].chars().next() {
					css.push(next);
					i += next.len_utf8();
				}
			} else if c == q {
				quote = None;
			}
			continue;
		}

		match c {
			'\\' => {
				css.push(c);
				if let Some(next) = selector[i..].chars().next() {
					css.push(next);
					i += next.len_utf8();
				}
			}
			'"' | '\'' => {
				quote = Some(c);
				css.push(c);
			}
			':' if depth == 0 && rest.starts_with(HAS_TEXT) => {
				let (text, consumed) = parse_text_argument(&rest[HAS_TEXT.len()..]).ok_or_else(|| invalid("malformed :has-text()"))?;
				if has_text.is_some() {
					return Err(invalid("more than one :has-text() on a compound"));
				}
				has_text = Some(text);
				i += HAS_TEXT.len() - 1 + consumed;
			}
			'[' | '(' => {
				depth += 1;
				css.push(c);
			}
			']' | ')' => {
				depth = depth.checked_sub(1).ok_or_else(|| invalid("unbalanced brackets"))?;
				css.push(c);
			}
			_ if depth > 0 => css.push(c),
			c if c.is_whitespace() || matches!(c, '>' | '+' | '~') => {
				if !css.is_empty() || has_text.is_some() {
					steps.push(flush(&mut css, &mut has_text, combinator));
					combinator = Combinator::Descendant;
				}
				match c {
					'>' => combinator = Combinator::Child,
					'+' => combinator = Combinator::Adjacent,
					'~' => combinator = Combinator::Sibling,
					_ => {}
				}
			}
			_ => css.push(c),
		}
	}

	if quote.is_some() {
		return Err(invalid("unterminated string"));
	}
	if depth != 0 {
		return Err(invalid("unbalanced brackets"));
	}
	if !css.is_empty() || has_text.is_some() {
		steps.push(flush(&mut css, &mut has_text, combinator));
	} else if combinator != Combinator::Descendant {
		return Err(invalid("dangling combinator"));
	}

	Ok(Plan { text: None, steps })
}

fn flush(css: &mut String, has_text: &mut Option<String>, combinator: Combinator) -> Step {
	let compound = std::mem::take(css);
	Step {
		combinator,
		css: if compound.is_empty() { "*".to_string() } else { compound },
		has_text: has_text.take(),
	}
}

/// Parses `"words")` and returns the words plus the bytes consumed.
fn parse_text_argument(input: &str) -> Option<(String, usize)> {
	let trimmed = input.trim_start();
	let mut consumed = input.len() - trimmed.len();
	let mut chars = trimmed.chars();
	let q = chars.next().filter(|c| *c == '"' || *c == '\'')?;
	consumed += q.len_utf8();

	let mut text = String::new();
	let mut escaped = false;
	let mut closed = false;
	for c in chars.by_ref() {
		consumed += c.len_utf8();
		if escaped {
			text.push(c);
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if c == q {
			closed = true;
			break;
		} else {
			text.push(c);
		}
	}
	if !closed {
		return None;
	}

	let after = chars.as_str();
	let after_trimmed = after.trim_start();
	consumed += after.len() - after_trimmed.len();
	if !after_trimmed.starts_with(')') {
		return None;
	}
	consumed += 1;
	Some((text, consumed))
}

fn unquote(s: &str) -> &str {
	for q in ['"', '\''] {
		if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
			return &s[1..s.len() - 1];
		}
	}
	s
}

const RESOLVER: &str = r#"
	const norm = (s) => (s || "").replace(/\s+/g, " ").trim().toLowerCase();
	const textOf = (el) => norm(el.innerText !== undefined ? el.innerText : el.textContent);
	const visible = (el) => {
		if (!el || !el.isConnected) return false;
		const style = getComputedStyle(el);
		if (style.visibility === "hidden" || style.display === "none") return false;
		const rect = el.getBoundingClientRect();
		return rect.width > 0 && rect.height > 0;
	};
	const resolve = (plan) => {
		if (plan.text !== undefined) {
			const needle = norm(plan.text);
			const root = document.body || document.documentElement;
			if (!root) return [];
			return [...root.querySelectorAll("*")].filter((el) =>
				textOf(el).includes(needle) && ![...el.children].some((c) => textOf(c).includes(needle)));
		}
		let current = null;
		for (const step of plan.steps) {
			let next = [];
			if (current === null) {
				next = [...document.querySelectorAll(step.css)];
			} else {
				for (const base of current) {
					if (step.combinator === "child") {
						next.push(...[...base.children].filter((c) => c.matches(step.css)));
					} else if (step.combinator === "adjacent") {
						const s = base.nextElementSibling;
						if (s && s.matches(step.css)) next.push(s);
					} else if (step.combinator === "sibling") {
						for (let s = base.nextElementSibling; s; s = s.nextElementSibling) {
							if (s.matches(step.css)) next.push(s);
						}
					} else {
						next.push(...base.querySelectorAll(step.css));
					}
				}
			}
			if (step.hasText !== undefined) {
				const needle = norm(step.hasText);
				next = next.filter((el) => textOf(el).includes(needle));
			}
			current = [...new Set(next)];
		}
		return current || [];
	};
"#;

/// Wraps `body` in a self-invoking function where `el` is the first visible
/// match for `selector` (or the first match, or `null`). `visible` is in scope.
pub(crate) fn script(selector: &str, body: &str) -> Result<String> {
	let plan = serde_json::to_string(&compile(selector)?)?;
	Ok(format!(
		"(() => {{{RESOLVER}\tconst all = resolve({plan});\n\tconst el = all.find(visible) || all[0] || null;\n\t{body}\n}})()"
	))
}
