//! Command-line splitting for attached (foreground) runs.
//!
//! Rules:
//! - unquoted whitespace separates words;
//! - `'...'` is taken literally, with no escapes inside;
//! - `"..."` honours `\"`, `\\`, `\$` and `` \` ``; any other backslash is kept;
//! - outside quotes `\x` yields `x`;
//! - quoted and unquoted pieces that touch form one word (`a"b c"` is `ab c`),
//!   and `""` yields an empty word.
//!
//! An unterminated quote, a trailing lone backslash, or a command with no
//! words is rejected.

use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
	Plain,
	Single,
	Double,
}

pub fn tokenize(command: &str) -> Result<Vec<String>> {
	let mut words = Vec::new();
	let mut current = String::new();
	// Distinguishes "no word yet" from an empty quoted word.
	let mut in_word = false;
	let mut mode = Mode::Plain;
	let mut chars = command.chars();

	while let Some(c) = chars.next() {
		match mode {
			Mode::Plain => match c {
				c if c.is_whitespace() => {
					if in_word {
						words.push(std::mem::take(&mut current));
						in_word = false;
					}
				}
				'\'' => {
					mode = Mode::Single;
					in_word = true;
				}
				'"' => {
					mode = Mode::Double;
					in_word = true;
				}
				'\\' => match chars.next() {
					Some(next) => {
						current.push(next);
						in_word = true;
					}
					None => return Err(Error::InvalidCommand("trailing backslash".into())),
				},
				c => {
					current.push(c);
					in_word = true;
				}
			},
			Mode::Single => match c {
				'\'' => mode = Mode::Plain,
				c => current.push(c),
			},
			Mode::Double => match c {
				'"' => mode = Mode::Plain,
				'\\' => match chars.next() {
					Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
					Some(next) => {
						current.push('\\');
						current.push(next);
					}
					None => return Err(Error::InvalidCommand("unterminated double quote".into())),
				},
				c => current.push(c),
			},
		}
	}

	match mode {
		Mode::Single => return Err(Error::InvalidCommand("unterminated single quote".into())),
		Mode::Double => return Err(Error::InvalidCommand("unterminated double quote".into())),
		Mode::Plain => {}
	}
	if in_word {
		words.push(current);
	}
	if words.is_empty() {
		return Err(Error::InvalidCommand("empty command".into()));
	}
	Ok(words)
}

/// Default process name: the base name of the command's executable.
pub fn derive_name(command: &str) -> Result<String> {
	let words = tokenize(command)?;
	let program = &words[0];
	let base = Path::new(program)
		.file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_else(|| program.clone());
	Ok(base)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn words(s: &str) -> Vec<String> {
		tokenize(s).unwrap()
	}

	#[test]
	fn splits_on_whitespace() {
		assert_eq!(words("sleep   100"), vec!["sleep", "100"]);
		assert_eq!(words("  ls\t-la \n"), vec!["ls", "-la"]);
	}

	#[test]
	fn single_quotes_are_literal() {
		assert_eq!(words(r#"echo 'a "b" \n c'"#), vec!["echo", r#"a "b" \n c"#]);
	}

	#[test]
	fn double_quotes_escape_selectively() {
		assert_eq!(words(r#"echo "say \"hi\" \$HOME \d""#), vec!["echo", r#"say "hi" $HOME \d"#]);
	}

	#[test]
	fn backslash_outside_quotes() {
		assert_eq!(words(r"touch my\ file"), vec!["touch", "my file"]);
	}

	#[test]
	fn adjacent_segments_join() {
		assert_eq!(words(r#"a"b c"'d'"#), vec!["ab cd"]);
		assert_eq!(words(r#"run "" x"#), vec!["run", "", "x"]);
	}

	#[test]
	fn rejects_malformed() {
		assert!(tokenize("echo 'oops").is_err());
		assert!(tokenize("echo \"oops").is_err());
		assert!(tokenize("echo oops\\").is_err());
		assert!(tokenize("   ").is_err());
	}

	#[test]
	fn derives_base_name() {
		assert_eq!(derive_name("/usr/local/bin/server --port 80").unwrap(), "server");
		assert_eq!(derive_name("./scripts/run.sh").unwrap(), "run.sh");
		assert_eq!(derive_name("sleep 100").unwrap(), "sleep");
	}
}
