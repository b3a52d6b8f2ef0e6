use regex::Regex;
/// Simple recursive-descent parsing of grammar, tree and model text
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::grammar::{Grammar, GrammarBuilder};

pub(crate) type Infallible<'a, T> = (T, &'a str);
pub(crate) type ParseResult<'a, T> = std::result::Result<(T, &'a str), String>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}
pub(crate) use regex_static;

/// Try to consume a regex, returning None if it doesn't match
pub(crate) fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  if let Some(m) = re.find(s) {
    if m.start() > 0 {
      return (None, s);
    }
    let (_, rest) = s.split_at(m.end());
    (Some(m.as_str()), rest)
  } else {
    (None, s)
  }
}

/// Try to consume a regex, failing if it doesn't match
pub(crate) fn needed_re<'a>(re: &'static Regex, s: &'a str) -> ParseResult<'a, &'a str> {
  if let (Some(c), rest) = optional_re(re, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {:?}", re, s))
  }
}

/// Try to consume a char, returning None if it doesn't match
pub(crate) fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

/// Try to consume a char, failing if it doesn't match
pub(crate) fn needed_char(c: char, s: &str) -> ParseResult<'_, char> {
  if let (Some(c), rest) = optional_char(c, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {:?}", c, s))
  }
}

/// Tries to skip 1 or more \s characters and comments
pub(crate) fn skip_whitespace(s: &str) -> &str {
  regex_static!(WHITESPACE_OR_COMMENT, r"(\s|//[^\n]*)+");
  optional_re(&WHITESPACE_OR_COMMENT, s).1
}

/// A state or word: either double-quoted with `\"` and `\\` escapes, or a bare run
/// of characters that are not whitespace, quotes or parentheses.
pub(crate) fn parse_symbol(s: &str) -> ParseResult<'_, String> {
  regex_static!(QUOTED, r#""(?:[^"\\]|\\.)*""#);
  regex_static!(BARE, r#"[^\s"()]+"#);

  if let (Some(quoted), rest) = optional_re(&QUOTED, s) {
    let mut out = String::with_capacity(quoted.len());
    let mut escaped = false;
    for c in quoted[1..quoted.len() - 1].chars() {
      if escaped || c != '\\' {
        out.push(c);
        escaped = false;
      } else {
        escaped = true;
      }
    }
    Ok((out, rest))
  } else {
    let (name, rest) = needed_re(&BARE, s).map_err(|e| format!("symbol: {}", e))?;
    Ok((name.to_string(), rest))
  }
}

/// A log-probability, including `-inf` and `-infinity`. NaN is rejected.
/// The number must be a whole token, so `-infx` is not a score.
pub(crate) fn parse_score(s: &str) -> ParseResult<'_, f64> {
  regex_static!(
    NUMBER,
    r"[-+]?(infinity|inf|\d+(\.\d*)?([eE][-+]?\d+)?|\.\d+([eE][-+]?\d+)?)"
  );
  let (num, rest) = needed_re(&NUMBER, s).map_err(|e| format!("score: {}", e))?;
  if !rest.chars().next().is_none_or(char::is_whitespace) {
    return Err(format!("score {:?} runs into {:?}", num, rest));
  }
  let score = num
    .parse::<f64>()
    .map_err(|e| format!("score {:?}: {}", num, e))?;
  Ok((score, rest))
}

/// One rule per line: `parent -> child [child] [score]`. The score defaults to 0.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RuleLine {
  pub parent: String,
  pub children: Vec<String>,
  pub score: f64,
}

pub(crate) fn parse_rule_line(line: &str) -> std::result::Result<RuleLine, String> {
  #![allow(clippy::trivial_regex)]
  regex_static!(ARROW, "->");

  let (parent, s) = parse_symbol(line.trim_start()).map_err(|e| format!("rule parent: {}", e))?;
  let s = s.trim_start();
  let (_, s) = needed_re(&ARROW, s).map_err(|e| format!("rule arrow: {}", e))?;

  let mut children = Vec::new();
  let mut score = 0.0;
  let mut rem = s.trim_start();
  while !rem.is_empty() {
    if !rem.starts_with('"') {
      // an unquoted number in last position is the score
      if let Ok((value, rest)) = parse_score(rem) {
        if rest.trim().is_empty() {
          score = value;
          break;
        }
      }
    }
    let (child, rest) = parse_symbol(rem).map_err(|e| format!("rule child: {}", e))?;
    children.push(child);
    rem = rest.trim_start();
  }

  if children.is_empty() || children.len() > 2 {
    return Err(format!(
      "rules need one or two children, found {}",
      children.len()
    ));
  }
  Ok(RuleLine {
    parent,
    children,
    score,
  })
}

impl FromStr for Grammar {
  type Err = Error;

  /// Parses a grammar from rule lines. Assumes the first rule's parent
  /// is the start symbol. Tags are the states that never appear as a parent.
  fn from_str(s: &str) -> Result<Self> {
    let mut builder: Option<GrammarBuilder> = None;
    for (idx, line) in s.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with("//") {
        continue;
      }
      let rule = parse_rule_line(line).map_err(|e| Error::format(idx + 1, e))?;
      let builder = builder.get_or_insert_with(|| GrammarBuilder::new(&rule.parent));
      match rule.children.as_slice() {
        [child] => builder.unary(&rule.parent, child, rule.score),
        [left, right] => builder.binary(&rule.parent, left, right, rule.score),
        _ => return Err(Error::format(idx + 1, "rules need one or two children")),
      };
    }

    match builder {
      Some(builder) => builder.build(),
      None => Err(Error::format(0, "empty ruleset")),
    }
  }
}

/// Reads the `BEGIN <NAME>` blocks of a model file in order. Each block runs
/// until a blank line or the end of the input.
pub(crate) struct Sections<'a> {
  lines: std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>,
}

impl<'a> Sections<'a> {
  pub fn new(s: &'a str) -> Self {
    Self {
      lines: s.lines().enumerate().peekable(),
    }
  }

  /// Consumes the `BEGIN name` line and returns the block's `(line number, text)` pairs.
  pub fn block(&mut self, name: &str) -> Result<Vec<(usize, &'a str)>> {
    while self.lines.next_if(|(_, l)| l.trim().is_empty()).is_some() {}

    let (idx, header) = self
      .lines
      .next()
      .ok_or_else(|| Error::format(0, format!("missing BEGIN {}", name)))?;
    let mut words = header.split_whitespace();
    if words.next() != Some("BEGIN") {
      return Err(Error::format(
        idx + 1,
        format!("expected BEGIN {}, found {:?}", name, header),
      ));
    }
    if words.next() != Some(name) {
      return Err(Error::format(
        idx + 1,
        format!("expected section {}, found {:?}", name, header),
      ));
    }

    let mut body = Vec::new();
    while let Some((idx, line)) = self.lines.next_if(|(_, l)| !l.trim().is_empty()) {
      body.push((idx + 1, line));
    }
    Ok(body)
  }

  /// True once only blank lines remain.
  pub fn is_exhausted(&mut self) -> bool {
    while self.lines.next_if(|(_, l)| l.trim().is_empty()).is_some() {}
    self.lines.peek().is_none()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rule_lines() {
    assert_eq!(
      parse_rule_line(r#""S" -> "NP" "VP" -0.1"#).unwrap(),
      RuleLine {
        parent: "S".into(),
        children: vec!["NP".into(), "VP".into()],
        score: -0.1
      }
    );
    assert_eq!(
      parse_rule_line("ROOT -> S").unwrap(),
      RuleLine {
        parent: "ROOT".into(),
        children: vec!["S".into()],
        score: 0.0
      }
    );
    let odd = parse_rule_line(r#""a\"b" -> "1" -inf"#).unwrap();
    assert_eq!(odd.parent, "a\"b");
    assert_eq!(odd.children, vec!["1".to_string()]);
    assert_eq!(odd.score, f64::NEG_INFINITY);
    assert!(parse_rule_line("S -> A B C -1").is_err());
    assert!(parse_rule_line("S A").is_err());
  }

  #[test]
  fn infinite_scores_in_every_spelling() {
    for (text, expected) in [
      ("-inf", f64::NEG_INFINITY),
      ("+inf", f64::INFINITY),
      ("inf", f64::INFINITY),
      ("-infinity", f64::NEG_INFINITY),
      ("+infinity", f64::INFINITY),
      ("infinity", f64::INFINITY),
    ] {
      let rule = parse_rule_line(&format!(r#""S" -> "A" {}"#, text)).unwrap();
      assert_eq!(rule.children, vec!["A".to_string()], "{}", text);
      assert_eq!(rule.score, expected, "{}", text);
    }
    assert_eq!(parse_score("-infinity").unwrap(), (f64::NEG_INFINITY, ""));
    assert!(parse_score("-infx").is_err());
    assert!(parse_score("1.5abc").is_err());
  }

  #[test]
  fn grammar_from_rule_lines() {
    let g: Grammar = r#"
      // toy grammar
      ROOT -> S 0
      S -> NP VP -0.1
    "#
    .parse()
    .unwrap();
    assert_eq!(g.start, "ROOT");
    assert_eq!(g.num_states(), 4);
    assert_eq!(g.binary.len(), 1);

    let reparsed: Grammar = g.to_string().parse().unwrap();
    assert_eq!(reparsed.start, "ROOT");
    assert_eq!(reparsed.unary.len(), 1);
    assert_eq!(reparsed.binary.rules()[0].score, -0.1);
  }

  #[test]
  fn bad_rules_report_their_line() {
    let err = "ROOT -> S\nS ->\n".parse::<Grammar>().unwrap_err();
    assert!(matches!(err, Error::Format { line: 2, .. }));
  }

  #[test]
  fn sections_must_appear_in_order() {
    let text = "BEGIN A\nx\ny\n\nBEGIN B\n\nBEGIN C\nz\n";
    let mut sections = Sections::new(text);
    assert_eq!(sections.block("A").unwrap(), vec![(2, "x"), (3, "y")]);
    assert!(sections.block("B").unwrap().is_empty());
    assert!(matches!(sections.block("D"), Err(Error::Format { line: 7, .. })));
  }
}
