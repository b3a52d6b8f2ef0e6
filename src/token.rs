use crate::lexicon::BOUNDARY_WORD;

/// One input position: the word plus optional tagging hints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
  pub word: String,
  /// A gold tag; only compatible tag states are seeded for this word.
  pub tag: Option<String>,
  /// A whole-string regex over tag names restricting the candidates.
  pub candidate_tags: Option<String>,
  /// Passed through to the lexicon untouched.
  pub context: Option<String>,
}

impl Token {
  pub fn new(word: &str) -> Self {
    Self {
      word: word.to_string(),
      ..Self::default()
    }
  }

  pub fn with_tag(mut self, tag: &str) -> Self {
    self.tag = Some(tag.to_string());
    self
  }

  pub fn with_candidate_tags(mut self, pattern: &str) -> Self {
    self.candidate_tags = Some(pattern.to_string());
    self
  }

  pub fn with_context(mut self, context: &str) -> Self {
    self.context = Some(context.to_string());
    self
  }

  /// The sentence-boundary pseudo-token.
  pub fn boundary() -> Self {
    Self::new(BOUNDARY_WORD)
  }
}

impl From<&str> for Token {
  fn from(word: &str) -> Self {
    Self::new(word)
  }
}

/// Tokens for whitespace-separated words.
pub fn tokenize(sentence: &str) -> Vec<Token> {
  sentence.split_whitespace().map(Token::new).collect()
}
