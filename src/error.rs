//! Error type shared by the whole crate.

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The interrupt flag was raised while parsing or training.
  #[error("interrupted")]
  Interrupted,

  #[error("cannot parse an empty sentence")]
  EmptySentence,

  #[error("sentence of length {length} exceeds the maximum of {max}")]
  SentenceTooLong { length: usize, max: usize },

  /// Chart arrays for this length could not be allocated. The previous
  /// arrays are kept, so shorter sentences still parse.
  #[error("could not allocate chart arrays for a sentence of length {length}")]
  ChartAllocation { length: usize },

  #[error("unknown state {0:?}")]
  UnknownState(String),

  #[error("state index {index} out of range for {num_states} states")]
  StateOutOfRange { index: usize, num_states: usize },

  #[error("rule {0} has a NaN score")]
  NanScore(String),

  #[error("constraint pattern {0:?} matches no state")]
  UnknownConstraintState(String),

  #[error("line {line}: {message}")]
  Format { line: usize, message: String },

  #[error("no training trees")]
  EmptyTreebank,

  #[error("training tree is not binarized at {0:?}")]
  Unbinarized(String),

  #[error("cannot sample {state} over [{start}, {end}): no expansion has finite weight")]
  Sampling {
    state: String,
    start: usize,
    end: usize,
  },

  #[error("grammar compaction: {0}")]
  Compaction(String),

  #[error(transparent)]
  Regex(#[from] regex::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
  pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
    Self::Format {
      line,
      message: message.into(),
    }
  }
}
