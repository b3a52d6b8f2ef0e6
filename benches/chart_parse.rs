use criterion::{Criterion, black_box, criterion_group, criterion_main};

use chartwright::{ChartParser, Grammar, ParserConfig, SimpleLexicon};

const GRAMMAR_SRC: &str = include_str!("./toy.pcfg");

const LEXICON: &[(&str, &str, f64)] = &[
  ("i", "PRP", 5.0),
  ("saw", "VB", 3.0),
  ("saw", "NN", 1.0),
  ("the", "DT", 8.0),
  ("man", "NN", 3.0),
  ("dog", "NN", 2.0),
  ("park", "NN", 2.0),
  ("telescope", "NN", 1.0),
  ("with", "IN", 3.0),
  ("in", "IN", 3.0),
];

fn lexicon() -> SimpleLexicon {
  let mut lexicon = SimpleLexicon::default();
  for &(word, tag, count) in LEXICON {
    lexicon.train(word, tag, count);
  }
  lexicon.finish_training();
  lexicon
}

fn parse(parser: &mut ChartParser<'_, SimpleLexicon>, input: &[&str]) -> f64 {
  parser.parse_words(input).unwrap();
  parser.best_score()
}

fn criterion_benchmark(c: &mut Criterion) {
  let grammar = GRAMMAR_SRC.parse::<Grammar>().unwrap();
  let lexicon = lexicon();
  let mut parser = ChartParser::new(&grammar, &lexicon, ParserConfig::default());
  let simple_input = "i saw the man".split(' ').collect::<Vec<_>>();
  let ambiguous_input = "i saw the man with the telescope in the park with the dog"
    .split(' ')
    .collect::<Vec<_>>();

  c.bench_function("parse simple", |b| {
    b.iter(|| parse(&mut parser, black_box(&simple_input)))
  });

  c.bench_function("parse pp attachment", |b| {
    b.iter(|| parse(&mut parser, black_box(&ambiguous_input)))
  });

  let outside_config = ParserConfig {
    compute_outside: true,
    ..ParserConfig::default()
  };
  let mut outside = ChartParser::new(&grammar, &lexicon, outside_config);
  c.bench_function("inside outside pp attachment", |b| {
    b.iter(|| parse(&mut outside, black_box(&ambiguous_input)))
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
