use std::str::FromStr;

use tokenizers::Tokenizer;

/// A whitespace-split, word-level tokenizer with a tiny vocabulary and a
/// `<s>` special token.
pub(crate) const WORD_LEVEL_TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "[UNK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "<s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "[UNK]": 0,
      "<s>": 1,
      "hello": 2,
      "world": 3,
      "the": 4,
      "quick": 5,
      "brown": 6,
      "fox": 7,
      "jumps": 8
    },
    "unk_token": "[UNK]"
  }
}"#;

pub(crate) fn word_level_tokenizer() -> Tokenizer {
    Tokenizer::from_str(WORD_LEVEL_TOKENIZER_JSON).unwrap()
}
