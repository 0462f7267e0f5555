use std::sync::Arc;

use tokenizers::Tokenizer;

use crate::error::EngineError;

/// The character produced when decoding an incomplete UTF-8 sequence.
const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Turns a sequence of generated token ids into text fragments, as the
/// tokens arrive.
///
/// Only text that is stable is emitted: a fragment is produced once the
/// decoded text grows and does not end in the middle of a multi-byte
/// character. The concatenation of all fragments, including the final
/// [`IncrementalDecoder::flush`], equals the decoding of all tokens.
///
/// Each step decodes only the tokens from `prefix_offset` on, so the work per
/// token does not grow with the length of the generation.
pub struct IncrementalDecoder {
    tokenizer: Arc<Tokenizer>,
    /// Token ids received so far
    tokens: Vec<u32>,
    /// Start of the tokens decoded again as context for the next fragment
    prefix_offset: usize,
    /// End of the tokens whose text has been emitted
    read_offset: usize,
}

impl IncrementalDecoder {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            tokenizer,
            tokens: Vec::new(),
            prefix_offset: 0,
            read_offset: 0,
        }
    }

    /// Pushes the next generated token and returns the newly decoded text,
    /// if any is ready.
    pub fn next_token(&mut self, token: u32) -> Result<Option<String>, EngineError> {
        self.tokens.push(token);
        let (prefix_text, new_text) = self.decode_window()?;
        if new_text.ends_with(REPLACEMENT_CHAR) {
            return Ok(None);
        }
        let fragment = new_fragment(&prefix_text, &new_text);
        if fragment.is_some() {
            self.prefix_offset = self.read_offset;
            self.read_offset = self.tokens.len();
        }
        Ok(fragment)
    }

    /// Returns any text not yet emitted, once no more tokens will arrive.
    pub fn flush(&mut self) -> Result<Option<String>, EngineError> {
        let (prefix_text, new_text) = self.decode_window()?;
        let fragment = new_fragment(&prefix_text, &new_text);
        if fragment.is_some() {
            self.prefix_offset = self.read_offset;
            self.read_offset = self.tokens.len();
        }
        Ok(fragment)
    }

    /// Number of tokens pushed so far.
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Decodes the already emitted context and the context followed by the
    /// pending tokens.
    fn decode_window(&self) -> Result<(String, String), EngineError> {
        let prefix_text = self.decode(&self.tokens[self.prefix_offset..self.read_offset])?;
        let new_text = self.decode(&self.tokens[self.prefix_offset..])?;
        Ok((prefix_text, new_text))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

/// Returns the text `new_text` adds after `prefix_text`, if it extends it.
fn new_fragment(prefix_text: &str, new_text: &str) -> Option<String> {
    if new_text.len() <= prefix_text.len() || !new_text.starts_with(prefix_text) {
        return None;
    }
    new_text.get(prefix_text.len()..).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::word_level_tokenizer;

    fn ids(tokenizer: &Tokenizer, text: &str) -> Vec<u32> {
        tokenizer.encode(text, false).unwrap().get_ids().to_vec()
    }

    #[test]
    fn test_fragments_concatenate_to_full_decode() {
        let tokenizer = Arc::new(word_level_tokenizer());
        let tokens = ids(&tokenizer, "the quick brown fox");
        let mut decoder = IncrementalDecoder::new(tokenizer.clone());

        let mut fragments = Vec::new();
        for token in &tokens {
            if let Some(fragment) = decoder.next_token(*token).unwrap() {
                fragments.push(fragment);
            }
        }
        if let Some(rest) = decoder.flush().unwrap() {
            fragments.push(rest);
        }

        assert_eq!(fragments, vec!["the", " quick", " brown", " fox"]);
        assert_eq!(
            fragments.concat(),
            tokenizer.decode(&tokens, true).unwrap()
        );
        assert_eq!(decoder.num_tokens(), 4);
    }

    #[test]
    fn test_special_tokens_produce_no_fragment() {
        let tokenizer = Arc::new(word_level_tokenizer());
        let bos = tokenizer.token_to_id("<s>").unwrap();
        let hello = tokenizer.token_to_id("hello").unwrap();
        let mut decoder = IncrementalDecoder::new(tokenizer);

        assert_eq!(decoder.next_token(bos).unwrap(), None);
        assert_eq!(decoder.next_token(hello).unwrap().as_deref(), Some("hello"));
        assert_eq!(decoder.flush().unwrap(), None);
    }

    #[test]
    fn test_long_generation_decodes_a_bounded_window() {
        let tokenizer = Arc::new(word_level_tokenizer());
        let words = ids(&tokenizer, "the quick brown fox");
        let tokens: Vec<u32> = words.iter().copied().cycle().take(1000).collect();
        let mut decoder = IncrementalDecoder::new(tokenizer.clone());

        let mut text = String::new();
        for token in &tokens {
            if let Some(fragment) = decoder.next_token(*token).unwrap() {
                text.push_str(&fragment);
            }
            assert!(decoder.read_offset - decoder.prefix_offset <= 1);
            assert_eq!(decoder.read_offset, decoder.num_tokens());
        }
        if let Some(rest) = decoder.flush().unwrap() {
            text.push_str(&rest);
        }

        assert_eq!(text, tokenizer.decode(&tokens, true).unwrap());
        assert_eq!(decoder.num_tokens(), 1000);
    }
}
