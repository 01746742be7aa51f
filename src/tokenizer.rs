use crate::alphabet::AA_INDEX;
use crate::error::{Result, StabilityError};

/// Token id of the padding token.
pub const PAD_ID: i64 = 0;
/// Token id of the unknown-residue token.
pub const UNK_ID: i64 = 1;
/// Token id of the start-of-sequence marker.
pub const CLS_ID: i64 = 2;
/// Token id of the end-of-sequence marker.
pub const SEP_ID: i64 = 3;

/// Offset of the first residue token id; residue ids follow the order of
/// [`crate::alphabet::AA_LETTERS`].
pub const RESIDUE_OFFSET: i64 = 4;

/// Token ids and attention mask produced for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

/// External tokenizer collaborator.
///
/// Maps a residue string to token ids and an attention mask, framed with
/// start and end markers. With `max_length` set the output is padded to
/// exactly that many tokens.
pub trait Tokenizer {
    fn encode(&self, sequence: &str, max_length: Option<usize>) -> Result<Encoding>;
}

/// Residue-level tokenizer used by the tests and the demo binary.
///
/// One token per amino-acid symbol, vocabulary
/// `[PAD, UNK, CLS, SEP, A..Z minus J]`. Stands in for a production
/// protein-language-model tokenizer behind the same trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResidueTokenizer;

impl Tokenizer for ResidueTokenizer {
    fn encode(&self, sequence: &str, max_length: Option<usize>) -> Result<Encoding> {
        let mut input_ids = Vec::with_capacity(sequence.len() + 2);
        input_ids.push(CLS_ID);
        for c in sequence.chars() {
            match AA_INDEX.get(&c) {
                Some(&idx) => input_ids.push(RESIDUE_OFFSET + idx as i64),
                None => input_ids.push(UNK_ID),
            }
        }
        input_ids.push(SEP_ID);

        let mut attention_mask = vec![1i64; input_ids.len()];

        if let Some(max_length) = max_length {
            if input_ids.len() > max_length {
                return Err(StabilityError::TokenizerError(format!(
                    "sequence of {} tokens exceeds max_length {}",
                    input_ids.len(),
                    max_length
                )));
            }
            input_ids.resize(max_length, PAD_ID);
            attention_mask.resize(max_length, 0);
        }

        Ok(Encoding {
            input_ids,
            attention_mask,
        })
    }
}
