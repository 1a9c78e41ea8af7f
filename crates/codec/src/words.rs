//! Word-list tag formats for the spelling and synonym tables.
//!
//! Both formats store a sorted list of words, each at most 255 bytes. Length
//! bytes are XORed with `0x60` so that common short lengths do not produce
//! zero bytes in the tag.
//!
//! ```text
//! prefix-compressed   len^0x60 | word
//!                     then per word: reuse^0x60 | append^0x60 | suffix
//! byte-length-prefix  per word: len^0x60 | word
//! ```

use crate::{DecodeError, DecodeResult};

const LEN_XOR: u8 = 0x60;
const MAX_WORD_LEN: usize = 255;

fn check_len(word: &[u8]) -> DecodeResult<u8> {
    u8::try_from(word.len())
        .map_err(|_| DecodeError::Invalid(format!("word of {} bytes exceeds {}", word.len(), MAX_WORD_LEN)))
}

/// Builds a prefix-compressed word list. Words must be appended in
/// ascending order.
#[derive(Debug, Default)]
pub struct PrefixCompressedWriter {
    out: Vec<u8>,
    last: Vec<u8>,
    started: bool,
}

impl PrefixCompressedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, word: &[u8]) -> DecodeResult<()> {
        let len = check_len(word)?;
        if !self.started {
            self.out.push(len ^ LEN_XOR);
            self.out.extend_from_slice(word);
            self.started = true;
        } else {
            let reuse = self
                .last
                .iter()
                .zip(word)
                .take_while(|(a, b)| a == b)
                .count();
            // reuse <= len <= 255, checked above
            self.out.push(reuse as u8 ^ LEN_XOR);
            self.out.push((word.len() - reuse) as u8 ^ LEN_XOR);
            self.out.extend_from_slice(&word[reuse..]);
        }
        self.last.clear();
        self.last.extend_from_slice(word);
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Iterates the words of a prefix-compressed list.
#[derive(Debug)]
pub struct PrefixCompressedWords<'a> {
    data: &'a [u8],
    last: Vec<u8>,
    started: bool,
}

impl<'a> PrefixCompressedWords<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            last: Vec::new(),
            started: false,
        }
    }

    fn take_byte(&mut self) -> DecodeResult<usize> {
        let (&b, rest) = self.data.split_first().ok_or(DecodeError::OutOfData)?;
        self.data = rest;
        Ok(usize::from(b ^ LEN_XOR))
    }

    fn take_bytes(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(DecodeError::OutOfData);
        }
        let (s, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(s)
    }

    fn read_word(&mut self) -> DecodeResult<Vec<u8>> {
        if !self.started {
            self.started = true;
            let len = self.take_byte()?;
            let word = self.take_bytes(len)?;
            self.last = word.to_vec();
        } else {
            let reuse = self.take_byte()?;
            let append = self.take_byte()?;
            if reuse > self.last.len() {
                return Err(DecodeError::Invalid("prefix reuse longer than previous word".into()));
            }
            let suffix = self.take_bytes(append)?;
            self.last.truncate(reuse);
            self.last.extend_from_slice(suffix);
        }
        Ok(self.last.clone())
    }
}

impl Iterator for PrefixCompressedWords<'_> {
    type Item = DecodeResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let word = self.read_word();
        if word.is_err() {
            self.data = &[];
        }
        Some(word)
    }
}

/// Builds a list of words each prefixed by its length byte.
#[derive(Debug, Default)]
pub struct ByteLengthPrefixedWriter {
    out: Vec<u8>,
}

impl ByteLengthPrefixedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, word: &[u8]) -> DecodeResult<()> {
        let len = check_len(word)?;
        self.out.push(len ^ LEN_XOR);
        self.out.extend_from_slice(word);
        Ok(())
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Iterates the words of a byte-length-prefixed list.
#[derive(Debug)]
pub struct ByteLengthPrefixedWords<'a> {
    data: &'a [u8],
}

impl<'a> ByteLengthPrefixedWords<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl Iterator for ByteLengthPrefixedWords<'_> {
    type Item = DecodeResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&b, rest) = self.data.split_first()?;
        let len = usize::from(b ^ LEN_XOR);
        if rest.len() < len {
            self.data = &[];
            return Some(Err(DecodeError::OutOfData));
        }
        let (word, rest) = rest.split_at(len);
        self.data = rest;
        Some(Ok(word.to_vec()))
    }
}
