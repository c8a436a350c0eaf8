//! XPRESS LZ77+Huffman decompression as used by compressed (`MAM\x04`) prefetch files.
//!
//! Every 64 KiB of output is preceded by a 256-byte table of 4-bit code
//! lengths for 512 symbols. Symbols below 256 are literals, the rest encode
//! a match length nibble and an offset bit count.

use crate::error::{Error, Result};
use crate::text::le_u16;

const SYMBOLS: usize = 512;
const MAX_CODE_BITS: u32 = 15;
const TABLE_SIZE: usize = 1 << MAX_CODE_BITS;
const BLOCK_OUTPUT: usize = 65536;

struct DecodingTable {
    symbols: Vec<u16>,
    lengths: [u8; SYMBOLS],
}

impl DecodingTable {
    fn build(lengths_packed: &[u8]) -> Result<Self> {
        let mut lengths = [0u8; SYMBOLS];
        for (i, byte) in lengths_packed.iter().enumerate() {
            lengths[i * 2] = byte & 0x0F;
            lengths[i * 2 + 1] = byte >> 4;
        }

        let mut symbols = vec![0u16; TABLE_SIZE];
        let mut next = 0usize;
        for bit_length in 1..=MAX_CODE_BITS as u8 {
            for symbol in (0..SYMBOLS).filter(|&s| lengths[s] == bit_length) {
                let count = 1usize << (MAX_CODE_BITS - u32::from(bit_length));
                if next + count > TABLE_SIZE {
                    return Err(Error::Parse("xpress: oversubscribed Huffman table".to_string()));
                }
                symbols[next..next + count].fill(symbol as u16);
                next += count;
            }
        }
        if next == 0 {
            return Err(Error::Parse("xpress: empty Huffman table".to_string()));
        }
        Ok(Self { symbols, lengths })
    }
}

struct BitReader<'a> {
    input: &'a [u8],
    position: usize,
    next_bits: u32,
    extra_bits: i32,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8], position: usize) -> Result<Self> {
        let mut reader = Self {
            input,
            position,
            next_bits: 0,
            extra_bits: 16,
        };
        let high = reader.word()?;
        let low = reader.word()?;
        reader.next_bits = (u32::from(high) << 16) | u32::from(low);
        Ok(reader)
    }

    /// The stream may end up to one lookahead word early.
    fn word(&mut self) -> Result<u16> {
        let value = match le_u16(self.input, self.position) {
            Some(value) => value,
            None if self.position < self.input.len() + 4 => 0,
            None => return Err(Error::Parse("xpress: input exhausted".to_string())),
        };
        self.position += 2;
        Ok(value)
    }

    fn byte(&mut self) -> Result<u8> {
        let value = *self
            .input
            .get(self.position)
            .ok_or_else(|| Error::Parse("xpress: input exhausted".to_string()))?;
        self.position += 1;
        Ok(value)
    }

    fn consume(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.next_bits <<= count;
        self.extra_bits -= count as i32;
        if self.extra_bits < 0 {
            let word = u32::from(self.word()?);
            self.next_bits |= word << (-self.extra_bits) as u32;
            self.extra_bits += 16;
        }
        Ok(())
    }

    fn peek(&self, count: u32) -> u32 {
        if count == 0 {
            0
        } else {
            self.next_bits >> (32 - count)
        }
    }
}

/// Decompress `input` into exactly `output_size` bytes
pub fn decompress(input: &[u8], output_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(output_size.min(1 << 26));
    let mut position = 0usize;

    while output.len() < output_size {
        let table_bytes = input
            .get(position..position + SYMBOLS / 2)
            .ok_or_else(|| Error::Parse("xpress: truncated Huffman table".to_string()))?;
        let table = DecodingTable::build(table_bytes)?;
        let mut bits = BitReader::new(input, position + SYMBOLS / 2)?;
        let block_end = output.len() + BLOCK_OUTPUT;

        while output.len() < block_end && output.len() < output_size {
            let symbol = table.symbols[bits.peek(MAX_CODE_BITS) as usize];
            bits.consume(u32::from(table.lengths[symbol as usize]))?;

            if symbol < 256 {
                output.push(symbol as u8);
                continue;
            }

            let symbol = symbol - 256;
            let mut length = usize::from(symbol & 0x0F);
            let offset_bits = u32::from(symbol >> 4);
            if length == 15 {
                length = usize::from(bits.byte()?);
                if length == 255 {
                    length = usize::from(bits.word()?);
                    if length == 0 {
                        let low = u32::from(bits.word()?);
                        let high = u32::from(bits.word()?);
                        length = ((high << 16) | low) as usize;
                    }
                    if length < 15 {
                        return Err(Error::Parse("xpress: invalid match length".to_string()));
                    }
                    length -= 15;
                }
                length += 15;
            }
            length += 3;

            let offset = (bits.peek(offset_bits) as usize) + (1usize << offset_bits);
            bits.consume(offset_bits)?;

            if offset > output.len() {
                return Err(Error::Parse(format!(
                    "xpress: match offset {} before start of output",
                    offset
                )));
            }
            let start = output.len() - offset;
            let length = length.min(output_size - output.len());
            // byte-wise copy: matches may overlap their own output
            for i in 0..length {
                let byte = output[start + i];
                output.push(byte);
            }
        }
        position = bits.position;
    }
    Ok(output)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_literals_and_overlapping_match() {
        let mut encoder = FlatEncoder::new();
        encoder.block(&[
            Token::Literal(b'a'),
            Token::Literal(b'b'),
            Token::Literal(b'c'),
            Token::Match(3, 9),
            Token::Literal(b'!'),
        ]);
        let out = decompress(&encoder.finish(), 13).unwrap();
        assert_eq!(out, b"abcabcabcabc!");
    }

    #[test]
    fn test_second_block_reads_new_table() {
        let mut encoder = FlatEncoder::new();
        let mut first = vec![Token::Literal(b'x')];
        // 1 + 4095 * 16 = 65521 bytes, then 15 literals to close the block
        first.extend((0..4095).map(|_| Token::Match(1, 16)));
        first.extend((0..15).map(|_| Token::Literal(b'y')));
        encoder.block(&first);
        encoder.block(&[Token::Literal(b'z'), Token::Match(1, 4)]);

        let out = decompress(&encoder.finish(), BLOCK_OUTPUT + 5).unwrap();
        assert_eq!(out.len(), BLOCK_OUTPUT + 5);
        assert_eq!(out[0], b'x');
        assert_eq!(out[BLOCK_OUTPUT - 1], b'y');
        assert_eq!(&out[BLOCK_OUTPUT..], b"zzzzz");
    }

    #[test]
    fn test_bad_streams() {
        // all codes of length 1 cannot fit
        let mut data = vec![0x11u8; 256];
        data.extend_from_slice(&[0; 8]);
        assert!(decompress(&data, 10).is_err());
        assert!(decompress(&[0u8; 100], 10).is_err());

        let mut encoder = FlatEncoder::new();
        encoder.block(&[Token::Match(4, 3)]);
        assert!(decompress(&encoder.finish(), 3).is_err());
    }
}
