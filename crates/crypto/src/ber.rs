//! Minimal BER reader
//!
//! Enough of X.690 to walk PKCS#7 structures as metadata services emit them:
//! single-byte tags, definite and indefinite lengths. Values are borrowed
//! from the input.

/// Nesting limit for indefinite-length values
const MAX_DEPTH: usize = 32;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// `[n]` constructed, context-specific
pub const fn context(n: u8) -> u8 {
    0xa0 | n
}

/// One tag-length-value element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// Content octets, end-of-contents marker excluded
    pub content: &'a [u8],
    /// The whole encoding, header included
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    pub fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// True when the length octets use the indefinite form
    pub fn is_indefinite(&self) -> bool {
        self.raw.get(1) == Some(&0x80)
    }

    /// Child elements of a constructed value
    pub fn children(&self) -> Option<Vec<Tlv<'a>>> {
        if !self.is_constructed() {
            return None;
        }
        read_all(self.content)
    }

    /// Children, checking the tag first
    pub fn expect(&self, tag: u8) -> Option<Vec<Tlv<'a>>> {
        if self.tag != tag {
            return None;
        }
        self.children()
    }
}

/// Read one element, returning it and the bytes after it
pub fn read(input: &[u8]) -> Option<(Tlv<'_>, &[u8])> {
    read_at_depth(input, 0)
}

/// Read every element in `input`
pub fn read_all(mut input: &[u8]) -> Option<Vec<Tlv<'_>>> {
    let mut out = Vec::new();
    while !input.is_empty() {
        let (tlv, rest) = read(input)?;
        out.push(tlv);
        input = rest;
    }
    Some(out)
}

fn read_at_depth(input: &[u8], depth: usize) -> Option<(Tlv<'_>, &[u8])> {
    if depth > MAX_DEPTH {
        return None;
    }

    let tag = *input.first()?;
    // High tag numbers never appear in the structures read here
    if tag & 0x1f == 0x1f {
        return None;
    }

    let first = *input.get(1)?;
    if first == 0x80 {
        if tag & 0x20 == 0 {
            return None;
        }
        return read_indefinite(input, tag, depth);
    }

    let (len, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let count = (first & 0x7f) as usize;
        if count > 4 {
            return None;
        }
        let octets = input.get(2..2 + count)?;
        let len = octets.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (len, 2 + count)
    };

    let end = header.checked_add(len)?;
    let content = input.get(header..end)?;
    Some((
        Tlv {
            tag,
            content,
            raw: &input[..end],
        },
        &input[end..],
    ))
}

fn read_indefinite(input: &[u8], tag: u8, depth: usize) -> Option<(Tlv<'_>, &[u8])> {
    let mut offset = 2;
    loop {
        let rest = input.get(offset..)?;
        if rest.starts_with(&[0, 0]) {
            let end = offset + 2;
            return Some((
                Tlv {
                    tag,
                    content: &input[2..offset],
                    raw: &input[..end],
                },
                &input[end..],
            ));
        }
        let (_, after) = read_at_depth(rest, depth + 1)?;
        offset = input.len() - after.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definite_lengths() {
        // SEQUENCE { INTEGER 5, OCTET STRING "hi" }
        let data = [0x30, 0x07, 0x02, 0x01, 0x05, 0x04, 0x02, b'h', b'i'];
        let (seq, rest) = read(&data).unwrap();
        assert!(rest.is_empty());

        let children = seq.expect(TAG_SEQUENCE).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].content, &[0x05]);
        assert_eq!(children[1].tag, TAG_OCTET_STRING);
        assert_eq!(children[1].content, b"hi");
        assert_eq!(children[1].raw, &[0x04, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_long_form_length() {
        let mut data = vec![0x04, 0x81, 0x80];
        data.extend(std::iter::repeat(7u8).take(0x80));
        data.push(0xff);

        let (octets, rest) = read(&data).unwrap();
        assert_eq!(octets.content.len(), 0x80);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn test_indefinite_length() {
        // [0] { SEQUENCE(indefinite) { INTEGER 1 } } then a trailing byte
        let data = [
            0xa0, 0x80, 0x30, 0x80, 0x02, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01,
        ];
        let (outer, rest) = read(&data).unwrap();
        assert_eq!(rest, &[0x01]);
        assert!(outer.is_indefinite());
        assert_eq!(outer.raw.len(), 11);

        let inner = outer.expect(context(0)).unwrap();
        assert_eq!(inner.len(), 1);
        let ints = inner[0].expect(TAG_SEQUENCE).unwrap();
        assert_eq!(ints[0].content, &[0x01]);
    }

    #[test]
    fn test_malformed_input() {
        // Content runs past the end
        assert!(read(&[0x04, 0x05, 0x01]).is_none());
        // Indefinite primitive
        assert!(read(&[0x04, 0x80, 0x00, 0x00]).is_none());
        // Missing end-of-contents
        assert!(read(&[0x30, 0x80, 0x02, 0x01, 0x01]).is_none());
        // High tag number
        assert!(read(&[0x1f, 0x81, 0x01, 0x00]).is_none());
        assert!(read(&[]).is_none());
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..(MAX_DEPTH + 2) {
            data.extend([0x30, 0x80]);
        }
        for _ in 0..(MAX_DEPTH + 2) {
            data.extend([0x00, 0x00]);
        }
        assert!(read(&data).is_none());
    }
}
