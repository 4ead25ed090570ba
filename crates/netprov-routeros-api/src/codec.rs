//! RouterOS API wire format
//!
//! A sentence is a sequence of length-prefixed words terminated by an empty
//! word. Lengths use a variable-width big-endian prefix:
//!
//! | Length            | Bytes | Prefix bits |
//! |-------------------|-------|-------------|
//! | `< 0x80`          | 1     | `0xxxxxxx`  |
//! | `< 0x4000`        | 2     | `10xxxxxx`  |
//! | `< 0x20_0000`     | 3     | `110xxxxx`  |
//! | `< 0x1000_0000`   | 4     | `1110xxxx`  |
//! | otherwise         | 5     | `11110000`  |

use netprov_core::traits::Fields;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest word accepted from the wire
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a word length prefix
pub fn encode_length(len: usize) -> Vec<u8> {
    let len = len as u32;
    match len {
        0..0x80 => vec![len as u8],
        0x80..0x4000 => (len | 0x8000).to_be_bytes()[2..].to_vec(),
        0x4000..0x20_0000 => (len | 0xC0_0000).to_be_bytes()[1..].to_vec(),
        0x20_0000..0x1000_0000 => (len | 0xE000_0000).to_be_bytes().to_vec(),
        _ => {
            let mut bytes = vec![0xF0];
            bytes.extend_from_slice(&len.to_be_bytes());
            bytes
        }
    }
}

/// Read one word length prefix
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<usize> {
    let first = reader.read_u8().await?;
    let (extra, initial) = match first {
        b if b & 0x80 == 0x00 => (0, u32::from(b)),
        b if b & 0xC0 == 0x80 => (1, u32::from(b & 0x3F)),
        b if b & 0xE0 == 0xC0 => (2, u32::from(b & 0x1F)),
        b if b & 0xF0 == 0xE0 => (3, u32::from(b & 0x0F)),
        0xF0 => (4, 0),
        b => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Reserved length prefix byte 0x{:02X}", b),
            ));
        }
    };

    let mut len = initial;
    for _ in 0..extra {
        len = (len << 8) | u32::from(reader.read_u8().await?);
    }
    Ok(len as usize)
}

/// Encode a whole sentence, including the terminating empty word
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut buf = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        buf.extend_from_slice(&encode_length(bytes.len()));
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
    buf
}

pub async fn write_sentence<W, S>(writer: &mut W, words: &[S]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    writer.write_all(&encode_sentence(words)).await?;
    writer.flush().await
}

/// Read words up to the terminating empty word
pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<String>> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Word of {} bytes exceeds the {} byte limit", len, MAX_WORD_LEN),
            ));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        // Comments written from WinBox may be Latin-1
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

/// One reply sentence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `!re`: one result row
    Row(Fields),
    /// `!done`: end of the command; may carry `ret`
    Done(Fields),
    /// `!trap`: the command failed; a `!done` follows
    Trap { message: String, category: Option<u32> },
    /// `!fatal`: the router is closing the connection
    Fatal(String),
}

impl Reply {
    /// Parse a reply sentence
    pub fn parse(words: &[String]) -> io::Result<Self> {
        let (kind, rest) = words
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Empty reply sentence"))?;

        match kind.as_str() {
            "!re" => Ok(Reply::Row(attributes(rest))),
            "!done" => Ok(Reply::Done(attributes(rest))),
            "!trap" => {
                let attrs = attributes(rest);
                Ok(Reply::Trap {
                    message: attrs.get("message").cloned().unwrap_or_else(|| "unknown failure".into()),
                    category: attrs.get("category").and_then(|c| c.parse().ok()),
                })
            }
            "!fatal" => Ok(Reply::Fatal(rest.join(" "))),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected reply word {}", other),
            )),
        }
    }
}

/// Collect `=key=value` words; tags and query words are ignored
fn attributes(words: &[String]) -> Fields {
    words
        .iter()
        .filter_map(|word| word.strip_prefix('='))
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// `=key=value`
pub fn attribute_word(key: &str, value: &str) -> String {
    format!("={}={}", key, value)
}

/// `?key=value`
pub fn query_word(key: &str, value: &str) -> String {
    format!("?{}={}", key, value)
}

/// Command word for a collection path, e.g. `/ip/pool` + `print`
pub fn command_word(path: &str, verb: &str) -> String {
    format!("{}/{}", path.trim_end_matches('/'), verb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_widths() {
        assert_eq!(encode_length(0x00), vec![0x00]);
        assert_eq!(encode_length(0x7F), vec![0x7F]);
        assert_eq!(encode_length(0x80), vec![0x80, 0x80]);
        assert_eq!(encode_length(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encode_length(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encode_length(0x1F_FFFF), vec![0xDF, 0xFF, 0xFF]);
        assert_eq!(encode_length(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(encode_length(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn length_prefixes_read_back() {
        for len in [0usize, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0x0FFF_FFFF, 0x1000_0000] {
            let encoded = encode_length(len);
            let decoded = read_length(&mut encoded.as_slice()).await.unwrap();
            assert_eq!(decoded, len, "prefix {:02X?}", encoded);
        }
    }

    #[tokio::test]
    async fn reserved_prefix_is_rejected() {
        let err = read_length(&mut [0xF8u8].as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_word_is_rejected_before_reading_it() {
        let mut wire = encode_length(MAX_WORD_LEN + 1);
        wire.extend_from_slice(b"truncated");
        let err = read_sentence(&mut wire.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let four_gib = [0xF0u8, 0xFF, 0xFF, 0xFF, 0xFF];
        let err = read_sentence(&mut four_gib.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn sentence_survives_the_wire() {
        let words = vec!["/ppp/secret/print".to_string(), "?name=contract_42".to_string(), "x".repeat(200)];
        let encoded = encode_sentence(&words);
        assert_eq!(*encoded.last().unwrap(), 0);

        let decoded = read_sentence(&mut encoded.as_slice()).await.unwrap();
        assert_eq!(decoded, words);
    }

    #[test]
    fn replies_parse_attributes() {
        let words: Vec<String> = ["!re", "=.id=*1A", "=name=pool-a", "=comment=a=b", ".tag=3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let Reply::Row(fields) = Reply::parse(&words).unwrap() else {
            panic!("expected a row");
        };
        assert_eq!(fields.get(".id").map(String::as_str), Some("*1A"));
        assert_eq!(fields.get("comment").map(String::as_str), Some("a=b"), "Only the first = splits");
        assert!(!fields.contains_key("tag"));

        let trap: Vec<String> = ["!trap", "=category=1", "=message=failure: already have such entry"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            Reply::parse(&trap).unwrap(),
            Reply::Trap {
                message: "failure: already have such entry".into(),
                category: Some(1)
            }
        );

        assert!(Reply::parse(&["!weird".to_string()]).is_err());
        assert!(Reply::parse(&[]).is_err());
    }

    #[test]
    fn words_are_built_from_paths() {
        assert_eq!(command_word("/ip/pool", "print"), "/ip/pool/print");
        assert_eq!(command_word("/ip/pool/", "add"), "/ip/pool/add");
        assert_eq!(attribute_word(".id", "*1"), "=.id=*1");
        assert_eq!(query_word("name", "x"), "?name=x");
    }
}
