// Copyright 2025 KohakuHub (https://github.com/KohakuBlueleaf/KohakuHub)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! pkt-line framing: a 4-hex-digit length prefix covering itself plus
//! the payload. `0000` is a flush, `0001` a delimiter.

use crate::{GitError, Result};

pub const FLUSH_PKT: &[u8] = b"0000";
pub const DELIM_PKT: &[u8] = b"0001";

/// Longest payload a single pkt-line can carry (65520 - 4).
pub const MAX_PKT_PAYLOAD: usize = 65_516;

/// Frame a payload as one pkt-line.
pub fn pkt_line(data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_PKT_PAYLOAD);
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(format!("{:04x}", data.len() + 4).as_bytes());
    out.extend_from_slice(data);
    out
}

/// One parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Line(Vec<u8>),
    Flush,
    Delim,
}

impl Pkt {
    /// Payload as text with any trailing newline removed.
    pub fn text(&self) -> Option<String> {
        match self {
            Pkt::Line(data) => {
                let data = data.strip_suffix(b"\n").unwrap_or(data);
                Some(String::from_utf8_lossy(data).into_owned())
            }
            _ => None,
        }
    }
}

/// Incremental parser over a complete request body.
pub struct PktParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> PktParser<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Next frame, or `None` at end of input.
    pub fn next_pkt(&mut self) -> Result<Option<Pkt>> {
        if self.is_empty() {
            return Ok(None);
        }
        if self.input.len() - self.pos < 4 {
            return Err(GitError::MalformedPkt("truncated length prefix".into()));
        }
        let prefix = &self.input[self.pos..self.pos + 4];
        let len_str = std::str::from_utf8(prefix)
            .map_err(|_| GitError::MalformedPkt("non-ascii length prefix".into()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| GitError::MalformedPkt(format!("bad length prefix: {len_str}")))?;
        self.pos += 4;

        match len {
            0 => Ok(Some(Pkt::Flush)),
            1 => Ok(Some(Pkt::Delim)),
            2 | 3 => Err(GitError::MalformedPkt(format!("reserved length {len}"))),
            _ => {
                let payload_len = len - 4;
                if self.input.len() - self.pos < payload_len {
                    return Err(GitError::MalformedPkt("truncated payload".into()));
                }
                let payload = self.input[self.pos..self.pos + payload_len].to_vec();
                self.pos += payload_len;
                Ok(Some(Pkt::Line(payload)))
            }
        }
    }

    /// Drain all remaining frames.
    pub fn collect_all(mut self) -> Result<Vec<Pkt>> {
        let mut out = Vec::new();
        while let Some(pkt) = self.next_pkt()? {
            out.push(pkt);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_known_vectors() {
        // Classic examples from the git docs.
        assert_eq!(pkt_line(b"a\n"), b"0006a\n");
        assert_eq!(pkt_line(b"a"), b"0005a");
        assert_eq!(pkt_line(b"foobar\n"), b"000bfoobar\n");
        assert_eq!(pkt_line(b""), b"0004");
    }

    #[test]
    fn parse_round_trip() {
        let mut body = Vec::new();
        body.extend_from_slice(&pkt_line(b"want deadbeef\n"));
        body.extend_from_slice(FLUSH_PKT);
        body.extend_from_slice(&pkt_line(b"done\n"));

        let pkts = PktParser::new(&body).collect_all().unwrap();
        assert_eq!(
            pkts,
            vec![
                Pkt::Line(b"want deadbeef\n".to_vec()),
                Pkt::Flush,
                Pkt::Line(b"done\n".to_vec()),
            ]
        );
        assert_eq!(pkts[0].text().as_deref(), Some("want deadbeef"));
    }

    #[test]
    fn rejects_truncation_and_reserved() {
        assert!(PktParser::new(b"00").collect_all().is_err());
        assert!(PktParser::new(b"0009ab").collect_all().is_err());
        assert!(PktParser::new(b"0002").collect_all().is_err());
        assert!(PktParser::new(b"zzzz").collect_all().is_err());
    }

    #[test]
    fn delim_is_distinct_from_flush() {
        let mut body = Vec::new();
        body.extend_from_slice(DELIM_PKT);
        body.extend_from_slice(FLUSH_PKT);
        let pkts = PktParser::new(&body).collect_all().unwrap();
        assert_eq!(pkts, vec![Pkt::Delim, Pkt::Flush]);
    }
}
