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

//! Smart HTTP v0 grammar: ref advertisement and the upload-pack
//! request body.

use crate::pkt::{pkt_line, Pkt, PktParser, FLUSH_PKT};
use crate::{GitError, Result};

/// Capabilities advertised on the first ref line. `no-done` lets the
/// client skip the final round-trip; the pack generator emits whole
/// objects, so `thin-pack`/`ofs-delta` are accepted but never produced.
pub const CAPABILITIES: &str =
    "multi_ack_detailed no-done side-band-64k thin-pack ofs-delta agent=kohakuhub/1";

/// One advertised ref.
#[derive(Debug, Clone)]
pub struct RefAdvert {
    pub name: String,
    pub oid_hex: String,
}

/// `GET /info/refs?service=git-upload-pack` response body.
///
/// The smart HTTP framing wraps the v0 advertisement in a service
/// announcement pkt followed by a flush.
pub fn advertisement(head_target: &str, refs: &[RefAdvert]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&pkt_line(b"# service=git-upload-pack\n"));
    out.extend_from_slice(FLUSH_PKT);

    let mut first = true;
    // HEAD first when it resolves, carrying the capability list.
    if let Some(head) = refs.iter().find(|r| r.name == head_target) {
        let line = format!(
            "{} HEAD\0{CAPABILITIES} symref=HEAD:{head_target}\n",
            head.oid_hex
        );
        out.extend_from_slice(&pkt_line(line.as_bytes()));
        first = false;
    }
    for advert in refs {
        if first {
            let line = format!("{} {}\0{CAPABILITIES}\n", advert.oid_hex, advert.name);
            out.extend_from_slice(&pkt_line(line.as_bytes()));
            first = false;
        } else {
            let line = format!("{} {}\n", advert.oid_hex, advert.name);
            out.extend_from_slice(&pkt_line(line.as_bytes()));
        }
    }
    out.extend_from_slice(FLUSH_PKT);
    out
}

/// Parsed `POST /git-upload-pack` body.
#[derive(Debug, Default, Clone)]
pub struct UploadPackRequest {
    pub wants: Vec<String>,
    pub haves: Vec<String>,
    pub done: bool,
    pub capabilities: Vec<String>,
}

/// Parse want/have negotiation. The first `want` line may carry a
/// capability list after a NUL.
pub fn parse_upload_pack_request(body: &[u8]) -> Result<UploadPackRequest> {
    let mut request = UploadPackRequest::default();
    let pkts = PktParser::new(body).collect_all()?;

    for pkt in pkts {
        let line = match pkt {
            Pkt::Line(data) => data,
            Pkt::Flush | Pkt::Delim => continue,
        };
        let line = line.strip_suffix(b"\n").unwrap_or(&line);

        if let Some(rest) = line.strip_prefix(b"want ") {
            let (oid, caps) = match rest.iter().position(|&b| b == 0) {
                Some(nul) => (&rest[..nul], Some(&rest[nul + 1..])),
                None => (rest, None),
            };
            request.wants.push(parse_oid(oid)?);
            if let Some(caps) = caps {
                request.capabilities = String::from_utf8_lossy(caps)
                    .split_whitespace()
                    .map(String::from)
                    .collect();
            }
        } else if let Some(oid) = line.strip_prefix(b"have ") {
            request.haves.push(parse_oid(oid)?);
        } else if line == b"done" {
            request.done = true;
        }
        // depth/filter/shallow lines are ignored: the bridge always
        // serves the full graph.
    }

    if request.wants.is_empty() {
        return Err(GitError::MalformedRequest("no want lines".into()));
    }
    Ok(request)
}

fn parse_oid(raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| GitError::MalformedRequest("non-utf8 oid".into()))?
        .trim();
    if text.len() != 40 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GitError::MalformedRequest(format!("bad oid: {text}")));
    }
    Ok(text.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn advertisement_shape() {
        let refs = vec![RefAdvert {
            name: "refs/heads/main".into(),
            oid_hex: OID_A.into(),
        }];
        let body = advertisement("refs/heads/main", &refs);
        let text = String::from_utf8_lossy(&body);

        assert!(text.starts_with("001e# service=git-upload-pack\n0000"));
        assert!(text.contains("HEAD\0"));
        assert!(text.contains("symref=HEAD:refs/heads/main"));
        assert!(text.contains("side-band-64k"));
        assert!(text.contains(&format!("{OID_A} refs/heads/main\n")));
        assert!(text.ends_with("0000"));
    }

    #[test]
    fn parses_wants_haves_and_done() {
        let mut body = Vec::new();
        body.extend_from_slice(&pkt_line(
            format!("want {OID_A}\0side-band-64k agent=git/2.43\n").as_bytes(),
        ));
        body.extend_from_slice(&pkt_line(format!("want {OID_B}\n").as_bytes()));
        body.extend_from_slice(FLUSH_PKT);
        body.extend_from_slice(&pkt_line(format!("have {OID_B}\n").as_bytes()));
        body.extend_from_slice(&pkt_line(b"done\n"));

        let request = parse_upload_pack_request(&body).unwrap();
        assert_eq!(request.wants, vec![OID_A.to_string(), OID_B.to_string()]);
        assert_eq!(request.haves, vec![OID_B.to_string()]);
        assert!(request.done);
        assert!(request
            .capabilities
            .iter()
            .any(|c| c == "side-band-64k"));
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(parse_upload_pack_request(&pkt_line(b"done\n")).is_err());
        let body = pkt_line(b"want nothex\n");
        assert!(parse_upload_pack_request(&body).is_err());
    }
}
