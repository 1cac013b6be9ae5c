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

//! Version-2 packfile writer.
//!
//! Objects are stored whole (no delta compression); each is a varint
//! type/size header followed by a zlib stream. The file ends with a
//! SHA-1 over everything before it. Delta-free packs are larger but
//! always valid — `git index-pack` reconstructs whatever it wants on the
//! client side.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::Write;

use crate::object::ObjectKind;
use crate::pkt::{pkt_line, MAX_PKT_PAYLOAD};

pub const SIDEBAND_DATA: u8 = 1;
pub const SIDEBAND_PROGRESS: u8 = 2;
pub const SIDEBAND_ERROR: u8 = 3;

/// Accumulating pack writer. The object count must be known up front
/// (the header carries it), so callers enumerate first and write second.
pub struct PackWriter {
    buf: Vec<u8>,
    hasher: Sha1,
    expected: u32,
    written: u32,
}

impl PackWriter {
    pub fn new(object_count: u32) -> Self {
        let mut writer = Self {
            buf: Vec::new(),
            hasher: Sha1::new(),
            expected: object_count,
            written: 0,
        };
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(b"PACK");
        header.extend_from_slice(&2u32.to_be_bytes());
        header.extend_from_slice(&object_count.to_be_bytes());
        writer.push_bytes(&header);
        writer
    }

    fn push_bytes(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.buf.extend_from_slice(data);
    }

    /// Append one whole (non-delta) object.
    pub fn add_object(&mut self, kind: ObjectKind, content: &[u8]) {
        debug_assert!(self.written < self.expected);
        let header = object_header(kind, content.len() as u64);
        self.push_bytes(&header);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        // Writing to a Vec cannot fail.
        encoder.write_all(content).expect("zlib write to Vec");
        let compressed = encoder.finish().expect("zlib finish to Vec");
        self.push_bytes(&compressed);
        self.written += 1;
    }

    /// Seal the pack: append the SHA-1 trailer and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        debug_assert_eq!(self.written, self.expected);
        let digest = self.hasher.finalize();
        self.buf.extend_from_slice(&digest);
        self.buf
    }
}

/// Varint object header: low nibble of size plus type in the first byte,
/// seven size bits per continuation byte.
fn object_header(kind: ObjectKind, mut size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    let mut byte = (kind.pack_type() << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
    out
}

/// Split a payload into side-band-64k frames on the given band.
pub fn sideband_chunks(band: u8, data: &[u8]) -> Vec<Vec<u8>> {
    // One byte of each frame goes to the band marker.
    let chunk_size = MAX_PKT_PAYLOAD - 1;
    data.chunks(chunk_size)
        .map(|chunk| {
            let mut frame = Vec::with_capacity(chunk.len() + 1);
            frame.push(band);
            frame.extend_from_slice(chunk);
            pkt_line(&frame)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn header_encodes_small_and_large_sizes() {
        // size 4 blob: single byte 0b0011_0100
        assert_eq!(object_header(ObjectKind::Blob, 4), vec![0x34]);
        // size 0 commit: 0b0001_0000
        assert_eq!(object_header(ObjectKind::Commit, 0), vec![0x10]);
        // Multi-byte: size 300 = 0b100101100; low nibble c, then 0b10010
        let header = object_header(ObjectKind::Blob, 300);
        assert_eq!(header.len(), 2);
        assert_eq!(header[0] & 0x80, 0x80);
        // Reassemble the size.
        let mut size = (header[0] & 0x0f) as u64;
        size |= ((header[1] & 0x7f) as u64) << 4;
        assert_eq!(size, 300);
    }

    #[test]
    fn pack_layout_and_trailer() {
        let mut writer = PackWriter::new(1);
        writer.add_object(ObjectKind::Blob, b"hello");
        let pack = writer.finish();

        assert_eq!(&pack[0..4], b"PACK");
        assert_eq!(u32::from_be_bytes(pack[4..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(pack[8..12].try_into().unwrap()), 1);

        // Trailer is the SHA-1 of everything before it.
        let body = &pack[..pack.len() - 20];
        let digest: [u8; 20] = Sha1::digest(body).into();
        assert_eq!(&pack[pack.len() - 20..], &digest);

        // Object content round-trips through zlib.
        let mut decoder = ZlibDecoder::new(&pack[13..pack.len() - 20]);
        let mut content = Vec::new();
        decoder.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn sideband_frames_stay_under_pkt_limit() {
        let data = vec![0xabu8; 200_000];
        let frames = sideband_chunks(SIDEBAND_DATA, &data);
        assert!(frames.len() >= 4);
        let mut total = 0usize;
        for frame in &frames {
            assert!(frame.len() <= MAX_PKT_PAYLOAD + 4);
            // Band marker right after the length prefix.
            assert_eq!(frame[4], SIDEBAND_DATA);
            total += frame.len() - 5;
        }
        assert_eq!(total, data.len());
    }
}
