// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary codec for the crash pipe.
//!
//! The encoder side runs inside a signal handler, so it writes length-prefixed
//! primitives straight to a file descriptor: no buffering, no allocation, no
//! locking. Errors are swallowed; by the time they are detectable the process
//! is aborting anyway and the reporter treats a short stream as a discarded
//! record.
//!
//! The decoder side runs in the reporter, which is an ordinary process. It
//! reads from any byte source and never panics: every failure (short read,
//! oversized length claim) returns the caller's default and latches a sticky
//! `good` flag to `false`, where it stays.

use super::constants::STRING_MAX;
use std::collections::BTreeMap;
use std::io::Read;
use std::os::unix::io::RawFd;

/// Writes TLV primitives to a raw file descriptor.
///
/// SIGNAL SAFETY:
///     Only `write(2)` is used. All payloads are caller-owned slices, so no
///     allocation happens on this path.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    fd: RawFd,
}

impl Encoder {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Pushes raw bytes, retrying on EINTR. Other errors are dropped: the
    /// pipe either works or the record is abandoned mid-stream.
    fn put(&self, mut data: &[u8]) {
        while !data.is_empty() {
            // SAFETY: `data` is a valid slice for the duration of the call.
            let rval = unsafe {
                libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len())
            };
            if rval > 0 {
                data = &data[rval as usize..];
            } else if rval < 0 && std::io::Error::last_os_error().raw_os_error()
                == Some(libc::EINTR)
            {
                continue;
            } else {
                return;
            }
        }
    }

    pub fn write_u32(&self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_u64(&self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    /// Length-prefixed byte string. Lengths that do not fit in a `u32` are
    /// clamped to zero, so the receiver sees an empty string instead of a
    /// corrupt frame.
    pub fn write_bytes(&self, data: &[u8]) {
        if data.len() >= u32::MAX as usize {
            self.write_u32(0);
            return;
        }
        self.write_u32(data.len() as u32);
        self.put(data);
    }

    /// `u32` element count, then the elements in order.
    pub fn write_seq<T: Wire>(&self, seq: &[T]) {
        self.write_u32(seq.len().min(u32::MAX as usize) as u32);
        for element in seq {
            element.encode(self);
        }
    }

    /// `u32` entry count, then key before value per entry.
    pub fn write_map<K: Wire + Ord, V: Wire>(&self, map: &BTreeMap<K, V>) {
        self.write_u32(map.len().min(u32::MAX as usize) as u32);
        for (key, value) in map {
            key.encode(self);
            value.encode(self);
        }
    }
}

/// Reads TLV primitives with a sticky `good` flag.
pub struct Decoder<R> {
    src: R,
    good: bool,
}

impl<R: Read> Decoder<R> {
    pub fn new(src: R) -> Self {
        Self { src, good: true }
    }

    /// False once any read has failed; stays false.
    pub fn good(&self) -> bool {
        self.good
    }

    /// Reads a `T`; on any failure returns `default` and marks the decoder
    /// bad. Once bad, every subsequent read returns its default immediately.
    pub fn read<T: Wire>(&mut self, default: T) -> T {
        if !self.good {
            return default;
        }
        match T::decode(self) {
            Some(value) => value,
            None => {
                self.good = false;
                default
            }
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Option<()> {
        // read_exact already retries on EINTR.
        self.src.read_exact(buf).ok()
    }
}

/// A value that can cross the crash pipe.
pub trait Wire: Sized {
    fn encode(&self, enc: &Encoder);
    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self>;
}

impl Wire for u32 {
    fn encode(&self, enc: &Encoder) {
        enc.write_u32(*self);
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let mut buf = [0u8; 4];
        dec.fill(&mut buf)?;
        Some(u32::from_le_bytes(buf))
    }
}

impl Wire for u64 {
    fn encode(&self, enc: &Encoder) {
        enc.write_u64(*self);
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let mut buf = [0u8; 8];
        dec.fill(&mut buf)?;
        Some(u64::from_le_bytes(buf))
    }
}

impl Wire for Vec<u8> {
    fn encode(&self, enc: &Encoder) {
        enc.write_bytes(self);
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let len = u32::decode(dec)? as usize;
        // The protocol never carries blobs past the string cap; a larger
        // claim is framing damage, not data.
        if len > STRING_MAX {
            return None;
        }
        let mut buf = vec![0u8; len];
        dec.fill(&mut buf)?;
        Some(buf)
    }
}

impl Wire for String {
    fn encode(&self, enc: &Encoder) {
        enc.write_bytes(self.as_bytes());
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let bytes = Vec::<u8>::decode(dec)?;
        // Truncation caps can split a multibyte character; keep what survives.
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, enc: &Encoder) {
        enc.write_seq(self);
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let count = u32::decode(dec)? as usize;
        let mut out = Vec::new();
        for _ in 0..count {
            // No up-front reserve: the count is attacker-controlled input.
            out.push(T::decode(dec)?);
        }
        Some(out)
    }
}

impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    fn encode(&self, enc: &Encoder) {
        enc.write_map(self);
    }

    fn decode<R: Read>(dec: &mut Decoder<R>) -> Option<Self> {
        let count = u32::decode(dec)? as usize;
        let mut out = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode(dec)?;
            let value = V::decode(dec)?;
            out.insert(key, value);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::os::unix::io::AsRawFd;

    /// Runs the encoder against a pipe and returns everything it wrote.
    fn encode_to_vec(emit: impl FnOnce(&Encoder)) -> Vec<u8> {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let enc = Encoder::new(write_end.as_raw_fd());
        emit(&enc);
        drop(write_end);
        let mut out = Vec::new();
        std::fs::File::from(read_end).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn primitive_round_trip() {
        let bytes = encode_to_vec(|enc| {
            enc.write_u32(0xdead_beef);
            enc.write_u64(0x0123_4567_89ab_cdef);
            enc.write_bytes(b"hello");
        });
        let mut dec = Decoder::new(Cursor::new(bytes));
        assert_eq!(dec.read(0u32), 0xdead_beef);
        assert_eq!(dec.read(0u64), 0x0123_4567_89ab_cdef);
        assert_eq!(dec.read(String::new()), "hello");
        assert!(dec.good());
    }

    #[test]
    fn seq_and_map_round_trip() {
        let seq = vec!["a".to_string(), "bb".to_string(), String::new()];
        let map: BTreeMap<String, u64> = [("x".to_string(), 1u64), ("y".to_string(), 2u64)]
            .into_iter()
            .collect();
        let bytes = encode_to_vec(|enc| {
            enc.write_seq(&seq);
            enc.write_map(&map);
        });
        let mut dec = Decoder::new(Cursor::new(bytes));
        assert_eq!(dec.read(Vec::<String>::new()), seq);
        assert_eq!(dec.read(BTreeMap::<String, u64>::new()), map);
        assert!(dec.good());
    }

    #[test]
    fn short_read_is_sticky() {
        let bytes = encode_to_vec(|enc| {
            enc.write_u32(7);
            enc.write_bytes(b"payload");
        });
        // Every truncation point must leave the decoder bad and harmless.
        for cut in 0..bytes.len() {
            let mut dec = Decoder::new(Cursor::new(bytes[..cut].to_vec()));
            let first = dec.read(0u32);
            let second = dec.read(String::from("default"));
            if !dec.good() {
                // Defaults come back once the stream went bad.
                assert!(first == 0 || second == "default");
            }
            // A bad decoder never recovers.
            if !dec.good() {
                assert_eq!(dec.read(42u32), 42);
                assert!(!dec.good());
            }
        }
        // The full stream decodes fine.
        let mut dec = Decoder::new(Cursor::new(bytes));
        assert_eq!(dec.read(0u32), 7);
        assert_eq!(dec.read(String::new()), "payload");
        assert!(dec.good());
    }

    #[test]
    fn oversized_length_claim_is_framing_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(STRING_MAX as u32 + 1).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        let mut dec = Decoder::new(Cursor::new(bytes));
        assert_eq!(dec.read(String::from("fallback")), "fallback");
        assert!(!dec.good());
    }

    #[test]
    fn encoder_writes_through_any_descriptor() -> anyhow::Result<()> {
        use std::io::{Seek, SeekFrom};
        let mut file = tempfile::tempfile()?;
        let enc = Encoder::new(file.as_raw_fd());
        enc.write_u32(7);
        enc.write_bytes(b"on disk");
        file.seek(SeekFrom::Start(0))?;
        let mut dec = Decoder::new(file);
        assert_eq!(dec.read(0u32), 7);
        assert_eq!(dec.read(String::new()), "on disk");
        assert!(dec.good());
        Ok(())
    }

    #[test]
    fn empty_bytes_round_trip() {
        let bytes = encode_to_vec(|enc| enc.write_bytes(b""));
        let mut dec = Decoder::new(Cursor::new(bytes));
        assert_eq!(dec.read(vec![1u8]), Vec::<u8>::new());
        assert!(dec.good());
    }
}
