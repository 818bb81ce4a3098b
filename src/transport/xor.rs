//! Single-byte XOR stream cipher.
//!
//! This is obfuscation, not encryption: one repeating key byte agreed during
//! the Hello exchange. The key lives in an [`XorKey`] handle shared between
//! the read and write halves of a connection, so both always agree on the
//! current key.
//!
//! The cipher is applied at the codec boundary rather than inside the socket
//! reader. A framed reader pulls whatever the socket has, which may include
//! bytes sent after a ReKey frame under the new key. [`XorCodec`] tracks which
//! key it applied to buffered-but-undecoded bytes and re-keys them when the
//! shared key changes between frames.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Shared, atomically replaceable key byte. Defaults to 0 (identity).
#[derive(Debug, Clone, Default)]
pub struct XorKey(Arc<AtomicU8>);

impl XorKey {
    pub fn new(key: u8) -> Self {
        Self(Arc::new(AtomicU8::new(key)))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, key: u8) {
        self.0.store(key, Ordering::Release);
    }
}

/// Apply the key to a buffer in place.
pub fn xor_in_place(data: &mut [u8], key: u8) {
    if key == 0 {
        return;
    }
    for b in data {
        *b ^= key;
    }
}

/// Wraps a codec, XORing every byte that enters the decoder and every byte
/// the encoder produces.
#[derive(Debug)]
pub struct XorCodec<C> {
    inner: C,
    key: XorKey,
    /// Key applied to `src[..deciphered]` on the last decode call.
    applied: u8,
    deciphered: usize,
}

impl<C> XorCodec<C> {
    pub fn new(inner: C, key: XorKey) -> Self {
        Self {
            inner,
            applied: key.get(),
            key,
            deciphered: 0,
        }
    }

    /// Handle that rekeys this codec.
    pub fn key(&self) -> XorKey {
        self.key.clone()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    fn decipher(&mut self, src: &mut BytesMut) {
        let key = self.key.get();
        let seen = self.deciphered.min(src.len());
        if key != self.applied {
            xor_in_place(&mut src[..seen], self.applied ^ key);
            self.applied = key;
        }
        xor_in_place(&mut src[seen..], key);
        self.deciphered = src.len();
    }
}

impl<C: Decoder> Decoder for XorCodec<C> {
    type Item = C::Item;
    type Error = C::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<C::Item>, C::Error> {
        self.decipher(src);
        let out = self.inner.decode(src);
        self.deciphered = src.len();
        out
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<C::Item>, C::Error> {
        self.decipher(src);
        let out = self.inner.decode_eof(src);
        self.deciphered = src.len();
        out
    }
}

impl<C, I> Encoder<I> for XorCodec<C>
where
    C: Encoder<I>,
{
    type Error = C::Error;

    fn encode(&mut self, item: I, dst: &mut BytesMut) -> Result<(), C::Error> {
        let start = dst.len();
        self.inner.encode(item, dst)?;
        xor_in_place(&mut dst[start..], self.key.get());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{BinaryCodec, TextCodec};
    use crate::core::packet::Packet;

    #[test]
    fn test_default_key_is_identity() {
        let mut plain = BytesMut::new();
        BinaryCodec::new().encode(&Packet::Ping, &mut plain).unwrap();

        let mut xored = BytesMut::new();
        XorCodec::new(BinaryCodec::new(), XorKey::default())
            .encode(&Packet::Ping, &mut xored)
            .unwrap();
        assert_eq!(plain, xored);
    }

    #[test]
    fn test_bytes_are_xored_on_the_wire() {
        let mut plain = BytesMut::new();
        TextCodec::new().encode(&Packet::Ping, &mut plain).unwrap();

        let mut xored = BytesMut::new();
        XorCodec::new(TextCodec::new(), XorKey::new(0x55))
            .encode(&Packet::Ping, &mut xored)
            .unwrap();
        let expected: Vec<u8> = plain.iter().map(|b| b ^ 0x55).collect();
        assert_eq!(&xored[..], &expected[..]);
    }

    #[test]
    fn test_rekey_between_buffered_frames() {
        // ReKey under key 0 followed by a Message under key 0x3c, both
        // already sitting in the read buffer.
        let mut wire = BytesMut::new();
        let tx_key = XorKey::default();
        let mut tx = XorCodec::new(BinaryCodec::new(), tx_key.clone());
        tx.encode(&Packet::ReKey { xor_key: 0x3c }, &mut wire).unwrap();
        tx_key.set(0x3c);
        tx.encode(&Packet::message("bob", "after"), &mut wire).unwrap();

        let rx_key = XorKey::default();
        let mut rx = XorCodec::new(BinaryCodec::new(), rx_key.clone());
        let first = rx.decode(&mut wire).unwrap();
        assert_eq!(first, Some(Packet::ReKey { xor_key: 0x3c }));
        rx_key.set(0x3c);
        assert_eq!(
            rx.decode(&mut wire).unwrap(),
            Some(Packet::message("bob", "after"))
        );
    }

    #[test]
    fn test_partial_frame_is_not_xored_twice() {
        let tx_key = XorKey::new(7);
        let mut tx = XorCodec::new(TextCodec::new(), tx_key);
        let mut full = BytesMut::new();
        tx.encode(&Packet::goodbye("later"), &mut full).unwrap();

        let rx_key = XorKey::new(7);
        let mut rx = XorCodec::new(TextCodec::new(), rx_key);
        let mut buf = BytesMut::from(&full[..3]);
        assert_eq!(rx.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&full[3..]);
        assert_eq!(rx.decode(&mut buf).unwrap(), Some(Packet::goodbye("later")));
    }

    #[test]
    fn test_mismatched_keys_garble() {
        let mut wire = BytesMut::new();
        XorCodec::new(BinaryCodec::new(), XorKey::new(1))
            .encode(&Packet::message("a", "b"), &mut wire)
            .unwrap();
        let mut rx = XorCodec::new(BinaryCodec::new(), XorKey::new(2));
        assert!(rx.decode(&mut wire).is_err());
    }
}
