//! Length-prefixed protobuf framing for the Cast V2 wire protocol.
//!
//! A frame is `u32_be(len) || protobuf(CastMessage)`.

use bytes::{Buf, BufMut, BytesMut};
use crate::{
    cast::cast_channel,
    message::{CastMessage, CastMessagePayload},
    Error, Result,
};
use protobuf::Message;
use tokio_util::codec;

pub struct CastMessageCodec;

const SIZE_OF_U32: usize = 4;

/// Upper bound on the declared protobuf length of a single frame.
///
/// A larger declared length means the stream is desynchronized (or the peer
/// is hostile); the whole read buffer is discarded and the heartbeat is left
/// to tear the session down if the stream is truly corrupt.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

impl codec::Encoder<CastMessage> for CastMessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        msg: CastMessage,
        dst: &mut BytesMut
    ) -> Result<()>
    {
        use cast_channel::cast_message::{PayloadType, ProtocolVersion};

        let mut proto_msg = cast_channel::CastMessage::new();

        proto_msg.set_protocol_version(ProtocolVersion::CASTV2_1_0);

        proto_msg.set_namespace(msg.namespace.to_string());
        proto_msg.set_source_id(msg.source.to_string());
        proto_msg.set_destination_id(msg.destination.to_string());

        match msg.payload {
            CastMessagePayload::String(s) => {
                proto_msg.set_payload_type(PayloadType::STRING);
                proto_msg.set_payload_utf8(s);
            },

            CastMessagePayload::Binary(b) => {
                proto_msg.set_payload_type(PayloadType::BINARY);
                proto_msg.set_payload_binary(b);
            },
        };

        let proto_len: usize = proto_msg.compute_size()
            .try_into()
            .map_err(|_| Error::Write("message size overflowed usize".to_string()))?;

        if proto_len > MAX_FRAME_LEN {
            return Err(Error::Write(format!(
                "encoded message len {proto_len} exceeds max frame len {MAX_FRAME_LEN}")));
        }

        let total_len: usize = proto_len + SIZE_OF_U32;

        dst.reserve(total_len);

        dst.put_u32(proto_len as u32);

        // Braces to limit the scope of writer.
        {
            let mut writer = dst.limit(proto_len).writer();
            proto_msg.write_to_writer(&mut writer)
                     .map_err(|err| Error::Write(format!("protobuf serialize: {err}")))?;
        }

        Ok(())
    }
}

impl codec::Decoder for CastMessageCodec {
    type Item = CastMessage;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut
    ) -> Result<Option<CastMessage>>
    {
        if src.len() < SIZE_OF_U32 {
            return Ok(None);
        }

        let proto_len_bytes = <[u8; SIZE_OF_U32]>::try_from(&src[0..SIZE_OF_U32]).unwrap();
        let proto_len = u32::from_be_bytes(proto_len_bytes) as usize;

        if proto_len > MAX_FRAME_LEN {
            tracing::warn!(proto_len,
                           buffered = src.len(),
                           "oversized frame; discarding read buffer");
            src.clear();
            return Ok(None);
        }

        let total_len: usize = proto_len + SIZE_OF_U32;

        let src_len = src.len();

        if src_len < total_len {
            src.reserve(total_len - src_len);
            return Ok(None);
        }

        let parse_res = {
            // Braces to scope proto_bytes' borrow.
            let proto_bytes = &src[SIZE_OF_U32..total_len];
            cast_channel::CastMessage::parse_from_bytes(proto_bytes)
        };

        let mut proto_msg = match parse_res {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(?err,
                               proto_len,
                               "frame failed to parse; discarding read buffer");
                src.clear();
                return Ok(None);
            },
        };

        src.advance(total_len);

        use cast_channel::cast_message::PayloadType;

        let msg = CastMessage {
            namespace: proto_msg.take_namespace().into(),
            source: proto_msg.take_source_id().into(),
            destination: proto_msg.take_destination_id().into(),
            payload: match proto_msg.payload_type() {
                PayloadType::STRING =>
                    CastMessagePayload::String(proto_msg.take_payload_utf8()),
                PayloadType::BINARY =>
                    CastMessagePayload::Binary(proto_msg.take_payload_binary()),
            },
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn sample(n: u32) -> CastMessage {
        CastMessage {
            namespace: "urn:x-cast:com.google.cast.receiver".into(),
            source: format!("sender-{n}").into(),
            destination: "receiver-0".into(),
            payload: CastMessagePayload::String(
                format!(r#"{{"type":"GET_STATUS","requestId":{n}}}"#)),
        }
    }

    fn drain(codec: &mut CastMessageCodec, buf: &mut BytesMut) -> Vec<CastMessage> {
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn round_trip() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        codec.encode(sample(1), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, sample(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_binary_payload() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        let msg = CastMessage {
            namespace: "urn:x-cast:com.google.cast.tp.deviceauth".into(),
            source: "sender-0".into(),
            destination: "receiver-0".into(),
            payload: CastMessagePayload::Binary(vec![0x08, 0x01, 0xff, 0x00]),
        };

        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        for n in 0..3 {
            codec.encode(sample(n), &mut buf).unwrap();
        }

        let decoded = drain(&mut codec, &mut buf);
        assert_eq!(decoded, vec![sample(0), sample(1), sample(2)]);
    }

    #[test]
    fn one_byte_at_a_time() {
        let mut codec = CastMessageCodec;

        let mut encoded = BytesMut::new();
        for n in 0..2 {
            codec.encode(sample(n), &mut encoded).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            buf.put_u8(*byte);
            decoded.extend(drain(&mut codec, &mut buf));
        }

        assert_eq!(decoded, vec![sample(0), sample(1)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_is_retained() {
        let mut codec = CastMessageCodec;

        let mut encoded = BytesMut::new();
        codec.encode(sample(7), &mut encoded).unwrap();

        let mut buf = BytesMut::new();
        let split = encoded.len() - 3;
        buf.extend_from_slice(&encoded[..split]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[split..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), sample(7));
    }

    #[test]
    fn oversized_frame_discards_buffer() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        buf.extend_from_slice(&[0xaa; 64]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        // Decoder stays usable for frames arriving after the flush boundary.
        codec.encode(sample(2), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), sample(2));
    }

    #[test]
    fn garbage_frame_discards_buffer() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        // Well-formed length prefix, un-parseable body.
        buf.put_u32(8);
        buf.extend_from_slice(&[0xff; 8]);
        codec.encode(sample(3), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn oversize_limit_applies_to_encode() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        let msg = CastMessage {
            namespace: "urn:x-cast:com.google.cast.media".into(),
            source: "sender-0".into(),
            destination: "receiver-0".into(),
            payload: CastMessagePayload::Binary(vec![0; MAX_FRAME_LEN + 1]),
        };

        assert!(matches!(codec.encode(msg, &mut buf), Err(Error::Write(_))));
    }
}
