//! Property-based tests for chunk planning and the frame codec.

use proptest::prelude::*;

use crate::chunk::ChunkPlan;
use crate::protocol::{Command, MAX_CHUNK_SIZE};
use crate::wire::{
    decode_chunk_ack, decode_command, decode_locator, decode_select_response, encode_data_chunk,
    encode_locator_response, encode_status,
};

proptest! {
    /// total = ceil(L / C); lengths sum to L; only the last chunk may be short, and never empty.
    #[test]
    fn plan_covers_payload(len in 0usize..60_000, chunk_size in 1usize..=MAX_CHUNK_SIZE) {
        let plan = ChunkPlan::new(len, chunk_size).unwrap();
        prop_assert_eq!(plan.total() as usize, len.div_ceil(chunk_size));
        prop_assert_eq!(plan.total() == 0, len == 0);

        let spans: Vec<_> = plan.iter().collect();
        prop_assert_eq!(spans.len(), plan.total() as usize);
        prop_assert_eq!(spans.iter().map(|s| s.len).sum::<usize>(), len);

        let mut expected_offset = 0;
        for (i, span) in spans.iter().enumerate() {
            prop_assert_eq!(span.seq as usize, i);
            prop_assert_eq!(span.offset, expected_offset);
            if i + 1 < spans.len() {
                prop_assert_eq!(span.len, chunk_size);
            } else {
                prop_assert!(span.len >= 1 && span.len <= chunk_size);
            }
            expected_offset += span.len;
        }
    }

    /// An exact multiple never yields a trailing empty chunk.
    #[test]
    fn exact_multiple_last_chunk_full(
        chunks in 1usize..2000,
        chunk_size in 1usize..=MAX_CHUNK_SIZE,
    ) {
        let plan = ChunkPlan::new(chunks * chunk_size, chunk_size).unwrap();
        prop_assert_eq!(plan.total() as usize, chunks);
        let last = plan.iter().last().unwrap();
        prop_assert_eq!(last.len, chunk_size);
    }

    #[test]
    fn data_command_roundtrip(
        seq in any::<u16>(),
        total in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..=MAX_CHUNK_SIZE),
    ) {
        let frame = encode_data_chunk(seq, total, &payload).unwrap();
        let decoded = decode_command(frame.as_bytes()).unwrap();
        prop_assert_eq!(decoded, Command::Data { seq, total, payload });
    }

    #[test]
    fn locator_roundtrip(locator in "[ -~]{0,200}") {
        let decoded = decode_locator(&encode_locator_response(&locator)).unwrap();
        prop_assert_eq!(decoded.as_str(), locator.as_str());
    }

    #[test]
    fn ack_status(status in any::<u8>()) {
        prop_assert_eq!(decode_chunk_ack(&encode_status(status)).is_ok(), status == 0);
    }

    #[test]
    fn select_requires_trailing_status_word(
        body in prop::collection::vec(any::<u8>(), 0..64),
        sw1 in any::<u8>(),
        sw2 in any::<u8>(),
    ) {
        let mut response = body;
        response.push(sw1);
        response.push(sw2);
        prop_assert_eq!(decode_select_response(&response).is_ok(), sw1 == 0x90 && sw2 == 0x00);
    }
}
