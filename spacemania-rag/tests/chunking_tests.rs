//! Property tests for the chunker.

use spacemania_rag::Chunker;
use proptest::prelude::*;

/// Text with words, sentence and paragraph breaks, and multi-byte characters.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            4 => "[a-z]{1,12}",
            2 => Just(" ".to_string()),
            1 => Just(". ".to_string()),
            1 => Just("\n".to_string()),
            1 => Just("\n\n".to_string()),
            1 => "[αβγ日本語🚀]{1,4}",
        ],
        0..120,
    )
    .prop_map(|parts| parts.concat())
}

/// Chunker parameters with `overlap < max`.
fn arb_params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..60).prop_flat_map(|max| (Just(max), 0..max))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Dropping each chunk's overlap with its predecessor and concatenating
    /// reconstructs the input exactly.
    #[test]
    fn chunks_cover_the_text_exactly(text in arb_text(), (max, overlap) in arb_params()) {
        let chunks = Chunker::new(max, overlap).unwrap().split(&text);

        let mut rebuilt = String::new();
        let mut previous_end = 0;
        for chunk in &chunks {
            prop_assert!(chunk.start <= previous_end);
            prop_assert!(chunk.end > previous_end);
            rebuilt.push_str(&text[previous_end..chunk.end]);
            previous_end = chunk.end;
        }
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunks_respect_size_and_overlap_bounds(text in arb_text(), (max, overlap) in arb_params()) {
        let chunks = Chunker::new(max, overlap).unwrap().split(&text);

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, i);
            prop_assert!(!chunk.text.is_empty());
            prop_assert!(chunk.char_len() <= max);
            prop_assert_eq!(&text[chunk.start..chunk.end], chunk.text.as_str());
        }
        for pair in chunks.windows(2) {
            let shared = text[pair[1].start..pair[0].end].chars().count();
            prop_assert!(shared <= overlap, "overlap {} exceeds {}", shared, overlap);
            prop_assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn chunking_is_deterministic(text in arb_text(), (max, overlap) in arb_params()) {
        let chunker = Chunker::new(max, overlap).unwrap();
        prop_assert_eq!(chunker.split(&text), chunker.split(&text));
    }
}
