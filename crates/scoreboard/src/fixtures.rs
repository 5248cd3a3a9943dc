//! Canonical multi-modal probe inputs (spec §6): tiny inline byte blobs the
//! prober attaches to `Request::Doc` when probing input modalities, plus
//! the matching canonical questions/answers (spec §4.8.b) used to judge
//! whether the provider actually "saw" the attachment.

use genai_core::Modality;

/// One modality's probe fixture: the MIME type to attach, its bytes, a
/// stand-in URL form (the live prober would publish the same bytes and use
/// this URL; the smoke-test doubles never dereference it), the prompt to
/// send alongside it, and the regex the textual answer must match.
pub struct ModalFixture {
    pub modality: Modality,
    pub mime_type: &'static str,
    pub inline_bytes: &'static [u8],
    pub url: &'static str,
    pub prompt: &'static str,
    pub answer_pattern: &'static str,
}

/// The fixed probe matrix (spec §4.8.b): one canonical fixture per input
/// modality, inlined here rather than loaded from an on-disk fixture tree.
pub fn matrix() -> Vec<ModalFixture> {
    vec![
        ModalFixture {
            modality: Modality::Image,
            mime_type: "image/jpeg",
            inline_bytes: b"\xFF\xD8\xFF\xE0-fixture-banana.jpg",
            url: "https://fixtures.genai.test/image.jpg",
            prompt: "Is it a banana? Reply with one word.",
            answer_pattern: r"(?i)\byes\b|\bbanana\b",
        },
        ModalFixture {
            modality: Modality::Document,
            mime_type: "application/pdf",
            inline_bytes: b"%PDF-1.4-fixture-orange",
            url: "https://fixtures.genai.test/document.pdf",
            prompt: "What fruit is named in this document? Reply with one word.",
            answer_pattern: r"(?i)\borange\b",
        },
        ModalFixture {
            modality: Modality::Audio,
            mime_type: "audio/mpeg",
            inline_bytes: b"ID3-fixture-orange",
            url: "https://fixtures.genai.test/audio.mp3",
            prompt: "What fruit is named in this recording? Reply with one word.",
            answer_pattern: r"(?i)\borange\b",
        },
        ModalFixture {
            modality: Modality::Video,
            mime_type: "video/mp4",
            inline_bytes: b"\x00\x00\x00\x18ftyp-fixture-banana",
            url: "https://fixtures.genai.test/video.mp4",
            prompt: "What fruit appears in this clip? Reply with one word.",
            answer_pattern: r"(?i)\bbanana\b",
        },
    ]
}
