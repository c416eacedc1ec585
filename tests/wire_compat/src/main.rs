fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use fileflow_protocol::{CapabilityDescriptor, Message};
    use fileflow_signaling::{DescriptionKind, SessionDescription};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key order does not matter).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    fn message(name: &str) -> Message {
        roundtrip_test::<Message>(name)
    }

    // --- Channel messages ---

    #[test]
    fn fixture_capability() {
        let Message::Capability(caps) = message("capability.json") else {
            panic!("expected capability");
        };
        assert_eq!(caps, CapabilityDescriptor::high_speed());
    }

    #[test]
    fn fixture_capability_without_checksum_field() {
        let Message::Capability(caps) = message("capability_standard.json") else {
            panic!("expected capability");
        };
        assert_eq!(caps, CapabilityDescriptor::standard());
        assert!(!caps.checksum);
    }

    #[test]
    fn fixture_file_info() {
        let msg = message("file_info.json");
        assert_eq!(msg.kind(), "file-info");
        let Message::FileInfo(info) = msg else {
            panic!("expected file-info");
        };
        assert_eq!(info.file_size, 2_621_440);
        assert_eq!(info.mime_type, "image/jpeg");
    }

    #[test]
    fn fixture_ready() {
        let Message::Ready(ready) = message("ready.json") else {
            panic!("expected ready");
        };
        assert!(!ready.high_speed);
    }

    #[test]
    fn fixture_chunk() {
        let Message::Chunk(chunk) = message("chunk.json") else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.payload, vec![0, 1, 2, 3]);
        assert_eq!((chunk.index, chunk.total_chunks), (2, 3));
        assert_eq!(chunk.checksum, None);
    }

    #[test]
    fn fixture_chunk_checksum_matches_payload() {
        let Message::Chunk(chunk) = message("chunk_checksum.json") else {
            panic!("expected chunk");
        };
        assert_eq!(
            chunk.checksum.as_deref(),
            Some(fileflow_transfer::checksum_bytes(&chunk.payload).as_str())
        );
    }

    #[test]
    fn fixture_ack() {
        let Message::Ack(ack) = message("ack.json") else {
            panic!("expected ack");
        };
        assert_eq!(ack.bytes_acked, 2 * 1024 * 1024);
    }

    #[test]
    fn fixture_cancel() {
        let msg = message("cancel.json");
        assert_eq!(msg, Message::cancel("3f0c9a52-6c1e-4d7b-9d6e-0a5b2f3e8c11"));
    }

    #[test]
    fn fixture_errors() {
        let msg = message("error_transfer.json");
        assert_eq!(msg.transfer_id(), Some("3f0c9a52-6c1e-4d7b-9d6e-0a5b2f3e8c11"));

        let msg = message("error_session.json");
        assert_eq!(msg.transfer_id(), None);
        assert_eq!(
            msg,
            Message::error(None, "capabilities required before file-info")
        );
    }

    #[test]
    fn every_message_tag_has_a_fixture() {
        let tags: Vec<&str> = [
            "capability.json",
            "file_info.json",
            "ready.json",
            "chunk.json",
            "ack.json",
            "cancel.json",
            "error_session.json",
        ]
        .into_iter()
        .map(|name| message(name).kind())
        .collect();
        assert_eq!(
            tags,
            ["capability", "file-info", "ready", "chunk", "ack", "cancel", "error"]
        );
    }

    // --- Signaling descriptions ---

    #[test]
    fn fixture_offer_description() {
        let offer = roundtrip_test::<SessionDescription>("description_offer.json");
        assert_eq!(offer.kind, DescriptionKind::Offer);
        assert_eq!(offer.candidates.len(), 2);
        assert_eq!(offer.candidates[0].addr().to_string(), "192.168.1.20:47123");

        let blob = offer.to_blob().unwrap();
        let parsed = SessionDescription::from_blob_expecting(&blob, DescriptionKind::Offer).unwrap();
        assert_eq!(parsed, offer);
    }

    #[test]
    fn fixture_answer_description() {
        let answer = roundtrip_test::<SessionDescription>("description_answer.json");
        assert_eq!(answer.kind, DescriptionKind::Answer);
        assert!(!answer.gathering_complete);
        assert_eq!(answer.device_name, None);

        let blob = answer.to_blob().unwrap();
        assert!(SessionDescription::from_blob_expecting(&blob, DescriptionKind::Offer).is_err());
        assert_eq!(SessionDescription::from_blob(&blob).unwrap(), answer);
    }
}
