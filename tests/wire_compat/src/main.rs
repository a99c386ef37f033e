fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use sliceup_protocol::messages::{
        CreateSessionRequest, SliceAck, SliceUploadHeader, UploadOutcome,
    };
    use sliceup_protocol::{FileMeta, Message, MessageType, SessionStatus, StorageMode};

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
        let text = fs::read_to_string(fixtures_dir().join(name)).unwrap();
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  ours:    {reserialized}"
        );
        parsed
    }

    // --- Session documents ---

    #[test]
    fn legacy_meta_document_loads() {
        let fixture = load_fixture("legacy_meta.json");
        let meta: FileMeta = serde_json::from_value(fixture.clone()).unwrap();

        assert_eq!(meta.storage, StorageMode::Discrete);
        assert_eq!(meta.status, SessionStatus::Incomplete);
        assert_eq!(meta.prefix, "videos");
        assert_eq!(meta.slice_count(), 4);
        assert_eq!(
            meta.slice_count(),
            sliceup_transfer::slice_count(meta.file_size, meta.chunk_size)
        );
        assert_eq!(meta.pending_indices(), vec![1, 3]);
        assert_eq!(meta.uploaded_count(), 2);

        // Rewriting adds only the storage field.
        let mut out = serde_json::to_value(&meta).unwrap();
        let storage = out.as_object_mut().unwrap().remove("storage");
        assert_eq!(storage, Some(serde_json::json!("discrete")));
        assert_eq!(out, fixture);
    }

    #[test]
    fn session_meta_document_roundtrips() {
        let meta: FileMeta = roundtrip_test("session_meta.json");
        assert_eq!(meta.storage, StorageMode::Sparse);
        assert!(meta.is_complete());
        assert_eq!(meta.status, SessionStatus::Complete);
    }

    #[test]
    fn slice_keys_match_slice_ids() {
        for name in ["legacy_meta.json", "session_meta.json"] {
            let meta: FileMeta = serde_json::from_value(load_fixture(name)).unwrap();
            for (key, slice) in &meta.slices {
                assert_eq!(key, &slice.id, "{name}");
            }
        }
    }

    #[test]
    fn slice_status_must_be_zero_or_one() {
        let mut fixture = load_fixture("legacy_meta.json");
        fixture["slices"]["1"]["status"] = serde_json::json!(2);
        assert!(serde_json::from_value::<FileMeta>(fixture).is_err());
    }

    // --- Requests and replies ---

    #[test]
    fn create_session_request_roundtrips() {
        let req: CreateSessionRequest = roundtrip_test("create_session_request.json");
        assert!(req.storage.is_none());
    }

    #[test]
    fn slice_upload_header_roundtrips() {
        let header: SliceUploadHeader = roundtrip_test("slice_upload_header.json");
        assert_eq!(header.slice_id, "3");
    }

    #[test]
    fn slice_ack_roundtrips() {
        let ack: SliceAck = roundtrip_test("slice_ack.json");
        assert_eq!(ack.outcome, UploadOutcome::Complete);
        assert_eq!(ack.outcome.code(), 200);
    }

    #[test]
    fn message_envelope_roundtrips() {
        let msg: Message = roundtrip_test("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::SliceAck);
        assert!(!msg.is_error());

        let ack: SliceAck = msg.parse_data().unwrap().unwrap();
        assert_eq!(UploadOutcome::from_code(msg.code), Some(ack.outcome));
    }

    #[test]
    fn error_envelope_roundtrips() {
        let msg: Message = roundtrip_test("error_envelope.json");
        assert!(msg.is_error());
        assert!(msg.data.is_none());
        assert_eq!(msg.code, 422);
    }
}
