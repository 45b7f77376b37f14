use refract_protocol::{ChunkKind, ResourceId, LOG_MAGIC, SERIALISE_VERSION};
use refract_trace::{AppInitParams, ChunkReader, ChunkWriter, LogHeader, Thumbnail, TraceError};

fn header() -> LogHeader {
    LogHeader {
        params: AppInitParams {
            app_name: "triangle".into(),
            engine_name: "demo-engine".into(),
            app_version: 1,
            engine_version: 2,
            api_version: 0x0040_0000,
            layers: vec!["overlay".into()],
            extensions: vec!["surface".into(), "swapchain".into()],
            instance_id: ResourceId::from_raw(7),
        },
        thumbnail: Some(Thumbnail {
            width: 16,
            height: 16,
            jpeg: vec![0xff, 0xd8, 0xff, 0xd9],
        }),
    }
}

fn write_log(header: &LogHeader, chunks: impl FnOnce(&mut ChunkWriter)) -> Vec<u8> {
    let mut w = ChunkWriter::new(false);
    chunks(&mut w);
    let mut bytes = Vec::new();
    header.encode_into(&mut bytes);
    for chunk in w.take_chunks() {
        chunk.encode_into(&mut bytes);
    }
    bytes
}

#[test]
fn header_round_trips() {
    let bytes = write_log(&header(), |_| {});
    let reader = ChunkReader::from_bytes(bytes).unwrap();
    assert_eq!(*reader.header(), header());
    assert!(reader.at_end());
}

#[test]
fn flush_to_disk_produces_a_readable_log() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frame0.rfrc");

    let mut w = ChunkWriter::new(false);
    w.begin_chunk(ChunkKind::DeviceInit);
    w.write_str("appName", "triangle");
    let chunk = w.end_chunk(ChunkKind::DeviceInit).unwrap();
    w.insert(chunk);
    w.flush_to_disk(&path, &header())?;

    let mut r = ChunkReader::open(&path)?;
    assert_eq!(r.header().params.app_name, "triangle");
    let kind = r.begin_chunk()?;
    assert_eq!(kind, ChunkKind::DeviceInit as u32);
    assert_eq!(r.read_str("appName")?, "triangle");
    r.end_chunk(kind)?;
    assert!(r.at_end());
    Ok(())
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = write_log(&header(), |_| {});
    bytes[0] = b'X';
    assert!(matches!(
        ChunkReader::from_bytes(bytes),
        Err(TraceError::InvalidMagic)
    ));
}

#[test]
fn version_mismatch_is_rejected_deterministically() {
    let mut bytes = write_log(&header(), |_| {});
    let bogus = SERIALISE_VERSION + 1;
    bytes[LOG_MAGIC.len()..LOG_MAGIC.len() + 4].copy_from_slice(&bogus.to_le_bytes());
    match ChunkReader::from_bytes(bytes) {
        Err(TraceError::IncompatibleVersion { expected, got }) => {
            assert_eq!(expected, SERIALISE_VERSION);
            assert_eq!(got, bogus);
        }
        other => panic!("expected IncompatibleVersion, got {other:?}"),
    }
}

#[test]
fn oversized_header_string_is_rejected() {
    let bytes = write_log(&header(), |_| {});
    // Patch the app-name length to a huge value; the reader must refuse to
    // allocate rather than trusting it.
    let mut patched = bytes.clone();
    let name_len_at = LOG_MAGIC.len() + 4;
    patched[name_len_at..name_len_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        ChunkReader::from_bytes(patched),
        Err(TraceError::Corrupt(_))
    ));
}

#[test]
fn truncated_header_is_corrupt() {
    let bytes = write_log(&header(), |_| {});
    for cut in [1, 8, 12, bytes.len() - 1] {
        let truncated = bytes[..cut].to_vec();
        assert!(
            matches!(
                ChunkReader::from_bytes(truncated),
                Err(TraceError::Corrupt(_)) | Err(TraceError::InvalidMagic)
            ),
            "cut at {cut} must not parse"
        );
    }
}

#[test]
fn unknown_kind_values_surface_raw() {
    // A kind value in the reserved system space below FIRST_CHUNK_ID is not
    // a reader error; the policy decision belongs to the replay loop.
    let mut bytes = write_log(&header(), |_| {});
    let raw_kind = 17u32;
    bytes.extend_from_slice(&raw_kind.to_le_bytes());
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(&0xabcd_1234u32.to_le_bytes());

    let mut r = ChunkReader::from_bytes(bytes).unwrap();
    let kind = r.begin_chunk().unwrap();
    assert_eq!(kind, raw_kind);
    assert!(ChunkKind::from_u32(kind).is_none());
    r.skip_current_chunk();
    r.end_chunk(kind).unwrap();
    assert!(r.at_end());
}

#[test]
fn set_offset_rejects_out_of_bounds_seeks() {
    let bytes = write_log(&header(), |_| {});
    let len = bytes.len() as u64;
    let mut r = ChunkReader::from_bytes(bytes).unwrap();
    assert!(r.set_offset(len).is_ok());
    assert!(r.set_offset(len + 1).is_err());
}

#[test]
fn persistent_block_marks_the_replay_window() {
    let bytes = write_log(&header(), |w| {
        w.begin_chunk(ChunkKind::CaptureScope);
        w.write_u32("frame", 0);
        let chunk = w.end_chunk(ChunkKind::CaptureScope).unwrap();
        w.insert(chunk);
    });

    let mut r = ChunkReader::from_bytes(bytes).unwrap();
    assert_eq!(r.persistent_block(), None);
    let at = r.skip_to_chunk(ChunkKind::CaptureScope).unwrap().unwrap();
    r.set_persistent_block(at);
    assert_eq!(r.persistent_block(), Some(at));
}
