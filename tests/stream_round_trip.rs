use std::time::{Duration, Instant};

use volstream::{
    CHUNK_FRAME_COUNT, FaultPolicy, FileBackend, FrameSource, Geometry, Header, HostFrames,
    MemBackend, PatternSource, PlaybackOpts, PlaybackSession, RecordSession, SlowBackend,
    back_and_forth, slot_for,
};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "volstream_{name}_{}_{}.vstr",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn header(chunks: u32) -> Header {
    Header {
        width: 4,
        height: 4,
        frame_count: chunks * CHUNK_FRAME_COUNT,
        ms_per_frame: 10,
    }
}

fn expected_frame(geom: &Geometry, frame: u32) -> Vec<u8> {
    let mut out = vec![0u8; geom.frame_size()];
    PatternSource::new(geom).render(frame, &mut out).unwrap();
    out
}

/// Record a pattern stream, play it back headless, and require every presented frame to
/// be pixel-exact for the logical frame the traversal maps it to.
fn round_trip(chunks: u32, steps: u64) {
    let h = header(chunks);
    let geom = Geometry::of(&h);
    let path = temp_path(&format!("round_trip_{chunks}"));
    {
        let mut rec = RecordSession::create(&path, h, FaultPolicy::default()).unwrap();
        rec.record(&mut PatternSource::new(&geom)).unwrap();
    }

    let (file, read_back) = volstream::store::open(&path).unwrap();
    assert_eq!(read_back, h);
    let gpu = HostFrames::new(geom).with_journal();
    let mut session =
        PlaybackSession::new(FileBackend::new(file), read_back, gpu, PlaybackOpts::default())
            .unwrap();

    for _ in 0..steps {
        session.step(Instant::now()).unwrap();
    }
    let gpu = session.close().unwrap();

    assert_eq!(gpu.presented().len() as u64, steps);
    for (t, presented) in gpu.presented().iter().enumerate() {
        let logical = back_and_forth(t as u64, h.frame_count - 1);
        assert_eq!(
            presented.pixels,
            expected_frame(&geom, logical),
            "presented frame {t} (logical {logical})"
        );
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn round_trip_two_chunk_stream() {
    // Two oscillation periods: every chunk boundary in both directions, twice.
    round_trip(2, 4 * (2 * CHUNK_FRAME_COUNT as u64 - 1));
}

#[test]
fn round_trip_five_chunk_stream() {
    round_trip(5, 4 * (5 * CHUNK_FRAME_COUNT as u64 - 1));
}

/// At every presented frame the displayed chunk is resident in its parity slot and the
/// other slot holds a traversal-adjacent chunk.
#[test]
fn resident_chunks_stay_adjacent() {
    let h = header(4);
    let geom = Geometry::of(&h);
    let path = temp_path("adjacent");
    {
        let mut rec = RecordSession::create(&path, h, FaultPolicy::default()).unwrap();
        rec.record(&mut PatternSource::new(&geom)).unwrap();
    }
    let (file, _) = volstream::store::open(&path).unwrap();
    let mut session = PlaybackSession::new(
        FileBackend::new(file),
        h,
        HostFrames::new(geom),
        PlaybackOpts::default(),
    )
    .unwrap();

    let pixels_per_frame = geom.width * geom.height;
    let chunk_in_slot = |gpu: &HostFrames, slot: usize| -> u32 {
        let first = u32::from_le_bytes(gpu.slot_bytes(slot)[..4].try_into().unwrap());
        (first / pixels_per_frame) / CHUNK_FRAME_COUNT
    };

    for t in 0..(6 * h.frame_count as u64) {
        let report = session.step(Instant::now()).unwrap();
        assert_eq!(report.slot, slot_for(report.chunk), "t={t}");
        let displayed = chunk_in_slot(session.gpu(), report.slot);
        let other = chunk_in_slot(session.gpu(), report.slot ^ 1);
        assert_eq!(displayed, report.chunk, "t={t}");
        assert_eq!(displayed.abs_diff(other), 1, "t={t}");
    }
    let _ = std::fs::remove_file(&path);
}

/// Non-crossing steps stay within the frame period even when every read takes longer
/// than a whole frame; only boundary crossings are allowed to stall.
#[test]
fn slow_disk_stalls_only_at_chunk_crossings() {
    let h = Header {
        ms_per_frame: 30,
        ..header(3)
    };
    let geom = Geometry::of(&h);
    let mut data = vec![0u8; volstream::HEADER_SIZE as usize];
    for frame in 0..h.frame_count {
        let mut buf = vec![0u8; geom.frame_size()];
        PatternSource::new(&geom).render(frame, &mut buf).unwrap();
        data.extend_from_slice(&buf);
    }
    let backend = SlowBackend {
        inner: MemBackend::new(data),
        latency: Duration::from_millis(40),
    };
    let mut session = PlaybackSession::new(
        backend,
        h,
        HostFrames::new(geom),
        PlaybackOpts::default(),
    )
    .unwrap();

    for _ in 0..(4 * h.frame_count as u64) {
        let before = Instant::now();
        let report = session.step(before).unwrap();
        let elapsed = before.elapsed();
        if !report.crossed {
            assert!(
                elapsed < Duration::from_millis(28),
                "frame {} took {elapsed:?}",
                report.presented_frame
            );
        }
    }
}

/// A store missing its final chunk plays through under the sentinel policy: damaged
/// frames come back flooded with the sentinel byte, intact frames stay pixel-exact.
#[test]
fn truncated_store_plays_with_sentinel_frames() {
    let h = header(3);
    let geom = Geometry::of(&h);
    let mut data = vec![0u8; volstream::HEADER_SIZE as usize];
    for frame in 0..h.frame_count {
        let mut buf = vec![0u8; geom.frame_size()];
        PatternSource::new(&geom).render(frame, &mut buf).unwrap();
        data.extend_from_slice(&buf);
    }
    data.truncate(data.len() - geom.chunk_size() / 2);

    let opts = PlaybackOpts {
        fault_policy: FaultPolicy::SentinelFill(0xAB),
    };
    let mut session = PlaybackSession::new(
        MemBackend::new(data),
        h,
        HostFrames::new(geom).with_journal(),
        opts,
    )
    .unwrap();

    // One full oscillation period covers the damaged chunk on both legs.
    for _ in 0..(2 * (h.frame_count as u64 - 1)) {
        session.step(Instant::now()).unwrap();
    }
    let gpu = session.close().unwrap();

    let damaged_chunk = geom.chunk_count() - 1;
    for (t, presented) in gpu.presented().iter().enumerate() {
        let logical = back_and_forth(t as u64, h.frame_count - 1);
        if logical / CHUNK_FRAME_COUNT == damaged_chunk {
            assert!(
                presented.pixels.iter().all(|&b| b == 0xAB),
                "presented frame {t} (logical {logical}) should be sentinel"
            );
        } else {
            assert_eq!(
                presented.pixels,
                expected_frame(&geom, logical),
                "presented frame {t} (logical {logical})"
            );
        }
    }
}
