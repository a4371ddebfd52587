mod common;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use xrit::product::Compression;
use xrit::{
    Decompressor, Demultiplexer, DemuxConfig, DirectoryRouter, Error, HeaderParser, ProductHeader,
    SequenceFlag,
};

use common::{
    fill_packet, first_user_data, frames_from_packets, packet, HeaderBuilder, RecordingRouter,
    PAYLOAD_LEN,
};

/// Parser for products whose first packet is too short for a real header.
struct TextHeader;

impl HeaderParser for TextHeader {
    fn parse(&self, _: &[u8]) -> xrit::Result<ProductHeader> {
        ProductHeader::decode(&HeaderBuilder::new(2).build(0))
    }
}

/// Decompressor producing a full line of 0xab for each packet.
struct MarkerCodec;

impl Decompressor for MarkerCodec {
    fn decompress(&self, _: &[u8], columns: usize, _: u8, _: u16) -> xrit::Result<Vec<u8>> {
        Ok(vec![0xab; columns])
    }
}

fn image_header(product_id: u16, subproduct_id: u16, name: &str) -> Vec<u8> {
    HeaderBuilder::new(0)
        .image_structure(8, 10, 0)
        .annotation(name)
        .noaa(product_id, subproduct_id, 0)
        .build(80)
}

fn process_all(demux: &Demultiplexer, frames: &[Vec<u8>]) {
    for frame in frames {
        demux.process_frame(frame).unwrap();
    }
}

#[test]
fn test_single_packet_product_over_three_frames() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .parser(Arc::new(TextHeader))
            .router(Arc::new(router.clone()))
            .build(),
    );

    let body: Vec<u8> = (1..=10).collect();
    let user = first_user_data(7, &body);
    assert_eq!(user.len(), 20);
    let frames = frames_from_packets(
        3,
        10,
        &[
            fill_packet(PAYLOAD_LEN + PAYLOAD_LEN - 8),
            packet(100, SequenceFlag::Single, 0, &user),
        ],
    );
    assert_eq!(frames.len(), 3);

    process_all(&demux, &frames);

    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 1, "router must be called exactly once");
    assert_eq!(delivered[0].1, body);
    let stats = demux.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.packets, 1);
    assert_eq!(stats.frame_loss, 0);
    assert_eq!(stats.crc_fails, 0);
}

#[test]
fn test_multi_packet_image_product() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header = image_header(16, 2, "OR_ABI-L2-CMIPF-M6C02_G16_s2019.lrit");
    let first = first_user_data(1, &header);
    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::First, 10, &first),
            packet(300, SequenceFlag::Continuation, 11, &[1u8; 500]),
            packet(300, SequenceFlag::Last, 12, &[2u8; 700]),
        ],
    );

    process_all(&demux, &frames);

    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 1);
    let (_, dat, got) = &delivered[0];
    assert_eq!(dat.len(), header.len() + 1200);
    assert_eq!(dat[..header.len()], header[..]);
    assert_eq!(got.product_id(), Some(16));
    assert_eq!(demux.stats().products.get(&16), Some(&1));
    assert_eq!(demux.channel_stats(5).unwrap().products.get(&16), Some(&1));
}

#[test]
fn test_restarted_product_forces_delivery() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header_a = image_header(16, 2, "a.lrit");
    let header_b = image_header(16, 13, "b.lrit");
    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::First, 1, &first_user_data(1, &header_a)),
            packet(300, SequenceFlag::Continuation, 2, &[1u8; 100]),
            packet(300, SequenceFlag::First, 3, &first_user_data(2, &header_b)),
            packet(300, SequenceFlag::Last, 4, &[2u8; 100]),
        ],
    );

    process_all(&demux, &frames);

    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].2.filename().as_deref(), Some("a.lrit"));
    assert_eq!(delivered[0].1.len(), header_a.len() + 100);
    assert_eq!(delivered[1].2.filename().as_deref(), Some("b.lrit"));
    assert_eq!(delivered[1].1.len(), header_b.len() + 100);
}

#[test]
fn test_expired_product_is_force_delivered() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .product_timeout(Duration::ZERO)
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header = image_header(16, 2, "a.lrit");
    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::First, 1, &first_user_data(1, &header)),
            packet(300, SequenceFlag::Continuation, 2, &[1u8; 100]),
        ],
    );
    process_all(&demux, &frames);
    assert!(router.deliveries().is_empty());

    thread::sleep(Duration::from_millis(5));
    let expired = demux.flush_expired();

    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].apid, 300);
    assert_eq!(expired[0].product_id, Some(16));
    assert!(expired[0].forced);
    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, expired[0].path);
    assert_eq!(delivered[0].1.len(), header.len() + 100);
    assert_eq!(demux.stats().products.get(&16), Some(&1));

    assert!(demux.flush_expired().is_empty());
    assert_eq!(router.deliveries().len(), 1);
}

#[test]
fn test_open_product_is_not_expired_early() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header = image_header(16, 2, "a.lrit");
    let frames = frames_from_packets(
        5,
        0,
        &[packet(300, SequenceFlag::First, 1, &first_user_data(1, &header))],
    );
    process_all(&demux, &frames);

    assert!(demux.flush_expired().is_empty());
    assert!(router.deliveries().is_empty());
}

#[test]
fn test_orphan_packets_are_dropped() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::Continuation, 2, &[1u8; 100]),
            packet(300, SequenceFlag::Last, 3, &[2u8; 100]),
        ],
    );

    process_all(&demux, &frames);

    assert!(router.deliveries().is_empty());
    assert_eq!(demux.stats().packets, 2);
}

#[test]
fn test_unparsable_header_drops_product() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let frames = frames_from_packets(
        5,
        0,
        &[packet(300, SequenceFlag::Single, 0, &first_user_data(1, &[0xff; 40]))],
    );

    process_all(&demux, &frames);

    assert!(router.deliveries().is_empty());
}

#[test]
fn test_rice_gap_fill() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .decompressor(Arc::new(MarkerCodec))
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header = HeaderBuilder::new(0)
        .image_structure(8, 10, 1)
        .noaa(16, 2, 1)
        .rice(49, 16, 1)
        .build(80);
    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::First, 0, &first_user_data(1, &header)),
            packet(300, SequenceFlag::Continuation, 1, &[9u8; 5]),
            // sequence 2 lost
            packet(300, SequenceFlag::Continuation, 3, &[9u8; 5]),
            packet(300, SequenceFlag::Last, 4, &[9u8; 5]),
        ],
    );

    process_all(&demux, &frames);

    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].2.compression(), Compression::Rice);
    let dat = &delivered[0].1[header.len()..];
    let mut expected = vec![0xab; 8];
    expected.extend_from_slice(&[0; 8]);
    expected.extend_from_slice(&[0xab; 16]);
    assert_eq!(dat, expected.as_slice());
}

#[test]
fn test_rice_without_codec_zero_fills() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    );

    let header = HeaderBuilder::new(0)
        .image_structure(8, 10, 1)
        .noaa(16, 2, 1)
        .build(80);
    let frames = frames_from_packets(
        5,
        0,
        &[
            packet(300, SequenceFlag::First, 0, &first_user_data(1, &header)),
            packet(300, SequenceFlag::Last, 1, &[9u8; 5]),
        ],
    );

    process_all(&demux, &frames);

    let delivered = router.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1[header.len()..], [0u8; 8]);
}

#[test]
fn test_directory_router_files_products() {
    let tmpdir = tempfile::tempdir().unwrap();
    let output = tmpdir.path().join("output");
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path().join("tmp"))
            .router(Arc::new(DirectoryRouter::new(&output)))
            .build(),
    );

    let header = image_header(16, 2, "segment.lrit");
    let frames = frames_from_packets(
        5,
        0,
        &[packet(300, SequenceFlag::Single, 0, &first_user_data(1, &header))],
    );

    process_all(&demux, &frames);

    let filed = output.join("Images/FM1/segment.lrit");
    assert!(filed.exists(), "{filed:?} not found");
    assert_eq!(std::fs::read(&filed).unwrap(), header);
}

#[test]
fn test_invalid_frame_size() {
    let tmpdir = tempfile::tempdir().unwrap();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(RecordingRouter::default()))
            .build(),
    );

    let zult = demux.process_frame(&[0u8; 100]);

    assert!(matches!(
        zult,
        Err(Error::InvalidFrameSize {
            actual: 100,
            expected: 892
        })
    ));
    assert_eq!(demux.stats().frames, 0);
}

#[test]
fn test_capture_writes_raw_frames() {
    let tmpdir = tempfile::tempdir().unwrap();
    let demux = Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(|_: &Path, _: &ProductHeader| {}))
            .build(),
    );
    let frames = frames_from_packets(5, 0, &[packet(300, SequenceFlag::Continuation, 2, &[1u8; 2000])]);

    let path = demux.start_capture(tmpdir.path().join("capture")).unwrap();
    process_all(&demux, &frames);
    assert_eq!(demux.stop_capture(), Some(path.clone()));

    let captured = std::fs::read(path).unwrap();
    assert_eq!(captured, frames.concat());
}

#[test]
fn test_channels_processed_concurrently() {
    let tmpdir = tempfile::tempdir().unwrap();
    let router = RecordingRouter::default();
    let demux = Arc::new(Demultiplexer::new(
        DemuxConfig::builder()
            .temp_dir(tmpdir.path())
            .router(Arc::new(router.clone()))
            .build(),
    ));

    let handles: Vec<_> = [2u8, 3, 4]
        .into_iter()
        .map(|vcid| {
            let demux = demux.clone();
            thread::spawn(move || {
                let packets: Vec<Vec<u8>> = (0..20)
                    .map(|i| {
                        let name = format!("v{vcid}-{i}.lrit");
                        packet(
                            100 + u16::from(vcid),
                            SequenceFlag::Single,
                            i,
                            &first_user_data(i, &image_header(16, 2, &name)),
                        )
                    })
                    .collect();
                for frame in frames_from_packets(vcid, 0, &packets) {
                    demux.process_frame(&frame).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(demux.vcids(), vec![2, 3, 4]);
    assert_eq!(router.deliveries().len(), 60);
    let stats = demux.stats();
    assert_eq!(stats.packets, 60);
    assert_eq!(stats.products.get(&16), Some(&60));
    for vcid in [2, 3, 4] {
        assert_eq!(demux.channel_stats(vcid).unwrap().packets, 20);
    }
}
