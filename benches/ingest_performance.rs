use chrono::{Local, TimeZone};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use racebox::telemetry::{FrameDecoder, RaceMode, parse_packet};
use racebox::{EngineConfig, TelemetryEngine};
use std::time::Duration;

fn create_capture(packets: usize) -> Vec<u8> {
    let mut capture = String::new();
    for i in 0..packets {
        let lat = 45.0 + i as f64 * 0.00001;
        capture.push_str(&format!(
            "$RC,1,9,{:.8},9.00000000,{:.2},120.5,{:.2},1.5,-0.5,0.12,-0.34\n",
            lat,
            80.0 + (i % 20) as f64,
            (i % 360) as f64
        ));
        if i % 25 == 0 {
            capture.push_str("$HB,87,0,1,9\n");
        }
    }
    capture.push('$');
    capture.into_bytes()
}

fn bench_frame_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoder");
    let capture = create_capture(1000);

    group.bench_function("decode_whole_buffer", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            black_box(decoder.feed(&capture).count())
        });
    });

    group.bench_function("decode_in_64_byte_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut frames = 0;
            for chunk in capture.chunks(64) {
                frames += decoder.feed(chunk).count();
            }
            black_box(frames)
        });
    });

    group.finish();
}

fn bench_packet_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_parser");
    let packet = "$RC,1,9,45.12345678,9.12345678,87.25,120.5,182.4,1.5,-0.5,0.12,-0.34";

    group.bench_function("parse_position_packet", |b| {
        b.iter(|| black_box(parse_packet(black_box(packet), RaceMode::Active)));
    });

    group.bench_function("parse_gated_position_packet", |b| {
        b.iter(|| black_box(parse_packet(black_box(packet), RaceMode::Inactive)));
    });

    group.finish();
}

fn bench_engine_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let capture = create_capture(1000);
    let records_dir = std::env::temp_dir().join("racebox-bench");

    group.bench_function("process_1000_packets", |b| {
        b.iter(|| {
            let mut engine = TelemetryEngine::new(EngineConfig::new(records_dir.clone()));
            engine
                .set_race_mode(true, &mut Vec::<String>::new())
                .expect("Vec sink never fails");
            let mut outputs = 0;
            for (i, chunk) in capture.chunks(64).enumerate() {
                let now = Local
                    .timestamp_millis_opt(1_700_000_000_000 + i as i64 * 30)
                    .unwrap();
                outputs += engine.process(chunk, now).len();
            }
            black_box(outputs)
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets = bench_frame_decoding, bench_packet_parsing, bench_engine_processing
}
criterion_main!(benches);
