use criterion::{black_box, criterion_group, criterion_main, Criterion};

use localgen_decoder::config::{DecoderConfig, LivenessConfig};
use localgen_decoder::decode::{
    classify, extract, recover_body, remove_json_artifacts, split, ExtractContext,
};
use localgen_decoder::stream::{RequestMeta, StreamDecoder};

fn ndjson_body(lines: usize) -> String {
    let mut body = String::with_capacity(lines * 96);
    for idx in 0..lines {
        body.push_str(&format!(
            "{{\"model\":\"llama3\",\"created_at\":\"2024-05-01T10:00:00Z\",\"response\":\"token {idx} \",\"done\":false}}\n"
        ));
    }
    body.push_str("{\"model\":\"llama3\",\"response\":\"\",\"done\":true,\"eval_count\":256}\n");
    body
}

fn concatenated_body(objects: usize) -> String {
    let mut body = String::with_capacity(objects * 80);
    for idx in 0..objects {
        body.push_str(&format!(
            "{{\"model\":\"llama3\",\"message\":{{\"role\":\"assistant\",\"content\":\"part {idx} \"}}}}"
        ));
    }
    body
}

fn truncated_body() -> String {
    let mut body = String::from("{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"");
    for _ in 0..64 {
        body.push_str("a partially streamed sentence \\\"quoted\\\" ");
    }
    body
}

fn bench_split_and_classify(c: &mut Criterion) {
    let ndjson = ndjson_body(256);
    let concatenated = concatenated_body(256);
    let truncated = truncated_body();

    c.bench_function("split_ndjson_256_lines", |b| {
        b.iter(|| black_box(split(black_box(&ndjson))));
    });

    c.bench_function("split_concatenated_256_objects", |b| {
        b.iter(|| black_box(split(black_box(&concatenated))));
    });

    c.bench_function("classify_truncated_object", |b| {
        b.iter(|| black_box(classify(black_box(&truncated))));
    });
}

fn bench_extract(c: &mut Criterion) {
    let ctx = ExtractContext::new(&DecoderConfig::default(), Some("llama3"));
    let ndjson_chunks = split(&ndjson_body(64));
    let truncated_chunks = split(&truncated_body());

    c.bench_function("extract_ndjson_64_lines", |b| {
        b.iter(|| {
            for chunk in &ndjson_chunks {
                black_box(extract(black_box(chunk), &ctx));
            }
        });
    });

    c.bench_function("extract_truncated_object", |b| {
        b.iter(|| {
            for chunk in &truncated_chunks {
                black_box(extract(black_box(chunk), &ctx));
            }
        });
    });
}

fn bench_recovery(c: &mut Criterion) {
    let ctx = ExtractContext::new(&DecoderConfig::default(), Some("llama3"));
    let damaged = format!("garbage before {} trailing", truncated_body());
    let artifact_heavy = r#"{"model": "llama3", "created_at": "2024-05-01", "note": "the answer is forty two, said the model"}"#;

    c.bench_function("recover_body_damaged_stream", |b| {
        b.iter(|| black_box(recover_body(black_box(&damaged), &ctx)));
    });

    c.bench_function("remove_json_artifacts_metadata_object", |b| {
        b.iter(|| black_box(remove_json_artifacts(black_box(artifact_heavy), Some("llama3"))));
    });
}

fn bench_session_pieces(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let body = ndjson_body(128);

    c.bench_function("session_deliver_ndjson_128_lines_in_64b_pieces", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let (decoder, stream) = StreamDecoder::new(
                    DecoderConfig::default(),
                    &LivenessConfig::default(),
                    RequestMeta {
                        model: Some("llama3".to_string()),
                    },
                );
                for piece in body.as_bytes().chunks(64) {
                    decoder.deliver(piece);
                }
                decoder.complete();
                black_box(stream.collect().await)
            })
        });
    });
}

criterion_group!(
    benches,
    bench_split_and_classify,
    bench_extract,
    bench_recovery,
    bench_session_pieces
);
criterion_main!(benches);
