// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for IPP request decoding, response encoding, and
// PROXY v1 header parsing in the zikzi-print crate.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use zikzi_print::ipp_codec::{
    IPP_VERSION_MAJOR, IPP_VERSION_MINOR, IppResponseBuilder, OP_GET_PRINTER_ATTRIBUTES,
    OP_PRINT_JOB, PRINTER_STATE_IDLE, STATUS_OK, TAG_END_OF_ATTRIBUTES, TAG_OPERATION_ATTRIBUTES,
    TAG_PRINTER_ATTRIBUTES, VALUE_TAG_CHARSET, VALUE_TAG_MIME_MEDIA_TYPE, VALUE_TAG_NAME,
    VALUE_TAG_NATURAL_LANGUAGE, parse_ipp_request,
};
use zikzi_print::proxy_protocol::read_header;

// ---------------------------------------------------------------------------
// Request construction
// ---------------------------------------------------------------------------

fn build_request(
    operation_id: u16,
    request_id: u32,
    attributes: &[(u8, &str, &[u8])],
    document_data: &[u8],
) -> Vec<u8> {
    let mut buf = vec![IPP_VERSION_MAJOR, IPP_VERSION_MINOR];
    buf.extend_from_slice(&operation_id.to_be_bytes());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.push(TAG_OPERATION_ATTRIBUTES);
    write_attr(&mut buf, VALUE_TAG_CHARSET, "attributes-charset", b"utf-8");
    write_attr(
        &mut buf,
        VALUE_TAG_NATURAL_LANGUAGE,
        "attributes-natural-language",
        b"en",
    );
    for &(tag, name, value) in attributes {
        write_attr(&mut buf, tag, name, value);
    }
    buf.push(TAG_END_OF_ATTRIBUTES);
    buf.extend_from_slice(document_data);
    buf
}

fn write_attr(buf: &mut Vec<u8>, value_tag: u8, name: &str, value: &[u8]) {
    buf.push(value_tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_parse_ipp_request(c: &mut Criterion) {
    let data = build_request(OP_GET_PRINTER_ATTRIBUTES, 42, &[], &[]);
    c.bench_function("parse_ipp_request (minimal)", |b| {
        b.iter(|| {
            let result = parse_ipp_request(black_box(&data));
            assert!(result.is_ok());
        });
    });

    // Print-Job with a 1 MiB payload: the document tail is copied out whole.
    let attrs = [
        (VALUE_TAG_NAME, "job-name", b"Quarterly report" as &[u8]),
        (VALUE_TAG_NAME, "requesting-user-name", b"laptop-7"),
        (VALUE_TAG_MIME_MEDIA_TYPE, "document-format", b"application/postscript"),
    ];
    let doc = vec![b'%'; 1024 * 1024];
    let print_job = build_request(OP_PRINT_JOB, 100, &attrs, &doc);

    let mut group = c.benchmark_group("parse_ipp_request");
    group.throughput(Throughput::Bytes(print_job.len() as u64));
    group.bench_function("print-job 1 MiB", |b| {
        b.iter(|| {
            let result = parse_ipp_request(black_box(&print_job));
            assert!(result.is_ok());
        });
    });
    group.finish();
}

fn bench_build_printer_attributes(c: &mut Criterion) {
    c.bench_function("build Get-Printer-Attributes response", |b| {
        b.iter(|| {
            let mut resp = IppResponseBuilder::new(black_box(STATUS_OK), black_box(1));
            resp.operation_group();
            resp.begin_group(TAG_PRINTER_ATTRIBUTES)
                .uri("printer-uri-supported", "ipp://localhost:631/ipp/print")
                .name_attr("printer-name", "Zikzi")
                .enum_attr("printer-state", PRINTER_STATE_IDLE)
                .keyword("printer-state-reasons", "none")
                .boolean("printer-is-accepting-jobs", true)
                .enums("operations-supported", &[2, 4, 8, 9, 10, 11])
                .mime_types(
                    "document-format-supported",
                    &["application/postscript", "application/pdf", "application/octet-stream"],
                )
                .keywords("ipp-versions-supported", &["1.0", "1.1", "2.0"])
                .keywords("uri-authentication-supported", &["requesting-user-name"])
                .integer("queued-job-count", 3);
            black_box(resp.build());
        });
    });
}

fn bench_proxy_v1_header(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let header: &[u8] = b"PROXY TCP4 192.0.2.10 198.51.100.1 51234 9100\r\n";

    c.bench_function("read_header (PROXY v1)", |b| {
        b.iter(|| {
            let mut input = black_box(header);
            let addr = runtime.block_on(read_header(&mut input)).unwrap();
            assert!(addr.is_some());
        });
    });
}

criterion_group!(
    benches,
    bench_parse_ipp_request,
    bench_build_printer_attributes,
    bench_proxy_v1_header,
);
criterion_main!(benches);
