use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fanoutdns::dns::ResolverConfig;

fn sample(groups: usize) -> String {
    let mut text = String::from("DNS configuration\n\n");
    for i in 0..groups {
        text.push_str(&format!(
            "resolver #{n}\n\
             \x20 search domain[0] : corp{i}.example.com\n\
             \x20 nameserver[0] : 10.{i}.0.1\n\
             \x20 nameserver[1] : fe80::{i}%en0\n\
             \x20 if_index : 6 (en0)\n\
             \x20 flags    : Request A records, Request AAAA records\n\
             \x20 reach    : 0x00020002 (Reachable,Directly Reachable Address)\n\
             \x20 order    : {i}00000\n\n",
            n = i + 1
        ));
    }
    text
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("scutil_parse");

    let typical = sample(8);
    group.bench_function("parse_8_groups", |b| {
        b.iter(|| black_box(ResolverConfig::parse(black_box(&typical))));
    });

    let large = sample(128);
    group.bench_function("parse_128_groups", |b| {
        b.iter(|| black_box(ResolverConfig::parse(black_box(&large))));
    });

    let config = ResolverConfig::parse(&typical);
    group.bench_function("socket_addrs_8_groups", |b| {
        b.iter(|| {
            config
                .nameservers()
                .filter_map(|(r, ns)| r.socket_addr(ns))
                .count()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
