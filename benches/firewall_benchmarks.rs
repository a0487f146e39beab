//! Firewall rule generation and allowlist parsing benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use vpnqa::allowlist::{is_private_subnet, Port, PortSpec, Protocol};
use vpnqa::firewall::{rules_allowlist, rules_killswitch_on, sort_ports_by_protocol};

fn ports(count: u16) -> Vec<Port> {
    (0..count)
        .map(|i| {
            let spec = if i % 3 == 0 {
                PortSpec::Range(3000 + i * 10, 3005 + i * 10)
            } else {
                PortSpec::Single(20 + i)
            };
            let protocol = match i % 3 {
                0 => Protocol::All,
                1 => Protocol::Udp,
                _ => Protocol::Tcp,
            };
            Port::new(spec, protocol)
        })
        .collect()
}

fn subnets(count: u8) -> Vec<String> {
    (0..count).map(|i| format!("192.168.{i}.0/24")).collect()
}

fn rule_generation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_generation");

    group.bench_function("killswitch_rules", |b| {
        b.iter(|| {
            let rules = rules_killswitch_on(black_box("eth0"));
            black_box(rules);
        });
    });

    let ports = ports(12);
    let subnets = subnets(4);
    group.bench_function("allowlist_rules", |b| {
        b.iter(|| {
            let rules = rules_allowlist(black_box("eth0"), black_box(&subnets), black_box(&ports));
            black_box(rules);
        });
    });

    group.finish();
}

fn port_sorting_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_sorting");

    for count in [4u16, 32, 256] {
        let ports = ports(count);
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::new("sort_by_protocol", count), &ports, |b, ports| {
            b.iter(|| {
                let sorted = sort_ports_by_protocol(black_box(ports));
                black_box(sorted);
            });
        });
    }

    group.finish();
}

fn allowlist_parsing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("allowlist_parsing");

    group.bench_function("parse_port_range", |b| {
        b.iter(|| {
            let spec: PortSpec = black_box("3000:4000").parse().unwrap();
            black_box(spec);
        });
    });

    group.bench_function("private_subnet_check", |b| {
        b.iter(|| {
            for subnet in ["10.1.0.0/16", "172.20.0.0/24", "8.8.8.8", "1.1.1.0/24"] {
                black_box(is_private_subnet(black_box(subnet)));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    rule_generation_benchmark,
    port_sorting_benchmark,
    allowlist_parsing_benchmark
);
criterion_main!(benches);
