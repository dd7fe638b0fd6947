use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http_dispatch::http::HttpParser;
use http_dispatch::{
    compose, CompleteRequest, DispatchOptions, Dispatcher, HandlerResult, Listener,
    MemoryChannel, Outcome, RawRequest, Responder, Route, RouteTable, Status, Transport,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

fn ok(_req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    resp.send_status(Status::Ok.code());
    Ok(Outcome::Done)
}

fn route_table(size: usize) -> RouteTable {
    (0..size)
        .map(|i| {
            let route = Route::new(&format!("/api/v1/resource{}/", i), ok);
            if i % 3 == 0 {
                route.methods(["GET"])
            } else {
                route
            }
        })
        .collect()
}

fn benchmark_route_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_table");
    let mut rng = rand::thread_rng();

    for size in [8, 64] {
        let table = route_table(size);
        let mut targets: Vec<String> = (0..256)
            .map(|_| format!("/api/v1/resource{}/item?id={}", rng.gen_range(0..size * 2), rng.gen::<u32>()))
            .collect();
        targets.shuffle(&mut rng);

        group.bench_function(format!("select_{}_routes", size), |b| {
            let mut i = 0;
            b.iter(|| {
                let target = &targets[i % targets.len()];
                i += 1;
                black_box(table.select(black_box(target), "POST"))
            })
        });
    }

    group.finish();
}

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");

    let simple_request = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    group.bench_function("parse_simple_request", |b| {
        b.iter(|| {
            let mut parser = HttpParser::new();
            let (head, _) = parser.parse(simple_request.as_bytes()).unwrap().unwrap();
            assert_eq!(head.target.as_deref(), Some("/"));
        })
    });

    let complex_request = "POST /api/items HTTP/1.1\r\n\
                          Host: example.com\r\n\
                          Content-Type: application/json\r\n\
                          Content-Length: 27\r\n\
                          User-Agent: Benchmark\r\n\
                          Accept: */*\r\n\
                          \r\n\
                          {\"name\":\"test\",\"value\":123}";

    group.bench_function("parse_complex_request", |b| {
        b.iter(|| {
            let mut parser = HttpParser::new();
            let (head, consumed) = parser.parse(complex_request.as_bytes()).unwrap().unwrap();
            assert_eq!(head.method.as_deref(), Some("POST"));
            assert_eq!(complex_request.len() - consumed, 27);
        })
    });

    group.finish();
}

struct BenchListener(Option<Arc<Dispatcher>>);

impl Listener for BenchListener {
    fn transport(&self) -> Transport {
        Transport::Plain
    }

    fn attach(&mut self, dispatcher: Arc<Dispatcher>) {
        self.0 = Some(dispatcher);
    }
}

fn benchmark_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    let mut listener = BenchListener(None);
    compose(&mut listener, route_table(16), DispatchOptions::sane());
    let dispatcher = listener.0.expect("composed");
    let body = vec![b'x'; 4096];

    group.bench_function("post_4k_body", |b| {
        b.iter(|| {
            let channel = MemoryChannel::new();
            let raw = RawRequest::new("POST", "/api/v1/resource7/item").with_header("Host", "localhost");
            let mut exchange = dispatcher.handle(raw, Box::new(channel.clone())).unwrap();
            for chunk in body.chunks(1024) {
                exchange.on_data(chunk);
            }
            exchange.on_end().unwrap();
            exchange.on_close();
            assert_eq!(channel.snapshot().status, Some(200));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_route_selection,
    benchmark_http_parsing,
    benchmark_dispatch
);
criterion_main!(benches);
