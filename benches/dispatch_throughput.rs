// Benchmarks the dispatch loop's per-ready-fd cost by driving a real
// Reactor::run over pipes that are readable from the start, and the
// timer registry's add/remove churn cost in isolation.
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use evloop::{Interest, Reactor};

fn make_pipe() -> [RawFd; 2] {
    let mut fds = [0 as RawFd; 2];
    unsafe {
        libc::pipe(fds.as_mut_ptr());
        libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
        libc::fcntl(fds[1], libc::F_SETFL, libc::O_NONBLOCK);
    }
    fds
}

fn bench_fd_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fd_dispatch");
    for &n in &[8usize, 64, 512] {
        group.bench_function(format!("{n}_ready_fds"), |b| {
            let pipes: Vec<[RawFd; 2]> = (0..n).map(|_| make_pipe()).collect();

            b.iter(|| {
                let reactor = Reactor::new().unwrap();
                let fired = Arc::new(AtomicUsize::new(0));
                for fds in &pipes {
                    unsafe { libc::write(fds[1], b"x".as_ptr() as *const _, 1) };
                    let fired = fired.clone();
                    let reactor_for_cb = reactor.clone();
                    let total = n;
                    reactor.add_fd(
                        fds[0],
                        Interest::READABLE,
                        Box::new(move |fd, _, _| {
                            let mut buf = [0u8; 1];
                            unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, 1) };
                            if fired.fetch_add(1, Ordering::SeqCst) + 1 == total {
                                reactor_for_cb.stop();
                            }
                        }),
                    );
                }
                reactor.run(Some(Duration::from_millis(1000))).unwrap();
            });

            for fds in &pipes {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
            }
        });
    }
    group.finish();
}

fn bench_timer_add_remove(c: &mut Criterion) {
    c.bench_function("timer_add_remove_cycle", |b| {
        let reactor = Reactor::new().unwrap();
        b.iter(|| {
            let id = reactor
                .add_timer(Duration::from_secs(60), Box::new(|_| {}), false)
                .unwrap();
            reactor.remove_timer(id);
        });
    });
}

criterion_group!(benches, bench_fd_dispatch, bench_timer_add_remove);
criterion_main!(benches);
