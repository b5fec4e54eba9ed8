use criterion::measurement::Measurement;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fiber::Fiber;

/// Measures the cost of a round-trip switch: main -> child -> main.
fn fiber_switch<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    let main_fiber = Fiber::current();
    let child = Fiber::spawn(64 * 1024, move || {
        loop {
            main_fiber.switch_to();
        }
    })
    .unwrap();

    c.bench_function(name, |b| {
        b.iter(|| {
            black_box(&child).switch_to();
        })
    });
}

fn fiber_switch_time(c: &mut Criterion) {
    fiber_switch("fiber_switch_time", c);
}

criterion_group!(
    name = time;
    config = Criterion::default();
    targets = fiber_switch_time
);

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        use criterion_cycles_per_byte::CyclesPerByte;

        fn fiber_switch_cycles(c: &mut Criterion<CyclesPerByte>) {
            fiber_switch("fiber_switch_cycles", c);
        }

        criterion_group!(
            name = cycles;
            config = Criterion::default().with_measurement(CyclesPerByte);
            targets = fiber_switch_cycles
        );

        criterion_main!(cycles, time);
    } else {
        criterion_main!(time);
    }
}
