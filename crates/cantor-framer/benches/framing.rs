use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cantor_core::BackendProfile;
use cantor_framer::{Framer, PromptFramer, SentinelFramer};

/// Output of a command printing a matrix of `rows` lines.
fn matrix_output(rows: usize) -> Vec<String> {
    (0..rows)
        .map(|i| format!("   {}   {}   {}", i, i * 2, i * 3))
        .collect()
}

fn bench_prompt_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("prompt_framer");

    for rows in [1usize, 100, 1000].iter() {
        let lines = matrix_output(*rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &lines, |b, lines| {
            let mut framer = PromptFramer::from_config(&BackendProfile::octave().framing).unwrap();
            framer.begin_resync();
            framer.accept_line("CANTOR_OCTAVE_BACKEND_PROMPT:1> ");
            let mut number = 1u64;

            b.iter(|| {
                framer.wrap_command("magic(4)");
                for line in lines {
                    black_box(framer.accept_line(line));
                }
                number += 1;
                black_box(framer.accept_line(&format!("CANTOR_OCTAVE_BACKEND_PROMPT:{number}> ")))
            });
        });
    }

    group.finish();
}

fn bench_sentinel_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentinel_framer");

    for rows in [1usize, 100, 1000].iter() {
        let lines = matrix_output(*rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &lines, |b, lines| {
            let mut framer =
                SentinelFramer::from_config(&BackendProfile::scilab().framing).unwrap();

            b.iter(|| {
                framer.wrap_command("testmatrix('magi', 4)");
                framer.accept_line("begin-cantor-scilab-command-processing");
                for line in lines {
                    black_box(framer.accept_line(line));
                }
                black_box(framer.accept_line("terminated-cantor-scilab-command-processing"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prompt_framer, bench_sentinel_framer);
criterion_main!(benches);
